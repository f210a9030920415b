//! Log throttling
//!
//! A camera that stays unreachable fails to connect once per backoff interval,
//! forever. The throttler keeps that from turning into one warning per second.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Entry {
    last_logged: Instant,
    suppressed: u64,
}

/// Limits how often the same message key is logged
///
/// Uses tokio's clock so paused-time tests see the same behavior as a
/// real runtime.
///
/// ```
/// use std::time::Duration;
/// use camwatch::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(Duration::from_secs(30));
/// assert!(throttler.should_log("front-door"));
/// assert!(!throttler.should_log("front-door"));
/// assert_eq!(throttler.suppressed("front-door"), 1);
/// ```
pub struct LogThrottler {
    entries: Mutex<HashMap<String, Entry>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Whether a message for `key` should be emitted now
    ///
    /// Returns `true` at most once per interval per key. Throttled calls are
    /// counted and the count resets on the next emitted message.
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last_logged) < self.interval => {
                entry.suppressed += 1;
                false
            }
            Some(entry) => {
                entry.last_logged = now;
                entry.suppressed = 0;
                true
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                true
            }
        }
    }

    /// Messages swallowed for `key` since it was last logged
    pub fn suppressed(&self, key: &str) -> u64 {
        self.entries.lock().get(key).map_or(0, |e| e.suppressed)
    }

    /// Forget `key`, so its next message is logged immediately
    ///
    /// Call when the condition behind the message recovers.
    pub fn clear(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for LogThrottler {
    /// 30 second interval
    fn default() -> Self {
        Self::with_secs(30)
    }
}

/// Throttled `tracing::warn!`
///
/// ```
/// use camwatch::utils::LogThrottler;
/// use camwatch::warn_throttled;
///
/// let throttler = LogThrottler::default();
/// warn_throttled!(throttler, "porch", "Connect failed: {}", "timed out");
/// ```
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_throttling_window() {
        let throttler = LogThrottler::new(Duration::from_millis(100));

        assert!(throttler.should_log("cam"));
        assert!(!throttler.should_log("cam"));
        assert!(!throttler.should_log("cam"));
        assert_eq!(throttler.suppressed("cam"), 2);

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(throttler.should_log("cam"));
        assert_eq!(throttler.suppressed("cam"), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let throttler = LogThrottler::with_secs(10);

        assert!(throttler.should_log("porch"));
        assert!(throttler.should_log("garage"));
        assert!(!throttler.should_log("porch"));
        assert!(!throttler.should_log("garage"));
        assert_eq!(throttler.len(), 2);
    }

    #[test]
    fn test_clear_resets_key() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.is_empty());

        assert!(throttler.should_log("porch"));
        assert!(!throttler.should_log("porch"));

        throttler.clear("porch");
        assert!(throttler.is_empty());
        assert!(throttler.should_log("porch"));
    }
}
