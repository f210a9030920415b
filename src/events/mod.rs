//! Event bus for camera notifications
//!
//! Every monitor publishes here; the CLI (or any embedding shell) subscribes.

pub mod types;

pub use types::MonitorEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast bus for monitor events
///
/// ```no_run
/// use camwatch::events::{EventBus, MonitorEvent};
///
/// # async fn demo() {
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(MonitorEvent::status_changed("porch", false));
///
/// while let Ok(event) = rx.recv().await {
///     println!("{}: {:?}", event.event_name(), event);
/// }
/// # }
/// ```
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish to all subscribers; dropped when there are none
    pub fn publish(&self, event: MonitorEvent) {
        let _ = self.tx.send(event);
    }

    /// Receive all future events
    ///
    /// A subscriber that falls more than the channel capacity behind gets
    /// `RecvError::Lagged` and misses events.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
