//! Staleness watchdog
//!
//! One per streaming session. It only reads the shared last-frame timestamp;
//! acting on a stale stream is left to the monitor task, which receives the
//! verdict and tears the session down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::liveness::Shared;

/// Poll until the stream has been silent longer than `offline_timeout`
///
/// Sends the observed silence and exits. Exits without a verdict when
/// `cancel` fires.
pub(crate) async fn watch(
    shared: Arc<Shared>,
    offline_timeout: Duration,
    poll_interval: Duration,
    cancel: CancellationToken,
    verdict: oneshot::Sender<Duration>,
) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let silence = shared.silence();
        if silence > offline_timeout {
            trace!(
                "Camera {} silent for {:?} (limit {:?})",
                shared.camera(),
                silence,
                offline_timeout
            );
            let _ = verdict.send(silence);
            return;
        }
    }
}
