//! Camera liveness monitoring
//!
//! [`CameraMonitorService`] owns one [`LivenessMonitor`] per configured camera
//! and publishes their online/offline edges on a shared [`EventBus`].

mod liveness;
mod watchdog;

pub use liveness::{CameraStatus, LivenessMonitor, LivenessState, MonitorSettings};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::camera::CameraEndpoint;
use crate::events::EventBus;
use crate::transport::Transport;

/// Monitors a set of cameras
pub struct CameraMonitorService {
    transport: Arc<dyn Transport>,
    events: Arc<EventBus>,
    settings: MonitorSettings,
    monitors: RwLock<HashMap<String, Arc<LivenessMonitor>>>,
    cancel: Mutex<CancellationToken>,
    /// Serializes start/stop of the whole set
    lifecycle: tokio::sync::Mutex<()>,
}

impl CameraMonitorService {
    pub fn new(transport: Arc<dyn Transport>, events: Arc<EventBus>, settings: MonitorSettings) -> Self {
        Self {
            transport,
            events,
            settings,
            monitors: RwLock::new(HashMap::new()),
            cancel: Mutex::new(CancellationToken::new()),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Replace the monitored set with `endpoints` and start them all
    ///
    /// Anything already being monitored is stopped first. Later entries win
    /// over earlier ones with the same name.
    pub async fn start_monitoring(&self, endpoints: Vec<CameraEndpoint>) {
        let _guard = self.lifecycle.lock().await;
        self.stop_all().await;

        let mut monitors = HashMap::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let name = endpoint.name().to_string();
            let monitor = Arc::new(LivenessMonitor::new(
                Arc::new(endpoint),
                self.transport.clone(),
                self.events.clone(),
                self.settings.clone(),
            ));
            if monitors.insert(name.clone(), monitor).is_some() {
                warn!("Duplicate camera name {}, keeping the last definition", name);
            }
        }

        let cancel = CancellationToken::new();
        for monitor in monitors.values() {
            monitor.start(&cancel).await;
        }

        info!("Monitoring {} camera(s)", monitors.len());
        *self.cancel.lock() = cancel;
        *self.monitors.write() = monitors;
    }

    /// Stop every monitor and dispose their sessions
    ///
    /// Returns once all monitor tasks have exited. No status notifications
    /// are published for cameras that were online.
    pub async fn stop_monitoring(&self) {
        let _guard = self.lifecycle.lock().await;
        self.stop_all().await;
    }

    async fn stop_all(&self) {
        self.cancel.lock().cancel();

        let monitors: Vec<_> = self.monitors.write().drain().map(|(_, m)| m).collect();
        if monitors.is_empty() {
            return;
        }
        futures::future::join_all(monitors.iter().map(|m| m.stop())).await;
        info!("Stopped monitoring {} camera(s)", monitors.len());
    }

    pub fn monitor(&self, name: &str) -> Option<Arc<LivenessMonitor>> {
        self.monitors.read().get(name).cloned()
    }

    pub fn status(&self, name: &str) -> Option<CameraStatus> {
        self.monitors.read().get(name).map(|m| m.status())
    }

    /// Status of every camera, sorted by name
    pub fn statuses(&self) -> Vec<CameraStatus> {
        let mut statuses: Vec<_> = self.monitors.read().values().map(|m| m.status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub fn len(&self) -> usize {
        self.monitors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.read().is_empty()
    }
}
