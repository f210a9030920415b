//! Per-camera liveness state machine
//!
//! ```text
//! Idle -> Connecting -> Streaming <-> Reconnecting
//!             ^                            |
//!             +--------- backoff ----------+
//! ```
//!
//! Each camera runs as one task that owns the transport session and the
//! receiving end of the frame channel, plus a watchdog task per session.
//! Online/offline notifications are gated on an atomic flag so each edge is
//! published exactly once, however many times the watchdog or a failed
//! connect reports the same condition.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::watchdog;
use crate::camera::CameraEndpoint;
use crate::config::AppConfig;
use crate::error::MonitorError;
use crate::events::{EventBus, MonitorEvent};
use crate::h264::{sps_from_frame, SpsInfo};
use crate::probe::ReachabilityProbe;
use crate::transport::{frame_channel, FrameEvent, Transport};
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// Monitor state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessState {
    /// Constructed or stopped
    Idle,
    /// Waiting on the transport
    Connecting,
    /// Session up, watchdog running
    Streaming,
    /// Session failed or went stale, waiting out the backoff
    Reconnecting,
}

impl fmt::Display for LivenessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of one camera
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraStatus {
    pub name: String,
    pub state: LivenessState,
    pub online: bool,
    /// Milliseconds since the last frame, or since the session was
    /// established when no frame has arrived on it yet. `None` before the
    /// first connect.
    pub last_frame_age_ms: Option<u64>,
    pub resolution: Option<SpsInfo>,
    pub frames_received: u64,
    /// Failed connects since the last successful one
    pub reconnect_attempts: u32,
}

/// Monitor tuning
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub reconnect_backoff: Duration,
    pub frame_channel_capacity: usize,
    /// Probe the host when a stream goes stale; `None` disables it
    pub probe_timeout: Option<Duration>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            reconnect_backoff: Duration::from_secs(1),
            frame_channel_capacity: 64,
            probe_timeout: Some(Duration::from_millis(500)),
        }
    }
}

impl From<&AppConfig> for MonitorSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.monitor.poll_interval_ms),
            reconnect_backoff: Duration::from_millis(config.monitor.reconnect_backoff_ms),
            frame_channel_capacity: config.monitor.frame_channel_capacity,
            probe_timeout: config
                .probe
                .enabled
                .then(|| Duration::from_millis(config.probe.timeout_ms)),
        }
    }
}

/// State shared between a camera's monitor task, its watchdog and readers
pub(crate) struct Shared {
    camera: String,
    events: Arc<EventBus>,
    state: RwLock<LivenessState>,
    online: AtomicBool,
    /// Reference point for `last_frame_us`
    epoch: Instant,
    /// Microseconds since `epoch` plus one; zero means no frame yet
    last_frame_us: AtomicU64,
    resolution: RwLock<Option<SpsInfo>>,
    frames_received: AtomicU64,
    reconnect_attempts: AtomicU32,
    throttler: LogThrottler,
}

impl Shared {
    pub(crate) fn new(camera: impl Into<String>, events: Arc<EventBus>) -> Self {
        Self {
            camera: camera.into(),
            events,
            state: RwLock::new(LivenessState::Idle),
            online: AtomicBool::new(false),
            epoch: Instant::now(),
            last_frame_us: AtomicU64::new(0),
            resolution: RwLock::new(None),
            frames_received: AtomicU64::new(0),
            reconnect_attempts: AtomicU32::new(0),
            throttler: LogThrottler::default(),
        }
    }

    pub(crate) fn camera(&self) -> &str {
        &self.camera
    }

    /// Record frame activity at `at`; never moves the timestamp backwards
    pub(crate) fn touch(&self, at: Instant) {
        let us = at.saturating_duration_since(self.epoch).as_micros() as u64 + 1;
        self.last_frame_us.fetch_max(us, Ordering::AcqRel);
    }

    fn last_frame(&self) -> Option<Instant> {
        match self.last_frame_us.load(Ordering::Acquire) {
            0 => None,
            us => Some(self.epoch + Duration::from_micros(us - 1)),
        }
    }

    /// Time since the last frame (or since construction if none arrived)
    pub(crate) fn silence(&self) -> Duration {
        let last = self.last_frame().unwrap_or(self.epoch);
        Instant::now().saturating_duration_since(last)
    }

    fn state(&self) -> LivenessState {
        *self.state.read()
    }

    fn set_state(&self, next: LivenessState) {
        {
            let mut state = self.state.write();
            if *state == next {
                return;
            }
            debug!("Camera {} state {} -> {}", self.camera, *state, next);
            *state = next;
        }
        self.events.publish(MonitorEvent::CameraStateChanged {
            camera: self.camera.clone(),
            state: next,
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        });
    }

    fn mark_online(&self) {
        if !self.online.swap(true, Ordering::AcqRel) {
            info!("Camera {} is online", self.camera);
            self.events
                .publish(MonitorEvent::status_changed(self.camera.clone(), false));
        }
    }

    /// Offline edge; a camera that was never online stays silent
    fn mark_offline(&self) {
        if self.online.swap(false, Ordering::AcqRel) {
            warn!("Camera {} is offline", self.camera);
            self.events
                .publish(MonitorEvent::status_changed(self.camera.clone(), true));
        }
    }

    fn on_frame(&self, frame: &FrameEvent) {
        self.touch(frame.received_at);
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.mark_online();

        if !frame.is_key_frame() {
            return;
        }
        match sps_from_frame(&frame.data) {
            Some(info) => {
                let previous = self.resolution.write().replace(info);
                if previous != Some(info) {
                    info!("Camera {} resolution {}", self.camera, info);
                    self.events.publish(MonitorEvent::CameraResolutionChanged {
                        camera: self.camera.clone(),
                        resolution: info,
                    });
                }
            }
            None => trace!("Camera {}: no SPS decoded from key frame", self.camera),
        }
    }

    fn status(&self) -> CameraStatus {
        CameraStatus {
            name: self.camera.clone(),
            state: self.state(),
            online: self.online.load(Ordering::Acquire),
            last_frame_age_ms: self
                .last_frame()
                .map(|t| Instant::now().saturating_duration_since(t).as_millis() as u64),
            resolution: *self.resolution.read(),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Liveness monitor for one camera
pub struct LivenessMonitor {
    runner: Runner,
    run: Mutex<Option<RunHandle>>,
}

impl LivenessMonitor {
    pub fn new(
        endpoint: Arc<CameraEndpoint>,
        transport: Arc<dyn Transport>,
        events: Arc<EventBus>,
        settings: MonitorSettings,
    ) -> Self {
        let shared = Arc::new(Shared::new(endpoint.name(), events.clone()));
        let probe = settings.probe_timeout.map(ReachabilityProbe::new);
        Self {
            runner: Runner {
                endpoint,
                transport,
                events,
                settings,
                probe,
                shared,
            },
            run: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.runner.endpoint.name()
    }

    pub fn endpoint(&self) -> &CameraEndpoint {
        &self.runner.endpoint
    }

    pub fn state(&self) -> LivenessState {
        self.runner.shared.state()
    }

    pub fn status(&self) -> CameraStatus {
        self.runner.shared.status()
    }

    /// Start monitoring under `parent`
    ///
    /// A task already running for this camera is stopped and awaited first,
    /// so at most one monitor task exists per camera.
    pub async fn start(&self, parent: &CancellationToken) {
        let mut run = self.run.lock().await;
        if let Some(previous) = run.take() {
            debug!("Camera {} restarting monitor", self.name());
            previous.cancel.cancel();
            if let Err(e) = previous.task.await {
                warn!("Camera {} monitor task failed: {}", self.name(), e);
            }
        }

        let cancel = parent.child_token();
        let runner = self.runner.clone();
        let task = tokio::spawn(runner.run(cancel.clone()));
        *run = Some(RunHandle { cancel, task });
    }

    /// Stop monitoring and dispose any live session
    ///
    /// Safe to call in any state, including before `start`.
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        if let Some(handle) = run.take() {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                warn!("Camera {} monitor task failed: {}", self.name(), e);
            }
            info!("Camera {} monitoring stopped", self.name());
        }
        self.runner.shared.set_state(LivenessState::Idle);
    }

    /// Whether a monitor task is currently running
    pub async fn is_running(&self) -> bool {
        self.run
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }
}

/// Why a streaming session ended
enum SessionEnd {
    Canceled,
    /// Watchdog verdict with the observed silence
    Stale(Duration),
    /// Transport dropped the frame sink
    Closed,
}

/// Everything the monitor task needs, cheap to clone into it
#[derive(Clone)]
struct Runner {
    endpoint: Arc<CameraEndpoint>,
    transport: Arc<dyn Transport>,
    events: Arc<EventBus>,
    settings: MonitorSettings,
    probe: Option<ReachabilityProbe>,
    shared: Arc<Shared>,
}

impl Runner {
    async fn run(self, cancel: CancellationToken) {
        let name = self.endpoint.name();
        info!("Monitoring camera {} ({})", name, self.endpoint.url());

        while !cancel.is_cancelled() {
            self.shared.set_state(LivenessState::Connecting);

            let (sink, mut frames) = frame_channel(self.settings.frame_channel_capacity);
            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.transport.connect(&self.endpoint, sink, cancel.child_token()) => result,
            };

            let session = match connected {
                Ok(session) => session,
                Err(MonitorError::Canceled) if cancel.is_cancelled() => break,
                Err(e) => {
                    let attempts = self.shared.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
                    warn_throttled!(
                        self.shared.throttler,
                        name,
                        "Camera {} connect failed (attempt {}): {}",
                        name,
                        attempts,
                        e
                    );
                    self.shared.mark_offline();
                    self.shared.set_state(LivenessState::Reconnecting);
                    if !self.backoff(&cancel).await {
                        break;
                    }
                    continue;
                }
            };

            self.shared.reconnect_attempts.store(0, Ordering::Relaxed);
            self.shared.throttler.clear(name);
            self.shared.touch(Instant::now());
            self.shared.set_state(LivenessState::Streaming);

            let session_cancel = cancel.child_token();
            let (verdict_tx, mut verdict_rx) = oneshot::channel();
            let watchdog = tokio::spawn(watchdog::watch(
                self.shared.clone(),
                self.endpoint.offline_timeout(),
                self.settings.poll_interval,
                session_cancel.clone(),
                verdict_tx,
            ));

            let end = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break SessionEnd::Canceled,
                    verdict = &mut verdict_rx => match verdict {
                        Ok(silence) => break SessionEnd::Stale(silence),
                        // Watchdog gone without a verdict; only happens on cancel
                        Err(_) => break SessionEnd::Canceled,
                    },
                    frame = frames.recv() => match frame {
                        Some(frame) => self.shared.on_frame(&frame),
                        None => break SessionEnd::Closed,
                    },
                }
            };

            session_cancel.cancel();
            let _ = watchdog.await;
            drop(frames);

            match end {
                SessionEnd::Canceled => {
                    session.dispose().await;
                    break;
                }
                SessionEnd::Stale(silence) => {
                    debug!("Camera {} no frames for {:?}", name, silence);
                }
                SessionEnd::Closed => {
                    debug!("Camera {} stream ended by transport", name);
                }
            }

            self.shared.set_state(LivenessState::Reconnecting);
            self.shared.mark_offline();
            self.probe_host(&cancel).await;
            session.dispose().await;

            if !self.backoff(&cancel).await {
                break;
            }
        }

        debug!("Camera {} monitor task exiting", name);
    }

    /// Wait out the reconnect backoff; `false` if canceled meanwhile
    async fn backoff(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.settings.reconnect_backoff) => true,
        }
    }

    /// Diagnostic only: the reconnect happens whatever the probe says
    async fn probe_host(&self, cancel: &CancellationToken) {
        let Some(probe) = &self.probe else {
            return;
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = probe.probe_endpoint(&self.endpoint) => result,
        };

        if result.reachable {
            info!(
                "Camera {} host answers RTSP but the stream stalled",
                self.endpoint.name()
            );
        } else {
            info!(
                "Camera {} host unreachable: {}",
                self.endpoint.name(),
                result.outcome
            );
        }

        self.events.publish(MonitorEvent::CameraProbeCompleted {
            camera: self.endpoint.name().to_string(),
            reachable: result.reachable,
            outcome: result.outcome,
            latency_ms: result.latency.as_millis() as u64,
        });
    }
}
