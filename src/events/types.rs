//! Monitor event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::h264::SpsInfo;
use crate::monitor::LivenessState;
use crate::probe::ProbeOutcome;

/// Monitor event enumeration
///
/// Serialized with the event name as tag:
/// ```json
/// {
///   "event": "camera.status_changed",
///   "data": { "camera": "porch", "offline": true, "timestamp": "..." }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum MonitorEvent {
    /// Camera went online or offline
    ///
    /// Published once per edge; a camera that never came online is never
    /// reported offline.
    #[serde(rename = "camera.status_changed")]
    CameraStatusChanged {
        camera: String,
        offline: bool,
        timestamp: DateTime<Utc>,
    },

    /// Monitor state machine moved
    #[serde(rename = "camera.state_changed")]
    CameraStateChanged {
        camera: String,
        state: LivenessState,
        /// Connect attempts since the last successful stream
        reconnect_attempts: u32,
    },

    /// A key frame carried a different resolution than last seen
    #[serde(rename = "camera.resolution_changed")]
    CameraResolutionChanged { camera: String, resolution: SpsInfo },

    /// Reachability probe ran after the stream went stale
    #[serde(rename = "camera.probe_completed")]
    CameraProbeCompleted {
        camera: String,
        reachable: bool,
        outcome: ProbeOutcome,
        latency_ms: u64,
    },
}

impl MonitorEvent {
    pub fn status_changed(camera: impl Into<String>, offline: bool) -> Self {
        Self::CameraStatusChanged {
            camera: camera.into(),
            offline,
            timestamp: Utc::now(),
        }
    }

    /// Event name, as used in the serialized `event` tag
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::CameraStatusChanged { .. } => "camera.status_changed",
            Self::CameraStateChanged { .. } => "camera.state_changed",
            Self::CameraResolutionChanged { .. } => "camera.resolution_changed",
            Self::CameraProbeCompleted { .. } => "camera.probe_completed",
        }
    }

    /// Camera the event is about
    pub fn camera(&self) -> &str {
        match self {
            Self::CameraStatusChanged { camera, .. }
            | Self::CameraStateChanged { camera, .. }
            | Self::CameraResolutionChanged { camera, .. }
            | Self::CameraProbeCompleted { camera, .. } => camera,
        }
    }
}
