use thiserror::Error;

use crate::h264::H264Error;

/// Crate-wide error type
///
/// Transport errors never escape a monitor task; they become state
/// transitions there. The diagnostic paths (`test`, `probe`) surface them to
/// the caller.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Transport connect failed [{camera}]: {reason}")]
    TransportConnect { camera: String, reason: String },

    #[error("Bitstream error: {0}")]
    Bitstream(#[from] H264Error),

    #[error("Probe timed out: {0}")]
    ProbeTimeout(String),

    #[error("Probe refused: {0}")]
    ProbeRefused(String),

    #[error("Operation canceled")]
    Canceled,

    #[error("No frames received from {0}")]
    NoFrames(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MonitorError {
    pub fn connect(camera: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::TransportConnect {
            camera: camera.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, MonitorError>;
