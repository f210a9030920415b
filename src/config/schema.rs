use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::camera::{CameraEndpoint, Credentials};
use crate::error::{MonitorError, Result};

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Silence after which a camera is declared offline, in milliseconds
    pub offline_timeout_ms: u64,
    /// Cameras to monitor, in display order
    pub cameras: Vec<CameraConfig>,
    /// Liveness monitor tuning
    pub monitor: MonitorConfig,
    /// Reachability probe run when a stream goes stale
    pub probe: ProbeConfig,
    /// One-shot stream diagnostics
    pub diagnostics: DiagnosticsConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            offline_timeout_ms: 1000,
            cameras: Vec::new(),
            monitor: MonitorConfig::default(),
            probe: ProbeConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// One camera
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Unique display name
    pub name: String,
    /// `rtsp://host[:port]/path`
    pub rtsp_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Overrides the global offline timeout for this camera
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Watchdog poll interval
    pub poll_interval_ms: u64,
    /// Fixed delay between a failed or ended session and the next connect
    pub reconnect_backoff_ms: u64,
    /// Frames buffered between the transport and the monitor task
    pub frame_channel_capacity: usize,
    /// Bound on establishing one RTSP session
    pub connect_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            reconnect_backoff_ms: 1000,
            frame_channel_capacity: 64,
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub enabled: bool,
    /// Bound on both the TCP connect and the response read
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// How long `test` streams before computing statistics
    pub test_seconds: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self { test_seconds: 5 }
    }
}

/// Log output settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for a daily rolling `camwatch.log`; console only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

impl AppConfig {
    /// Check the configuration before it is used or persisted
    pub fn validate(&self) -> Result<()> {
        if self.offline_timeout_ms == 0 {
            return Err(MonitorError::Config(
                "offline_timeout_ms must be positive".to_string(),
            ));
        }
        if self.monitor.poll_interval_ms == 0 {
            return Err(MonitorError::Config(
                "monitor.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.monitor.frame_channel_capacity == 0 {
            return Err(MonitorError::Config(
                "monitor.frame_channel_capacity must be positive".to_string(),
            ));
        }
        if self.monitor.connect_timeout_ms == 0 {
            return Err(MonitorError::Config(
                "monitor.connect_timeout_ms must be positive".to_string(),
            ));
        }
        if self.probe.enabled && self.probe.timeout_ms == 0 {
            return Err(MonitorError::Config(
                "probe.timeout_ms must be positive".to_string(),
            ));
        }
        if self.diagnostics.test_seconds == 0 {
            return Err(MonitorError::Config(
                "diagnostics.test_seconds must be positive".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for camera in &self.cameras {
            camera.validate()?;
            if !names.insert(camera.name.as_str()) {
                return Err(MonitorError::Config(format!(
                    "duplicate camera name: {}",
                    camera.name
                )));
            }
        }
        Ok(())
    }

    pub fn offline_timeout(&self) -> Duration {
        Duration::from_millis(self.offline_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.monitor.connect_timeout_ms)
    }

    pub fn camera(&self, name: &str) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| c.name == name)
    }

    /// Endpoints for every configured camera, in configuration order
    pub fn endpoints(&self) -> Result<Vec<CameraEndpoint>> {
        self.cameras
            .iter()
            .map(|c| c.endpoint(self.offline_timeout()))
            .collect()
    }
}

impl CameraConfig {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(MonitorError::Config("camera name is empty".to_string()));
        }
        self.parse_url()?;
        if self.offline_timeout_ms == Some(0) {
            return Err(MonitorError::Config(format!(
                "camera {}: offline_timeout_ms must be positive",
                self.name
            )));
        }
        Ok(())
    }

    fn parse_url(&self) -> Result<Url> {
        let url = Url::parse(&self.rtsp_url).map_err(|e| {
            MonitorError::Config(format!("camera {}: invalid rtsp_url: {}", self.name, e))
        })?;
        if url.scheme() != "rtsp" {
            return Err(MonitorError::Config(format!(
                "camera {}: rtsp_url must use the rtsp:// scheme",
                self.name
            )));
        }
        if url.host_str().is_none() {
            return Err(MonitorError::Config(format!(
                "camera {}: rtsp_url has no host",
                self.name
            )));
        }
        Ok(url)
    }

    /// Resolve into an endpoint, applying the global timeout unless overridden
    ///
    /// Credentials are only attached when both username and password are set.
    pub fn endpoint(&self, default_timeout: Duration) -> Result<CameraEndpoint> {
        let url = self.parse_url()?;
        let credentials = match (&self.username, &self.password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Credentials::new(username.clone(), password.clone()))
            }
            _ => None,
        };
        let offline_timeout = self
            .offline_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(default_timeout);

        Ok(CameraEndpoint::new(self.name.clone(), url, credentials, offline_timeout))
    }
}
