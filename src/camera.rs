//! Camera identity

use std::fmt;
use std::time::Duration;

use url::{Host, Url};

/// Default RTSP port when the URL has none
pub const DEFAULT_RTSP_PORT: u16 = 554;

/// Username/password passed through to the transport
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A camera to monitor
///
/// Immutable after construction; monitors share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraEndpoint {
    name: String,
    url: Url,
    credentials: Option<Credentials>,
    offline_timeout: Duration,
}

impl CameraEndpoint {
    pub fn new(
        name: impl Into<String>,
        url: Url,
        credentials: Option<Credentials>,
        offline_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            url,
            credentials,
            offline_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Silence longer than this means the camera is offline
    pub fn offline_timeout(&self) -> Duration {
        self.offline_timeout
    }

    /// Host and port for a bare TCP connection to the camera
    ///
    /// IPv6 literals come back without brackets, ready for `TcpStream::connect`.
    pub fn host_port(&self) -> Option<(String, u16)> {
        let host = match self.url.host()? {
            Host::Domain(domain) => domain.to_string(),
            Host::Ipv4(addr) => addr.to_string(),
            Host::Ipv6(addr) => addr.to_string(),
        };
        let port = self.url.port().unwrap_or(DEFAULT_RTSP_PORT);
        Some((host, port))
    }
}
