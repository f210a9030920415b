//! RTSP reachability probe
//!
//! A bare `OPTIONS` round trip, used to tell "host gone" apart from "host up,
//! stream stalled" in the logs when a camera goes quiet.

use std::fmt;
use std::time::Duration;

use rtsp_types as rtsp;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, trace};

use crate::camera::CameraEndpoint;
use crate::error::MonitorError;

/// A status line longer than this is not RTSP
const MAX_STATUS_LINE_BYTES: usize = 1024;

/// How a probe ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// 2xx response
    Success,
    /// TCP connection refused
    Refused,
    /// Connect or response read exceeded the timeout
    Timeout,
    /// Well-formed response with a non-success status
    Rejected(u16),
    /// Peer answered with something that is not an RTSP response
    Malformed,
    /// Any other I/O failure
    Error(String),
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Refused => write!(f, "connection refused"),
            Self::Timeout => write!(f, "timed out"),
            Self::Rejected(status) => write!(f, "rejected with status {}", status),
            Self::Malformed => write!(f, "malformed response"),
            Self::Error(e) => write!(f, "error: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub reachable: bool,
    pub latency: Duration,
    pub outcome: ProbeOutcome,
}

impl ProbeResult {
    /// The outcome as an error, for callers that want `?`
    pub fn into_result(self, target: &str) -> Result<Duration, MonitorError> {
        match self.outcome {
            ProbeOutcome::Success => Ok(self.latency),
            ProbeOutcome::Timeout => Err(MonitorError::ProbeTimeout(target.to_string())),
            ProbeOutcome::Refused => Err(MonitorError::ProbeRefused(target.to_string())),
            other => Err(MonitorError::ProbeRefused(format!("{}: {}", target, other))),
        }
    }
}

/// Reachability probe with a fixed timeout
///
/// The timeout bounds the TCP connect and, separately, the request write plus
/// response read. Probing never fails; every problem becomes an outcome.
#[derive(Debug, Clone)]
pub struct ReachabilityProbe {
    timeout: Duration,
}

impl ReachabilityProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Probe `host:port` with `OPTIONS rtsp://host:port/`
    pub async fn probe(&self, host: &str, port: u16) -> ProbeResult {
        let url = if host.contains(':') {
            format!("rtsp://[{}]:{}/", host, port)
        } else {
            format!("rtsp://{}:{}/", host, port)
        };
        self.run(host, port, &url).await
    }

    /// Probe the camera's host using its own URL in the request line
    pub async fn probe_endpoint(&self, endpoint: &CameraEndpoint) -> ProbeResult {
        match endpoint.host_port() {
            Some((host, port)) => self.run(&host, port, endpoint.url().as_str()).await,
            None => ProbeResult {
                reachable: false,
                latency: Duration::ZERO,
                outcome: ProbeOutcome::Error("URL has no host".to_string()),
            },
        }
    }

    async fn run(&self, host: &str, port: u16, url: &str) -> ProbeResult {
        let started = Instant::now();
        let outcome = self.exchange(host, port, url).await;
        let latency = started.elapsed();

        debug!("Probe {}:{} -> {} in {:?}", host, port, outcome, latency);

        ProbeResult {
            reachable: outcome == ProbeOutcome::Success,
            latency,
            outcome,
        }
    }

    async fn exchange(&self, host: &str, port: u16, url: &str) -> ProbeOutcome {
        let mut stream = match timeout(self.timeout, TcpStream::connect((host, port))).await {
            Err(_) => return ProbeOutcome::Timeout,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                return ProbeOutcome::Refused
            }
            Ok(Err(e)) => return ProbeOutcome::Error(e.to_string()),
            Ok(Ok(stream)) => stream,
        };

        let request = format!("OPTIONS {} RTSP/1.0\r\nCSeq: 1\r\n\r\n", url);
        let response = async {
            stream.write_all(request.as_bytes()).await?;
            read_response(&mut stream).await
        };

        match timeout(self.timeout, response).await {
            Err(_) => ProbeOutcome::Timeout,
            Ok(Err(e)) => ProbeOutcome::Error(e.to_string()),
            Ok(Ok(outcome)) => outcome,
        }
    }
}

/// Read until the status line is complete, the peer closes, or the line
/// grows past any plausible length
///
/// Headers and body are never waited for; the status line alone decides.
async fn read_response(stream: &mut TcpStream) -> std::io::Result<ProbeOutcome> {
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            trace!("Probe peer closed after {} bytes", buf.len());
            return Ok(ProbeOutcome::Malformed);
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = buf.windows(2).position(|w| w == b"\r\n") {
            return Ok(classify(&buf[..end]));
        }
        if buf.len() >= MAX_STATUS_LINE_BYTES {
            return Ok(ProbeOutcome::Malformed);
        }
    }
}

/// Classify a status line (without its CRLF)
fn classify(status_line: &[u8]) -> ProbeOutcome {
    // Parsed as a header-less message so rtsp-types validates version and code
    let mut message = Vec::with_capacity(status_line.len() + 4);
    message.extend_from_slice(status_line);
    message.extend_from_slice(b"\r\n\r\n");

    match rtsp::Message::<Vec<u8>>::parse(&message) {
        Ok((rtsp::Message::Response(response), _)) => {
            let status = u16::from(response.status());
            if (200..300).contains(&status) {
                ProbeOutcome::Success
            } else {
                ProbeOutcome::Rejected(status)
            }
        }
        _ => ProbeOutcome::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// One-shot server: reads the request, replies with `reply`, returns the request
    async fn serve_once(reply: &'static [u8]) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(reply).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (port, task)
    }

    /// Replies with `reply` and keeps the connection open afterwards
    async fn serve_and_hold(listener: TcpListener, reply: Vec<u8>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(&reply).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
    }

    fn probe() -> ReachabilityProbe {
        ReachabilityProbe::new(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_ok_response_is_reachable() {
        let (port, server) =
            serve_once(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nPublic: OPTIONS, DESCRIBE\r\n\r\n").await;

        let result = probe().probe("127.0.0.1", port).await;
        assert!(result.reachable);
        assert_eq!(result.outcome, ProbeOutcome::Success);

        let request = server.await.unwrap();
        assert_eq!(
            request,
            format!("OPTIONS rtsp://127.0.0.1:{}/ RTSP/1.0\r\nCSeq: 1\r\n\r\n", port)
        );
    }

    #[tokio::test]
    async fn test_endpoint_url_used_in_request_line() {
        let (port, server) = serve_once(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\n").await;
        let url = url::Url::parse(&format!("rtsp://127.0.0.1:{}/stream1", port)).unwrap();
        let endpoint = CameraEndpoint::new("porch", url, None, Duration::from_secs(1));

        assert!(probe().probe_endpoint(&endpoint).await.reachable);
        let request = server.await.unwrap();
        assert!(request.starts_with(&format!("OPTIONS rtsp://127.0.0.1:{}/stream1 RTSP/1.0", port)));
    }

    #[tokio::test]
    async fn test_unauthorized_is_rejected() {
        let (port, _server) = serve_once(
            b"RTSP/1.0 401 Unauthorized\r\nCSeq: 1\r\nWWW-Authenticate: Basic realm=\"cam\"\r\n\r\n",
        )
        .await;

        let result = probe().probe("127.0.0.1", port).await;
        assert!(!result.reachable);
        assert_eq!(result.outcome, ProbeOutcome::Rejected(401));
        assert!(matches!(
            result.into_result("porch"),
            Err(MonitorError::ProbeRefused(_))
        ));
    }

    #[tokio::test]
    async fn test_long_header_block_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut reply = b"RTSP/1.0 200 OK\r\nCSeq: 1\r\n".to_vec();
        for i in 0..40 {
            reply.extend_from_slice(format!("X-Vendor-Extension-{}: some-long-value-{}\r\n", i, i).as_bytes());
        }
        reply.extend_from_slice(b"\r\n");
        assert!(reply.len() > 1024);
        let _server = serve_and_hold(listener, reply).await;

        let result = probe().probe("127.0.0.1", port).await;
        assert!(result.reachable);
        assert_eq!(result.outcome, ProbeOutcome::Success);
    }

    #[tokio::test]
    async fn test_pending_body_does_not_delay_verdict() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let reply = b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nContent-Length: 5000\r\n\r\nabc".to_vec();
        let _server = serve_and_hold(listener, reply).await;

        let result = probe().probe("127.0.0.1", port).await;
        assert!(result.reachable);
        assert!(result.latency < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_status_line_split_across_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(b"RTSP/1.0 40").await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            socket.write_all(b"4 Not Found\r\nCSeq: 1\r\n\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let result = probe().probe("127.0.0.1", port).await;
        assert_eq!(result.outcome, ProbeOutcome::Rejected(404));
    }

    #[tokio::test]
    async fn test_ipv6_endpoint() {
        // Hosts without IPv6 loopback have nothing to check
        let Ok(listener) = TcpListener::bind("[::1]:0").await else {
            return;
        };
        let port = listener.local_addr().unwrap().port();
        let _server = serve_and_hold(listener, b"RTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\n".to_vec()).await;

        let url = url::Url::parse(&format!("rtsp://[::1]:{}/s", port)).unwrap();
        let endpoint = CameraEndpoint::new("porch", url, None, Duration::from_secs(1));

        let result = probe().probe_endpoint(&endpoint).await;
        assert!(result.reachable, "{:?}", result);
    }

    #[tokio::test]
    async fn test_garbage_is_malformed() {
        let (port, _server) = serve_once(b"hello there\r\n\r\n").await;

        let result = probe().probe("127.0.0.1", port).await;
        assert!(!result.reachable);
        assert_eq!(result.outcome, ProbeOutcome::Malformed);
    }

    #[tokio::test]
    async fn test_close_without_reply_is_malformed() {
        let (port, _server) = serve_once(b"").await;

        let result = probe().probe("127.0.0.1", port).await;
        assert_eq!(result.outcome, ProbeOutcome::Malformed);
    }

    #[tokio::test]
    async fn test_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = probe().probe("127.0.0.1", port).await;
        assert!(!result.reachable);
        assert_eq!(result.outcome, ProbeOutcome::Refused);
        assert!(matches!(
            result.into_result("porch"),
            Err(MonitorError::ProbeRefused(_))
        ));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let result = ReachabilityProbe::new(Duration::from_millis(100))
            .probe("127.0.0.1", port)
            .await;
        assert!(!result.reachable);
        assert_eq!(result.outcome, ProbeOutcome::Timeout);
        assert!(matches!(
            result.into_result("porch"),
            Err(MonitorError::ProbeTimeout(_))
        ));
    }
}
