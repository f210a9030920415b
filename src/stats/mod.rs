//! One-shot stream diagnostics
//!
//! Connects to a camera for a fixed window and reports frame rate, bitrate,
//! resolution and the last NAL unit type seen. Independent of the continuous
//! monitor; it opens its own transport session.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::camera::CameraEndpoint;
use crate::error::{MonitorError, Result};
use crate::h264::{sps_from_frame, NalScanner, SpsInfo};
use crate::transport::{frame_channel, FrameEvent, Transport};

const CHANNEL_CAPACITY: usize = 256;

/// Result of a diagnostic window
#[derive(Debug, Clone, PartialEq)]
pub struct StreamStats {
    /// Video frames received
    pub frame_count: u64,
    /// Video payload bytes received
    pub total_bytes: u64,
    pub elapsed: Duration,
    /// Last resolution decoded from a key frame, if any
    pub resolution: Option<SpsInfo>,
    /// Type of the last NAL unit seen in any video frame, 0 if none
    pub last_nal_type: u8,
}

impl StreamStats {
    pub fn fps(&self) -> f64 {
        per_second(self.frame_count as f64, self.elapsed)
    }

    pub fn bitrate_mbps(&self) -> f64 {
        per_second(self.total_bytes as f64 * 8.0 / 1_000_000.0, self.elapsed)
    }
}

fn per_second(value: f64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        value / secs
    } else {
        0.0
    }
}

impl fmt::Display for StreamStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitRate: {:.2} Mbps", self.bitrate_mbps())?;
        if let Some(resolution) = self.resolution {
            write!(f, " Resolution: {}", resolution)?;
        }
        write!(f, " FPS: {:.2} NALType: {}", self.fps(), self.last_nal_type)
    }
}

/// Operator-facing outcome of a connection test
#[derive(Debug, Clone, PartialEq)]
pub enum TestOutcome {
    Success(StreamStats),
    Failed(String),
    Canceled,
}

impl TestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn message(&self) -> String {
        match self {
            Self::Success(stats) => stats.to_string(),
            Self::Failed(message) => message.clone(),
            Self::Canceled => "Test was canceled.".to_string(),
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

#[derive(Default)]
struct Tally {
    frames: u64,
    bytes: u64,
    resolution: Option<SpsInfo>,
    last_nal_type: u8,
}

impl Tally {
    fn record(&mut self, frame: &FrameEvent) {
        if !frame.kind.is_video() {
            return;
        }

        if let Some(unit) = NalScanner::new(&frame.data).last() {
            self.last_nal_type = unit.nal_type;
        }
        self.bytes += frame.data.len() as u64;
        self.frames += 1;

        if frame.is_key_frame() {
            if let Some(info) = sps_from_frame(&frame.data) {
                self.resolution = Some(info);
            }
        }
    }
}

/// Runs diagnostic windows against cameras
pub struct StatsCollector {
    transport: Arc<dyn Transport>,
}

impl StatsCollector {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Stream from `endpoint` for `duration` and tally what arrived
    ///
    /// The window runs to completion even if the stream ends early. Fails
    /// with `NoFrames` when no video frame arrived and `Canceled` when
    /// `cancel` fires first.
    pub async fn collect(
        &self,
        endpoint: &CameraEndpoint,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<StreamStats> {
        let (sink, mut frames) = frame_channel(CHANNEL_CAPACITY);
        let session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MonitorError::Canceled),
            result = self.transport.connect(endpoint, sink, cancel.child_token()) => result?,
        };

        info!(
            "Connected to {}, testing for {:?}",
            endpoint.name(),
            duration
        );

        let started = Instant::now();
        let window = tokio::time::sleep(duration);
        tokio::pin!(window);

        let mut tally = Tally::default();
        let mut open = true;
        let canceled = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break true,
                _ = &mut window => break false,
                frame = frames.recv(), if open => match frame {
                    Some(frame) => tally.record(&frame),
                    None => open = false,
                },
            }
        };
        let elapsed = started.elapsed();

        drop(frames);
        session.dispose().await;

        if canceled {
            return Err(MonitorError::Canceled);
        }

        info!(
            "Test complete, {} frames in {:?} from {}",
            tally.frames,
            elapsed,
            endpoint.name()
        );

        if tally.frames == 0 {
            return Err(MonitorError::NoFrames(endpoint.name().to_string()));
        }

        Ok(StreamStats {
            frame_count: tally.frames,
            total_bytes: tally.bytes,
            elapsed,
            resolution: tally.resolution,
            last_nal_type: tally.last_nal_type,
        })
    }

    /// [`collect`](Self::collect) mapped to operator messages
    pub async fn test_connection(
        &self,
        endpoint: &CameraEndpoint,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> TestOutcome {
        info!("Testing camera {} at {}", endpoint.name(), endpoint.url());

        match self.collect(endpoint, duration, cancel).await {
            Ok(stats) => {
                info!("Camera {} stats: {}", endpoint.name(), stats);
                TestOutcome::Success(stats)
            }
            Err(MonitorError::Canceled) => TestOutcome::Canceled,
            Err(MonitorError::NoFrames(_)) => TestOutcome::Failed(
                "No frames received - camera might be offline or no video stream available."
                    .to_string(),
            ),
            Err(e) => {
                error!("Test of camera {} failed: {}", endpoint.name(), e);
                TestOutcome::Failed(format!("Error while testing connection: {}", e))
            }
        }
    }
}
