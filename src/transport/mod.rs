//! Frame transport
//!
//! A transport negotiates a session with a camera and pushes every received
//! frame into a [`FrameSink`]. The monitor owns the receiving end, so frame
//! delivery is a bounded channel rather than a callback into shared state.
//!
//! The shipped implementation is [`rtsp::RtspTransport`].

pub mod rtsp;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::camera::CameraEndpoint;
use crate::error::Result;

pub use rtsp::RtspTransport;

/// What a frame carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Video frame that starts a decodable sequence (IDR)
    VideoKey,
    /// Any other video frame
    VideoDelta,
    /// Audio, metadata, anything else
    Other,
}

impl FrameKind {
    pub fn is_video(self) -> bool {
        matches!(self, Self::VideoKey | Self::VideoDelta)
    }
}

/// One frame as received from the transport
///
/// Video payloads are Annex-B access units.
#[derive(Debug, Clone)]
pub struct FrameEvent {
    pub received_at: Instant,
    pub kind: FrameKind,
    pub data: Bytes,
}

impl FrameEvent {
    pub fn new(kind: FrameKind, data: impl Into<Bytes>) -> Self {
        Self {
            received_at: Instant::now(),
            kind,
            data: data.into(),
        }
    }

    pub fn is_key_frame(&self) -> bool {
        self.kind == FrameKind::VideoKey
    }
}

/// Sending half of a camera's frame channel
///
/// Handed to the transport on connect. When the transport drops its last
/// sink the monitor sees the stream as ended.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<FrameEvent>,
}

/// Create a frame channel with room for `capacity` frames
pub fn frame_channel(capacity: usize) -> (FrameSink, mpsc::Receiver<FrameEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FrameSink { tx }, rx)
}

impl FrameSink {
    /// Deliver, waiting for room. Returns `false` once the receiver is gone.
    ///
    /// Producers race this against their cancellation token, so a stalled
    /// consumer holds frames back instead of losing them.
    pub async fn send(&self, frame: FrameEvent) -> bool {
        self.tx.send(frame).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Camera transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session and start delivering frames into `sink`
    ///
    /// Returns once the stream is playing. Must give up promptly when
    /// `cancel` fires. Frames keep flowing until the session is disposed or
    /// the remote end stops, at which point the sink is dropped.
    async fn connect(
        &self,
        endpoint: &CameraEndpoint,
        sink: FrameSink,
        cancel: CancellationToken,
    ) -> Result<Box<dyn TransportSession>>;
}

/// A live transport session
#[async_trait]
pub trait TransportSession: Send {
    /// Tear the session down and stop frame delivery
    ///
    /// When this returns no further frames will be pushed.
    async fn dispose(self: Box<Self>);
}
