//! Scripted in-process transport for monitor and stats tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{FrameEvent, FrameKind, FrameSink, Transport, TransportSession};
use crate::camera::CameraEndpoint;
use crate::error::{MonitorError, Result};
use crate::h264::bits::tests::BitWriter;

/// How a connected mock session produces frames
#[derive(Debug, Clone)]
pub(crate) struct Feed {
    pub interval: Duration,
    /// End the stream after this many frames
    pub limit: Option<usize>,
    /// Payload of the first frame, which is tagged as a key frame
    pub key_payload: Bytes,
    pub delta_payload: Bytes,
}

impl Feed {
    pub(crate) fn every(interval: Duration) -> Self {
        Self {
            interval,
            limit: None,
            key_payload: Bytes::from_static(&[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00]),
            delta_payload: Bytes::from_static(&[0, 0, 0, 1, 0x41, 0x9a, 0x02, 0x04]),
        }
    }

    pub(crate) fn limit(mut self, frames: usize) -> Self {
        self.limit = Some(frames);
        self
    }

    pub(crate) fn key_payload(mut self, payload: Bytes) -> Self {
        self.key_payload = payload;
        self
    }
}

/// Outcome of one `connect` call
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Fail,
    Stream(Feed),
}

/// Counters shared between the transport, its sessions and the test
#[derive(Debug, Default)]
pub(crate) struct MockStats {
    pub connects: AtomicUsize,
    /// Sessions currently delivering frames
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub disposed: AtomicUsize,
}

pub(crate) struct MockTransport {
    steps: Mutex<VecDeque<Step>>,
    fallback: Feed,
    connect_delay: Duration,
    paused: Arc<AtomicBool>,
    stats: Arc<MockStats>,
}

impl MockTransport {
    /// Every connect succeeds with `fallback` once `steps` run out
    pub(crate) fn new(steps: Vec<Step>, fallback: Feed) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback,
            connect_delay: Duration::ZERO,
            paused: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(MockStats::default()),
        }
    }

    pub(crate) fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Stop or resume frame delivery on every live session
    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub(crate) fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        endpoint: &CameraEndpoint,
        sink: FrameSink,
        cancel: CancellationToken,
    ) -> Result<Box<dyn TransportSession>> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);

        if !self.connect_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(MonitorError::Canceled),
                _ = tokio::time::sleep(self.connect_delay) => {}
            }
        }

        let step = self
            .steps
            .lock()
            .pop_front()
            .unwrap_or_else(|| Step::Stream(self.fallback.clone()));

        let feed = match step {
            Step::Fail => return Err(MonitorError::connect(endpoint.name(), "connection refused")),
            Step::Stream(feed) => feed,
        };

        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(active, Ordering::SeqCst);

        let session_cancel = cancel.child_token();
        let task = tokio::spawn(run_feed(
            feed,
            sink,
            self.paused.clone(),
            self.stats.clone(),
            session_cancel.clone(),
        ));

        Ok(Box::new(MockSession {
            cancel: session_cancel,
            task,
            stats: self.stats.clone(),
        }))
    }
}

async fn run_feed(
    feed: Feed,
    sink: FrameSink,
    paused: Arc<AtomicBool>,
    stats: Arc<MockStats>,
    cancel: CancellationToken,
) {
    let mut sent = 0usize;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(feed.interval) => {}
        }
        if feed.limit.is_some_and(|limit| sent >= limit) {
            break;
        }
        if paused.load(Ordering::SeqCst) {
            continue;
        }

        let frame = if sent == 0 {
            FrameEvent::new(FrameKind::VideoKey, feed.key_payload.clone())
        } else {
            FrameEvent::new(FrameKind::VideoDelta, feed.delta_payload.clone())
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            delivered = sink.send(frame) => {
                if !delivered {
                    break;
                }
            }
        }
        sent += 1;
    }
    stats.active.fetch_sub(1, Ordering::SeqCst);
}

struct MockSession {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    stats: Arc<MockStats>,
}

#[async_trait]
impl TransportSession for MockSession {
    async fn dispose(self: Box<Self>) {
        self.cancel.cancel();
        let _ = self.task.await;
        self.stats.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Annex-B key frame carrying an SPS for the given macroblock geometry
pub(crate) fn key_frame_with_sps(width_mbs: u32, height_map_units: u32) -> Bytes {
    let mut w = BitWriter::default();
    w.bits(0x67, 8)
        .bits(100, 8)
        .bits(0, 8)
        .ue(31)
        .ue(0)
        .ue(0) // chroma_format_idc
        .ue(0)
        .ue(0)
        .bit(false)
        .bit(false)
        .ue(0)
        .ue(0)
        .ue(2)
        .bit(true)
        .bit(false)
        .ue(width_mbs - 1)
        .ue(height_map_units - 1)
        .bit(true)
        .bit(true)
        .bit(false);
    let sps = w.finish();

    let mut frame = vec![0, 0, 0, 1];
    frame.extend_from_slice(&sps);
    frame.extend_from_slice(&[0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80]);
    frame.extend_from_slice(&[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00]);
    Bytes::from(frame)
}
