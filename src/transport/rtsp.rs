//! RTSP transport backed by `retina`
//!
//! retina handles DESCRIBE/SETUP/PLAY and RTP depacketization; this adapter
//! picks the H.264 video stream, converts retina's length-prefixed access
//! units to Annex-B and feeds them into the frame sink.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use futures::StreamExt;
use retina::client::{
    Credentials as RtspCredentials, Demuxed, PlayOptions, Session, SessionOptions, SetupOptions,
    TcpTransportOptions, Transport as RtspLowerTransport,
};
use retina::codec::{CodecItem, ParametersRef};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::{FrameEvent, FrameKind, FrameSink, Transport, TransportSession};
use crate::camera::CameraEndpoint;
use crate::error::{MonitorError, Result};
use crate::h264::nal::{nal_type, START_CODE};
use crate::h264::NAL_TYPE_SPS;

const DEFAULT_USER_AGENT: &str = concat!("camwatch/", env!("CARGO_PKG_VERSION"));

/// Upper bound on DESCRIBE + SETUP + PLAY
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport speaking RTSP over TCP-interleaved RTP
pub struct RtspTransport {
    user_agent: String,
    connect_timeout: Duration,
}

impl RtspTransport {
    pub fn new() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn open(&self, endpoint: &CameraEndpoint) -> Result<(Pin<Box<Demuxed>>, Bytes)> {
        let name = endpoint.name();
        let creds = endpoint.credentials().map(|c| RtspCredentials {
            username: c.username().to_string(),
            password: c.password().to_string(),
        });
        if creds.is_some() {
            debug!("Using credentials for camera {}", name);
        }

        let options = SessionOptions::default()
            .creds(creds)
            .user_agent(self.user_agent.clone());

        let mut session = Session::describe(endpoint.url().clone(), options)
            .await
            .map_err(|e| MonitorError::connect(name, e))?;

        let video = session
            .streams()
            .iter()
            .position(|s| s.media() == "video" && s.encoding_name().eq_ignore_ascii_case("h264"))
            .ok_or_else(|| MonitorError::connect(name, "no H.264 video stream offered"))?;

        // Out-of-band SPS/PPS from the SDP, for key frames that lack them in-band
        let parameter_sets = match session.streams()[video].parameters() {
            Some(ParametersRef::Video(params)) => avcc_parameter_sets(params.extra_data()),
            _ => Bytes::new(),
        };

        session
            .setup(
                video,
                SetupOptions::default()
                    .transport(RtspLowerTransport::Tcp(TcpTransportOptions::default())),
            )
            .await
            .map_err(|e| MonitorError::connect(name, e))?;

        let demuxed = session
            .play(PlayOptions::default())
            .await
            .map_err(|e| MonitorError::connect(name, e))?
            .demuxed()
            .map_err(|e| MonitorError::connect(name, e))?;

        Ok((Box::pin(demuxed), parameter_sets))
    }
}

impl Default for RtspTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for RtspTransport {
    async fn connect(
        &self,
        endpoint: &CameraEndpoint,
        sink: FrameSink,
        cancel: CancellationToken,
    ) -> Result<Box<dyn TransportSession>> {
        debug!("Connecting to camera {} at {}", endpoint.name(), endpoint.url());

        let (stream, parameter_sets) = tokio::select! {
            _ = cancel.cancelled() => return Err(MonitorError::Canceled),
            opened = tokio::time::timeout(self.connect_timeout, self.open(endpoint)) => match opened {
                Ok(opened) => opened?,
                Err(_) => {
                    return Err(MonitorError::connect(
                        endpoint.name(),
                        format!("no response within {:?}", self.connect_timeout),
                    ))
                }
            },
        };

        info!("Camera {} stream established", endpoint.name());

        let session_cancel = cancel.child_token();
        let task = tokio::spawn(pump_frames(
            endpoint.name().to_string(),
            stream,
            parameter_sets,
            sink,
            session_cancel.clone(),
        ));

        Ok(Box::new(RtspSession {
            cancel: session_cancel,
            task,
        }))
    }
}

/// Moves frames from the retina stream into the sink until either side stops
async fn pump_frames(
    camera: String,
    mut stream: Pin<Box<Demuxed>>,
    parameter_sets: Bytes,
    sink: FrameSink,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = stream.next() => item,
        };

        let frame = match item {
            None => {
                debug!("Camera {} stream ended", camera);
                break;
            }
            Some(Err(e)) => {
                debug!("Camera {} stream error: {}", camera, e);
                break;
            }
            Some(Ok(CodecItem::VideoFrame(frame))) => {
                let key = frame.is_random_access_point();
                let prefix = if key { &parameter_sets[..] } else { &[][..] };
                match avc_to_annexb(frame.data(), prefix) {
                    Some(data) => FrameEvent::new(
                        if key {
                            FrameKind::VideoKey
                        } else {
                            FrameKind::VideoDelta
                        },
                        data,
                    ),
                    None => {
                        trace!("Camera {}: skipping malformed access unit", camera);
                        continue;
                    }
                }
            }
            Some(Ok(CodecItem::AudioFrame(frame))) => {
                FrameEvent::new(FrameKind::Other, Bytes::copy_from_slice(&frame.data()[..]))
            }
            Some(Ok(_)) => continue,
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            delivered = sink.send(frame) => {
                if !delivered {
                    break;
                }
            }
        }
    }
}

struct RtspSession {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[async_trait]
impl TransportSession for RtspSession {
    async fn dispose(self: Box<Self>) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// Convert 4-byte length-prefixed NAL units to Annex-B
///
/// `parameter_sets` (already Annex-B) is prepended when the access unit has
/// no SPS of its own. Returns `None` if a length runs past the buffer.
fn avc_to_annexb(data: &[u8], parameter_sets: &[u8]) -> Option<Bytes> {
    let mut units = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        if rest.len() < 4 {
            return None;
        }
        let (len, tail) = rest.split_at(4);
        let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
        if len == 0 || len > tail.len() {
            return None;
        }
        units.push(&tail[..len]);
        rest = &tail[len..];
    }

    let has_sps = units.iter().any(|u| nal_type(u[0]) == NAL_TYPE_SPS);
    let mut out = BytesMut::with_capacity(data.len() + parameter_sets.len());
    if !has_sps {
        out.put_slice(parameter_sets);
    }
    for unit in units {
        out.put_slice(&START_CODE);
        out.put_slice(unit);
    }
    Some(out.freeze())
}

/// SPS and PPS from an `AVCDecoderConfigurationRecord`, as Annex-B
fn avcc_parameter_sets(record: &[u8]) -> Bytes {
    fn read_sets(data: &[u8], pos: &mut usize, count: usize, out: &mut BytesMut) -> Option<()> {
        for _ in 0..count {
            let len_bytes = data.get(*pos..*pos + 2)?;
            let len = usize::from(u16::from_be_bytes([len_bytes[0], len_bytes[1]]));
            let unit = data.get(*pos + 2..*pos + 2 + len)?;
            out.put_slice(&START_CODE);
            out.put_slice(unit);
            *pos += 2 + len;
        }
        Some(())
    }

    let mut out = BytesMut::new();
    let parsed = (|| {
        let sps_count = usize::from(*record.get(5)? & 0x1f);
        let mut pos = 6;
        read_sets(record, &mut pos, sps_count, &mut out)?;
        let pps_count = usize::from(*record.get(pos)?);
        pos += 1;
        read_sets(record, &mut pos, pps_count, &mut out)
    })();

    match parsed {
        Some(()) => out.freeze(),
        None => Bytes::new(),
    }
}
