//! camwatch - RTSP camera liveness monitoring
//!
//! This crate watches a set of RTSP cameras, reports each online/offline
//! edge exactly once, and derives stream resolution from H.264 SPS data.

pub mod camera;
pub mod config;
pub mod error;
pub mod events;
pub mod h264;
pub mod monitor;
pub mod probe;
pub mod stats;
pub mod transport;
pub mod utils;

pub use error::{MonitorError, Result};
