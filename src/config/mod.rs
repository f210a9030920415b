//! Configuration
//!
//! `schema` holds the serde types, `store` keeps them on disk.

mod schema;
mod store;

pub use schema::{
    AppConfig, CameraConfig, DiagnosticsConfig, LoggingConfig, MonitorConfig, ProbeConfig,
};
pub use store::ConfigStore;
