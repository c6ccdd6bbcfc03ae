//! KDL configuration parsing for Courier.
//!
//! A service reads an optional `courier.kdl` document and then applies
//! environment overrides on top of it.

pub mod error;
mod kdl_ext;
pub mod service;

pub use error::{ConfigError, ConfigResult};
pub use service::{
    AdminConfig, DatabaseConfig, LogConfig, LogFormat, QueueConfig, RealtimeConfig, ServerConfig,
    ServiceConfig, StoreBackend,
};
