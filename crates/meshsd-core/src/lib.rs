//! # meshsd core
//!
//! Configuration, error handling and shared settings for the mesh service
//! discovery daemon.
//!
//! - **Configuration**: [`AppConfig`] loaded from YAML and environment
//!   overrides, validated before use.
//! - **Engine settings**: [`EngineConfig`], the fixed parameters every
//!   protocol engine instance is created with.
//! - **Errors**: `thiserror` based types for configuration and setup failures.

pub mod config;
pub mod engine_config;
pub mod error;

pub use config::{AppConfig, LogFormat, LoggingConfig};
pub use engine_config::EngineConfig;
pub use error::{ConfigError, MeshsdError, Result};
