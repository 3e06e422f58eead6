//! Error types for the mesh service discovery daemon.
//!
//! Configuration and startup failures are reported through these types.
//! All errors implement `std::error::Error` and are serializable so they can
//! be written into structured log records.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Result type alias using MeshsdError as the error type.
pub type Result<T> = std::result::Result<T, MeshsdError>;

/// Top-level error type for configuration and process setup.
#[derive(Debug, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum MeshsdError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

/// Errors related to configuration.
///
/// These errors occur when loading, parsing, or validating configuration files.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Invalid configuration value
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    /// Creates a file not found error.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Serializable wrapper around `std::io::Error`.
#[derive(Debug, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct IoError {
    /// Debug name of the `io::ErrorKind`
    pub kind: String,
    /// Error message
    pub message: String,
}

impl From<io::Error> for IoError {
    fn from(err: io::Error) -> Self {
        Self {
            kind: format!("{:?}", err.kind()),
            message: err.to_string(),
        }
    }
}

impl From<io::Error> for MeshsdError {
    fn from(err: io::Error) -> Self {
        MeshsdError::Io(err.into())
    }
}
