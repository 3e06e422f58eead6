//! Error types for the discovery daemon

use thiserror::Error;

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// How a failure is handled by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Setup failed before the loop ran; the process exits with status 1
    FatalInit,

    /// The engine could not be recreated during a restart cycle; the loop quits
    FatalRuntime,

    /// Engine reported a degraded state; healed by the next restart
    TransientProtocol,

    /// An optional feature is unavailable until the next restart
    NonFatalFeature,
}

/// Errors that can occur while running service discovery
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Protocol engine could not be created
    #[error("Failed to create mDNS engine: {0}")]
    EngineCreateFailed(String),

    /// Failed to browse for a service type
    #[error("Failed to browse for service type '{service_type}': {reason}")]
    BrowseFailed { service_type: String, reason: String },

    /// Signal handlers could not be installed
    #[error("Failed to install handler for {signal}: {reason}")]
    SignalInstallFailed { signal: &'static str, reason: String },

    /// Known services snapshot could not be written
    #[error("Failed to export services to '{path}': {reason}")]
    ExportFailed { path: String, reason: String },

    /// Snapshot (de)serialization error
    #[error("Snapshot encoding error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiscoveryError {
    /// Classifies the error for the daemon's failure policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            DiscoveryError::EngineCreateFailed(_) => ErrorClass::FatalRuntime,
            DiscoveryError::SignalInstallFailed { .. } => ErrorClass::FatalInit,
            DiscoveryError::BrowseFailed { .. }
            | DiscoveryError::ExportFailed { .. }
            | DiscoveryError::Snapshot(_) => ErrorClass::NonFatalFeature,
            DiscoveryError::Io(_) => ErrorClass::FatalInit,
        }
    }

    /// Returns true if the process must shut down because of this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self.class(), ErrorClass::FatalInit | ErrorClass::FatalRuntime)
    }
}
