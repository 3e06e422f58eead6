//! Connection to the local node management daemon.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ClientError {
    #[error("Management socket URI is empty")]
    EmptyUri,

    #[error("Invalid management socket URI {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },
}

/// Handle on the management endpoint, held for the process lifetime
#[derive(Debug)]
pub struct ManagementClient {
    socket: PathBuf,
    connected: bool,
}

impl ManagementClient {
    /// Validates `uri` and opens the client. Accepts an absolute socket path,
    /// optionally prefixed with `unix://`.
    pub fn init(uri: &str) -> Result<Self, ClientError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(ClientError::EmptyUri);
        }

        let path = uri.strip_prefix("unix://").unwrap_or(uri);
        if path.contains("://") {
            return Err(ClientError::InvalidUri {
                uri: uri.to_string(),
                reason: "only unix sockets are supported".to_string(),
            });
        }

        let socket = PathBuf::from(path);
        if !socket.is_absolute() {
            return Err(ClientError::InvalidUri {
                uri: uri.to_string(),
                reason: "socket path must be absolute".to_string(),
            });
        }

        info!(socket = %socket.display(), "Management client initialized");
        Ok(Self {
            socket,
            connected: true,
        })
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Releases the connection. Returns false if it was already released.
    pub fn shutdown(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        self.connected = false;
        debug!(socket = %self.socket.display(), "Management client shut down");
        true
    }
}
