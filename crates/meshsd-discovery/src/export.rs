//! Known services export.
//!
//! Writes the registry snapshot as JSON to the configured output file. The
//! file is replaced atomically so readers never see a partial snapshot.

use crate::error::{DiscoveryError, Result};
use crate::types::DiscoveredService;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Serialized form of the known services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicesSnapshot {
    pub generated_at: DateTime<Utc>,
    pub service_types: Vec<String>,
    pub services: Vec<DiscoveredService>,
}

/// Writes and reads snapshots at a fixed path
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the output file with `snapshot`.
    pub fn write(&self, snapshot: &ServicesSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.temp_path();

        let written = fs::File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(&json)?;
                file.write_all(b"\n")?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&tmp, &self.path));

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(DiscoveryError::ExportFailed {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            });
        }

        info!(
            path = %self.path.display(),
            services = snapshot.services.len(),
            "Exported known services"
        );
        Ok(())
    }

    /// Reads the snapshot back. A missing file yields `None`.
    pub fn load(&self) -> Result<Option<ServicesSnapshot>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No previous snapshot");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
