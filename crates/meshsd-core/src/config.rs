//! Configuration management for the mesh service discovery daemon.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! `MESHSD__SECTION__KEY` environment variables. Command-line flags are
//! applied on top by the binary.

use crate::engine_config::EngineConfig;
use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Prefix of environment variables that override file settings
pub const ENV_PREFIX: &str = "MESHSD";

/// Main application configuration.
///
/// # Examples
///
/// ```no_run
/// use meshsd_core::config::AppConfig;
///
/// let config = AppConfig::from_file("/etc/meshsd/meshsd.yaml").unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Protocol engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Forced restart cadence
    #[serde(default)]
    pub restart: RestartConfig,

    /// Known services bookkeeping
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Process-level settings (sockets, files, daemonization)
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path.display().to_string()).into());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration using the `config` crate: the optional file first,
    /// then environment overrides (`MESHSD__RESTART__INTERVAL_SECS=30`).
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded or merged.
    pub fn from_config_builder(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        let origin = match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
                path.display().to_string()
            }
            None => "<environment>".to_string(),
        };

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: origin,
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<()> {
        self.engine
            .validate()
            .map_err(|reason| ConfigError::invalid_value("engine", reason))?;

        if self.restart.interval_secs == 0 {
            return Err(
                ConfigError::invalid_value("restart.interval_secs", "cannot be 0").into(),
            );
        }

        if self.registry.stale_timeout_secs == 0 {
            return Err(
                ConfigError::invalid_value("registry.stale_timeout_secs", "cannot be 0").into(),
            );
        }

        if self.daemon.bind.trim().is_empty() {
            return Err(ConfigError::invalid_value("daemon.bind", "cannot be empty").into());
        }

        self.logging.parse_level()?;

        Ok(())
    }
}

/// Forced restart settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartConfig {
    /// Seconds between forced engine teardown/recreate cycles
    #[serde(default = "default_restart_interval")]
    pub interval_secs: u64,
}

fn default_restart_interval() -> u64 {
    64
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_restart_interval(),
        }
    }
}

impl RestartConfig {
    /// Returns the restart interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Known services bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How long before an unseen service is considered stale (seconds)
    #[serde(default = "default_stale_timeout")]
    pub stale_timeout_secs: u64,
}

fn default_stale_timeout() -> u64 {
    300
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_timeout_secs: default_stale_timeout(),
        }
    }
}

impl RegistryConfig {
    /// Returns the stale timeout as a Duration.
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout_secs)
    }
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Management socket URI of the local node daemon
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Stay in the foreground
    #[serde(default)]
    pub nodaemon: bool,

    /// File the known services snapshot is written to on export
    #[serde(default = "default_output_file")]
    pub output_file: PathBuf,

    /// PID lock file
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Reload the snapshot at startup and flush it at shutdown
    #[serde(default)]
    pub persist: bool,
}

fn default_bind() -> String {
    "/var/run/commotiond.sock".to_string()
}

fn default_output_file() -> PathBuf {
    PathBuf::from("/tmp/local-services.out")
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/var/run/commotion-service-manager.pid")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            nodaemon: false,
            output_file: default_output_file(),
            pid_file: default_pid_file(),
            persist: false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: LogFormat,

    /// Optional log file path (stdio is closed once daemonized)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Parses the log level string to a tracing Level.
    pub fn parse_level(&self) -> Result<Level> {
        self.level.parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("Invalid log level: {}", self.level),
            }
            .into()
        })
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON format for structured logging
    Json,
}
