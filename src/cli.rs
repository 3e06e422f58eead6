use anyhow::{bail, Context, Result};
use clap::Parser;
use meshsd_core::{AppConfig, LogFormat};
use std::path::PathBuf;

/// meshsd - mesh service discovery daemon
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Management socket URI
    #[arg(short, long, value_name = "URI")]
    pub bind: Option<String>,

    /// Do not fork into the background
    #[arg(short, long)]
    pub nodaemon: bool,

    /// File the known services are written to on SIGUSR1
    #[arg(short, long, value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// PID file
    #[arg(short, long, value_name = "FILE")]
    pub pid: Option<PathBuf>,

    /// Keep the known services across runs
    #[arg(short = 'u', long)]
    pub persist: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format
    #[arg(long, value_parser = ["text", "json"])]
    pub log_format: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

impl Args {
    /// Loads the configuration file and environment, then applies the flags.
    pub fn load_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::from_config_builder(self.config.as_deref())
            .context("Failed to load configuration")?;
        self.apply(&mut config)?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Command-line flags override file and environment values.
    pub fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(bind) = &self.bind {
            config.daemon.bind = bind.clone();
        }
        if self.nodaemon {
            config.daemon.nodaemon = true;
        }
        if let Some(out) = &self.out {
            config.daemon.output_file = out.clone();
        }
        if let Some(pid) = &self.pid {
            config.daemon.pid_file = pid.clone();
        }
        if self.persist {
            config.daemon.persist = true;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.logging.format = match format.as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                other => bail!("Unknown log format: {}", other),
            };
        }
        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.clone());
        }
        Ok(())
    }
}
