use clap::Parser;
use meshsd_discovery::MdnsSdBackend;
use std::process::ExitCode;
use tracing::{error, info};

mod bootstrap;
mod cli;
mod client;
mod daemon;
mod logging;

use cli::Args;
use daemon::{Forked, PidFile};

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("meshsd: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    // Fork before the runtime spawns any thread
    let mut _pid_file = None;
    if !config.daemon.nodaemon {
        match daemon::daemonize() {
            Ok(Forked::Parent(pid)) => {
                println!("Child process created: {}", pid);
                return ExitCode::SUCCESS;
            }
            Ok(Forked::Child) => {}
            Err(e) => {
                eprintln!("meshsd: {:#}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    if let Err(e) = logging::init_logging(&config.logging) {
        eprintln!("meshsd: {:#}", e);
        return ExitCode::FAILURE;
    }

    if !config.daemon.nodaemon {
        match PidFile::create(&config.daemon.pid_file) {
            Ok(pid_file) => _pid_file = Some(pid_file),
            Err(e) => {
                error!("{:#}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create event loop runtime");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        browse_domain = %config.engine.browse_domain,
        interval_secs = config.restart.interval_secs,
        "Starting meshsd"
    );

    match runtime.block_on(bootstrap::run(&config, MdnsSdBackend::new())) {
        Ok(()) => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
