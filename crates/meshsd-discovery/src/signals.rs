//! OS control signals.
//!
//! SIGINT and SIGTERM stop the daemon; SIGUSR1 exports the known services.
//! Tokio's signal driver does the async-signal-safe part (recording that a
//! signal arrived); everything else happens when the event loop polls the
//! listener, on the loop thread.

use crate::error::{DiscoveryError, Result};
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Control request decoded from a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Graceful stop; carries the signal name for logging
    Stop(&'static str),

    /// Write the known services snapshot
    Export,
}

/// Registered signal streams
pub struct SignalListener {
    interrupt: Signal,
    terminate: Signal,
    export: Signal,
}

impl SignalListener {
    /// Installs handlers for SIGINT, SIGTERM and SIGUSR1.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn install() -> Result<Self> {
        Ok(Self {
            interrupt: register(SignalKind::interrupt(), "SIGINT")?,
            terminate: register(SignalKind::terminate(), "SIGTERM")?,
            export: register(SignalKind::user_defined1(), "SIGUSR1")?,
        })
    }

    /// Waits for the next control signal. Returns `None` once every stream
    /// has been closed.
    pub async fn recv(&mut self) -> Option<ControlSignal> {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Some(ControlSignal::Stop("SIGINT")),
            Some(()) = self.terminate.recv() => Some(ControlSignal::Stop("SIGTERM")),
            Some(()) = self.export.recv() => Some(ControlSignal::Export),
            else => None,
        }
    }
}

fn register(kind: SignalKind, name: &'static str) -> Result<Signal> {
    signal(kind).map_err(|e| DiscoveryError::SignalInstallFailed {
        signal: name,
        reason: e.to_string(),
    })
}
