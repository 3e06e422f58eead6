//! Periodic restart scheduler.
//!
//! Multicast on mesh links is unreliable: announcements and responses are
//! silently lost, and nodes end up missing services. Every `interval` the
//! scheduler discards the engine and builds a fresh one, which makes the new
//! engine query the network again and prompts other nodes to re-announce
//! their services. The fixed cadence is the only retry policy in the daemon.

use crate::engine::{EngineBackend, Generation};
use crate::error::Result;
use crate::event_loop::{EventLoop, LoopContext, TimerId};
use crate::lifecycle::LifecycleManager;
use std::time::Duration;
use tracing::{debug, error};

/// Default seconds between forced restarts
pub const DEFAULT_RESTART_INTERVAL: Duration = Duration::from_secs(64);

#[derive(Debug)]
pub struct RestartScheduler {
    interval: Duration,
    timer: Option<TimerId>,
    fires: u64,
}

impl RestartScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            timer: None,
            fires: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of restart cycles run so far
    pub fn fires(&self) -> u64 {
        self.fires
    }

    /// Registers the restart timer with a zero delay so the first engine
    /// starts as soon as the loop runs.
    pub fn arm(&mut self, event_loop: &mut EventLoop) -> TimerId {
        let timer = event_loop.timeout_new(Duration::ZERO);
        self.timer = Some(timer);
        timer
    }

    pub fn owns(&self, timer: TimerId) -> bool {
        self.timer == Some(timer)
    }

    /// Runs one restart cycle: teardown, create, re-arm.
    ///
    /// The timer is re-armed whatever the outcome. A creation failure also
    /// requests the loop to quit and is returned to the caller.
    pub fn fire<B: EngineBackend>(
        &mut self,
        manager: &mut LifecycleManager<B>,
        ctx: &mut LoopContext<'_>,
    ) -> Result<Generation> {
        self.fires += 1;
        debug!(cycle = self.fires, "Restarting mDNS engine");

        manager.teardown();
        let created = manager.create();

        if let Some(timer) = self.timer {
            ctx.timeout_update(timer, Some(self.interval));
        }

        if let Err(e) = &created {
            error!(error = %e, "Engine restart failed, stopping");
            ctx.request_quit();
        }
        created
    }
}

impl Default for RestartScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_RESTART_INTERVAL)
    }
}
