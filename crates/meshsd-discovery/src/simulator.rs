//! In-memory engine backend.
//!
//! Stands in for the mDNS engine in tests: it never touches the network,
//! records every create/free with the (Tokio) instant it happened, and lets a
//! test inject state reports, discovery results and failures through a
//! [`SimProbe`].

use crate::engine::{
    DiscoveryEvent, DiscoverySession, DiscoverySink, Engine, EngineBackend, EngineState,
    Generation, StateNotifier,
};
use crate::error::{DiscoveryError, Result};
use crate::types::DiscoveredService;
use meshsd_core::EngineConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Default)]
struct SimState {
    auto_running: bool,
    fail_creates: u32,
    discovery_fails: bool,
    last_error: Option<String>,

    live_engines: usize,
    live_sessions: usize,
    max_live_engines: usize,
    max_live_sessions: usize,
    created_at: Vec<Instant>,
    freed_at: Vec<Instant>,
    sessions_closed: usize,
    followed: Vec<String>,
    violations: Vec<String>,

    notifier: Option<StateNotifier>,
    sink: Option<DiscoverySink>,
}

/// Backend creating [`SimEngine`]s
#[derive(Default)]
pub struct SimulatedBackend {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for inspecting and steering the backend after it is moved
    pub fn probe(&self) -> SimProbe {
        SimProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl EngineBackend for SimulatedBackend {
    fn create(&mut self, _config: &EngineConfig, notifier: StateNotifier) -> Result<Box<dyn Engine>> {
        let mut state = self.state.lock();
        if state.fail_creates > 0 {
            state.fail_creates -= 1;
            return Err(DiscoveryError::EngineCreateFailed(
                "simulated socket failure".to_string(),
            ));
        }

        if state.live_engines > 0 {
            state
                .violations
                .push("engine created while another is live".to_string());
        }
        state.live_engines += 1;
        state.max_live_engines = state.max_live_engines.max(state.live_engines);
        state.created_at.push(Instant::now());

        if state.auto_running {
            notifier.notify(EngineState::Running);
        }
        state.notifier = Some(notifier.clone());

        Ok(Box::new(SimEngine {
            generation: notifier.generation(),
            state: Arc::clone(&self.state),
            open_sessions: Arc::new(Mutex::new(0)),
        }))
    }
}

/// Simulated engine instance
pub struct SimEngine {
    generation: Generation,
    state: Arc<Mutex<SimState>>,
    open_sessions: Arc<Mutex<usize>>,
}

impl Engine for SimEngine {
    fn open_discovery(
        &mut self,
        enumeration_name: &str,
        sink: DiscoverySink,
    ) -> Result<Box<dyn DiscoverySession>> {
        let mut state = self.state.lock();
        if state.discovery_fails {
            return Err(DiscoveryError::BrowseFailed {
                service_type: enumeration_name.to_string(),
                reason: "simulated browse failure".to_string(),
            });
        }

        if sink.generation() != self.generation {
            state
                .violations
                .push("session opened with a foreign sink".to_string());
        }
        state.live_sessions += 1;
        state.max_live_sessions = state.max_live_sessions.max(state.live_sessions);
        state.sink = Some(sink);
        *self.open_sessions.lock() += 1;

        Ok(Box::new(SimSession {
            state: Arc::clone(&self.state),
            engine_sessions: Arc::clone(&self.open_sessions),
        }))
    }

    fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    fn shutdown(self: Box<Self>) {
        let mut state = self.state.lock();
        if *self.open_sessions.lock() > 0 {
            state
                .violations
                .push(format!("engine {} freed with an open session", self.generation));
        }
        state.live_engines -= 1;
        state.freed_at.push(Instant::now());
    }
}

/// Simulated discovery session
pub struct SimSession {
    state: Arc<Mutex<SimState>>,
    engine_sessions: Arc<Mutex<usize>>,
}

impl DiscoverySession for SimSession {
    fn follow_type(&mut self, service_type: &str) -> Result<()> {
        self.state.lock().followed.push(service_type.to_string());
        Ok(())
    }

    fn close(self: Box<Self>) {
        let mut state = self.state.lock();
        state.live_sessions -= 1;
        state.sessions_closed += 1;
        *self.engine_sessions.lock() -= 1;
    }
}

/// Test-side view of a [`SimulatedBackend`]
#[derive(Clone)]
pub struct SimProbe {
    state: Arc<Mutex<SimState>>,
}

impl SimProbe {
    /// Report `Running` as soon as an engine is created
    pub fn set_auto_running(&self, enabled: bool) {
        self.state.lock().auto_running = enabled;
    }

    /// Make the next `count` creations fail
    pub fn fail_next_creates(&self, count: u32) {
        self.state.lock().fail_creates = count;
    }

    pub fn set_discovery_fails(&self, fails: bool) {
        self.state.lock().discovery_fails = fails;
    }

    /// Error string engines return from `last_error`
    pub fn set_last_error(&self, error: Option<&str>) {
        self.state.lock().last_error = error.map(str::to_string);
    }

    /// Reports a state change from the most recently created engine.
    pub fn report(&self, state: EngineState, error: Option<&str>) {
        let notifier = self.state.lock().notifier.clone();
        if let Some(notifier) = notifier {
            match error {
                Some(error) => notifier.notify_error(state, error),
                None => notifier.notify(state),
            }
        }
    }

    /// Delivers an event from the most recently opened session.
    pub fn deliver(&self, event: DiscoveryEvent) {
        let sink = self.state.lock().sink.clone();
        if let Some(sink) = sink {
            sink.deliver(event);
        }
    }

    pub fn announce_type(&self, service_type: &str) {
        self.deliver(DiscoveryEvent::TypeFound {
            service_type: service_type.to_string(),
        });
    }

    pub fn resolve(&self, service: DiscoveredService) {
        self.deliver(DiscoveryEvent::ServiceResolved(service));
    }

    pub fn live_engines(&self) -> usize {
        self.state.lock().live_engines
    }

    pub fn live_sessions(&self) -> usize {
        self.state.lock().live_sessions
    }

    pub fn max_live_engines(&self) -> usize {
        self.state.lock().max_live_engines
    }

    pub fn max_live_sessions(&self) -> usize {
        self.state.lock().max_live_sessions
    }

    pub fn engines_created(&self) -> usize {
        self.state.lock().created_at.len()
    }

    pub fn engines_freed(&self) -> usize {
        self.state.lock().freed_at.len()
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.lock().sessions_closed
    }

    pub fn created_at(&self) -> Vec<Instant> {
        self.state.lock().created_at.clone()
    }

    pub fn freed_at(&self) -> Vec<Instant> {
        self.state.lock().freed_at.clone()
    }

    pub fn followed_types(&self) -> Vec<String> {
        self.state.lock().followed.clone()
    }

    /// Ownership rule breaches observed so far
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }
}
