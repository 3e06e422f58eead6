//! Protocol engine lifecycle manager.
//!
//! Owns the one live engine instance and the discovery controller opened on
//! it. Both live in a single optional slot so a controller can only exist
//! while its engine does:
//!
//! ```text
//! Absent ──create──▶ Starting ──Running──▶ Running ──▶ Collision | Registering | Invalid | Failure
//!    ▲                                                              │
//!    └─────────────────────────── teardown ◀────────────────────────┘
//! ```
//!
//! Teardown always closes the controller before freeing the engine and is a
//! no-op when nothing is live.

use crate::discovery::DiscoveryController;
use crate::engine::{
    DiscoverySink, Engine, EngineBackend, EngineNotification, EngineState, Generation,
    StateNotifier,
};
use crate::error::Result;
use crate::event_loop::EventSender;
use meshsd_core::EngineConfig;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

struct EngineSlot {
    generation: Generation,
    engine: Box<dyn Engine>,
    state: EngineState,
    discovery: Option<DiscoveryController>,
}

/// Counters kept across restarts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleStats {
    pub engines_created: u64,
    pub engines_freed: u64,
    pub create_failures: u64,
    pub discovery_opened: u64,
    pub discovery_failures: u64,
    pub stale_events: u64,
}

pub struct LifecycleManager<B> {
    backend: B,
    config: Arc<EngineConfig>,
    events: EventSender,
    slot: Option<EngineSlot>,
    last_generation: Generation,
    stats: LifecycleStats,
}

impl<B: EngineBackend> LifecycleManager<B> {
    pub fn new(backend: B, config: Arc<EngineConfig>, events: EventSender) -> Self {
        Self {
            backend,
            config,
            events,
            slot: None,
            last_generation: 0,
            stats: LifecycleStats::default(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.slot
            .as_ref()
            .map_or(EngineState::Absent, |slot| slot.state)
    }

    /// Generation of the live engine
    pub fn generation(&self) -> Option<Generation> {
        self.slot.as_ref().map(|slot| slot.generation)
    }

    pub fn has_engine(&self) -> bool {
        self.slot.is_some()
    }

    pub fn has_discovery(&self) -> bool {
        self.slot
            .as_ref()
            .is_some_and(|slot| slot.discovery.is_some())
    }

    pub fn discovery(&self) -> Option<&DiscoveryController> {
        self.slot.as_ref().and_then(|slot| slot.discovery.as_ref())
    }

    pub fn stats(&self) -> LifecycleStats {
        self.stats
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Creates a new engine (`Absent → Starting`).
    ///
    /// A live engine is torn down first so at most one ever exists.
    pub fn create(&mut self) -> Result<Generation> {
        self.teardown();

        let generation = self.last_generation + 1;
        self.last_generation = generation;
        let notifier = StateNotifier::new(generation, self.events.clone());

        match self.backend.create(&self.config, notifier) {
            Ok(engine) => {
                self.stats.engines_created += 1;
                info!(generation, "mDNS engine created");
                self.slot = Some(EngineSlot {
                    generation,
                    engine,
                    state: EngineState::Starting,
                    discovery: None,
                });
                Ok(generation)
            }
            Err(e) => {
                self.stats.create_failures += 1;
                error!(generation, error = %e, "Failed to create server");
                Err(e)
            }
        }
    }

    /// Frees the discovery controller, then the engine. Idempotent.
    pub fn teardown(&mut self) {
        let Some(mut slot) = self.slot.take() else {
            return;
        };

        if let Some(discovery) = slot.discovery.take() {
            debug!(generation = slot.generation, "Service type browser already exists");
            discovery.close();
        }

        debug!(generation = slot.generation, state = %slot.state, "Server already exists");
        slot.engine.shutdown();
        self.stats.engines_freed += 1;
    }

    /// Applies a state change reported by an engine.
    pub fn handle_notification(&mut self, notification: EngineNotification) {
        let EngineNotification {
            generation,
            state,
            error,
        } = notification;

        let Some(slot) = self.slot.as_mut().filter(|slot| slot.generation == generation) else {
            self.stats.stale_events += 1;
            debug!(generation, %state, "Ignoring notification from freed engine");
            return;
        };

        let previous = slot.state;
        slot.state = state;

        match state {
            EngineState::Running => {
                info!(generation, "Server created and running");
                if slot.discovery.is_none() {
                    let sink = DiscoverySink::new(generation, self.events.clone());
                    let enumeration_name = self.config.type_enumeration_name();
                    match DiscoveryController::open(slot.engine.as_mut(), &enumeration_name, sink) {
                        Ok(controller) => {
                            self.stats.discovery_opened += 1;
                            slot.discovery = Some(controller);
                        }
                        Err(e) => {
                            self.stats.discovery_failures += 1;
                            error!(
                                generation,
                                error = %e,
                                "Failed to create service type browser"
                            );
                        }
                    }
                }
            }
            EngineState::Failure => {
                let reason = error
                    .or_else(|| slot.engine.last_error())
                    .unwrap_or_else(|| "unknown error".to_string());
                warn!(generation, class = ?state.class(), error = %reason, "Server failure");
            }
            degraded if degraded.is_degraded() => {
                warn!(
                    generation,
                    class = ?degraded.class(),
                    %previous,
                    state = %degraded,
                    "Server left running state"
                );
            }
            _ => {
                debug!(generation, %state, "Engine state notification");
            }
        }

        // Discovery only runs on an engine whose last report was `Running`
        if state != EngineState::Running {
            if let Some(discovery) = slot.discovery.take() {
                debug!(generation, "Closing service type browser");
                discovery.close();
            }
        }
    }

    /// Follows a service type announced to the live discovery controller.
    ///
    /// Events from an older generation, or arriving while discovery is not
    /// running, are ignored.
    pub fn follow_type(&mut self, generation: Generation, service_type: &str) {
        let Some(discovery) = self
            .slot
            .as_mut()
            .filter(|slot| slot.generation == generation)
            .and_then(|slot| slot.discovery.as_mut())
        else {
            self.stats.stale_events += 1;
            return;
        };

        if let Err(e) = discovery.follow(service_type) {
            warn!(generation, service_type, error = %e, "Failed to browse service type");
        }
    }
}

impl<B> Drop for LifecycleManager<B> {
    fn drop(&mut self) {
        if let Some(mut slot) = self.slot.take() {
            warn!(generation = slot.generation, "Lifecycle manager dropped with a live engine");
            if let Some(discovery) = slot.discovery.take() {
                discovery.close();
            }
            slot.engine.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::{EventLoop, LoopEvent};
    use crate::simulator::SimulatedBackend;

    fn manager(backend: SimulatedBackend, event_loop: &EventLoop) -> LifecycleManager<SimulatedBackend> {
        LifecycleManager::new(
            backend,
            Arc::new(EngineConfig::default()),
            event_loop.sender(),
        )
    }

    fn running(generation: Generation) -> EngineNotification {
        EngineNotification {
            generation,
            state: EngineState::Running,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_create_starts_engine_without_discovery() {
        let event_loop = EventLoop::new();
        let backend = SimulatedBackend::new();
        let probe = backend.probe();
        let mut manager = manager(backend, &event_loop);

        assert_eq!(manager.state(), EngineState::Absent);
        let generation = manager.create().unwrap();

        assert_eq!(generation, 1);
        assert_eq!(manager.state(), EngineState::Starting);
        assert!(manager.has_engine());
        assert!(!manager.has_discovery());
        assert_eq!(probe.live_engines(), 1);
    }

    #[tokio::test]
    async fn test_running_opens_discovery_on_enumeration_name() {
        let event_loop = EventLoop::new();
        let backend = SimulatedBackend::new();
        let probe = backend.probe();
        let mut manager = manager(backend, &event_loop);

        let generation = manager.create().unwrap();
        manager.handle_notification(running(generation));

        assert_eq!(manager.state(), EngineState::Running);
        assert!(manager.has_discovery());
        assert_eq!(
            manager.discovery().unwrap().enumeration_name(),
            "_services._dns-sd._udp.mesh.local."
        );
        assert_eq!(probe.live_sessions(), 1);

        // A repeated report does not open a second session
        manager.handle_notification(running(generation));
        assert_eq!(probe.live_sessions(), 1);
        assert_eq!(manager.stats().discovery_opened, 1);
    }

    #[tokio::test]
    async fn test_teardown_order_and_idempotence() {
        let event_loop = EventLoop::new();
        let backend = SimulatedBackend::new();
        let probe = backend.probe();
        let mut manager = manager(backend, &event_loop);

        let generation = manager.create().unwrap();
        manager.handle_notification(running(generation));

        manager.teardown();
        manager.teardown();

        assert_eq!(manager.state(), EngineState::Absent);
        assert_eq!(probe.live_engines(), 0);
        assert_eq!(probe.live_sessions(), 0);
        assert_eq!(probe.engines_freed(), 1);
        assert_eq!(probe.sessions_closed(), 1);
        assert!(probe.violations().is_empty());
    }

    #[tokio::test]
    async fn test_create_replaces_live_engine() {
        let event_loop = EventLoop::new();
        let backend = SimulatedBackend::new();
        let probe = backend.probe();
        let mut manager = manager(backend, &event_loop);

        for _ in 0..5 {
            let generation = manager.create().unwrap();
            manager.handle_notification(running(generation));
        }

        assert_eq!(manager.generation(), Some(5));
        assert_eq!(probe.max_live_engines(), 1);
        assert_eq!(probe.max_live_sessions(), 1);
        assert_eq!(probe.engines_freed(), 4);
        assert!(probe.violations().is_empty());
    }

    #[tokio::test]
    async fn test_stale_generation_ignored() {
        let event_loop = EventLoop::new();
        let backend = SimulatedBackend::new();
        let mut manager = manager(backend, &event_loop);

        let first = manager.create().unwrap();
        let second = manager.create().unwrap();
        assert_ne!(first, second);

        manager.handle_notification(running(first));
        assert_eq!(manager.state(), EngineState::Starting);
        assert!(!manager.has_discovery());
        assert_eq!(manager.stats().stale_events, 1);
    }

    #[tokio::test]
    async fn test_discovery_failure_is_not_fatal() {
        let event_loop = EventLoop::new();
        let backend = SimulatedBackend::new();
        let probe = backend.probe();
        probe.set_discovery_fails(true);
        let mut manager = manager(backend, &event_loop);

        let generation = manager.create().unwrap();
        manager.handle_notification(running(generation));

        assert_eq!(manager.state(), EngineState::Running);
        assert!(manager.has_engine());
        assert!(!manager.has_discovery());
        assert_eq!(manager.stats().discovery_failures, 1);
    }

    #[tokio::test]
    async fn test_create_failure_leaves_absent() {
        let event_loop = EventLoop::new();
        let backend = SimulatedBackend::new();
        let probe = backend.probe();
        let mut manager = manager(backend, &event_loop);

        manager.create().unwrap();
        probe.fail_next_creates(1);

        assert!(manager.create().is_err());
        assert_eq!(manager.state(), EngineState::Absent);
        assert_eq!(probe.live_engines(), 0);
        assert_eq!(manager.stats().create_failures, 1);
    }

    #[tokio::test]
    async fn test_degraded_state_closes_discovery() {
        let event_loop = EventLoop::new();
        let backend = SimulatedBackend::new();
        let probe = backend.probe();
        let mut manager = manager(backend, &event_loop);

        let generation = manager.create().unwrap();
        manager.handle_notification(running(generation));
        manager.handle_notification(EngineNotification {
            generation,
            state: EngineState::Failure,
            error: Some("interface went away".to_string()),
        });

        assert_eq!(manager.state(), EngineState::Failure);
        assert!(manager.has_engine());
        assert!(!manager.has_discovery());
        assert_eq!(probe.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_follow_type_once_per_generation() {
        let event_loop = EventLoop::new();
        let backend = SimulatedBackend::new();
        let probe = backend.probe();
        let mut manager = manager(backend, &event_loop);

        let generation = manager.create().unwrap();
        manager.handle_notification(running(generation));
        manager.follow_type(generation, "_http._tcp.mesh.local.");
        manager.follow_type(generation, "_http._tcp.mesh.local.");
        manager.follow_type(generation + 1, "_ssh._tcp.mesh.local.");

        assert_eq!(probe.followed_types(), vec!["_http._tcp.mesh.local.".to_string()]);
    }

    #[tokio::test]
    async fn test_simulated_running_is_queued() {
        let mut event_loop = EventLoop::new();
        let backend = SimulatedBackend::new();
        backend.probe().set_auto_running(true);
        let mut manager = manager(backend, &event_loop);

        let generation = manager.create().unwrap();
        assert!(!manager.has_discovery());

        match event_loop.try_next_event() {
            Some(LoopEvent::Engine(notification)) => {
                assert_eq!(notification, running(generation));
                manager.handle_notification(notification);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(manager.has_discovery());
        event_loop.destroy();
    }
}
