//! Loop handler tying the daemon together.
//!
//! [`ServiceManager`] is the single context every loop callback receives: the
//! restart timer drives the lifecycle manager, engine notifications drive
//! discovery, discovery results feed the known services registry, and export
//! requests write the registry out.

use crate::engine::{DiscoveryEvent, EngineBackend};
use crate::error::{DiscoveryError, Result};
use crate::event_loop::{EventLoop, EventSender, LoopContext, LoopEvent, LoopHandler, TimerId};
use crate::export::SnapshotWriter;
use crate::lifecycle::LifecycleManager;
use crate::registry::KnownServices;
use crate::scheduler::RestartScheduler;
use chrono::Utc;
use meshsd_core::{AppConfig, EngineConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Runtime settings of a [`ServiceManager`]
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub restart_interval: Duration,
    pub stale_timeout: Duration,
    pub output_file: PathBuf,
    pub persist: bool,
}

impl ManagerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            restart_interval: config.restart.interval(),
            stale_timeout: config.registry.stale_timeout(),
            output_file: config.daemon.output_file.clone(),
            persist: config.daemon.persist,
        }
    }
}

pub struct ServiceManager<B> {
    lifecycle: LifecycleManager<B>,
    scheduler: RestartScheduler,
    registry: KnownServices,
    exporter: SnapshotWriter,
    stale_timeout: Duration,
    persist: bool,
    fatal: Option<DiscoveryError>,
    shut_down: bool,
}

impl<B: EngineBackend> ServiceManager<B> {
    pub fn new(
        backend: B,
        engine_config: Arc<EngineConfig>,
        settings: ManagerSettings,
        events: EventSender,
    ) -> Self {
        Self {
            lifecycle: LifecycleManager::new(backend, engine_config, events),
            scheduler: RestartScheduler::new(settings.restart_interval),
            registry: KnownServices::new(),
            exporter: SnapshotWriter::new(settings.output_file),
            stale_timeout: settings.stale_timeout,
            persist: settings.persist,
            fatal: None,
            shut_down: false,
        }
    }

    pub fn lifecycle(&self) -> &LifecycleManager<B> {
        &self.lifecycle
    }

    pub fn scheduler(&self) -> &RestartScheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> &KnownServices {
        &self.registry
    }

    /// Arms the restart timer for an immediate first engine start.
    pub fn arm(&mut self, event_loop: &mut EventLoop) -> TimerId {
        let timer = self.scheduler.arm(event_loop);
        info!(
            interval_secs = self.scheduler.interval().as_secs(),
            "Restart timer armed"
        );
        timer
    }

    /// Reloads the last snapshot when persistence is enabled.
    pub fn restore(&mut self) {
        if !self.persist {
            return;
        }

        match self.exporter.load() {
            Ok(Some(snapshot)) => {
                let restored = self.registry.restore(snapshot);
                info!(restored, "Restored known services");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not restore known services"),
        }
    }

    /// Writes the known services to the output file.
    pub fn export(&self) -> Result<()> {
        self.exporter.write(&self.registry.snapshot())
    }

    /// Error that made the loop quit, if any
    pub fn take_fatal(&mut self) -> Option<DiscoveryError> {
        self.fatal.take()
    }

    /// Frees discovery and engine, then flushes the snapshot when persistence
    /// is enabled. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.lifecycle.teardown();

        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if self.persist {
            if let Err(e) = self.export() {
                error!(error = %e, "Failed to persist known services");
            }
        }
    }

    fn on_discovery(&mut self, generation: u64, event: DiscoveryEvent) {
        if self.lifecycle.generation() != Some(generation) {
            debug!(generation, "Ignoring discovery event from freed engine");
            return;
        }

        match event {
            DiscoveryEvent::TypeFound { service_type } => {
                if self.registry.add_type(&service_type) {
                    info!(service_type, "Service type found");
                }
                self.lifecycle.follow_type(generation, &service_type);
            }
            DiscoveryEvent::TypeRemoved { service_type } => {
                if self.registry.remove_type(&service_type) {
                    info!(service_type, "Service type removed");
                }
            }
            DiscoveryEvent::ServiceResolved(service) => {
                self.registry.upsert(service);
            }
            DiscoveryEvent::ServiceRemoved { instance_name, .. } => {
                self.registry.remove(&instance_name);
            }
        }
    }
}

impl<B: EngineBackend> LoopHandler for ServiceManager<B> {
    fn on_timer(&mut self, timer: TimerId, ctx: &mut LoopContext<'_>) {
        if !self.scheduler.owns(timer) {
            debug!(?timer, "Ignoring unknown timer");
            return;
        }

        let report = self.registry.prune_stale(Utc::now(), self.stale_timeout);
        if !report.marked_stale.is_empty() || !report.removed.is_empty() {
            debug!(
                stale = report.marked_stale.len(),
                removed = report.removed.len(),
                "Pruned known services"
            );
        }

        if let Err(e) = self.scheduler.fire(&mut self.lifecycle, ctx) {
            self.fatal = Some(e);
        }
    }

    fn on_event(&mut self, event: LoopEvent, _ctx: &mut LoopContext<'_>) {
        match event {
            LoopEvent::Engine(notification) => self.lifecycle.handle_notification(notification),
            LoopEvent::Discovery { generation, event } => self.on_discovery(generation, event),
            LoopEvent::ExportRequested => {
                if let Err(e) = self.export() {
                    error!(error = %e, "Failed to export known services");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineState;
    use crate::simulator::{SimProbe, SimulatedBackend};
    use crate::types::DiscoveredService;
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use tokio::time::Instant;

    struct Harness {
        event_loop: EventLoop,
        manager: ServiceManager<SimulatedBackend>,
        probe: SimProbe,
        _dir: TempDir,
    }

    fn harness(persist: bool) -> Harness {
        let dir = TempDir::new().unwrap();
        let event_loop = EventLoop::new();
        let backend = SimulatedBackend::new();
        let probe = backend.probe();
        let settings = ManagerSettings {
            restart_interval: Duration::from_secs(64),
            stale_timeout: Duration::from_secs(300),
            output_file: dir.path().join("services.out"),
            persist,
        };
        let manager = ServiceManager::new(
            backend,
            Arc::new(EngineConfig::default()),
            settings,
            event_loop.sender(),
        );
        Harness {
            event_loop,
            manager,
            probe,
            _dir: dir,
        }
    }

    fn quit_after(event_loop: &EventLoop, after: Duration) {
        let quit = event_loop.quit_handle();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            quit.request_quit();
        });
    }

    fn portal() -> DiscoveredService {
        DiscoveredService::new(
            "_http._tcp.mesh.local.".to_string(),
            "Portal._http._tcp.mesh.local.".to_string(),
            "node1.local.".to_string(),
            vec![],
            80,
            BTreeMap::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_boot_creates_engine_and_discovery() {
        let mut h = harness(false);
        h.probe.set_auto_running(true);
        h.manager.arm(&mut h.event_loop);
        quit_after(&h.event_loop, Duration::from_secs(1));

        let start = Instant::now();
        h.event_loop.run(&mut h.manager).await;

        assert_eq!(h.probe.created_at(), vec![start]);
        assert_eq!(h.manager.lifecycle().state(), EngineState::Running);
        assert!(h.manager.lifecycle().has_discovery());
        assert!(h.event_loop.iterations() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_spacing_is_fixed() {
        let mut h = harness(false);
        h.probe.set_auto_running(true);
        h.manager.arm(&mut h.event_loop);
        quit_after(&h.event_loop, Duration::from_secs(64 * 4 + 1));

        let start = Instant::now();
        h.event_loop.run(&mut h.manager).await;

        let offsets: Vec<u64> = h
            .probe
            .freed_at()
            .iter()
            .map(|at| (*at - start).as_secs())
            .collect();
        assert_eq!(offsets, vec![64, 128, 192, 256]);
        assert_eq!(h.probe.engines_created(), 5);
        assert_eq!(h.probe.max_live_engines(), 1);
        assert_eq!(h.probe.max_live_sessions(), 1);
        assert!(h.probe.violations().is_empty());

        h.manager.shutdown();
        h.manager.shutdown();
        assert_eq!(h.probe.live_engines(), 0);
        assert_eq!(h.probe.engines_freed(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_failure_quits_but_rearms() {
        let mut h = harness(false);
        let timer = h.manager.arm(&mut h.event_loop);
        h.probe.fail_next_creates(1);

        h.event_loop.run(&mut h.manager).await;

        let fatal = h.manager.take_fatal().unwrap();
        assert!(fatal.is_fatal());
        assert!(!h.manager.lifecycle().has_engine());
        assert_eq!(h.manager.scheduler().fires(), 1);

        // the cadence stays armed even though the loop is quitting
        assert!(h.event_loop.is_armed(timer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_state_healed_by_next_restart() {
        let mut h = harness(false);
        h.probe.set_auto_running(true);
        h.manager.arm(&mut h.event_loop);

        let probe = h.probe.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            probe.report(EngineState::Failure, Some("no route to host"));
        });
        quit_after(&h.event_loop, Duration::from_secs(65));

        let start = Instant::now();
        h.event_loop.run(&mut h.manager).await;

        assert!(h.manager.take_fatal().is_none());
        let created: Vec<u64> = h
            .probe
            .created_at()
            .iter()
            .map(|at| (*at - start).as_secs())
            .collect();
        assert_eq!(created, vec![0, 64]);
        assert_eq!(h.manager.lifecycle().state(), EngineState::Running);
        assert!(h.manager.lifecycle().has_discovery());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_results_reach_registry() {
        let mut h = harness(false);
        h.probe.set_auto_running(true);
        h.manager.arm(&mut h.event_loop);

        let probe = h.probe.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            probe.announce_type("_http._tcp.mesh.local.");
            probe.resolve(portal());
        });
        quit_after(&h.event_loop, Duration::from_secs(2));

        h.event_loop.run(&mut h.manager).await;

        assert_eq!(h.probe.followed_types(), vec!["_http._tcp.mesh.local.".to_string()]);
        assert_eq!(h.manager.registry().len(), 1);
        assert!(h
            .manager
            .registry()
            .get("Portal._http._tcp.mesh.local.")
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_survives_restart() {
        let mut h = harness(false);
        h.probe.set_auto_running(true);
        h.manager.arm(&mut h.event_loop);

        let probe = h.probe.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            probe.resolve(portal());
        });
        quit_after(&h.event_loop, Duration::from_secs(70));

        h.event_loop.run(&mut h.manager).await;

        assert_eq!(h.probe.engines_created(), 2);
        assert_eq!(h.manager.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_persist_round_trip() {
        let dir = TempDir::new().unwrap();
        let settings = ManagerSettings {
            restart_interval: Duration::from_secs(64),
            stale_timeout: Duration::from_secs(300),
            output_file: dir.path().join("services.out"),
            persist: true,
        };

        let event_loop = EventLoop::new();
        let mut first = ServiceManager::new(
            SimulatedBackend::new(),
            Arc::new(EngineConfig::default()),
            settings.clone(),
            event_loop.sender(),
        );
        first.registry.upsert(portal());
        first.shutdown();

        let mut second = ServiceManager::new(
            SimulatedBackend::new(),
            Arc::new(EngineConfig::default()),
            settings,
            event_loop.sender(),
        );
        second.restore();
        assert_eq!(second.registry().len(), 1);
    }
}
