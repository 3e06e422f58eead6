//! Common helpers for the daemon integration tests

#![allow(dead_code)]

use meshsd_core::EngineConfig;
use meshsd_discovery::simulator::{SimProbe, SimulatedBackend};
use meshsd_discovery::{DiscoveredService, EventLoop, ManagerSettings, ServiceManager};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Event loop, service manager and simulated engine wired together
pub struct TestDaemon {
    pub event_loop: EventLoop,
    pub manager: ServiceManager<SimulatedBackend>,
    pub probe: SimProbe,
    pub output_file: PathBuf,
    _dir: TempDir,
}

impl TestDaemon {
    pub fn new() -> Self {
        Self::with_output(|dir| dir.join("local-services.out"), false)
    }

    pub fn with_output(output: impl FnOnce(&std::path::Path) -> PathBuf, persist: bool) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let output_file = output(dir.path());

        let event_loop = EventLoop::new();
        let backend = SimulatedBackend::new();
        let probe = backend.probe();
        let settings = ManagerSettings {
            restart_interval: Duration::from_secs(64),
            stale_timeout: Duration::from_secs(300),
            output_file: output_file.clone(),
            persist,
        };
        let manager = ServiceManager::new(
            backend,
            Arc::new(EngineConfig::default()),
            settings,
            event_loop.sender(),
        );

        Self {
            event_loop,
            manager,
            probe,
            output_file,
            _dir: dir,
        }
    }

    /// Arms the restart timer and runs the loop until `after` has elapsed.
    pub async fn run_for(&mut self, after: Duration) {
        self.manager.arm(&mut self.event_loop);
        let quit = self.event_loop.quit_handle();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            quit.request_quit();
        });
        self.event_loop.run(&mut self.manager).await;
    }
}

pub fn service(instance: &str, service_type: &str, port: u16) -> DiscoveredService {
    let mut properties = BTreeMap::new();
    properties.insert("txtvers".to_string(), "1".to_string());

    DiscoveredService::new(
        service_type.to_string(),
        format!("{}.{}", instance, service_type),
        "node1.mesh.local.".to_string(),
        vec!["10.0.0.7".parse::<IpAddr>().unwrap()],
        port,
        properties,
    )
}

/// Sleeps in the background and then runs `f`
pub fn after(delay: Duration, f: impl FnOnce() + Send + 'static) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        f();
    });
}
