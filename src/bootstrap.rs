//! Startup and shutdown sequencing.
//!
//! Resources are acquired in a fixed order: management client, signal
//! handlers, event loop, engine configuration, then the restart timer is
//! armed and the loop runs. [`Resources::release`] frees whatever was
//! acquired, in a fixed order, on every exit path.

use crate::client::ManagementClient;
use anyhow::{Context, Result};
use meshsd_core::{AppConfig, EngineConfig};
use meshsd_discovery::{
    EngineBackend, EventLoop, ManagerSettings, QuitHandle, ServiceManager, SignalListener,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Steps performed by [`Resources::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStep {
    EngineConfig,
    Client,
    Discovery,
    Engine,
    EventLoop,
}

pub struct Resources<B> {
    client: Option<ManagementClient>,
    event_loop: Option<EventLoop>,
    engine_config: Option<Arc<EngineConfig>>,
    manager: Option<ServiceManager<B>>,
}

impl<B: EngineBackend> Resources<B> {
    pub fn new() -> Self {
        Self {
            client: None,
            event_loop: None,
            engine_config: None,
            manager: None,
        }
    }

    /// Acquires everything the loop needs and arms the restart timer.
    ///
    /// Must be called from within a Tokio runtime. On error the resources
    /// acquired so far are kept for [`release`](Self::release).
    pub fn acquire(&mut self, config: &AppConfig, backend: B) -> Result<()> {
        let client = ManagementClient::init(&config.daemon.bind)
            .context("Failed to initialize management client")?;
        self.client = Some(client);

        let signals = SignalListener::install().context("Failed to set signal handler")?;

        let event_loop = self.event_loop.insert(EventLoop::new());
        event_loop.attach_signals(signals);

        let engine_config = Arc::new(config.engine.clone());
        self.engine_config = Some(engine_config.clone());

        let mut manager = ServiceManager::new(
            backend,
            engine_config,
            ManagerSettings::from_config(config),
            event_loop.sender(),
        );
        manager.restore();
        manager.arm(event_loop);
        self.manager = Some(manager);

        debug!("Startup sequence complete");
        Ok(())
    }

    /// Quit handle of the event loop, once it exists
    pub fn quit_handle(&self) -> Option<QuitHandle> {
        self.event_loop.as_ref().map(EventLoop::quit_handle)
    }

    /// Runs the loop until quit. Returns the error that stopped it, if any.
    pub async fn run(&mut self) -> Result<()> {
        let (Some(event_loop), Some(manager)) = (self.event_loop.as_mut(), self.manager.as_mut())
        else {
            return Ok(());
        };

        event_loop.run(manager).await;

        match manager.take_fatal() {
            Some(e) => Err(e).context("Engine restart failed"),
            None => Ok(()),
        }
    }

    /// Frees every acquired resource. Absent resources are skipped, so
    /// calling this again does nothing.
    pub fn release(&mut self) -> Vec<ReleaseStep> {
        let mut steps = Vec::new();

        if self.engine_config.take().is_some() {
            steps.push(ReleaseStep::EngineConfig);
        }

        if let Some(mut client) = self.client.take() {
            client.shutdown();
            steps.push(ReleaseStep::Client);
        }

        if let Some(mut manager) = self.manager.take() {
            if manager.lifecycle().has_discovery() {
                steps.push(ReleaseStep::Discovery);
            }
            if manager.lifecycle().has_engine() {
                steps.push(ReleaseStep::Engine);
            }
            manager.shutdown();
        }

        if let Some(mut event_loop) = self.event_loop.take() {
            event_loop.destroy();
            steps.push(ReleaseStep::EventLoop);
        }

        if !steps.is_empty() {
            debug!(?steps, "Resources released");
        }
        steps
    }
}

impl<B: EngineBackend> Default for Resources<B> {
    fn default() -> Self {
        Self::new()
    }
}

/// Full daemon run: acquire, run, release.
pub async fn run<B: EngineBackend>(config: &AppConfig, backend: B) -> Result<()> {
    let mut resources = Resources::new();

    let outcome = match resources.acquire(config, backend) {
        Ok(()) => {
            info!("Service manager running");
            resources.run().await
        }
        Err(e) => Err(e),
    };

    resources.release();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshsd_discovery::simulator::SimulatedBackend;
    use meshsd_discovery::EngineState;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.daemon.bind = "/tmp/meshsd-test.sock".to_string();
        config.daemon.output_file = dir.path().join("services.out");
        config
    }

    fn quit_after(handle: QuitHandle, after: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            handle.request_quit();
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_starting_releases_engine_once() {
        let dir = TempDir::new().unwrap();
        let backend = SimulatedBackend::new();
        let probe = backend.probe();

        let mut resources = Resources::new();
        resources.acquire(&config(&dir), backend).unwrap();
        quit_after(resources.quit_handle().unwrap(), Duration::from_secs(1));

        resources.run().await.unwrap();

        assert_eq!(
            resources.release(),
            vec![
                ReleaseStep::EngineConfig,
                ReleaseStep::Client,
                ReleaseStep::Engine,
                ReleaseStep::EventLoop,
            ]
        );
        assert!(resources.release().is_empty());
        assert_eq!(probe.engines_created(), 1);
        assert_eq!(probe.engines_freed(), 1);
        assert_eq!(probe.sessions_closed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_order_with_discovery() {
        let dir = TempDir::new().unwrap();
        let backend = SimulatedBackend::new();
        let probe = backend.probe();
        probe.set_auto_running(true);

        let mut resources = Resources::new();
        resources.acquire(&config(&dir), backend).unwrap();
        quit_after(resources.quit_handle().unwrap(), Duration::from_secs(1));
        resources.run().await.unwrap();

        assert_eq!(
            resources.release(),
            vec![
                ReleaseStep::EngineConfig,
                ReleaseStep::Client,
                ReleaseStep::Discovery,
                ReleaseStep::Engine,
                ReleaseStep::EventLoop,
            ]
        );
        assert!(probe.violations().is_empty());
        assert_eq!(probe.live_engines(), 0);
        assert_eq!(probe.live_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_create_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let backend = SimulatedBackend::new();
        backend.probe().fail_next_creates(1);

        let mut resources = Resources::new();
        resources.acquire(&config(&dir), backend).unwrap();

        let err = resources.run().await.unwrap_err();
        assert!(err.to_string().contains("Engine restart failed"));
        assert_eq!(
            resources.release(),
            vec![
                ReleaseStep::EngineConfig,
                ReleaseStep::Client,
                ReleaseStep::EventLoop,
            ]
        );
    }

    #[tokio::test]
    async fn test_client_failure_releases_nothing() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.daemon.bind = String::new();

        let err = run(&config, SimulatedBackend::new()).await.unwrap_err();
        assert!(err.to_string().contains("management client"));

        let mut resources: Resources<SimulatedBackend> = Resources::new();
        assert!(resources.acquire(&config, SimulatedBackend::new()).is_err());
        assert!(resources.quit_handle().is_none());
        assert!(resources.release().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_state_does_not_stop_daemon() {
        let dir = TempDir::new().unwrap();
        let backend = SimulatedBackend::new();
        let probe = backend.probe();
        probe.set_auto_running(true);

        let mut resources = Resources::new();
        resources.acquire(&config(&dir), backend).unwrap();

        let reporter = probe.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            reporter.report(EngineState::Failure, Some("socket closed"));
        });
        quit_after(resources.quit_handle().unwrap(), Duration::from_secs(70));

        resources.run().await.unwrap();
        assert_eq!(probe.engines_created(), 2);
        resources.release();
    }
}
