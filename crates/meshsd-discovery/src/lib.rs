//! Mesh service discovery over mDNS/DNS-SD.
//!
//! This crate keeps a local view of the services announced on a mesh
//! network:
//! - Runs one multicast DNS engine at a time and forcibly rebuilds it on a
//!   fixed cadence, so lost announcements are recovered by fresh queries
//! - Browses the DNS-SD service type enumeration whenever the engine is
//!   running, and follows the instances of each type it finds
//! - Maintains a registry of known services with stale tracking
//! - Exports the registry as JSON on request
//!
//! # Architecture
//!
//! Everything runs on a single-threaded [`EventLoop`]. Engine state changes,
//! discovery results, control signals and the restart timer all arrive as
//! loop items and are handled one at a time by a [`ServiceManager`]:
//!
//! 1. The [`RestartScheduler`] fires at start and every interval after that
//! 2. Each fire tears down discovery and engine, then creates a new engine
//! 3. The [`LifecycleManager`] opens discovery when the engine reports running
//!    and closes it when the engine leaves that state
//!
//! The wire protocol lives behind the [`EngineBackend`] trait. The production
//! backend is [`MdnsSdBackend`]; the `simulator` feature adds an in-memory
//! backend for tests.
//!
//! # Example
//!
//! ```no_run
//! use meshsd_core::AppConfig;
//! use meshsd_discovery::{EventLoop, ManagerSettings, MdnsSdBackend, ServiceManager};
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let config = AppConfig::default();
//!     let mut event_loop = EventLoop::new();
//!     let mut manager = ServiceManager::new(
//!         MdnsSdBackend::new(),
//!         Arc::new(config.engine.clone()),
//!         ManagerSettings::from_config(&config),
//!         event_loop.sender(),
//!     );
//!
//!     manager.arm(&mut event_loop);
//!     event_loop.run(&mut manager).await;
//!     manager.shutdown();
//! }
//! ```

pub mod discovery;
pub mod engine;
pub mod error;
pub mod event_loop;
pub mod export;
pub mod lifecycle;
pub mod mdns;
pub mod registry;
pub mod scheduler;
pub mod service_manager;
pub mod signals;
pub mod types;

#[cfg(any(test, feature = "simulator"))]
pub mod simulator;

pub use discovery::DiscoveryController;
pub use engine::{
    DiscoveryEvent, DiscoverySession, DiscoverySink, Engine, EngineBackend, EngineNotification,
    EngineState, Generation, StateNotifier,
};
pub use error::{DiscoveryError, ErrorClass, Result};
pub use event_loop::{EventLoop, EventSender, LoopContext, LoopEvent, LoopHandler, QuitHandle, TimerId};
pub use export::{ServicesSnapshot, SnapshotWriter};
pub use lifecycle::{LifecycleManager, LifecycleStats};
pub use mdns::MdnsSdBackend;
pub use registry::KnownServices;
pub use scheduler::{RestartScheduler, DEFAULT_RESTART_INTERVAL};
pub use service_manager::{ManagerSettings, ServiceManager};
pub use signals::{ControlSignal, SignalListener};
pub use types::{DiscoveredService, ServiceStatus};
