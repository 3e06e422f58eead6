//! Protocol engine seam.
//!
//! The wire-level mDNS/DNS-SD engine is an external collaborator. The daemon
//! drives it through three traits:
//!
//! - [`EngineBackend`] creates engine instances from the fixed [`EngineConfig`]
//! - [`Engine`] is one live instance; it can open a type discovery session
//! - [`DiscoverySession`] browses service types and follows their instances
//!
//! Engines report state changes asynchronously through a [`StateNotifier`] and
//! discovery results through a [`DiscoverySink`]. Both only enqueue a
//! [`LoopEvent`]; the event loop delivers it to the lifecycle manager on the
//! loop thread. Every instance is tagged with a [`Generation`] so events from
//! a torn-down engine can be told apart from the live one.

use crate::error::{ErrorClass, Result};
use crate::event_loop::{EventSender, LoopEvent};
use crate::types::DiscoveredService;
use meshsd_core::EngineConfig;
use std::fmt;

/// Sequence number of an engine instance, starting at 1
pub type Generation = u64;

/// Lifecycle state of the protocol engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// No engine instance exists
    Absent,

    /// Engine created, protocol negotiation in progress
    Starting,

    /// Engine is up; discovery may run
    Running,

    /// Host name collision reported
    Collision,

    /// Engine is (re-)registering its records
    Registering,

    /// Engine reported an invalid state
    Invalid,

    /// Engine failed; carries an error string
    Failure,
}

impl EngineState {
    /// States that are logged as warnings and healed by the next restart
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            EngineState::Collision
                | EngineState::Registering
                | EngineState::Invalid
                | EngineState::Failure
        )
    }

    /// Failure classification for degraded states
    pub fn class(&self) -> Option<ErrorClass> {
        self.is_degraded().then_some(ErrorClass::TransientProtocol)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Absent => "absent",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Collision => "collision",
            EngineState::Registering => "registering",
            EngineState::Invalid => "invalid",
            EngineState::Failure => "failure",
        };
        f.write_str(name)
    }
}

/// State change reported by an engine instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineNotification {
    pub generation: Generation,
    pub state: EngineState,
    pub error: Option<String>,
}

/// Result delivered by a discovery session
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    /// A service type is announced in the browse domain
    TypeFound { service_type: String },

    /// A service type is no longer announced
    TypeRemoved { service_type: String },

    /// A service instance was resolved
    ServiceResolved(DiscoveredService),

    /// A service instance went away
    ServiceRemoved {
        service_type: String,
        instance_name: String,
    },
}

/// Handle an engine uses to report its state changes
#[derive(Debug, Clone)]
pub struct StateNotifier {
    generation: Generation,
    events: EventSender,
}

impl StateNotifier {
    pub(crate) fn new(generation: Generation, events: EventSender) -> Self {
        Self { generation, events }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Reports a state change.
    pub fn notify(&self, state: EngineState) {
        self.send(state, None);
    }

    /// Reports a state change along with the engine's error string.
    pub fn notify_error(&self, state: EngineState, error: impl Into<String>) {
        self.send(state, Some(error.into()));
    }

    fn send(&self, state: EngineState, error: Option<String>) {
        self.events.send(LoopEvent::Engine(EngineNotification {
            generation: self.generation,
            state,
            error,
        }));
    }
}

/// Handle a discovery session uses to deliver its results
#[derive(Debug, Clone)]
pub struct DiscoverySink {
    generation: Generation,
    events: EventSender,
}

impl DiscoverySink {
    pub(crate) fn new(generation: Generation, events: EventSender) -> Self {
        Self { generation, events }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn deliver(&self, event: DiscoveryEvent) {
        self.events.send(LoopEvent::Discovery {
            generation: self.generation,
            event,
        });
    }
}

/// Factory for protocol engine instances
pub trait EngineBackend {
    /// Creates an engine bound to the running event loop.
    ///
    /// The engine reports `Running` through `notifier` once it is ready;
    /// creation itself only yields the `Starting` instance.
    fn create(&mut self, config: &EngineConfig, notifier: StateNotifier) -> Result<Box<dyn Engine>>;
}

/// One live protocol engine instance
pub trait Engine {
    /// Starts browsing `enumeration_name` for announced service types.
    fn open_discovery(
        &mut self,
        enumeration_name: &str,
        sink: DiscoverySink,
    ) -> Result<Box<dyn DiscoverySession>>;

    /// Most recent error reported by the engine, if any
    fn last_error(&self) -> Option<String>;

    /// Frees the engine. Every session opened on it must be closed first.
    fn shutdown(self: Box<Self>);
}

/// Service type discovery bound to the engine that opened it
pub trait DiscoverySession {
    /// Browses instances of a discovered service type.
    fn follow_type(&mut self, service_type: &str) -> Result<()>;

    /// Stops all browsing and frees the session.
    fn close(self: Box<Self>);
}
