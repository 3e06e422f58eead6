//! Service type discovery controller.
//!
//! A controller is opened on a running engine and browses the DNS-SD type
//! enumeration name of the browse domain. Every type it learns about is
//! followed once so its instances get resolved. The controller borrows the
//! engine's sockets, so it is always closed before that engine is freed.

use crate::engine::{DiscoverySession, DiscoverySink, Engine, Generation};
use crate::error::Result;
use std::collections::BTreeSet;
use tracing::{debug, info};

pub struct DiscoveryController {
    generation: Generation,
    enumeration_name: String,
    session: Box<dyn DiscoverySession>,
    followed: BTreeSet<String>,
}

impl DiscoveryController {
    /// Opens type discovery on `engine`.
    pub fn open(
        engine: &mut dyn Engine,
        enumeration_name: &str,
        sink: DiscoverySink,
    ) -> Result<Self> {
        let generation = sink.generation();
        let session = engine.open_discovery(enumeration_name, sink)?;

        info!(
            generation,
            enumeration_name, "Service type browser created"
        );

        Ok(Self {
            generation,
            enumeration_name: enumeration_name.to_string(),
            session,
            followed: BTreeSet::new(),
        })
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn enumeration_name(&self) -> &str {
        &self.enumeration_name
    }

    /// Follows instances of `service_type`. Returns false if it was already
    /// followed by this controller.
    pub fn follow(&mut self, service_type: &str) -> Result<bool> {
        if self.followed.contains(service_type) {
            return Ok(false);
        }

        self.session.follow_type(service_type)?;
        self.followed.insert(service_type.to_string());
        debug!(generation = self.generation, service_type, "Following service type");
        Ok(true)
    }

    /// Stops browsing and frees the session.
    pub fn close(self) {
        debug!(
            generation = self.generation,
            followed = self.followed.len(),
            "Freeing service type browser"
        );
        self.session.close();
    }
}
