//! Types for discovered services and their metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use uuid::Uuid;

/// A service instance resolved on the mesh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredService {
    /// Unique identifier for this discovered service
    pub id: String,

    /// Service type with domain (e.g. "_http._tcp.mesh.local.")
    pub service_type: String,

    /// Full instance name (e.g. "Node Portal._http._tcp.mesh.local.")
    pub instance_name: String,

    /// Hostname or domain name
    pub hostname: String,

    /// IP addresses (can be multiple for dual-stack)
    pub addresses: Vec<IpAddr>,

    /// Service port
    pub port: u16,

    /// TXT record properties (key-value metadata)
    pub properties: BTreeMap<String, String>,

    /// Current status of the service
    pub status: ServiceStatus,

    /// First discovered timestamp
    pub discovered_at: DateTime<Utc>,

    /// Last seen timestamp (updated when service is refreshed)
    pub last_seen_at: DateTime<Utc>,

    /// Number of times this service has been seen
    pub seen_count: u64,
}

impl DiscoveredService {
    /// Creates a new discovered service
    pub fn new(
        service_type: String,
        instance_name: String,
        hostname: String,
        addresses: Vec<IpAddr>,
        port: u16,
        properties: BTreeMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            service_type,
            instance_name,
            hostname,
            addresses,
            port,
            properties,
            status: ServiceStatus::Active,
            discovered_at: now,
            last_seen_at: now,
            seen_count: 1,
        }
    }

    /// Takes the record data of a fresh resolution, keeping identity and history
    pub fn refresh_from(&mut self, resolved: DiscoveredService) {
        self.hostname = resolved.hostname;
        self.addresses = resolved.addresses;
        self.port = resolved.port;
        self.properties = resolved.properties;
        self.mark_seen();
    }

    /// Updates the last seen timestamp
    pub fn mark_seen(&mut self) {
        self.last_seen_at = Utc::now();
        self.seen_count += 1;
        self.status = ServiceStatus::Active;
    }

    /// Marks the service as stale (not seen recently)
    pub fn mark_stale(&mut self) {
        self.status = ServiceStatus::Stale;
    }

    /// Marks the service as lost (removed from network)
    pub fn mark_lost(&mut self) {
        self.status = ServiceStatus::Lost;
    }

    /// Returns the primary address (prefer IPv4)
    pub fn primary_address(&self) -> Option<IpAddr> {
        self.addresses
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| self.addresses.first())
            .copied()
    }

    /// Returns the connection string (host:port)
    pub fn connection_string(&self) -> String {
        if let Some(addr) = self.primary_address() {
            format!("{}:{}", addr, self.port)
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }
}

/// Status of a discovered service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Service was seen within the stale timeout
    Active,

    /// Service hasn't been seen recently but not yet timed out
    Stale,

    /// Service has been removed or timed out
    Lost,
}
