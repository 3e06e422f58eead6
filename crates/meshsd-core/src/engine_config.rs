//! Configuration handed to the mDNS/DNS-SD protocol engine

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

/// Meta-query service type used to enumerate service types (RFC 6763 §9)
pub const SERVICE_TYPE_ENUMERATION: &str = "_services._dns-sd._udp";

/// Settings the protocol engine is created with.
///
/// The daemon only browses; it never announces records of its own, so every
/// `publish_*` flag defaults to off. Once the first engine has been created the
/// value is shared read-only for the rest of the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Publish the HINFO record for this host
    #[serde(default)]
    pub publish_hinfo: bool,

    /// Publish A/AAAA records for local interface addresses
    #[serde(default)]
    pub publish_addresses: bool,

    /// Publish the `_workstation._tcp` service
    #[serde(default)]
    pub publish_workstation: bool,

    /// Publish the local domain browsing records
    #[serde(default)]
    pub publish_domain: bool,

    /// Unicast DNS servers used for wide-area DNS-SD
    #[serde(default = "default_wide_area_servers")]
    pub wide_area_servers: Vec<IpAddr>,

    /// Enable wide-area (unicast) service discovery
    #[serde(default = "default_enable_wide_area")]
    pub enable_wide_area: bool,

    /// Domain that service types are browsed in
    #[serde(default = "default_browse_domain")]
    pub browse_domain: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            publish_hinfo: false,
            publish_addresses: false,
            publish_workstation: false,
            publish_domain: false,
            wide_area_servers: default_wide_area_servers(),
            enable_wide_area: default_enable_wide_area(),
            browse_domain: default_browse_domain(),
        }
    }
}

impl EngineConfig {
    /// Returns true if any local record would be published
    pub fn publishes_local_records(&self) -> bool {
        self.publish_hinfo
            || self.publish_addresses
            || self.publish_workstation
            || self.publish_domain
    }

    /// Fully qualified meta-query name for the browse domain,
    /// e.g. `_services._dns-sd._udp.mesh.local.`
    pub fn type_enumeration_name(&self) -> String {
        format!(
            "{}.{}.",
            SERVICE_TYPE_ENUMERATION,
            self.browse_domain.trim_end_matches('.')
        )
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.browse_domain.trim_matches('.').is_empty() {
            return Err("browse_domain cannot be empty".to_string());
        }

        if self.enable_wide_area && self.wide_area_servers.is_empty() {
            return Err("enable_wide_area requires at least one wide_area_server".to_string());
        }

        Ok(())
    }
}

fn default_wide_area_servers() -> Vec<IpAddr> {
    vec![IpAddr::V4(Ipv4Addr::new(192, 168, 50, 1))]
}

fn default_enable_wide_area() -> bool {
    true
}

fn default_browse_domain() -> String {
    "mesh.local".to_string()
}
