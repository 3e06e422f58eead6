//! Multicast DNS engine backed by the `mdns-sd` daemon.
//!
//! Each [`MdnsSdEngine`] owns one `ServiceDaemon`. Daemon status, daemon
//! errors and browse results are forwarded from small tasks into the event
//! loop queue; the tasks are aborted when the session or engine goes away.

use crate::engine::{
    DiscoveryEvent, DiscoverySession, DiscoverySink, Engine, EngineBackend, EngineState,
    StateNotifier,
};
use crate::error::{DiscoveryError, Result};
use crate::types::DiscoveredService;
use mdns_sd::{DaemonEvent, DaemonStatus, ServiceDaemon, ServiceEvent, ServiceInfo};
use meshsd_core::EngineConfig;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Creates engines on top of `mdns_sd::ServiceDaemon`
#[derive(Debug, Default)]
pub struct MdnsSdBackend;

impl MdnsSdBackend {
    pub fn new() -> Self {
        Self
    }
}

impl EngineBackend for MdnsSdBackend {
    fn create(&mut self, config: &EngineConfig, notifier: StateNotifier) -> Result<Box<dyn Engine>> {
        let daemon = ServiceDaemon::new().map_err(|e| {
            DiscoveryError::EngineCreateFailed(format!("Failed to create mDNS daemon: {}", e))
        })?;

        if config.enable_wide_area && !config.wide_area_servers.is_empty() {
            debug!(
                servers = ?config.wide_area_servers,
                "Wide-area servers are not used by the multicast engine"
            );
        }
        if config.publishes_local_records() {
            warn!("Host record publishing is not supported, records stay unpublished");
        }

        let last_error = Arc::new(Mutex::new(None));
        let mut tasks = Vec::new();

        match daemon.status() {
            Ok(status) => {
                let notifier = notifier.clone();
                tasks.push(tokio::spawn(async move {
                    if let Ok(DaemonStatus::Running) = status.recv_async().await {
                        notifier.notify(EngineState::Running);
                    }
                }));
            }
            Err(e) => warn!(error = %e, "Could not query mDNS daemon status"),
        }

        match daemon.monitor() {
            Ok(monitor) => {
                let notifier = notifier.clone();
                let last_error = last_error.clone();
                tasks.push(tokio::spawn(async move {
                    while let Ok(event) = monitor.recv_async().await {
                        match event {
                            DaemonEvent::Error(e) => {
                                let reason = e.to_string();
                                *last_error.lock() = Some(reason.clone());
                                notifier.notify_error(EngineState::Failure, reason);
                            }
                            other => debug!(event = ?other, "mDNS daemon event"),
                        }
                    }
                }));
            }
            Err(e) => warn!(error = %e, "Could not monitor mDNS daemon"),
        }

        debug!(generation = notifier.generation(), "mDNS daemon started");

        Ok(Box::new(MdnsSdEngine {
            daemon,
            generation: notifier.generation(),
            last_error,
            tasks,
        }))
    }
}

/// One `mdns-sd` daemon instance
pub struct MdnsSdEngine {
    daemon: ServiceDaemon,
    generation: u64,
    last_error: Arc<Mutex<Option<String>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine for MdnsSdEngine {
    fn open_discovery(
        &mut self,
        enumeration_name: &str,
        sink: DiscoverySink,
    ) -> Result<Box<dyn DiscoverySession>> {
        let browse_name = multicast_name(enumeration_name)?;
        if browse_name != enumeration_name {
            debug!(
                enumeration_name,
                browse_name = %browse_name,
                "Browsing type enumeration on multicast domain"
            );
        }

        let receiver = self
            .daemon
            .browse(&browse_name)
            .map_err(|e| DiscoveryError::BrowseFailed {
                service_type: enumeration_name.to_string(),
                reason: e.to_string(),
            })?;

        let types_sink = sink.clone();
        let task = tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                match event {
                    ServiceEvent::ServiceFound(_, service_type) => {
                        types_sink.deliver(DiscoveryEvent::TypeFound { service_type });
                    }
                    ServiceEvent::ServiceRemoved(_, service_type) => {
                        types_sink.deliver(DiscoveryEvent::TypeRemoved { service_type });
                    }
                    other => debug!(event = ?other, "Type browse event"),
                }
            }
        });

        Ok(Box::new(MdnsSdSession {
            daemon: self.daemon.clone(),
            sink,
            browsing: vec![browse_name],
            tasks: vec![task],
        }))
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn shutdown(self: Box<Self>) {
        for task in &self.tasks {
            task.abort();
        }
        if let Err(e) = self.daemon.shutdown() {
            warn!(error = %e, generation = self.generation, "Failed to shutdown mDNS daemon");
        }
        debug!(generation = self.generation, "mDNS engine freed");
    }
}

/// Browse handles opened on an [`MdnsSdEngine`]
pub struct MdnsSdSession {
    daemon: ServiceDaemon,
    sink: DiscoverySink,
    browsing: Vec<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl DiscoverySession for MdnsSdSession {
    fn follow_type(&mut self, service_type: &str) -> Result<()> {
        let browse_name = multicast_name(service_type)?;
        let receiver = self
            .daemon
            .browse(&browse_name)
            .map_err(|e| DiscoveryError::BrowseFailed {
                service_type: service_type.to_string(),
                reason: e.to_string(),
            })?;

        let sink = self.sink.clone();
        let task = tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        debug!(
                            service = info.get_fullname(),
                            hostname = info.get_hostname(),
                            port = info.get_port(),
                            "Service resolved"
                        );
                        sink.deliver(DiscoveryEvent::ServiceResolved(convert_service_info(&info)));
                    }
                    ServiceEvent::ServiceRemoved(service_type, instance_name) => {
                        sink.deliver(DiscoveryEvent::ServiceRemoved {
                            service_type,
                            instance_name,
                        });
                    }
                    other => debug!(event = ?other, "Service browse event"),
                }
            }
        });

        self.browsing.push(browse_name);
        self.tasks.push(task);
        Ok(())
    }

    fn close(self: Box<Self>) {
        for task in &self.tasks {
            task.abort();
        }
        for service_type in &self.browsing {
            if let Err(e) = self.daemon.stop_browse(service_type) {
                debug!(service_type, error = %e, "Failed to stop browse");
            }
        }
    }
}

/// Maps a DNS-SD name under a `.local` browse domain onto the multicast
/// `.local.` suffix, e.g. `_services._dns-sd._udp.mesh.local.` becomes
/// `_services._dns-sd._udp.local.`. Names outside `.local` cannot be
/// browsed over multicast.
fn multicast_name(name: &str) -> Result<String> {
    let unsupported = |reason: &str| DiscoveryError::BrowseFailed {
        service_type: name.to_string(),
        reason: reason.to_string(),
    };

    let labels: Vec<&str> = name.trim_end_matches('.').split('.').collect();
    let proto = labels
        .iter()
        .position(|label| *label == "_tcp" || *label == "_udp")
        .ok_or_else(|| unsupported("no _tcp or _udp protocol label"))?;

    if labels[proto + 1..].last() != Some(&"local") {
        return Err(unsupported("multicast browsing needs a .local domain"));
    }

    Ok(format!("{}.local.", labels[..=proto].join(".")))
}

fn convert_service_info(info: &ServiceInfo) -> DiscoveredService {
    let addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();

    let properties: BTreeMap<String, String> = info
        .get_properties()
        .iter()
        .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
        .collect();

    DiscoveredService::new(
        info.get_type().to_string(),
        info.get_fullname().to_string(),
        info.get_hostname().to_string(),
        addresses,
        info.get_port(),
        properties,
    )
}
