//! Known services registry.
//!
//! Plain data owned by the loop thread. It never references an engine, so it
//! keeps its contents across forced restarts; staleness is what ages entries
//! out.

use crate::export::ServicesSnapshot;
use crate::types::{DiscoveredService, ServiceStatus};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, info};

/// What a registry update did to an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEventType {
    /// New service discovered
    Discovered,

    /// Service information updated
    Updated,
}

/// Outcome of a staleness sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub marked_stale: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Debug, Default)]
pub struct KnownServices {
    services: HashMap<String, DiscoveredService>,
    service_types: BTreeSet<String>,
}

impl KnownServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn get(&self, instance_name: &str) -> Option<&DiscoveredService> {
        self.services.get(instance_name)
    }

    pub fn service_types(&self) -> impl Iterator<Item = &str> {
        self.service_types.iter().map(String::as_str)
    }

    /// Records an announced service type. Returns true if it was new.
    pub fn add_type(&mut self, service_type: &str) -> bool {
        self.service_types.insert(service_type.to_string())
    }

    pub fn remove_type(&mut self, service_type: &str) -> bool {
        self.service_types.remove(service_type)
    }

    /// Inserts a resolved service or refreshes the existing entry.
    pub fn upsert(&mut self, resolved: DiscoveredService) -> ServiceEventType {
        self.service_types.insert(resolved.service_type.clone());

        if let Some(existing) = self.services.get_mut(&resolved.instance_name) {
            existing.refresh_from(resolved);
            return ServiceEventType::Updated;
        }

        info!(
            service = resolved.instance_name,
            address = resolved.connection_string(),
            "Service discovered"
        );
        self.services
            .insert(resolved.instance_name.clone(), resolved);
        ServiceEventType::Discovered
    }

    /// Drops a service that left the network.
    pub fn remove(&mut self, instance_name: &str) -> Option<DiscoveredService> {
        let mut service = self.services.remove(instance_name)?;
        service.mark_lost();
        info!(service = instance_name, "Service removed");
        Some(service)
    }

    /// Marks entries unseen for `stale_timeout` as stale and drops entries
    /// unseen for twice that long.
    pub fn prune_stale(&mut self, now: DateTime<Utc>, stale_timeout: Duration) -> PruneReport {
        let Ok(timeout) = chrono::Duration::from_std(stale_timeout) else {
            return PruneReport::default();
        };
        let stale_threshold = now - timeout;
        let remove_threshold = stale_threshold - timeout;

        let mut report = PruneReport::default();
        for (name, service) in self.services.iter_mut() {
            if service.last_seen_at >= stale_threshold {
                continue;
            }

            if service.last_seen_at < remove_threshold {
                report.removed.push(name.clone());
            } else if service.status == ServiceStatus::Active {
                service.mark_stale();
                debug!(service = name, "Service marked as stale");
                report.marked_stale.push(name.clone());
            }
        }

        for name in &report.removed {
            if let Some(mut service) = self.services.remove(name) {
                service.mark_lost();
                info!(service = name, "Removing stale service");
            }
        }

        report
    }

    /// Copies the current contents into an export snapshot.
    pub fn snapshot(&self) -> ServicesSnapshot {
        let mut services: Vec<DiscoveredService> = self.services.values().cloned().collect();
        services.sort_by(|a, b| a.instance_name.cmp(&b.instance_name));

        ServicesSnapshot {
            generated_at: Utc::now(),
            service_types: self.service_types.iter().cloned().collect(),
            services,
        }
    }

    /// Loads entries from a previously written snapshot. Entries already
    /// present are kept.
    pub fn restore(&mut self, snapshot: ServicesSnapshot) -> usize {
        self.service_types.extend(snapshot.service_types);

        let mut restored = 0;
        for service in snapshot.services {
            if !self.services.contains_key(&service.instance_name) {
                self.services.insert(service.instance_name.clone(), service);
                restored += 1;
            }
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn service(name: &str) -> DiscoveredService {
        DiscoveredService::new(
            "_http._tcp.mesh.local.".to_string(),
            format!("{name}._http._tcp.mesh.local."),
            format!("{name}.local."),
            vec![],
            80,
            BTreeMap::new(),
        )
    }

    #[test]
    fn test_upsert_then_update() {
        let mut registry = KnownServices::new();
        assert_eq!(registry.upsert(service("a")), ServiceEventType::Discovered);
        assert_eq!(registry.upsert(service("a")), ServiceEventType::Updated);

        assert_eq!(registry.len(), 1);
        let entry = registry.get("a._http._tcp.mesh.local.").unwrap();
        assert_eq!(entry.seen_count, 2);
        assert_eq!(
            registry.service_types().collect::<Vec<_>>(),
            vec!["_http._tcp.mesh.local."]
        );
    }

    #[test]
    fn test_remove_marks_lost() {
        let mut registry = KnownServices::new();
        registry.upsert(service("a"));

        let removed = registry.remove("a._http._tcp.mesh.local.").unwrap();
        assert_eq!(removed.status, ServiceStatus::Lost);
        assert!(registry.is_empty());
        assert!(registry.remove("a._http._tcp.mesh.local.").is_none());
    }

    #[test]
    fn test_prune_stale_then_remove() {
        let mut registry = KnownServices::new();
        registry.upsert(service("old"));
        registry.upsert(service("fresh"));

        let timeout = Duration::from_secs(300);
        let now = Utc::now();

        // "old" was last seen 6 minutes ago
        registry.services.get_mut("old._http._tcp.mesh.local.").unwrap().last_seen_at =
            now - chrono::Duration::seconds(360);

        let report = registry.prune_stale(now, timeout);
        assert_eq!(report.marked_stale, vec!["old._http._tcp.mesh.local.".to_string()]);
        assert!(report.removed.is_empty());
        assert_eq!(
            registry.get("old._http._tcp.mesh.local.").unwrap().status,
            ServiceStatus::Stale
        );

        // Past twice the timeout for "old", past the timeout for "fresh"
        let later = now + chrono::Duration::seconds(301);
        let report = registry.prune_stale(later, timeout);
        assert_eq!(report.removed, vec!["old._http._tcp.mesh.local.".to_string()]);
        assert!(registry.get("old._http._tcp.mesh.local.").is_none());
        assert_eq!(
            registry.get("fresh._http._tcp.mesh.local.").unwrap().status,
            ServiceStatus::Stale
        );
    }

    #[test]
    fn test_snapshot_restore() {
        let mut registry = KnownServices::new();
        registry.upsert(service("b"));
        registry.upsert(service("a"));
        registry.add_type("_ssh._tcp.mesh.local.");

        let snapshot = registry.snapshot();
        let names: Vec<_> = snapshot
            .services
            .iter()
            .map(|s| s.instance_name.as_str())
            .collect();
        assert_eq!(names, vec!["a._http._tcp.mesh.local.", "b._http._tcp.mesh.local."]);
        assert_eq!(snapshot.service_types.len(), 2);

        let mut restored = KnownServices::new();
        restored.upsert(service("a"));
        assert_eq!(restored.restore(snapshot), 1);
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.service_types().count(), 2);
    }
}
