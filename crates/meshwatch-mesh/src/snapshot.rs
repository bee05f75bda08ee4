//! Registry snapshot kept for discovery responses
//!
//! Holds the latest membership of every watched service plus a version that
//! increases on every accepted change.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use meshwatch_common::{RegistryEvent, ServiceInstance, UpdateSink};

/// Latest known membership of one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSnapshot {
    pub index: u64,
    pub instances: Vec<ServiceInstance>,
    pub observed_at: DateTime<Utc>,
}

/// `UpdateSink` that keeps the latest membership per service.
///
/// Events whose index is not ahead of the stored one are ignored, so a
/// replayed or reordered update can never roll a service back.
#[derive(Debug, Default)]
pub struct SnapshotSink {
    services: DashMap<String, ServiceSnapshot>,
    version: AtomicU64,
}

impl SnapshotSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event; returns whether it changed the snapshot.
    pub fn apply(&self, event: RegistryEvent) -> bool {
        let snapshot = ServiceSnapshot {
            index: event.index,
            instances: event.instances,
            observed_at: event.observed_at,
        };

        match self.services.entry(event.service_id) {
            Entry::Occupied(mut entry) => {
                if snapshot.index <= entry.get().index {
                    debug!(
                        service_id = %entry.key(),
                        index = snapshot.index,
                        stored = entry.get().index,
                        "Ignoring update that is not ahead of snapshot"
                    );
                    return false;
                }
                entry.insert(snapshot);
            }
            Entry::Vacant(entry) => {
                entry.insert(snapshot);
            }
        }

        self.version.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Drop a service from the snapshot; returns whether it was present.
    pub fn remove(&self, service_id: &str) -> bool {
        let removed = self.services.remove(service_id).is_some();
        if removed {
            self.version.fetch_add(1, Ordering::SeqCst);
            info!(service_id = %service_id, "Removed service from snapshot");
        }
        removed
    }

    pub fn get(&self, service_id: &str) -> Option<ServiceSnapshot> {
        self.services.get(service_id).map(|s| s.value().clone())
    }

    /// Names of all services in the snapshot, sorted
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Snapshot version, bumped on every accepted change
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[async_trait]
impl UpdateSink for SnapshotSink {
    async fn publish(&self, event: RegistryEvent) {
        self.apply(event);
    }

    async fn retract(&self, service_id: &str) {
        self.remove(service_id);
    }
}
