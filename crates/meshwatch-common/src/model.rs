//! Registry membership model shared between the watch scheduler and its consumers

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MeshwatchError;

/// Read consistency requested from the registry for a blocking query.
///
/// `Stale` lets any server answer (cheapest, may lag), `Consistent` forces a
/// leader round-trip (freshest, most expensive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyMode {
    #[default]
    Default,
    Stale,
    Consistent,
}

impl ConsistencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyMode::Default => "default",
            ConsistencyMode::Stale => "stale",
            ConsistencyMode::Consistent => "consistent",
        }
    }
}

impl fmt::Display for ConsistencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConsistencyMode {
    type Err = MeshwatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" | "" => Ok(ConsistencyMode::Default),
            "stale" => Ok(ConsistencyMode::Stale),
            "consistent" => Ok(ConsistencyMode::Consistent),
            _ => Err(MeshwatchError::InvalidConsistencyMode(s.to_string())),
        }
    }
}

/// Per-service watch configuration as supplied in a desired set.
///
/// Two specs are equal when the watch they describe would issue identical
/// queries; reconcile relies on this to leave unchanged watches alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSpec {
    #[serde(default)]
    pub consistency_mode: ConsistencyMode,
    /// Only instances carrying every tag in this set are reported
    #[serde(default)]
    pub tag_filter: BTreeSet<String>,
}

impl WatchSpec {
    pub fn new(consistency_mode: ConsistencyMode) -> Self {
        Self {
            consistency_mode,
            tag_filter: BTreeSet::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tag_filter = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Aggregated health of a service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Passing,
    Warning,
    Critical,
}

impl HealthStatus {
    /// Fold a sequence of check statuses into one, worst status wins.
    pub fn aggregate<'a, I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut result = HealthStatus::Passing;
        for status in statuses {
            match status {
                "critical" => return HealthStatus::Critical,
                "warning" => result = HealthStatus::Warning,
                _ => {}
            }
        }
        result
    }

    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Passing
    }
}

/// A single member of a service as reported by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub health: HealthStatus,
}

impl ServiceInstance {
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
            tags: Vec::new(),
            health: HealthStatus::Passing,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_health(mut self, health: HealthStatus) -> Self {
        self.health = health;
        self
    }

    /// True when this instance carries every tag in `filter`.
    pub fn matches_tags(&self, filter: &BTreeSet<String>) -> bool {
        filter.iter().all(|tag| self.tags.iter().any(|t| t == tag))
    }
}

/// Full, authoritative membership of one service at one registry index.
///
/// Consumers must treat each event as a replacement for everything they
/// previously received for `service_id`, never as a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEvent {
    pub service_id: String,
    pub instances: Vec<ServiceInstance>,
    pub index: u64,
    pub observed_at: DateTime<Utc>,
}

impl RegistryEvent {
    pub fn new(service_id: impl Into<String>, instances: Vec<ServiceInstance>, index: u64) -> Self {
        Self {
            service_id: service_id.into(),
            instances,
            index,
            observed_at: Utc::now(),
        }
    }

    pub fn healthy_instances(&self) -> impl Iterator<Item = &ServiceInstance> {
        self.instances.iter().filter(|i| i.health.is_healthy())
    }
}
