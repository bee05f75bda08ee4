//! Watch descriptor and raw poll results

use std::collections::BTreeSet;

use meshwatch_common::{ConsistencyMode, ServiceInstance, WatchSpec};

/// Query state of a single service watch.
///
/// Owned exclusively by its `ServiceWatch`; `last_index` only moves forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchDescriptor {
    pub service_id: String,
    pub consistency_mode: ConsistencyMode,
    pub tag_filter: BTreeSet<String>,
    pub last_index: u64,
}

impl WatchDescriptor {
    pub fn new(service_id: impl Into<String>, spec: &WatchSpec) -> Self {
        Self {
            service_id: service_id.into(),
            consistency_mode: spec.consistency_mode,
            tag_filter: spec.tag_filter.clone(),
            last_index: 0,
        }
    }

    /// Move the cursor to `index` if it is ahead of the current one.
    ///
    /// Returns false, leaving the cursor untouched, for equal or older
    /// indexes.
    pub fn advance(&mut self, index: u64) -> bool {
        if index > self.last_index {
            self.last_index = index;
            true
        } else {
            false
        }
    }
}

/// Raw answer to one blocking query.
///
/// `index` is whatever the registry reported; deciding whether it is news is
/// left to the watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResponse {
    pub index: u64,
    pub instances: Vec<ServiceInstance>,
}

impl PollResponse {
    pub fn new(index: u64, instances: Vec<ServiceInstance>) -> Self {
        Self { index, instances }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_spec() {
        let spec = WatchSpec::new(ConsistencyMode::Stale).with_tags(["canary"]);
        let descriptor = WatchDescriptor::new("orders", &spec);
        assert_eq!(descriptor.service_id, "orders");
        assert_eq!(descriptor.consistency_mode, ConsistencyMode::Stale);
        assert!(descriptor.tag_filter.contains("canary"));
        assert_eq!(descriptor.last_index, 0);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut descriptor = WatchDescriptor::new("orders", &WatchSpec::default());
        assert!(descriptor.advance(5));
        assert_eq!(descriptor.last_index, 5);

        assert!(!descriptor.advance(5));
        assert!(!descriptor.advance(3));
        assert_eq!(descriptor.last_index, 5);

        assert!(descriptor.advance(6));
        assert_eq!(descriptor.last_index, 6);
    }
}
