//! Meshwatch Consul - Long-poll watch scheduler
//!
//! This crate provides:
//! - Subscription throttle (admission rate of new polls)
//! - Watch dispatcher (concurrent request ceiling and pooled HTTP client)
//! - Per-service watch state machine
//! - Watch registry with desired-set reconciliation
//! - Consul blocking-query client and catalog watcher
//! - Bounded update fan-out to an `UpdateSink`

pub mod backoff;
pub mod catalog;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod throttle;
pub mod watch;

// Re-export commonly used types
pub use backoff::BackoffPolicy;
pub use catalog::{CatalogSource, CatalogWatcher};
pub use client::{ConsulClient, INDEX_HEADER, RegistryClient};
pub use config::{BackoffConfig, ConsulConfig, OverflowPolicy, SinkConfig, WatcherConfig};
pub use dispatcher::{DispatchSlot, WatchDispatcher};
pub use error::{ErrorClass, Result, WatchError};
pub use fanout::EventFanout;
pub use model::{PollResponse, WatchDescriptor};
pub use registry::{DesiredSet, ReconcileReport, WatchRegistry};
pub use throttle::{SubscriptionThrottle, SubscriptionToken};
pub use watch::{ServiceWatch, WatchContext, WatchState};
