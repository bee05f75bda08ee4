//! Meshwatch Common - Shared types, traits, and utilities
//!
//! This crate provides the types exchanged between the watch scheduler and
//! its downstream consumers:
//! - Error types
//! - Registry membership model (`RegistryEvent`, `ServiceInstance`)
//! - The `UpdateSink` trait implemented by snapshot builders
//! - Utility functions

pub mod error;
pub mod model;
pub mod sink;
pub mod utils;

// Re-exports for convenience
pub use error::{MeshwatchError, Result};
pub use model::{ConsistencyMode, HealthStatus, RegistryEvent, ServiceInstance, WatchSpec};
pub use sink::{FnUpdateSink, UpdateSink};
pub use utils::validate_service_id;
