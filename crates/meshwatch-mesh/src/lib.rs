//! Meshwatch Mesh - Discovery-side consumers of registry updates
//!
//! This crate provides:
//! - `SnapshotSink`, an `UpdateSink` keeping the latest membership per service
//! - Discovery protocol message types
//! - Stream lifecycle callbacks, including a logging implementation
//! - `DiscoveryResponder`, answering endpoint requests from the snapshot

pub mod callbacks;
pub mod discovery;
pub mod responder;
pub mod snapshot;

// Re-export commonly used types
pub use callbacks::{DiscoveryServerCallbacks, LoggingDiscoveryServerCallbacks};
pub use discovery::{DiscoveryRequest, DiscoveryResponse, Node, Resource, ResourceType, StreamId};
pub use responder::DiscoveryResponder;
pub use snapshot::{ServiceSnapshot, SnapshotSink};
