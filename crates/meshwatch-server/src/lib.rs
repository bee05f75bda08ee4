//! Meshwatch server library
//!
//! Shared pieces of the `meshwatch-server` binary: configuration loading,
//! logging and shutdown setup, and the Prometheus exporter.

pub mod metrics;
pub mod model;
pub mod startup;
