//! Utility functions for Meshwatch

use crate::error::{MeshwatchError, Result};

/// Check that a service id can be watched.
///
/// Any non-empty name is accepted; the registry client percent-encodes it as
/// a single path segment, so characters such as `/` or `?` cannot change the
/// request target.
///
/// # Examples
///
/// ```
/// use meshwatch_common::validate_service_id;
///
/// assert!(validate_service_id("payment-service").is_ok());
/// assert!(validate_service_id("_nomad-task-web").is_ok());
/// assert!(validate_service_id("").is_err());
/// ```
pub fn validate_service_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(MeshwatchError::InvalidServiceId(id.to_string()));
    }
    Ok(())
}
