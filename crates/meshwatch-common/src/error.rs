//! Error types shared across Meshwatch crates

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum MeshwatchError {
    #[error("invalid service id '{0}'")]
    InvalidServiceId(String),

    #[error("invalid consistency mode '{0}'")]
    InvalidConsistencyMode(String),
}

pub type Result<T> = std::result::Result<T, MeshwatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MeshwatchError::InvalidServiceId(String::new());
        assert_eq!(err.to_string(), "invalid service id ''");

        let err = MeshwatchError::InvalidConsistencyMode("eventual".to_string());
        assert_eq!(err.to_string(), "invalid consistency mode 'eventual'");
    }
}
