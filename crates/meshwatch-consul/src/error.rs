//! Watch error taxonomy
//!
//! Every failure stays local to the watch that hit it. `classify` maps an
//! error onto the outcome the state machine acts on.

use std::time::Duration;

/// Error type for watch scheduling and registry polling
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("watch canceled while awaiting admission")]
    ThrottleCanceled,

    #[error("watch canceled")]
    Canceled,

    #[error("connect to registry failed: {0}")]
    DispatchTimeout(String),

    #[error("no change within poll horizon")]
    PollHorizonExpired,

    #[error("registry protocol error: {0}")]
    RegistryProtocolError(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("sink did not accept update within {0:?}")]
    SinkBackpressure(Duration),

    #[error("failed to build http client: {0}")]
    ClientBuild(String),
}

/// How a watch reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Equivalent to an unchanged poll, resubscribe immediately
    NoChange,
    /// Back off, then retry
    Failure,
    /// Stop the watch
    Canceled,
    /// The update was dropped; the watch itself is unaffected
    Dropped,
}

impl WatchError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            WatchError::ThrottleCanceled | WatchError::Canceled => ErrorClass::Canceled,
            WatchError::PollHorizonExpired => ErrorClass::NoChange,
            WatchError::SinkBackpressure(_) => ErrorClass::Dropped,
            WatchError::DispatchTimeout(_)
            | WatchError::RegistryProtocolError(_)
            | WatchError::Transport(_)
            | WatchError::ClientBuild(_) => ErrorClass::Failure,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        self.classify() == ErrorClass::Canceled
    }

    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            WatchError::ThrottleCanceled => "throttle_canceled",
            WatchError::Canceled => "canceled",
            WatchError::DispatchTimeout(_) => "dispatch_timeout",
            WatchError::PollHorizonExpired => "poll_horizon_expired",
            WatchError::RegistryProtocolError(_) => "protocol_error",
            WatchError::Transport(_) => "transport",
            WatchError::SinkBackpressure(_) => "sink_backpressure",
            WatchError::ClientBuild(_) => "client_build",
        }
    }
}

impl From<reqwest::Error> for WatchError {
    fn from(err: reqwest::Error) -> Self {
        // A connect timeout reports both is_connect and is_timeout.
        if err.is_connect() {
            WatchError::DispatchTimeout(err.to_string())
        } else if err.is_timeout() {
            WatchError::PollHorizonExpired
        } else if err.is_decode() || err.is_body() {
            WatchError::RegistryProtocolError(err.to_string())
        } else if err.is_builder() {
            WatchError::ClientBuild(err.to_string())
        } else {
            WatchError::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WatchError::ThrottleCanceled;
        assert_eq!(err.to_string(), "watch canceled while awaiting admission");

        let err = WatchError::RegistryProtocolError("missing X-Consul-Index".to_string());
        assert_eq!(
            err.to_string(),
            "registry protocol error: missing X-Consul-Index"
        );

        let err = WatchError::SinkBackpressure(Duration::from_millis(100));
        assert_eq!(err.to_string(), "sink did not accept update within 100ms");
    }

    #[test]
    fn test_classify() {
        assert_eq!(WatchError::PollHorizonExpired.classify(), ErrorClass::NoChange);
        assert_eq!(
            WatchError::DispatchTimeout("refused".into()).classify(),
            ErrorClass::Failure
        );
        assert_eq!(
            WatchError::RegistryProtocolError("bad json".into()).classify(),
            ErrorClass::Failure
        );
        assert_eq!(
            WatchError::SinkBackpressure(Duration::ZERO).classify(),
            ErrorClass::Dropped
        );
        assert!(WatchError::ThrottleCanceled.is_cancellation());
        assert!(WatchError::Canceled.is_cancellation());
        assert!(!WatchError::Transport("reset".into()).is_cancellation());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(WatchError::PollHorizonExpired.kind(), "poll_horizon_expired");
        assert_eq!(WatchError::DispatchTimeout(String::new()).kind(), "dispatch_timeout");
    }
}
