//! Watch scheduler configuration
//!
//! All values carry defaults suitable for a registry with a few thousand
//! services: 50 subscriptions/s, 1000 concurrent long-polls and a read
//! timeout that outlives the registry's own blocking wait.

use std::time::Duration;

/// Configuration for the Consul connection and subscription pacing
#[derive(Clone, Debug)]
pub struct ConsulConfig {
    /// Registry host
    pub host: String,
    /// Registry HTTP port
    pub port: u16,
    /// Minimum delay between two subscription admissions in milliseconds
    pub subscription_delay_ms: u64,
    /// Long-poll transport settings
    pub watcher: WatcherConfig,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8500,
            subscription_delay_ms: 20,
            watcher: WatcherConfig::default(),
        }
    }
}

impl ConsulConfig {
    /// Create a new config for a single registry endpoint
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            ..Default::default()
        }
    }

    /// Set the minimum delay between subscription admissions
    pub fn with_subscription_delay(mut self, delay_ms: u64) -> Self {
        self.subscription_delay_ms = delay_ms;
        self
    }

    /// Set watcher settings
    pub fn with_watcher(mut self, watcher: WatcherConfig) -> Self {
        self.watcher = watcher;
        self
    }

    pub fn subscription_delay(&self) -> Duration {
        Duration::from_millis(self.subscription_delay_ms)
    }

    /// Base URL of the registry HTTP API
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Long-poll transport and dispatcher settings
#[derive(Clone, Debug)]
pub struct WatcherConfig {
    /// Read timeout in milliseconds, must exceed `wait_ms`
    pub read_timeout_ms: u64,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Maximum number of concurrent outstanding long-polls
    pub max_requests: usize,
    /// Maximum idle connections kept per registry endpoint
    pub dispatcher_max_pool_size: usize,
    /// Idle connection keep-alive in milliseconds
    pub dispatcher_pool_keep_alive_ms: u64,
    /// Server-side blocking wait requested on each poll in milliseconds
    pub wait_ms: u64,
    /// Retry policy applied after failed polls
    pub backoff: BackoffConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 6 * 60 * 1000,
            connect_timeout_ms: 2000,
            max_requests: 1000,
            dispatcher_max_pool_size: 2000,
            dispatcher_pool_keep_alive_ms: 30_000,
            wait_ms: 5 * 60 * 1000,
            backoff: BackoffConfig::default(),
        }
    }
}

impl WatcherConfig {
    /// Set timeouts
    pub fn with_timeouts(mut self, connect_ms: u64, read_ms: u64) -> Self {
        self.connect_timeout_ms = connect_ms;
        self.read_timeout_ms = read_ms;
        self
    }

    /// Set the concurrent request ceiling
    pub fn with_max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests;
        self
    }

    /// Set the server-side blocking wait
    pub fn with_wait(mut self, wait_ms: u64) -> Self {
        self.wait_ms = wait_ms;
        self
    }

    /// Set the retry policy
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn pool_keep_alive(&self) -> Duration {
        Duration::from_millis(self.dispatcher_pool_keep_alive_ms)
    }

    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }
}

/// Exponential backoff parameters for failed polls
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffConfig {
    /// Delay after the first failure in milliseconds
    pub base_ms: u64,
    /// Upper bound for any single delay in milliseconds
    pub max_ms: u64,
    /// Fraction of the delay that is randomized (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 500,
            max_ms: 30_000,
            jitter: 0.2,
        }
    }
}

/// What the event hand-off does when the sink falls behind
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Never wait; evict the oldest queued update to make room
    #[default]
    DropOldest,
    /// Wait up to the given duration for room, then drop the new update
    BlockWithTimeout(Duration),
}

/// Bounded hand-off between watches and the update sink
#[derive(Clone, Debug)]
pub struct SinkConfig {
    /// Maximum number of queued, undelivered updates
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consul_config_default() {
        let config = ConsulConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 8500);
        assert_eq!(config.subscription_delay(), Duration::from_millis(20));
        assert_eq!(config.base_url(), "http://localhost:8500");
    }

    #[test]
    fn test_watcher_config_default() {
        let watcher = WatcherConfig::default();
        assert_eq!(watcher.read_timeout(), Duration::from_secs(360));
        assert_eq!(watcher.connect_timeout(), Duration::from_secs(2));
        assert_eq!(watcher.max_requests, 1000);
        assert_eq!(watcher.dispatcher_max_pool_size, 2000);
        assert_eq!(watcher.pool_keep_alive(), Duration::from_secs(30));
        assert!(watcher.read_timeout() > watcher.wait());
    }

    #[test]
    fn test_config_builder() {
        let config = ConsulConfig::new("consul.local", 8501)
            .with_subscription_delay(5)
            .with_watcher(
                WatcherConfig::default()
                    .with_timeouts(100, 1000)
                    .with_max_requests(4)
                    .with_wait(500),
            );

        assert_eq!(config.base_url(), "http://consul.local:8501");
        assert_eq!(config.subscription_delay_ms, 5);
        assert_eq!(config.watcher.connect_timeout_ms, 100);
        assert_eq!(config.watcher.read_timeout_ms, 1000);
        assert_eq!(config.watcher.max_requests, 4);
        assert_eq!(config.watcher.wait_ms, 500);
    }

    #[test]
    fn test_sink_config_default() {
        let sink = SinkConfig::default();
        assert_eq!(sink.capacity, 1024);
        assert_eq!(sink.overflow, OverflowPolicy::DropOldest);
    }
}
