//! Configuration management for the meshwatch server
//!
//! Values come from `conf/meshwatch.yml`, then `MESHWATCH__*` environment
//! variables, then command line flags, later sources winning. Every getter
//! falls back to a built-in default when its key is absent.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use config::{Config, Environment, File};

use meshwatch_common::{ConsistencyMode, WatchSpec};
use meshwatch_consul::{
    BackoffConfig, ConsulConfig, DesiredSet, OverflowPolicy, SinkConfig, WatcherConfig,
};

use crate::startup::{LogRotation, LoggingConfig};

const DEFAULT_CONFIG_PATH: &str = "conf/meshwatch.yml";

/// Command line arguments for the server
#[derive(Debug, Parser)]
#[command(name = "meshwatch-server", version, about)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short = 'c', long = "config", env = "MESHWATCH_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long = "consul-host")]
    consul_host: Option<String>,
    #[arg(long = "consul-port")]
    consul_port: Option<u16>,
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load configuration using the process arguments
    pub fn new() -> anyhow::Result<Self> {
        Self::load(Cli::parse())
    }

    /// Load configuration using explicit arguments (first item is the program name)
    pub fn from_args<I, T>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::load(Cli::try_parse_from(args)?)
    }

    fn load(args: Cli) -> anyhow::Result<Self> {
        // An explicitly named file must exist; the default one is optional.
        let (path, required) = match args.config {
            Some(path) => (path, true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let mut builder = Config::builder()
            .add_source(File::from(path.clone()).required(required))
            .add_source(
                Environment::with_prefix("MESHWATCH")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("watch.services")
                    .with_list_parse_key("watch.tags")
                    .try_parsing(true),
            );

        if let Some(v) = args.consul_host {
            builder = builder.set_override("consul.host", v)?;
        }
        if let Some(v) = args.consul_port {
            builder = builder.set_override("consul.port", i64::from(v))?;
        }
        if let Some(v) = args.log_level {
            builder = builder.set_override("logging.level", v)?;
        }

        let config = builder
            .build()
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;

        Ok(Configuration { config })
    }

    fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.config
            .get_int(key)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(default)
    }

    fn get_port(&self, key: &str, default: u16) -> anyhow::Result<u16> {
        match self.config.get_int(key) {
            Ok(v) => u16::try_from(v).with_context(|| format!("{} out of range: {}", key, v)),
            Err(_) => Ok(default),
        }
    }

    fn get_list(&self, key: &str) -> Vec<String> {
        if let Ok(values) = self.config.get_array(key) {
            return values
                .into_iter()
                .filter_map(|v| v.into_string().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        self.config
            .get_string(key)
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    // ========================================================================
    // Consul Configuration
    // ========================================================================

    pub fn consul_host(&self) -> String {
        self.config
            .get_string("consul.host")
            .unwrap_or("localhost".to_string())
    }

    pub fn consul_port(&self) -> anyhow::Result<u16> {
        self.get_port("consul.port", 8500)
    }

    pub fn subscription_delay_ms(&self) -> u64 {
        self.get_u64("consul.subscription_delay_ms", 20)
    }

    pub fn read_timeout_ms(&self) -> u64 {
        self.get_u64("consul.watcher.read_timeout_ms", 6 * 60 * 1000)
    }

    pub fn connect_timeout_ms(&self) -> u64 {
        self.get_u64("consul.watcher.connect_timeout_ms", 2000)
    }

    pub fn max_requests(&self) -> usize {
        self.get_u64("consul.watcher.max_requests", 1000) as usize
    }

    pub fn dispatcher_max_pool_size(&self) -> usize {
        self.get_u64("consul.watcher.dispatcher_max_pool_size", 2000) as usize
    }

    pub fn dispatcher_pool_keep_alive_ms(&self) -> u64 {
        self.get_u64("consul.watcher.dispatcher_pool_keep_alive_ms", 30_000)
    }

    pub fn wait_ms(&self) -> u64 {
        self.get_u64("consul.watcher.wait_ms", 5 * 60 * 1000)
    }

    pub fn backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            base_ms: self.get_u64("consul.watcher.backoff.base_ms", 500),
            max_ms: self.get_u64("consul.watcher.backoff.max_ms", 30_000),
            jitter: self
                .config
                .get_float("consul.watcher.backoff.jitter")
                .unwrap_or(0.2),
        }
    }

    pub fn consul_config(&self) -> anyhow::Result<ConsulConfig> {
        let watcher = WatcherConfig {
            read_timeout_ms: self.read_timeout_ms(),
            connect_timeout_ms: self.connect_timeout_ms(),
            max_requests: self.max_requests(),
            dispatcher_max_pool_size: self.dispatcher_max_pool_size(),
            dispatcher_pool_keep_alive_ms: self.dispatcher_pool_keep_alive_ms(),
            wait_ms: self.wait_ms(),
            backoff: self.backoff_config(),
        };

        Ok(ConsulConfig::new(&self.consul_host(), self.consul_port()?)
            .with_subscription_delay(self.subscription_delay_ms())
            .with_watcher(watcher))
    }

    // ========================================================================
    // Sink Configuration
    // ========================================================================

    pub fn sink_capacity(&self) -> usize {
        self.get_u64("sink.capacity", 1024) as usize
    }

    pub fn sink_publish_timeout_ms(&self) -> u64 {
        self.get_u64("sink.publish_timeout_ms", 100)
    }

    pub fn sink_overflow(&self) -> anyhow::Result<OverflowPolicy> {
        let policy = self
            .config
            .get_string("sink.overflow")
            .unwrap_or("drop_oldest".to_string());

        match policy.to_ascii_lowercase().as_str() {
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            "block" | "block_with_timeout" => Ok(OverflowPolicy::BlockWithTimeout(
                Duration::from_millis(self.sink_publish_timeout_ms()),
            )),
            other => bail!("unknown sink.overflow policy: {}", other),
        }
    }

    pub fn sink_config(&self) -> anyhow::Result<SinkConfig> {
        Ok(SinkConfig {
            capacity: self.sink_capacity(),
            overflow: self.sink_overflow()?,
        })
    }

    // ========================================================================
    // Watch Configuration
    // ========================================================================

    /// Statically configured services to watch
    pub fn watch_services(&self) -> Vec<String> {
        self.get_list("watch.services")
    }

    /// Tags every watched instance must carry
    pub fn watch_tags(&self) -> Vec<String> {
        self.get_list("watch.tags")
    }

    /// Whether to watch every service in the catalog instead of `watch.services`
    pub fn watch_discover_all(&self) -> bool {
        self.config.get_bool("watch.discover_all").unwrap_or(false)
    }

    pub fn watch_consistency(&self) -> anyhow::Result<ConsistencyMode> {
        let mode = self
            .config
            .get_string("watch.consistency")
            .unwrap_or_default();
        Ok(mode.parse()?)
    }

    /// Spec applied to every watched service
    pub fn watch_spec(&self) -> anyhow::Result<WatchSpec> {
        Ok(WatchSpec::new(self.watch_consistency()?).with_tags(self.watch_tags()))
    }

    /// Desired set built from `watch.services`
    pub fn desired_set(&self) -> anyhow::Result<DesiredSet> {
        let spec = self.watch_spec()?;
        Ok(self
            .watch_services()
            .into_iter()
            .map(|service| (service, spec.clone()))
            .collect())
    }

    // ========================================================================
    // Discovery Configuration
    // ========================================================================

    pub fn xds_log_full_request(&self) -> bool {
        self.config
            .get_bool("xds.log_full_request")
            .unwrap_or(false)
    }

    pub fn xds_log_full_response(&self) -> bool {
        self.config
            .get_bool("xds.log_full_response")
            .unwrap_or(false)
    }

    pub fn control_plane_id(&self) -> String {
        self.config
            .get_string("xds.control_plane_id")
            .unwrap_or("meshwatch".to_string())
    }

    // ========================================================================
    // Metrics Configuration
    // ========================================================================

    pub fn metrics_enabled(&self) -> bool {
        self.config.get_bool("metrics.enabled").unwrap_or(true)
    }

    pub fn metrics_port(&self) -> anyhow::Result<u16> {
        self.get_port("metrics.port", 9102)
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn logging_config(&self) -> anyhow::Result<LoggingConfig> {
        let rotation: LogRotation = self
            .config
            .get_string("logging.rotation")
            .unwrap_or("daily".to_string())
            .parse()?;

        Ok(LoggingConfig::from_config(
            self.config.get_string("logging.dir").ok(),
            self.config.get_bool("logging.console").unwrap_or(true),
            self.config.get_bool("logging.file").unwrap_or(false),
            self.config
                .get_string("logging.level")
                .unwrap_or("info".to_string()),
            rotation,
        ))
    }
}
