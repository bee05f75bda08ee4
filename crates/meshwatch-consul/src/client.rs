//! Registry client: Consul blocking queries over HTTP
//!
//! A blocking query carries the last seen `index` and a `wait` horizon. The
//! registry holds the request until its state moves past `index` or the wait
//! elapses, then answers with the current state and `X-Consul-Index`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use meshwatch_common::{ConsistencyMode, HealthStatus, ServiceInstance};

use crate::config::ConsulConfig;
use crate::error::{Result, WatchError};
use crate::model::{PollResponse, WatchDescriptor};

/// Response header carrying the registry index
pub const INDEX_HEADER: &str = "X-Consul-Index";

/// Source of long-poll responses for a single service.
///
/// Implementations must be cancel-safe: dropping the returned future aborts
/// the underlying request.
#[async_trait]
pub trait RegistryClient: Send + Sync + 'static {
    /// Issue one blocking query for `descriptor.service_id` after
    /// `descriptor.last_index`.
    async fn poll(&self, descriptor: &WatchDescriptor) -> Result<PollResponse>;
}

/// Consul HTTP API client
#[derive(Clone)]
pub struct ConsulClient {
    http: Client,
    base_url: String,
    wait: Duration,
}

impl ConsulClient {
    /// Create a client sharing `http` (normally the dispatcher's pooled client)
    pub fn new(config: &ConsulConfig, http: Client) -> Self {
        Self::with_base_url(config.base_url(), http, config.watcher.wait())
    }

    pub fn with_base_url(base_url: impl Into<String>, http: Client, wait: Duration) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            wait,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /v1/health/service/{service}` as a blocking query
    pub async fn health_service(&self, descriptor: &WatchDescriptor) -> Result<PollResponse> {
        let tags: Vec<(&str, String)> = descriptor
            .tag_filter
            .iter()
            .map(|tag| ("tag", tag.clone()))
            .collect();

        let (index, entries): (u64, Vec<HealthEntry>) = self
            .blocking_get(
                &["v1", "health", "service", &descriptor.service_id],
                descriptor.last_index,
                descriptor.consistency_mode,
                &tags,
            )
            .await?;

        let instances = entries
            .into_iter()
            .map(HealthEntry::into_instance)
            .collect();

        Ok(PollResponse::new(index, instances))
    }

    /// `GET /v1/catalog/services` as a blocking query.
    ///
    /// Returns the registry index and the map of service name to tags.
    pub async fn catalog_services(
        &self,
        index: u64,
        consistency_mode: ConsistencyMode,
    ) -> Result<(u64, HashMap<String, Vec<String>>)> {
        self.blocking_get(&["v1", "catalog", "services"], index, consistency_mode, &[])
            .await
    }

    /// Build `{base_url}/{segments..}`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            WatchError::Transport(format!("invalid registry url {}: {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                WatchError::Transport(format!("registry url {} cannot take a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn blocking_get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        index: u64,
        consistency_mode: ConsistencyMode,
        extra: &[(&str, String)],
    ) -> Result<(u64, T)> {
        let url = self.endpoint(segments)?;
        let path = url.path().to_string();

        let mut query: Vec<(&str, String)> = vec![
            ("index", index.to_string()),
            ("wait", format!("{}ms", self.wait.as_millis())),
        ];
        match consistency_mode {
            ConsistencyMode::Default => {}
            ConsistencyMode::Stale => query.push(("stale", String::new())),
            ConsistencyMode::Consistent => query.push(("consistent", String::new())),
        }
        query.extend(extra.iter().cloned());

        trace!(url = %url, index, "Issuing blocking query");

        let response = self.http.get(url).query(&query).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(WatchError::RegistryProtocolError(format!(
                "unexpected status {} from {}: {}",
                status, path, body
            )));
        }

        let new_index = parse_index(response.headers().get(INDEX_HEADER))?;
        let body: T = response.json().await?;

        debug!(path = %path, index, new_index, "Blocking query returned");

        Ok((new_index, body))
    }
}

#[async_trait]
impl RegistryClient for ConsulClient {
    async fn poll(&self, descriptor: &WatchDescriptor) -> Result<PollResponse> {
        self.health_service(descriptor).await
    }
}

fn parse_index(value: Option<&reqwest::header::HeaderValue>) -> Result<u64> {
    let value = value.ok_or_else(|| {
        WatchError::RegistryProtocolError(format!("missing {} header", INDEX_HEADER))
    })?;

    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| {
            WatchError::RegistryProtocolError(format!(
                "invalid {} header: {:?}",
                INDEX_HEADER, value
            ))
        })
}

/// Entry of `/v1/health/service/{service}`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    node: HealthNode,
    service: HealthService,
    #[serde(default)]
    checks: Vec<HealthCheck>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthNode {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthService {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    address: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthCheck {
    status: String,
}

impl HealthEntry {
    fn into_instance(self) -> ServiceInstance {
        let health = HealthStatus::aggregate(self.checks.iter().map(|c| c.status.as_str()));
        // An empty service address means "same as the node".
        let address = if self.service.address.is_empty() {
            self.node.address
        } else {
            self.service.address
        };

        ServiceInstance::new(self.service.id, address, self.service.port)
            .with_tags(self.service.tags.unwrap_or_default())
            .with_health(health)
    }
}
