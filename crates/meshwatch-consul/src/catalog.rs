//! Catalog-driven desired set
//!
//! Long-polls the service catalog and reconciles the registry so that every
//! service in the catalog has a watch. Catalog polls go through the same
//! throttle and dispatcher as service watches.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use meshwatch_common::{ConsistencyMode, WatchSpec};

use crate::backoff::BackoffPolicy;
use crate::client::ConsulClient;
use crate::error::{ErrorClass, Result, WatchError};
use crate::registry::{DesiredSet, WatchRegistry};

/// Source of the full service catalog
#[async_trait]
pub trait CatalogSource: Send + Sync + 'static {
    /// Blocking query for the catalog after `index`; returns the new index
    /// and the service names mapped to their tags.
    async fn services(
        &self,
        index: u64,
        consistency_mode: ConsistencyMode,
    ) -> Result<(u64, HashMap<String, Vec<String>>)>;
}

#[async_trait]
impl CatalogSource for ConsulClient {
    async fn services(
        &self,
        index: u64,
        consistency_mode: ConsistencyMode,
    ) -> Result<(u64, HashMap<String, Vec<String>>)> {
        self.catalog_services(index, consistency_mode).await
    }
}

/// Keeps the registry's desired set equal to the service catalog
pub struct CatalogWatcher {
    registry: Arc<WatchRegistry>,
    source: Arc<dyn CatalogSource>,
    spec: WatchSpec,
    backoff: BackoffPolicy,
    last_index: u64,
    consecutive_failures: u32,
}

impl CatalogWatcher {
    /// `spec` is applied to every discovered service.
    pub fn new(
        registry: Arc<WatchRegistry>,
        source: Arc<dyn CatalogSource>,
        spec: WatchSpec,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            registry,
            source,
            spec,
            backoff,
            last_index: 0,
            consecutive_failures: 0,
        }
    }

    /// Poll the catalog until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Catalog watcher started");
        loop {
            match self.poll_once(&cancel).await {
                Ok(()) => self.consecutive_failures = 0,
                Err(e) if e.is_cancellation() => break,
                Err(e) => {
                    if e.classify() == ErrorClass::NoChange {
                        continue;
                    }
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                    let retry_in = self.backoff.delay(self.consecutive_failures);
                    warn!(
                        error = %e,
                        attempt = self.consecutive_failures,
                        retry_in_ms = retry_in.as_millis() as u64,
                        "Catalog poll failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(retry_in) => {}
                    }
                }
            }
        }
        info!(last_index = self.last_index, "Catalog watcher stopped");
    }

    async fn poll_once(&mut self, cancel: &CancellationToken) -> Result<()> {
        let _token = self.registry.throttle().acquire(cancel).await?;
        let slot = self.registry.dispatcher().acquire(cancel).await?;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.source.services(self.last_index, self.spec.consistency_mode) => Some(result),
        };
        self.registry.dispatcher().release(slot);

        let (index, services) = result.ok_or(WatchError::Canceled)??;
        // The first answer is always applied, even at index 0.
        if index <= self.last_index && self.last_index != 0 {
            debug!(index, last_index = self.last_index, "Catalog unchanged");
            return Ok(());
        }
        self.last_index = index;

        let desired: DesiredSet = services
            .into_keys()
            .map(|name| (name, self.spec.clone()))
            .collect();
        debug!(index, services = desired.len(), "Catalog changed");
        self.registry.reconcile(&desired);
        Ok(())
    }
}
