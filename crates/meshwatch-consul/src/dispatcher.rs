//! Bounded dispatch of outbound long-poll requests
//!
//! The dispatcher owns the shared HTTP client (connection pool, connect and
//! read timeouts) and a fair semaphore bounding concurrent requests. Callers
//! over the limit queue in arrival order instead of failing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use reqwest::Client;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::WatcherConfig;
use crate::error::{Result, WatchError};
use crate::metrics;

/// One unit of request concurrency.
///
/// Dropping the slot releases it, so a slot can never outlive the poll that
/// acquired it, whatever path that poll takes.
#[must_use = "a dispatch slot is released as soon as it is dropped"]
pub struct DispatchSlot {
    id: u64,
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl DispatchSlot {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for DispatchSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchSlot").field("id", &self.id).finish()
    }
}

impl Drop for DispatchSlot {
    fn drop(&mut self) {
        let now = self.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::set_dispatch_in_flight(now);
    }
}

/// Shared concurrency limiter and HTTP client for all watches
pub struct WatchDispatcher {
    permits: Arc<Semaphore>,
    max_requests: usize,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: AtomicUsize,
    next_slot_id: AtomicU64,
    http: Client,
}

impl WatchDispatcher {
    /// Create a dispatcher and its pooled HTTP client from watcher settings
    pub fn new(config: &WatcherConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .pool_max_idle_per_host(config.dispatcher_max_pool_size)
            .pool_idle_timeout(config.pool_keep_alive())
            .build()
            .map_err(|e| WatchError::ClientBuild(e.to_string()))?;

        Ok(Self::with_client(config.max_requests, http))
    }

    /// Create a dispatcher around an existing HTTP client
    pub fn with_client(max_requests: usize, http: Client) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_requests)),
            max_requests,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: AtomicUsize::new(0),
            next_slot_id: AtomicU64::new(0),
            http,
        }
    }

    /// Acquire a dispatch slot, queueing behind earlier callers when full.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<DispatchSlot> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WatchError::Canceled),
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|_| WatchError::Canceled)?
            }
        };

        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
        metrics::set_dispatch_in_flight(now);

        Ok(DispatchSlot {
            id: self.next_slot_id.fetch_add(1, Ordering::Relaxed),
            _permit: permit,
            in_flight: self.in_flight.clone(),
        })
    }

    /// Return a slot. Taking it by value makes a double release impossible.
    pub fn release(&self, slot: DispatchSlot) {
        debug!(slot_id = slot.id, "Releasing dispatch slot");
        drop(slot);
    }

    /// Stop handing out slots; pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Number of slots currently held
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Highest number of slots held at the same time since creation
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Pooled HTTP client shared by every poll issued through this dispatcher
    pub fn http_client(&self) -> &Client {
        &self.http
    }
}
