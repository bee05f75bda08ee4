//! Bounded hand-off from watches to the update sink
//!
//! Watches never call the sink directly. They enqueue into a bounded queue
//! drained by a single delivery task, so a slow sink stalls only that task.
//! A full queue either evicts the oldest update or makes the producer wait a
//! bounded time, depending on `OverflowPolicy`. A dropped intermediate
//! update is harmless: the next poll re-delivers current truth.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use meshwatch_common::{RegistryEvent, UpdateSink};

use crate::config::{OverflowPolicy, SinkConfig};
use crate::error::{Result, WatchError};
use crate::metrics;

#[derive(Debug)]
enum Delivery {
    Publish(RegistryEvent),
    Retract(String),
}

/// Bounded, FIFO event queue in front of an `UpdateSink`
pub struct EventFanout {
    queue: Mutex<VecDeque<Delivery>>,
    capacity: usize,
    overflow: OverflowPolicy,
    not_empty: Notify,
    not_full: Notify,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl EventFanout {
    pub fn new(config: &SinkConfig) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity: config.capacity.max(1),
            overflow: config.overflow,
            not_empty: Notify::new(),
            not_full: Notify::new(),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue an update for delivery.
    ///
    /// Fails with `SinkBackpressure` only under `BlockWithTimeout` when no
    /// room frees up in time; the update is then dropped.
    pub async fn publish(&self, event: RegistryEvent) -> Result<()> {
        match self.overflow {
            OverflowPolicy::DropOldest => {
                self.push_evicting(Delivery::Publish(event));
                Ok(())
            }
            OverflowPolicy::BlockWithTimeout(timeout) => {
                let deadline = tokio::time::Instant::now() + timeout;
                let mut event = Some(event);
                loop {
                    let mut notified = pin!(self.not_full.notified());
                    notified.as_mut().enable();

                    {
                        let mut queue = self.queue.lock();
                        if queued_publishes(&queue) < self.capacity
                            && let Some(event) = event.take()
                        {
                            queue.push_back(Delivery::Publish(event));
                            drop(queue);
                            self.not_empty.notify_one();
                            return Ok(());
                        }
                    }

                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        metrics::record_event_dropped();
                        return Err(WatchError::SinkBackpressure(timeout));
                    }
                }
            }
        }
    }

    /// Queue a retraction. Retractions are never dropped and do not count
    /// against capacity.
    pub fn retract(&self, service_id: &str) {
        self.queue
            .lock()
            .push_back(Delivery::Retract(service_id.to_string()));
        self.not_empty.notify_one();
    }

    fn push_evicting(&self, delivery: Delivery) {
        let evicted = {
            let mut queue = self.queue.lock();
            let evicted = if queued_publishes(&queue) >= self.capacity {
                queue
                    .iter()
                    .position(|d| matches!(d, Delivery::Publish(_)))
                    .and_then(|pos| queue.remove(pos))
            } else {
                None
            };
            queue.push_back(delivery);
            evicted
        };
        self.not_empty.notify_one();

        if let Some(Delivery::Publish(old)) = evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::record_event_dropped();
            warn!(
                service_id = %old.service_id,
                index = old.index,
                "Update sink is behind, dropped oldest queued update"
            );
        }
    }

    fn pop(&self) -> Option<Delivery> {
        let next = self.queue.lock().pop_front();
        if next.is_some() {
            self.not_full.notify_waiters();
        }
        next
    }

    /// Number of queued, undelivered items
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Total number of updates delivered to the sink
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Total number of updates dropped because the sink fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Spawn the delivery task.
    ///
    /// Once `cancel` fires the task delivers whatever is still queued, then
    /// stops.
    pub fn spawn(
        self: &Arc<Self>,
        sink: Arc<dyn UpdateSink>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let fanout = self.clone();
        tokio::spawn(async move { fanout.deliver_loop(sink, cancel).await })
    }

    async fn deliver_loop(&self, sink: Arc<dyn UpdateSink>, cancel: CancellationToken) {
        debug!("Update delivery task started");
        loop {
            let mut notified = pin!(self.not_empty.notified());
            notified.as_mut().enable();

            match self.pop() {
                Some(Delivery::Publish(event)) => {
                    sink.publish(event).await;
                    self.published.fetch_add(1, Ordering::Relaxed);
                    metrics::record_event_published();
                }
                Some(Delivery::Retract(service_id)) => {
                    sink.retract(&service_id).await;
                }
                None if cancel.is_cancelled() => break,
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = notified => {}
                    }
                }
            }
        }
        debug!("Update delivery task stopped");
    }
}

/// Updates waiting in `queue`; retractions do not count against capacity
fn queued_publishes(queue: &VecDeque<Delivery>) -> usize {
    queue
        .iter()
        .filter(|d| matches!(d, Delivery::Publish(_)))
        .count()
}
