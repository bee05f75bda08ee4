//! Per-service long-poll state machine
//!
//! ```text
//! Idle -> Throttled -> Polling -> Updated  -> Idle
//!                              -> TimedOut -> Idle
//!                              -> Failed   -> (backoff) -> Idle
//! any  -> Canceled (terminal)
//! ```
//!
//! A watch runs as one task and has at most one poll in flight. Each of its
//! three suspension points (admission, dispatch slot, poll I/O) races against
//! the watch's cancellation token, so canceling never waits on the network.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use meshwatch_common::RegistryEvent;

use crate::backoff::BackoffPolicy;
use crate::client::RegistryClient;
use crate::dispatcher::WatchDispatcher;
use crate::error::{ErrorClass, Result, WatchError};
use crate::fanout::EventFanout;
use crate::metrics;
use crate::model::{PollResponse, WatchDescriptor};
use crate::throttle::SubscriptionThrottle;

/// Lifecycle state of a service watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Throttled,
    Polling,
    Updated { index: u64 },
    TimedOut,
    Failed { attempt: u32, retry_in: Duration },
    Canceled,
}

impl WatchState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: &WatchState) -> bool {
        use WatchState::*;
        match (self, next) {
            (Canceled, _) => false,
            (_, Canceled) => true,
            (Idle, Throttled)
            | (Throttled, Polling)
            | (Polling, Updated { .. })
            | (Polling, TimedOut)
            | (Polling, Failed { .. })
            | (Updated { .. }, Idle)
            | (TimedOut, Idle)
            | (Failed { .. }, Idle) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WatchState::Canceled)
    }

    pub fn name(&self) -> &'static str {
        match self {
            WatchState::Idle => "idle",
            WatchState::Throttled => "throttled",
            WatchState::Polling => "polling",
            WatchState::Updated { .. } => "updated",
            WatchState::TimedOut => "timed_out",
            WatchState::Failed { .. } => "failed",
            WatchState::Canceled => "canceled",
        }
    }
}

/// Shared collaborators handed to every watch by its registry
#[derive(Clone)]
pub struct WatchContext {
    pub throttle: Arc<SubscriptionThrottle>,
    pub dispatcher: Arc<WatchDispatcher>,
    pub client: Arc<dyn RegistryClient>,
    pub fanout: Arc<EventFanout>,
    pub backoff: BackoffPolicy,
}

/// One watched service
pub struct ServiceWatch {
    descriptor: WatchDescriptor,
    state: Arc<RwLock<WatchState>>,
    ctx: WatchContext,
    cancel: CancellationToken,
    consecutive_failures: u32,
}

impl ServiceWatch {
    pub fn new(descriptor: WatchDescriptor, ctx: WatchContext, cancel: CancellationToken) -> Self {
        Self {
            descriptor,
            state: Arc::new(RwLock::new(WatchState::Idle)),
            ctx,
            cancel,
            consecutive_failures: 0,
        }
    }

    /// Shared view of the current state, for introspection
    pub fn state_handle(&self) -> Arc<RwLock<WatchState>> {
        self.state.clone()
    }

    pub fn descriptor(&self) -> &WatchDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> WatchState {
        self.state.read().clone()
    }

    fn transition(&self, next: WatchState) {
        let mut state = self.state.write();
        if !state.can_transition_to(&next) {
            error!(
                service_id = %self.descriptor.service_id,
                from = state.name(),
                to = next.name(),
                "Illegal watch state transition"
            );
            debug_assert!(false, "illegal transition {:?} -> {:?}", *state, next);
            return;
        }
        *state = next;
    }

    /// Drive poll cycles until canceled.
    pub async fn run(mut self) {
        debug!(service_id = %self.descriptor.service_id, "Service watch started");

        while !self.cancel.is_cancelled() {
            if let Err(e) = self.cycle().await {
                if e.is_cancellation() {
                    break;
                }
                // cycle() only surfaces cancellations; anything else is a bug
                error!(service_id = %self.descriptor.service_id, error = %e, "Unexpected watch error");
            }
        }

        self.transition(WatchState::Canceled);
        self.ctx.fanout.retract(&self.descriptor.service_id);
        info!(
            service_id = %self.descriptor.service_id,
            last_index = self.descriptor.last_index,
            "Service watch canceled"
        );
    }

    /// One full `Idle -> ... -> Idle` cycle.
    async fn cycle(&mut self) -> Result<()> {
        self.transition(WatchState::Throttled);
        let token = self.ctx.throttle.acquire(&self.cancel).await?;
        let slot = self.ctx.dispatcher.acquire(&self.cancel).await?;

        self.transition(WatchState::Polling);
        drop(token);

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = self.ctx.client.poll(&self.descriptor) => Some(result),
        };
        self.ctx.dispatcher.release(slot);

        let Some(result) = result else {
            return Err(WatchError::Canceled);
        };

        match result {
            Ok(response) => {
                self.consecutive_failures = 0;
                self.on_response(response, started.elapsed()).await;
            }
            Err(e) => match e.classify() {
                ErrorClass::NoChange => {
                    metrics::record_poll("timed_out", started.elapsed());
                    self.transition(WatchState::TimedOut);
                }
                ErrorClass::Canceled => return Err(e),
                ErrorClass::Failure | ErrorClass::Dropped => {
                    metrics::record_poll("failed", started.elapsed());
                    self.on_failure(e).await?;
                }
            },
        }

        self.transition(WatchState::Idle);
        Ok(())
    }

    async fn on_response(&mut self, response: PollResponse, elapsed: Duration) {
        if !self.descriptor.advance(response.index) {
            // Unchanged, or a stale/duplicate index the registry replayed
            if response.index < self.descriptor.last_index {
                debug!(
                    service_id = %self.descriptor.service_id,
                    index = response.index,
                    last_index = self.descriptor.last_index,
                    "Ignoring response with index behind cursor"
                );
            }
            metrics::record_poll("timed_out", elapsed);
            self.transition(WatchState::TimedOut);
            return;
        }

        metrics::record_poll("updated", elapsed);
        self.transition(WatchState::Updated {
            index: response.index,
        });

        let mut instances = response.instances;
        if !self.descriptor.tag_filter.is_empty() {
            instances.retain(|i| i.matches_tags(&self.descriptor.tag_filter));
        }

        if self.cancel.is_cancelled() {
            return;
        }

        let service_id = &self.descriptor.service_id;
        debug!(
            service_id = %service_id,
            index = response.index,
            instances = instances.len(),
            "Service membership changed"
        );

        let event = RegistryEvent::new(service_id.clone(), instances, response.index);
        if let Err(e) = self.ctx.fanout.publish(event).await {
            warn!(service_id = %service_id, index = response.index, error = %e, "Dropped registry update");
        }
    }

    async fn on_failure(&mut self, error: WatchError) -> Result<()> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let attempt = self.consecutive_failures;
        let retry_in = self.ctx.backoff.delay(attempt);

        warn!(
            service_id = %self.descriptor.service_id,
            error = %error,
            kind = error.kind(),
            attempt,
            retry_in_ms = retry_in.as_millis() as u64,
            "Poll failed, backing off"
        );
        self.transition(WatchState::Failed { attempt, retry_in });

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(WatchError::Canceled),
            _ = tokio::time::sleep(retry_in) => Ok(()),
        }
    }
}
