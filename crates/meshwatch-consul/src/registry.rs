//! Watch registry: owns the active watches and reconciles them against the
//! desired service set.
//!
//! The active set sits behind its own lock and is only touched by
//! `reconcile`, introspection, and `shutdown`. Watches publish through the
//! fan-out, which has separate synchronization, so reconciling never waits
//! on a poll completing and vice versa.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use meshwatch_common::{UpdateSink, WatchSpec, validate_service_id};

use crate::backoff::BackoffPolicy;
use crate::client::{ConsulClient, RegistryClient};
use crate::config::{ConsulConfig, SinkConfig};
use crate::dispatcher::WatchDispatcher;
use crate::error::Result;
use crate::fanout::EventFanout;
use crate::metrics;
use crate::model::WatchDescriptor;
use crate::throttle::SubscriptionThrottle;
use crate::watch::{ServiceWatch, WatchContext, WatchState};

/// Desired watch configuration keyed by service id
pub type DesiredSet = HashMap<String, WatchSpec>;

/// What a reconcile call changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub canceled: Vec<String>,
    pub unchanged: usize,
    /// Service ids refused because they cannot name a registry service
    pub rejected: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.canceled.is_empty() && self.rejected.is_empty()
    }
}

struct WatchHandle {
    spec: WatchSpec,
    cancel: CancellationToken,
    state: Arc<RwLock<WatchState>>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Watches {
    active: HashMap<String, WatchHandle>,
    /// Canceled watches whose tasks may still be winding down
    retiring: HashMap<String, JoinHandle<()>>,
}

/// Owner of every active `ServiceWatch` and of the resources they share
pub struct WatchRegistry {
    ctx: WatchContext,
    watches: Mutex<Watches>,
    root: CancellationToken,
    delivery_cancel: CancellationToken,
    delivery_task: Mutex<Option<JoinHandle<()>>>,
}

impl WatchRegistry {
    /// Create a registry and start its update delivery task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        throttle: Arc<SubscriptionThrottle>,
        dispatcher: Arc<WatchDispatcher>,
        client: Arc<dyn RegistryClient>,
        sink: Arc<dyn UpdateSink>,
        backoff: BackoffPolicy,
        sink_config: &SinkConfig,
    ) -> Self {
        let fanout = Arc::new(EventFanout::new(sink_config));
        let delivery_cancel = CancellationToken::new();
        let delivery_task = fanout.spawn(sink, delivery_cancel.clone());

        Self {
            ctx: WatchContext {
                throttle,
                dispatcher,
                client,
                fanout,
                backoff,
            },
            watches: Mutex::new(Watches::default()),
            root: CancellationToken::new(),
            delivery_cancel,
            delivery_task: Mutex::new(Some(delivery_task)),
        }
    }

    /// Build a registry polling Consul as described by `config`.
    pub fn from_config(
        config: &ConsulConfig,
        sink_config: &SinkConfig,
        sink: Arc<dyn UpdateSink>,
    ) -> Result<Self> {
        let throttle = Arc::new(SubscriptionThrottle::new(config.subscription_delay()));
        let dispatcher = Arc::new(WatchDispatcher::new(&config.watcher)?);
        let client = Arc::new(ConsulClient::new(
            config,
            dispatcher.http_client().clone(),
        ));
        let backoff = BackoffPolicy::from_config(&config.watcher.backoff);

        Ok(Self::new(
            throttle,
            dispatcher,
            client,
            sink,
            backoff,
            sink_config,
        ))
    }

    /// Make the active watch set equal `desired`.
    ///
    /// Creates watches for new services, cancels watches for services no
    /// longer desired, and replaces watches whose spec changed. Untouched
    /// watches keep their cursor. A service removed and later re-added
    /// starts over from index 0.
    pub fn reconcile(&self, desired: &DesiredSet) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut watches = self.watches.lock();

        watches.retiring.retain(|_, task| !task.is_finished());

        let stale: Vec<String> = watches
            .active
            .iter()
            .filter(|(id, handle)| desired.get(*id) != Some(&handle.spec))
            .map(|(id, _)| id.clone())
            .collect();

        for id in stale {
            if let Some(handle) = watches.active.remove(&id) {
                handle.cancel.cancel();
                watches.retiring.insert(id.clone(), handle.task);
                report.canceled.push(id);
            }
        }

        for (id, spec) in desired {
            if watches.active.contains_key(id) {
                report.unchanged += 1;
                continue;
            }
            if let Err(e) = validate_service_id(id) {
                warn!(service_id = %id, error = %e, "Refusing to watch service");
                report.rejected.push(id.clone());
                continue;
            }

            let predecessor = watches.retiring.remove(id);
            let handle = self.spawn_watch(id, spec, predecessor);
            watches.active.insert(id.clone(), handle);
            report.created.push(id.clone());
        }

        let active = watches.active.len();
        drop(watches);

        metrics::set_active_watches(active);
        report.created.sort();
        report.canceled.sort();
        report.rejected.sort();

        if report.is_noop() {
            debug!(active, "Reconcile found nothing to change");
        } else {
            info!(
                created = report.created.len(),
                canceled = report.canceled.len(),
                unchanged = report.unchanged,
                rejected = report.rejected.len(),
                active,
                "Reconciled watched services"
            );
        }

        report
    }

    fn spawn_watch(
        &self,
        service_id: &str,
        spec: &WatchSpec,
        predecessor: Option<JoinHandle<()>>,
    ) -> WatchHandle {
        let cancel = self.root.child_token();
        let watch = ServiceWatch::new(
            WatchDescriptor::new(service_id, spec),
            self.ctx.clone(),
            cancel.clone(),
        );
        let state = watch.state_handle();

        let task = tokio::spawn(async move {
            // The previous watch of the same service retracts on exit; wait
            // for it so that retraction cannot overtake our first update.
            if let Some(previous) = predecessor {
                let _ = previous.await;
            }
            watch.run().await;
        });

        WatchHandle {
            spec: spec.clone(),
            cancel,
            state,
            task,
        }
    }

    /// Ids of all active watches, sorted
    pub fn active_services(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.watches.lock().active.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Current state of the watch for `service_id`, if it is active
    pub fn watch_state(&self, service_id: &str) -> Option<WatchState> {
        self.watches
            .lock()
            .active
            .get(service_id)
            .map(|handle| handle.state.read().clone())
    }

    pub fn len(&self) -> usize {
        self.watches.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.lock().active.is_empty()
    }

    pub fn throttle(&self) -> &Arc<SubscriptionThrottle> {
        &self.ctx.throttle
    }

    pub fn dispatcher(&self) -> &Arc<WatchDispatcher> {
        &self.ctx.dispatcher
    }

    pub fn fanout(&self) -> &Arc<EventFanout> {
        &self.ctx.fanout
    }

    /// Token canceled on shutdown; child tasks may hang off it
    pub fn shutdown_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Cancel every watch, wait for them to stop, then stop delivery.
    pub async fn shutdown(&self) {
        info!("Shutting down watch registry");
        self.root.cancel();

        let tasks: Vec<JoinHandle<()>> = {
            let mut watches = self.watches.lock();
            let active = std::mem::take(&mut watches.active);
            let retiring = std::mem::take(&mut watches.retiring);
            active
                .into_values()
                .map(|handle| handle.task)
                .chain(retiring.into_values())
                .collect()
        };
        futures::future::join_all(tasks).await;
        metrics::set_active_watches(0);

        self.delivery_cancel.cancel();
        let delivery = self.delivery_task.lock().take();
        if let Some(task) = delivery {
            let _ = task.await;
        }
        info!("Watch registry stopped");
    }
}
