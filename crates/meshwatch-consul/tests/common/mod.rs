//! Common test utilities for scheduler integration tests
//!
//! This module provides:
//! - `until_asserted`: retry a check until it holds or a deadline passes
//! - `ScriptedClient`: in-memory registry answering from per-service scripts
//! - `RecordingSink`: update sink remembering everything it was handed

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use meshwatch_common::{RegistryEvent, ServiceInstance, UpdateSink};
use meshwatch_consul::{
    BackoffPolicy, PollResponse, RegistryClient, Result, SinkConfig, SubscriptionThrottle,
    WatchDescriptor, WatchDispatcher, WatchError, WatchRegistry,
};

/// Retry `check` every `poll` until it returns `Ok`, panicking with the last
/// failure message once `wait` has elapsed.
pub async fn until_asserted<F>(poll: Duration, wait: Duration, mut check: F)
where
    F: FnMut() -> std::result::Result<(), String>,
{
    let deadline = Instant::now() + wait;
    loop {
        match check() {
            Ok(()) => return,
            Err(message) if Instant::now() >= deadline => {
                panic!("condition not met within {:?}: {}", wait, message)
            }
            Err(_) => tokio::time::sleep(poll).await,
        }
    }
}

/// Shorthand for `until_asserted` with a 10ms poll and 10s wait
pub async fn eventually<F>(check: F)
where
    F: FnMut() -> std::result::Result<(), String>,
{
    until_asserted(Duration::from_millis(10), Duration::from_secs(10), check).await
}

/// One scripted answer to a poll
pub enum Step {
    /// Answer immediately
    Respond(Result<PollResponse>),
    /// Answer after the given delay
    After(Duration, Result<PollResponse>),
    /// Never answer
    Hang,
}

impl Step {
    pub fn changed(index: u64, instances: Vec<ServiceInstance>) -> Self {
        Step::Respond(Ok(PollResponse::new(index, instances)))
    }

    pub fn unchanged() -> Self {
        Step::Respond(Err(WatchError::PollHorizonExpired))
    }

    pub fn fail() -> Self {
        Step::Respond(Err(WatchError::Transport("connection reset".to_string())))
    }
}

/// What a poll does once its service's script is exhausted
#[derive(Clone, Copy, Debug)]
pub enum WhenExhausted {
    Hang,
    /// Report no change after the given delay
    TimeOutAfter(Duration),
}

/// Record of one poll issued against the fake registry
#[derive(Clone, Debug)]
pub struct PollCall {
    pub service_id: String,
    pub last_index: u64,
    pub at: Instant,
}

/// In-memory registry driven by per-service scripts
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    exhausted: WhenExhausted,
    calls: Mutex<Vec<PollCall>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: AtomicUsize,
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedClient {
    pub fn new(exhausted: WhenExhausted) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            exhausted,
            calls: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn script(self, service_id: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .entry(service_id.to_string())
            .or_default()
            .extend(steps);
        self
    }

    pub fn calls(&self) -> Vec<PollCall> {
        self.calls.lock().clone()
    }

    /// `last_index` carried by each poll for `service_id`, in order
    pub fn indexes_for(&self, service_id: &str) -> Vec<u64> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.service_id == service_id)
            .map(|c| c.last_index)
            .collect()
    }

    pub fn call_times_for(&self, service_id: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.service_id == service_id)
            .map(|c| c.at)
            .collect()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryClient for ScriptedClient {
    async fn poll(&self, descriptor: &WatchDescriptor) -> Result<PollResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(self.in_flight.clone());

        self.calls.lock().push(PollCall {
            service_id: descriptor.service_id.clone(),
            last_index: descriptor.last_index,
            at: Instant::now(),
        });

        let step = self
            .scripts
            .lock()
            .get_mut(&descriptor.service_id)
            .and_then(|steps| steps.pop_front());

        match step {
            Some(Step::Respond(result)) => result,
            Some(Step::After(delay, result)) => {
                tokio::time::sleep(delay).await;
                result
            }
            Some(Step::Hang) => std::future::pending().await,
            None => match self.exhausted {
                WhenExhausted::Hang => std::future::pending().await,
                WhenExhausted::TimeOutAfter(delay) => {
                    tokio::time::sleep(delay).await;
                    Err(WatchError::PollHorizonExpired)
                }
            },
        }
    }
}

/// Something the sink was handed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Received {
    Publish { service_id: String, index: u64 },
    Retract(String),
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RegistryEvent>>,
    log: Mutex<Vec<Received>>,
}

impl RecordingSink {
    pub fn events_for(&self, service_id: &str) -> Vec<RegistryEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.service_id == service_id)
            .cloned()
            .collect()
    }

    pub fn indexes_for(&self, service_id: &str) -> Vec<u64> {
        self.events_for(service_id).iter().map(|e| e.index).collect()
    }

    pub fn log(&self) -> Vec<Received> {
        self.log.lock().clone()
    }

    pub fn retracted(&self, service_id: &str) -> bool {
        self.log
            .lock()
            .iter()
            .any(|r| matches!(r, Received::Retract(id) if id == service_id))
    }
}

#[async_trait]
impl UpdateSink for RecordingSink {
    async fn publish(&self, event: RegistryEvent) {
        self.log.lock().push(Received::Publish {
            service_id: event.service_id.clone(),
            index: event.index,
        });
        self.events.lock().push(event);
    }

    async fn retract(&self, service_id: &str) {
        self.log.lock().push(Received::Retract(service_id.to_string()));
    }
}

/// Scheduler wired to a scripted registry and a recording sink
pub struct Harness {
    pub registry: Arc<WatchRegistry>,
    pub client: Arc<ScriptedClient>,
    pub sink: Arc<RecordingSink>,
}

pub struct HarnessBuilder {
    client: ScriptedClient,
    throttle_interval: Duration,
    max_requests: usize,
    backoff: BackoffPolicy,
}

impl HarnessBuilder {
    pub fn new(client: ScriptedClient) -> Self {
        Self {
            client,
            throttle_interval: Duration::from_millis(1),
            max_requests: 100,
            backoff: BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1), 0.0),
        }
    }

    pub fn throttle_interval(mut self, interval: Duration) -> Self {
        self.throttle_interval = interval;
        self
    }

    pub fn max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn build(self) -> Harness {
        let client = Arc::new(self.client);
        let sink = Arc::new(RecordingSink::default());
        let registry = Arc::new(WatchRegistry::new(
            Arc::new(SubscriptionThrottle::new(self.throttle_interval)),
            Arc::new(WatchDispatcher::with_client(
                self.max_requests,
                reqwest::Client::new(),
            )),
            client.clone(),
            sink.clone(),
            self.backoff,
            &SinkConfig::default(),
        ));

        Harness {
            registry,
            client,
            sink,
        }
    }
}

pub fn instance(id: &str, port: u16) -> ServiceInstance {
    ServiceInstance::new(id, "10.0.0.1", port)
}
