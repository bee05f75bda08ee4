//! Update sink trait and adapters

use async_trait::async_trait;

use crate::model::RegistryEvent;

/// Receiver of normalized registry membership updates.
///
/// Implemented by the snapshot builder. Calls arrive from a single delivery
/// task, so events for the same service are observed in increasing index
/// order. Ordering across services is unspecified.
#[async_trait]
pub trait UpdateSink: Send + Sync + 'static {
    /// Accept the latest full membership of a service.
    async fn publish(&self, event: RegistryEvent);

    /// Called once after a watch for `service_id` stopped for good.
    async fn retract(&self, _service_id: &str) {}
}

/// A simple sink that invokes a closure.
pub struct FnUpdateSink<F>
where
    F: Fn(RegistryEvent) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnUpdateSink<F>
where
    F: Fn(RegistryEvent) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> UpdateSink for FnUpdateSink<F>
where
    F: Fn(RegistryEvent) + Send + Sync + 'static,
{
    async fn publish(&self, event: RegistryEvent) {
        (self.f)(event);
    }
}
