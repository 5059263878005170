//! UI-facing event bus seam.

use async_trait::async_trait;
use sentinel_model::events::SentinelEvent;

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: SentinelEvent);
}

/// Drops every event. Used where no UI is attached.
#[derive(Debug, Default)]
pub struct NullEventBus;

#[async_trait]
impl EventBus for NullEventBus {
    async fn publish(&self, _event: SentinelEvent) {}
}
