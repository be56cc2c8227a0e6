//! Shared publish/subscribe transport used by the cross-process bridge.
//!
//! Payloads are opaque strings; the bridge owns the envelope format.

use async_trait::async_trait;

use super::error::EventBusError;

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one payload to every subscriber, including other processes
    async fn publish(&self, payload: String) -> Result<(), EventBusError>;

    /// Open a new subscription to the shared channel
    async fn subscribe(&self) -> Result<Box<dyn EventBusSubscription>, EventBusError>;
}

#[async_trait]
pub trait EventBusSubscription: Send {
    /// Wait for the next payload. `Err(EventBusError::Closed)` ends the subscription.
    async fn next_payload(&mut self) -> Result<String, EventBusError>;
}
