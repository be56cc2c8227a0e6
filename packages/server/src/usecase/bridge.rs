//! Cross-process bridge: shares hub events with peer instances.
//!
//! Outbound, a dedicated task drains the relay queue fed by the hub and
//! publishes each event wrapped in a [`BridgeEnvelope`]. Inbound, a listener
//! reads the shared channel, drops envelopes this instance sent itself and
//! re-injects the rest as relayed events, which the hub never relays again.
//!
//! Transport failures are logged; the hub keeps serving local clients.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::domain::{Event, EventBus, EventBusError, EventBusSubscription, InstanceId};

use super::hub::HubHandle;

pub const DEFAULT_BRIDGE_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_RESUBSCRIBE_INTERVAL: Duration = Duration::from_secs(5);

/// Payload published on the shared channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeEnvelope {
    pub origin: InstanceId,
    pub event: Event,
}

#[derive(Serialize)]
struct OutgoingEnvelope<'a> {
    origin: InstanceId,
    event: &'a Event,
}

pub struct CrossProcessBridge {
    instance_id: InstanceId,
    bus: Arc<dyn EventBus>,
    resubscribe_interval: Duration,
}

impl CrossProcessBridge {
    pub fn new(instance_id: InstanceId, bus: Arc<dyn EventBus>) -> Self {
        Self {
            instance_id,
            bus,
            resubscribe_interval: DEFAULT_RESUBSCRIBE_INTERVAL,
        }
    }

    pub fn with_resubscribe_interval(mut self, interval: Duration) -> Self {
        self.resubscribe_interval = interval;
        self
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Publish every event received on `relay` until the hub drops its sender.
    pub fn spawn_outbound(self: &Arc<Self>, mut relay: mpsc::Receiver<Arc<Event>>) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = relay.recv().await {
                bridge.publish(&event).await;
            }
            tracing::info!(instance_id = %bridge.instance_id, "Bridge outbound task stopped");
        })
    }

    async fn publish(&self, event: &Event) {
        let envelope = OutgoingEnvelope {
            origin: self.instance_id,
            event,
        };
        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode bridge envelope: {}", e);
                return;
            }
        };
        if let Err(e) = self.bus.publish(payload).await {
            tracing::warn!(kind = ?event.kind(), "Failed to publish event to peers: {}", e);
        }
    }

    /// Start relaying peer events into `hub`.
    ///
    /// The first subscription attempt completes before this returns, so events
    /// published afterwards are not missed. A failed or lost subscription is
    /// retried every resubscribe interval while the hub is running.
    pub async fn spawn_listener(self: &Arc<Self>, hub: HubHandle) -> JoinHandle<()> {
        let initial = self.subscribe().await;
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            let mut subscription = initial;
            while hub.is_running() {
                match subscription.take() {
                    Some(sub) => bridge.listen(sub, &hub).await,
                    None => {
                        tokio::time::sleep(bridge.resubscribe_interval).await;
                        subscription = bridge.subscribe().await;
                    }
                }
            }
            tracing::info!(instance_id = %bridge.instance_id, "Bridge listener stopped");
        })
    }

    async fn subscribe(&self) -> Option<Box<dyn EventBusSubscription>> {
        match self.bus.subscribe().await {
            Ok(sub) => {
                tracing::info!(instance_id = %self.instance_id, "Subscribed to shared event channel");
                Some(sub)
            }
            Err(e) => {
                tracing::warn!(
                    retry_in = ?self.resubscribe_interval,
                    "Failed to subscribe to shared event channel: {}",
                    e
                );
                None
            }
        }
    }

    async fn listen(&self, mut subscription: Box<dyn EventBusSubscription>, hub: &HubHandle) {
        loop {
            match subscription.next_payload().await {
                Ok(payload) => {
                    if let Some(event) = self.accept(&payload) {
                        hub.publish_relayed(event).await;
                    }
                }
                Err(EventBusError::Closed) => {
                    tracing::warn!("Shared event channel closed");
                    return;
                }
                Err(e) => {
                    tracing::warn!("Error reading shared event channel: {}", e);
                }
            }
            if !hub.is_running() {
                return;
            }
        }
    }

    /// Decode a payload, keeping only events from other instances
    fn accept(&self, payload: &str) -> Option<Event> {
        match serde_json::from_str::<BridgeEnvelope>(payload) {
            Ok(envelope) if envelope.origin == self.instance_id => None,
            Ok(envelope) => {
                tracing::debug!(
                    origin = %envelope.origin,
                    kind = ?envelope.event.kind(),
                    "Relaying event from peer"
                );
                Some(envelope.event)
            }
            Err(e) => {
                tracing::warn!("Dropping undecodable bridge payload: {}", e);
                None
            }
        }
    }
}
