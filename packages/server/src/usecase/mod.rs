pub mod bridge;
pub mod broadcast;
pub mod error;
pub mod hub;

pub use bridge::{BridgeEnvelope, CrossProcessBridge, DEFAULT_BRIDGE_QUEUE_CAPACITY};
pub use broadcast::{BroadcastRouter, DeliveryReport};
pub use error::HubError;
pub use hub::{EventOrigin, HubBuilder, HubHandle, HubStats};
