//! Domain layer: hub entities, value objects, routing rules and the
//! interfaces of external collaborators.

pub mod collaborator;
pub mod connection;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod registry;
pub mod routing;
pub mod value_object;

pub use collaborator::{ContactDirectory, IdentityVerifier, MessageDirectory, UserIdentity};
pub use connection::{
    Connection, DEFAULT_OUTBOUND_CAPACITY, OutboundReceiver, OutboundSender, PushError,
    outbound_queue,
};
pub use error::{AuthError, DomainError, EventBusError, LookupError};
pub use event::{Event, EventBody, EventKind, ReactionAction};
pub use event_bus::{EventBus, EventBusSubscription};
pub use registry::{JoinOutcome, LeaveOutcome, RegisterOutcome, SubscriptionRegistry, UnregisterOutcome};
pub use routing::{Route, route_for};
pub use value_object::{
    ConnectionId, DisplayName, InstanceId, MessageId, RoomId, Timestamp, UserId,
};
