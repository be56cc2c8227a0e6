//! Routing rules: which audience an event is addressed to.
//!
//! Room-scoped routes can be resolved against the registry immediately.
//! Contact and message-sender routes need an external lookup first.

use super::{
    event::{Event, EventBody},
    value_object::{MessageId, RoomId, UserId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Every connection subscribed to the room, minus the excluded user's
    Room {
        room_id: RoomId,
        exclude_user: Option<UserId>,
    },
    /// Connections of the originating user's contacts
    Contacts { user_id: UserId },
    /// Connections of the author of `message_id` (unless that is `reader`)
    MessageSender {
        message_id: MessageId,
        reader: UserId,
    },
}

/// Decide the audience of an event from its tag.
///
/// Messages and typing indicators are not echoed to the sender's own
/// connections; reactions are, so the reactor's other devices stay in sync.
pub fn route_for(event: &Event) -> Route {
    match event.body() {
        EventBody::MessageDelivered { room_id, .. }
        | EventBody::TypingStart { room_id, .. }
        | EventBody::TypingStop { room_id, .. } => Route::Room {
            room_id: *room_id,
            exclude_user: Some(event.user_id()),
        },
        EventBody::ReactionChanged { room_id, .. } => Route::Room {
            room_id: *room_id,
            exclude_user: None,
        },
        EventBody::PresenceOnline { .. } | EventBody::PresenceOffline { .. } => Route::Contacts {
            user_id: event.user_id(),
        },
        EventBody::ReadReceipt { message_id, .. } => Route::MessageSender {
            message_id: *message_id,
            reader: event.user_id(),
        },
    }
}
