//! Events routed by the hub.
//!
//! An [`Event`] is immutable once constructed. Each variant of [`EventBody`]
//! carries only the payload that makes sense for it; the wire protocol's
//! generic `content` field is narrowed into these variants at the boundary
//! (see `infrastructure::dto`).

use serde::{Deserialize, Serialize};

use super::value_object::{DisplayName, MessageId, RoomId, Timestamp, UserId};

/// Closed set of event tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MessageDelivered,
    TypingStart,
    TypingStop,
    PresenceOnline,
    PresenceOffline,
    ReactionChanged,
    ReadReceipt,
}

/// Whether a reaction was added to or removed from a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionAction {
    Added,
    Removed,
}

/// Typed payload per event tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventBody {
    /// A message persisted by the chat service. `content` is the stored
    /// message record, passed through opaquely.
    MessageDelivered {
        room_id: RoomId,
        message_id: MessageId,
        content: serde_json::Value,
    },
    TypingStart {
        room_id: RoomId,
        display_name: DisplayName,
    },
    TypingStop {
        room_id: RoomId,
        display_name: DisplayName,
    },
    PresenceOnline {
        display_name: DisplayName,
    },
    PresenceOffline {
        last_seen: Timestamp,
    },
    ReactionChanged {
        room_id: RoomId,
        message_id: MessageId,
        reaction: String,
        action: ReactionAction,
    },
    /// `user_id` of the enclosing event is the reader.
    ReadReceipt {
        room_id: RoomId,
        message_id: MessageId,
    },
}

/// An immutable notification fanned out to zero or more connections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    user_id: UserId,
    created_at: Timestamp,
    body: EventBody,
}

impl Event {
    pub fn new(user_id: UserId, body: EventBody, created_at: Timestamp) -> Self {
        Self {
            user_id,
            created_at,
            body,
        }
    }

    pub fn message_delivered(
        room_id: RoomId,
        sender: UserId,
        message_id: MessageId,
        content: serde_json::Value,
        created_at: Timestamp,
    ) -> Self {
        Self::new(
            sender,
            EventBody::MessageDelivered {
                room_id,
                message_id,
                content,
            },
            created_at,
        )
    }

    pub fn typing(
        room_id: RoomId,
        user_id: UserId,
        display_name: DisplayName,
        is_typing: bool,
        created_at: Timestamp,
    ) -> Self {
        let body = if is_typing {
            EventBody::TypingStart {
                room_id,
                display_name,
            }
        } else {
            EventBody::TypingStop {
                room_id,
                display_name,
            }
        };
        Self::new(user_id, body, created_at)
    }

    pub fn presence_online(
        user_id: UserId,
        display_name: DisplayName,
        created_at: Timestamp,
    ) -> Self {
        Self::new(user_id, EventBody::PresenceOnline { display_name }, created_at)
    }

    pub fn presence_offline(user_id: UserId, created_at: Timestamp) -> Self {
        Self::new(
            user_id,
            EventBody::PresenceOffline {
                last_seen: created_at,
            },
            created_at,
        )
    }

    pub fn reaction_changed(
        room_id: RoomId,
        user_id: UserId,
        message_id: MessageId,
        reaction: String,
        action: ReactionAction,
        created_at: Timestamp,
    ) -> Self {
        Self::new(
            user_id,
            EventBody::ReactionChanged {
                room_id,
                message_id,
                reaction,
                action,
            },
            created_at,
        )
    }

    pub fn read_receipt(
        room_id: RoomId,
        reader: UserId,
        message_id: MessageId,
        created_at: Timestamp,
    ) -> Self {
        Self::new(
            reader,
            EventBody::ReadReceipt {
                room_id,
                message_id,
            },
            created_at,
        )
    }

    pub fn kind(&self) -> EventKind {
        match self.body {
            EventBody::MessageDelivered { .. } => EventKind::MessageDelivered,
            EventBody::TypingStart { .. } => EventKind::TypingStart,
            EventBody::TypingStop { .. } => EventKind::TypingStop,
            EventBody::PresenceOnline { .. } => EventKind::PresenceOnline,
            EventBody::PresenceOffline { .. } => EventKind::PresenceOffline,
            EventBody::ReactionChanged { .. } => EventKind::ReactionChanged,
            EventBody::ReadReceipt { .. } => EventKind::ReadReceipt,
        }
    }

    /// Originating user
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn body(&self) -> &EventBody {
        &self.body
    }

    /// Room the event belongs to, if it is room scoped
    pub fn room_id(&self) -> Option<RoomId> {
        match &self.body {
            EventBody::MessageDelivered { room_id, .. }
            | EventBody::TypingStart { room_id, .. }
            | EventBody::TypingStop { room_id, .. }
            | EventBody::ReactionChanged { room_id, .. }
            | EventBody::ReadReceipt { room_id, .. } => Some(*room_id),
            EventBody::PresenceOnline { .. } | EventBody::PresenceOffline { .. } => None,
        }
    }

    pub fn message_id(&self) -> Option<MessageId> {
        match &self.body {
            EventBody::MessageDelivered { message_id, .. }
            | EventBody::ReactionChanged { message_id, .. }
            | EventBody::ReadReceipt { message_id, .. } => Some(*message_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(value: &str) -> DisplayName {
        DisplayName::new(value.to_string()).unwrap()
    }

    #[test]
    fn test_typing_constructor_selects_variant() {
        // テスト項目: is_typing の値によって TypingStart / TypingStop が選ばれる
        // given (前提条件):
        let room = RoomId::generate();
        let user = UserId::generate();

        // when (操作):
        let start = Event::typing(room, user, name("alice"), true, Timestamp::new(1));
        let stop = Event::typing(room, user, name("alice"), false, Timestamp::new(2));

        // then (期待する結果):
        assert_eq!(start.kind(), EventKind::TypingStart);
        assert_eq!(stop.kind(), EventKind::TypingStop);
        assert_eq!(start.room_id(), Some(room));
        assert_eq!(stop.message_id(), None);
    }

    #[test]
    fn test_presence_events_are_not_room_scoped() {
        // テスト項目: プレゼンスイベントはルームに属さない
        // given (前提条件):
        let user = UserId::generate();

        // when (操作):
        let online = Event::presence_online(user, name("bob"), Timestamp::new(10));
        let offline = Event::presence_offline(user, Timestamp::new(20));

        // then (期待する結果):
        assert_eq!(online.room_id(), None);
        assert_eq!(offline.room_id(), None);
        assert_eq!(
            offline.body(),
            &EventBody::PresenceOffline {
                last_seen: Timestamp::new(20)
            }
        );
    }

    #[test]
    fn test_message_event_exposes_ids() {
        // テスト項目: メッセージイベントからルーム ID・メッセージ ID・送信者を取得できる
        // given (前提条件):
        let room = RoomId::generate();
        let sender = UserId::generate();
        let message = MessageId::generate();

        // when (操作):
        let event = Event::message_delivered(
            room,
            sender,
            message,
            serde_json::json!({"content": "hi"}),
            Timestamp::new(100),
        );

        // then (期待する結果):
        assert_eq!(event.kind(), EventKind::MessageDelivered);
        assert_eq!(event.user_id(), sender);
        assert_eq!(event.room_id(), Some(room));
        assert_eq!(event.message_id(), Some(message));
        assert_eq!(event.created_at(), Timestamp::new(100));
    }
}
