//! Conversion logic between DTOs and domain events.

use serde_json::json;
use tsudoi_shared::time::timestamp_to_rfc3339;

use crate::{
    domain::{
        DisplayName, DomainError, Event, EventBody, MessageId, ReactionAction, RoomId, Timestamp,
        UserId,
    },
    infrastructure::dto::{
        http::{PublishEventRequest, ReactionActionDto},
        websocket::{ClientFrame, MessageType, WsFrame},
    },
    usecase::HubStats,
};

use super::http::StatsResponse;

// ========================================
// Domain Event → DTO
// ========================================

impl From<&Event> for WsFrame {
    fn from(event: &Event) -> Self {
        let user_id = event.user_id().to_string();
        let timestamp = timestamp_to_rfc3339(event.created_at().value());

        let (r#type, content) = match event.body() {
            EventBody::MessageDelivered { content, .. } => {
                (MessageType::MessageReceived, content.clone())
            }
            EventBody::TypingStart {
                room_id,
                display_name,
            }
            | EventBody::TypingStop {
                room_id,
                display_name,
            } => {
                let is_typing = matches!(event.body(), EventBody::TypingStart { .. });
                let r#type = if is_typing {
                    MessageType::TypingStart
                } else {
                    MessageType::TypingStop
                };
                let content = json!({
                    "chat_id": room_id.to_string(),
                    "user_id": user_id,
                    "username": display_name.as_str(),
                    "is_typing": is_typing,
                });
                (r#type, content)
            }
            EventBody::PresenceOnline { display_name } => (
                MessageType::UserOnline,
                json!({
                    "user_id": user_id,
                    "username": display_name.as_str(),
                    "is_online": true,
                }),
            ),
            EventBody::PresenceOffline { last_seen } => (
                MessageType::UserOffline,
                json!({
                    "user_id": user_id,
                    "is_online": false,
                    "last_seen": timestamp_to_rfc3339(last_seen.value()),
                }),
            ),
            EventBody::ReactionChanged {
                message_id,
                reaction,
                action,
                ..
            } => (
                MessageType::MessageReaction,
                json!({
                    "message_id": message_id.to_string(),
                    "user_id": user_id,
                    "reaction_type": reaction,
                    "action": ReactionActionDto::from(*action),
                }),
            ),
            EventBody::ReadReceipt {
                room_id,
                message_id,
            } => (
                MessageType::MessageRead,
                json!({
                    "chat_id": room_id.to_string(),
                    "message_id": message_id.to_string(),
                    "user_id": user_id,
                    "read_at": timestamp,
                }),
            ),
        };

        Self {
            r#type,
            chat_id: event.room_id().map(|id| id.to_string()),
            user_id: Some(user_id),
            message_id: event.message_id().map(|id| id.to_string()),
            content: Some(content),
            timestamp,
        }
    }
}

impl From<ReactionAction> for ReactionActionDto {
    fn from(action: ReactionAction) -> Self {
        match action {
            ReactionAction::Added => ReactionActionDto::Added,
            ReactionAction::Removed => ReactionActionDto::Removed,
        }
    }
}

impl From<HubStats> for StatsResponse {
    fn from(stats: HubStats) -> Self {
        Self {
            connections: stats.connections,
            online_users: stats.online_users,
            active_rooms: stats.active_rooms,
        }
    }
}

// ========================================
// DTO → Domain Event
// ========================================

impl From<ReactionActionDto> for ReactionAction {
    fn from(dto: ReactionActionDto) -> Self {
        match dto {
            ReactionActionDto::Added => ReactionAction::Added,
            ReactionActionDto::Removed => ReactionAction::Removed,
        }
    }
}

impl ClientFrame {
    /// Build the event a client frame stands for, attributed to the connection's user
    pub fn into_event(self, user_id: UserId, display_name: DisplayName, now: Timestamp) -> Event {
        match self {
            ClientFrame::TypingStart { room_id } => {
                Event::typing(room_id, user_id, display_name, true, now)
            }
            ClientFrame::TypingStop { room_id } => {
                Event::typing(room_id, user_id, display_name, false, now)
            }
            ClientFrame::MessageRead {
                room_id,
                message_id,
            } => Event::read_receipt(room_id, user_id, message_id, now),
        }
    }
}

impl PublishEventRequest {
    /// Validate identifiers and build the event, stamped with `now`
    pub fn into_event(self, now: Timestamp) -> Result<Event, DomainError> {
        match self {
            PublishEventRequest::MessageReceived {
                chat_id,
                message_id,
                sender_id,
                content,
            } => Ok(Event::message_delivered(
                RoomId::parse(&chat_id)?,
                UserId::parse(&sender_id)?,
                MessageId::parse(&message_id)?,
                content,
                now,
            )),
            PublishEventRequest::MessageReaction {
                chat_id,
                message_id,
                user_id,
                reaction_type,
                action,
            } => Ok(Event::reaction_changed(
                RoomId::parse(&chat_id)?,
                UserId::parse(&user_id)?,
                MessageId::parse(&message_id)?,
                reaction_type,
                action.into(),
                now,
            )),
        }
    }
}
