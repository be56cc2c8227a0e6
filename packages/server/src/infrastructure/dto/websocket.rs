//! WebSocket frame DTOs.
//!
//! Every frame on `/ws` shares one envelope:
//!
//! ```json
//! {"type":"typing_start","chat_id":"…","user_id":"…","content":{…},"timestamp":"2024-01-01T00:00:00.000Z"}
//! ```
//!
//! Outbound frames are built from domain events (see `conversion`). Inbound
//! frames are decoded in two steps: [`RawFrame`] accepts any JSON object with a
//! string `type`, then [`ClientFrame::try_from`] narrows it to the few frames a
//! client may send.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{DomainError, MessageId, RoomId};

/// Frame type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    MessageReceived,
    MessageSent,
    TypingStart,
    TypingStop,
    UserOnline,
    UserOffline,
    MessageRead,
    MessageReaction,
}

impl MessageType {
    pub fn parse(value: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(value.to_string())).ok()
    }

    /// Whether clients are allowed to send this type
    pub fn is_client_originated(&self) -> bool {
        matches!(
            self,
            MessageType::TypingStart | MessageType::TypingStop | MessageType::MessageRead
        )
    }
}

/// Outbound frame (server → client)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsFrame {
    pub r#type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
    /// RFC 3339, UTC
    pub timestamp: String,
}

/// Inbound frame before narrowing; only `type` is required
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawFrame {
    pub r#type: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

impl RawFrame {
    /// Decode a text payload. Failure means the peer is not speaking the protocol.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))
    }
}

/// Frames a client may send, with identifiers already validated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFrame {
    TypingStart { room_id: RoomId },
    TypingStop { room_id: RoomId },
    MessageRead { room_id: RoomId, message_id: MessageId },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Not JSON, or no string `type`; the connection is torn down
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Unknown type, or a type only the server sends; ignored
    #[error("unsupported frame type: {0}")]
    UnsupportedType(String),

    /// Absent, or the nil UUID; ignored
    #[error("frame '{kind}' is missing '{field}'")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    /// An id that is not a UUID; the connection is torn down like a decode error
    #[error(transparent)]
    InvalidId(#[from] DomainError),
}

impl FrameError {
    /// Whether the inbound duty should stop reading
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::Malformed(_) | FrameError::InvalidId(_))
    }
}

/// Clients send the nil UUID for ids they do not have
fn required<'a>(
    value: Option<&'a str>,
    kind: &'static str,
    field: &'static str,
) -> Result<&'a str, FrameError> {
    match value {
        Some(value) if !Uuid::parse_str(value).is_ok_and(|uuid| uuid.is_nil()) => Ok(value),
        _ => Err(FrameError::MissingField { kind, field }),
    }
}

impl TryFrom<RawFrame> for ClientFrame {
    type Error = FrameError;

    fn try_from(raw: RawFrame) -> Result<Self, Self::Error> {
        let kind = match MessageType::parse(&raw.r#type) {
            Some(kind) if kind.is_client_originated() => kind,
            _ => return Err(FrameError::UnsupportedType(raw.r#type)),
        };

        let room_id = |name: &'static str| -> Result<RoomId, FrameError> {
            let value = required(raw.chat_id.as_deref(), name, "chat_id")?;
            Ok(RoomId::parse(value)?)
        };

        match kind {
            MessageType::TypingStart => Ok(ClientFrame::TypingStart {
                room_id: room_id("typing_start")?,
            }),
            MessageType::TypingStop => Ok(ClientFrame::TypingStop {
                room_id: room_id("typing_stop")?,
            }),
            MessageType::MessageRead => {
                let room_id = room_id("message_read")?;
                let message_id = required(raw.message_id.as_deref(), "message_read", "message_id")?;
                Ok(ClientFrame::MessageRead {
                    room_id,
                    message_id: MessageId::parse(message_id)?,
                })
            }
            _ => Err(FrameError::UnsupportedType(raw.r#type)),
        }
    }
}
