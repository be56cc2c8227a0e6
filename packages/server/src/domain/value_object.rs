//! Value objects for the hub domain.
//!
//! Identifiers are UUID newtypes so that a user id can never be passed where a
//! room id is expected.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::DomainError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Wrap an existing UUID
            pub fn new(value: Uuid) -> Self {
                Self(value)
            }

            /// Generate a fresh random (v4) id
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse from the canonical string form.
            ///
            /// The nil UUID is rejected: the wire protocol uses it as "absent".
            pub fn parse(value: &str) -> Result<Self, DomainError> {
                let uuid = Uuid::parse_str(value)
                    .map_err(|_| DomainError::InvalidId { kind: $label, value: value.to_string() })?;
                if uuid.is_nil() {
                    return Err(DomainError::InvalidId { kind: $label, value: value.to_string() });
                }
                Ok(Self(uuid))
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl TryFrom<String> for $name {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(
    /// Identifies one live socket. Unique per upgrade, never reused.
    ConnectionId,
    "connection id"
);
uuid_id!(
    /// Identifies an account.
    UserId,
    "user id"
);
uuid_id!(
    /// Identifies a chat room (a persisted chat in the chat service).
    RoomId,
    "room id"
);
uuid_id!(
    /// Identifies a persisted message.
    MessageId,
    "message id"
);
uuid_id!(
    /// Identifies one running hub process for the cross-process bridge.
    InstanceId,
    "instance id"
);

/// Maximum display name length in characters
pub const MAX_DISPLAY_NAME_LENGTH: usize = 64;

/// Display name snapshot taken at connect time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DisplayName(String);

impl DisplayName {
    pub fn new(value: String) -> Result<Self, DomainError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::EmptyDisplayName);
        }
        let length = trimmed.chars().count();
        if length > MAX_DISPLAY_NAME_LENGTH {
            return Err(DomainError::DisplayNameTooLong {
                length,
                max: MAX_DISPLAY_NAME_LENGTH,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DisplayName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DisplayName> for String {
    fn from(value: DisplayName) -> Self {
        value.0
    }
}

/// Unix timestamp in UTC milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}
