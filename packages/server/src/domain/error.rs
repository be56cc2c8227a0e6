//! Domain error types.

use thiserror::Error;

/// Value object validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("invalid {kind}: '{value}'")]
    InvalidId { kind: &'static str, value: String },

    #[error("display name must not be empty")]
    EmptyDisplayName,

    #[error("display name is {length} characters long (max {max})")]
    DisplayNameTooLong { length: usize, max: usize },
}

/// Failures reported by external collaborators (contacts, message senders, identity).
///
/// The hub never propagates these: the affected feature is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("lookup timed out")]
    Timeout,
}

/// Identity verification failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error(transparent)]
    Lookup(#[from] LookupError),
}

/// Cross-process bridge transport failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventBusError {
    #[error("invalid event bus address: {0}")]
    InvalidAddress(String),

    #[error("failed to publish to event bus: {0}")]
    PublishFailed(String),

    #[error("failed to subscribe to event bus: {0}")]
    SubscribeFailed(String),

    #[error("event bus subscription closed")]
    Closed,
}
