//! UseCase 層のエラー型

use thiserror::Error;

/// Errors visible to callers of [`super::HubHandle`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// The hub's command loop has stopped (process shutting down)
    #[error("hub is not running")]
    Stopped,
}
