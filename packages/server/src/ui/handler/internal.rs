//! Guard for the service and peer endpoints under `/internal`.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use super::websocket::bearer_token;
use crate::ui::state::AppState;

/// Require `Authorization: Bearer <internal token>`.
///
/// Without a configured token every internal request is rejected.
pub async fn require_internal_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.internal_token.as_deref() else {
        tracing::warn!(path = %request.uri().path(), "Internal endpoint disabled, no token configured");
        return Err(StatusCode::UNAUTHORIZED);
    };
    match bearer_token(&headers) {
        Some(token) if token_matches(&token, expected) => Ok(next.run(request).await),
        _ => {
            tracing::warn!(path = %request.uri().path(), "Internal request with bad credentials rejected");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

// Compares every byte so the response time does not leak the matching prefix
fn token_matches(given: &str, expected: &str) -> bool {
    given.len() == expected.len()
        && given
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}
