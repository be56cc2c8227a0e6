//! HTTP API endpoint handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    domain::{DomainError, RoomId, Timestamp, UserId},
    infrastructure::dto::http::{
        ErrorResponse, HealthResponse, PublishEventRequest, RoomOnlineResponse, StatsResponse,
        UserOnlineResponse,
    },
    ui::state::AppState,
    usecase::HubError,
};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(e: DomainError) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(e.to_string())))
}

fn unavailable(e: HubError) -> ApiError {
    tracing::error!("Hub query failed: {}", e);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse::new(e.to_string())),
    )
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        instance_id: state.instance_id.to_string(),
    })
}

/// Connection, user and room counts of this instance
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.hub.stats().await.map_err(unavailable)?;
    Ok(Json(stats.into()))
}

pub async fn get_user_online(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<UserOnlineResponse>, ApiError> {
    let user_id = UserId::parse(&user_id).map_err(bad_request)?;
    let online = state
        .hub
        .is_user_online(user_id)
        .await
        .map_err(unavailable)?;
    Ok(Json(UserOnlineResponse {
        user_id: user_id.to_string(),
        online,
    }))
}

pub async fn get_room_online(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomOnlineResponse>, ApiError> {
    let room_id = RoomId::parse(&room_id).map_err(bad_request)?;
    let users = state
        .hub
        .online_users(room_id)
        .await
        .map_err(unavailable)?;
    Ok(Json(RoomOnlineResponse {
        chat_id: room_id.to_string(),
        user_ids: users.iter().map(ToString::to_string).collect(),
    }))
}

/// Publish an event the chat service has persisted
pub async fn publish_event(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PublishEventRequest>,
) -> Result<StatusCode, ApiError> {
    let now = Timestamp::new(state.clock.now_millis());
    let event = request.into_event(now).map_err(bad_request)?;
    state.hub.publish_event(event).await;
    Ok(StatusCode::ACCEPTED)
}

/// Subscribe every live connection of the user to the room
pub async fn add_room_member(
    State(state): State<Arc<AppState>>,
    Path((room_id, user_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let room_id = RoomId::parse(&room_id).map_err(bad_request)?;
    let user_id = UserId::parse(&user_id).map_err(bad_request)?;
    state.hub.join_room_for_user(user_id, room_id).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_room_member(
    State(state): State<Arc<AppState>>,
    Path((room_id, user_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let room_id = RoomId::parse(&room_id).map_err(bad_request)?;
    let user_id = UserId::parse(&user_id).map_err(bad_request)?;
    state.hub.leave_room_for_user(user_id, room_id).await;
    Ok(StatusCode::NO_CONTENT)
}
