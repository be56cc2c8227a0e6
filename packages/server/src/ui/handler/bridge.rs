//! Bridge endpoint: peer instances push envelopes here.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::StreamExt;

use crate::{infrastructure::event_bus::PeerMeshEventBus, ui::state::AppState};

pub async fn bridge_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, StatusCode> {
    let Some(inbox) = state.bridge_inbox.clone() else {
        return Err(StatusCode::NOT_FOUND);
    };
    Ok(ws.on_upgrade(move |socket| receive_from_peer(socket, inbox)))
}

async fn receive_from_peer(mut socket: WebSocket, inbox: Arc<PeerMeshEventBus>) {
    tracing::info!("Bridge peer connected");
    while let Some(message) = socket.next().await {
        match message {
            Ok(Message::Text(text)) => inbox.inject(text.to_string()),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Bridge peer connection error: {}", e);
                break;
            }
        }
    }
    tracing::info!("Bridge peer disconnected");
}
