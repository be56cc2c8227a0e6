//! WebSocket connection handlers.
//!
//! One upgraded socket is served by two duties joined by the connection's
//! bounded outbound queue:
//!
//! - inbound: reads client frames, enforces the read timeout, forwards
//!   typing and read-receipt frames to the hub
//! - outbound: drains the queue into the socket and keeps the peer alive with pings
//!
//! Whichever duty ends first aborts the other, then the connection is
//! unregistered exactly once.

use std::{fmt::Display, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tsudoi_shared::time::Clock;

use crate::{
    domain::{
        AuthError, Connection, ConnectionId, OutboundReceiver, Timestamp, UserIdentity,
        outbound_queue,
    },
    infrastructure::dto::websocket::{ClientFrame, FrameError, RawFrame, WsFrame},
    ui::state::AppState,
    usecase::HubHandle,
};

/// Query parameters for WebSocket connection
#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    /// Fallback for clients that cannot set headers (browsers)
    pub token: Option<String>,
}

/// Why the inbound duty stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEnd {
    Closed,
    TimedOut,
    Malformed(String),
    TransportError(String),
}

/// Why the outbound duty stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEnd {
    /// The hub dropped the connection; a close frame was sent
    QueueClosed,
    WriteFailed(String),
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ConnectQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let Some(token) = bearer_token(&headers).or(query.token) else {
        tracing::warn!("WebSocket upgrade without credentials rejected");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let identity = match state.identity.verify(&token).await {
        Ok(identity) => identity,
        Err(AuthError::MissingToken | AuthError::InvalidToken) => {
            tracing::warn!("WebSocket upgrade with invalid token rejected");
            return Err(StatusCode::UNAUTHORIZED);
        }
        Err(AuthError::Lookup(e)) => {
            tracing::warn!("Identity verification unavailable: {}", e);
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, identity)))
}

/// Extract `<token>` from `Authorization: Bearer <token>`
pub(super) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, identity: UserIdentity) {
    let settings = state.settings;
    let connection_id = ConnectionId::generate();
    let (tx, rx) = outbound_queue(settings.outbound_capacity);
    let connection = Connection::new(
        connection_id,
        identity.user_id,
        identity.display_name.clone(),
        Timestamp::new(state.clock.now_millis()),
        tx,
    );

    if let Err(e) = state.hub.register(connection).await {
        tracing::error!(connection_id = %connection_id, "Failed to register connection: {}", e);
        return;
    }

    let (sender, receiver) = socket.split();

    let inbound = InboundDuty {
        hub: state.hub.clone(),
        clock: Arc::clone(&state.clock),
        connection_id,
        identity,
        read_timeout: settings.read_timeout,
    };
    let mut recv_task = tokio::spawn(inbound.run(receiver));
    let mut send_task = tokio::spawn(outbound_loop(sender, rx, settings.ping_interval));

    // If any one of the tasks completes, abort the other
    tokio::select! {
        end = &mut recv_task => {
            send_task.abort();
            tracing::debug!(connection_id = %connection_id, reason = ?end.ok(), "Inbound duty ended");
        }
        end = &mut send_task => {
            recv_task.abort();
            tracing::debug!(connection_id = %connection_id, reason = ?end.ok(), "Outbound duty ended");
        }
    };

    state.hub.unregister(connection_id).await;
}

/// Reads frames from one client
pub(crate) struct InboundDuty {
    pub hub: HubHandle,
    pub clock: Arc<dyn Clock>,
    pub connection_id: ConnectionId,
    pub identity: UserIdentity,
    pub read_timeout: Duration,
}

impl InboundDuty {
    pub async fn run<S, E>(self, mut stream: S) -> InboundEnd
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let connection_id = self.connection_id;
        let mut last_keepalive = Timestamp::new(self.clock.now_millis());

        loop {
            let message = match tokio::time::timeout(self.read_timeout, stream.next()).await {
                Err(_) => {
                    tracing::info!(
                        connection_id = %connection_id,
                        last_keepalive = last_keepalive.value(),
                        "Read timeout, dropping connection"
                    );
                    return InboundEnd::TimedOut;
                }
                Ok(None) => return InboundEnd::Closed,
                Ok(Some(Err(e))) => {
                    tracing::warn!(connection_id = %connection_id, "WebSocket error: {}", e);
                    return InboundEnd::TransportError(e.to_string());
                }
                Ok(Some(Ok(message))) => message,
            };
            last_keepalive = Timestamp::new(self.clock.now_millis());

            let result = match message {
                Message::Text(text) => self.handle_text(text.as_str()).await,
                Message::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => self.handle_text(text).await,
                    Err(e) => Err(FrameError::Malformed(e.to_string())),
                },
                Message::Ping(_) | Message::Pong(_) => {
                    tracing::trace!(connection_id = %connection_id, "Keepalive received");
                    Ok(())
                }
                Message::Close(_) => {
                    tracing::info!(connection_id = %connection_id, "Client requested close");
                    return InboundEnd::Closed;
                }
            };

            if let Err(e) = result {
                tracing::warn!(connection_id = %connection_id, "Closing connection: {}", e);
                return InboundEnd::Malformed(e.to_string());
            }
        }
    }

    /// Returns an error only when the connection must be torn down
    async fn handle_text(&self, text: &str) -> Result<(), FrameError> {
        let raw = RawFrame::decode(text)?;
        match ClientFrame::try_from(raw) {
            Ok(frame) => {
                let event = frame.into_event(
                    self.identity.user_id,
                    self.identity.display_name.clone(),
                    Timestamp::new(self.clock.now_millis()),
                );
                self.hub
                    .submit_client_event(self.connection_id, event)
                    .await;
                Ok(())
            }
            Err(e @ FrameError::UnsupportedType(_)) => {
                tracing::info!(connection_id = %self.connection_id, "Ignoring frame: {}", e);
                Ok(())
            }
            Err(e) if !e.is_fatal() => {
                tracing::warn!(connection_id = %self.connection_id, "Ignoring invalid frame: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Drain the outbound queue into the socket, pinging when idle
pub(crate) async fn outbound_loop<K>(
    mut sink: K,
    mut rx: OutboundReceiver,
    ping_interval: Duration,
) -> OutboundEnd
where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    let start = tokio::time::Instant::now() + ping_interval;
    let mut ping = tokio::time::interval_at(start, ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    let _ = sink.send(Message::Close(None)).await;
                    return OutboundEnd::QueueClosed;
                };
                let json = match serde_json::to_string(&WsFrame::from(event.as_ref())) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(kind = ?event.kind(), "Failed to encode frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    tracing::debug!("WebSocket write failed: {}", e);
                    return OutboundEnd::WriteFailed(e.to_string());
                }
                ping.reset();
            }
            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                    tracing::debug!("WebSocket ping failed: {}", e);
                    return OutboundEnd::WriteFailed(e.to_string());
                }
            }
        }
    }
}
