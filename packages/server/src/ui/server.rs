//! Server execution logic.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

use super::{
    handler::{
        add_room_member, bridge_handler, get_room_online, get_stats, get_user_online,
        health_check, publish_event, remove_room_member, require_internal_token,
        websocket_handler,
    },
    signal::shutdown_signal,
    state::AppState,
};

/// Hub HTTP/WebSocket server
///
/// # Example
///
/// ```ignore
/// let server = Server::new(app_state);
/// server.run("127.0.0.1".to_string(), 8080).await?;
/// ```
pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Build the router without binding a socket
    pub fn router(&self) -> Router {
        // チャットサービス・ピアインスタンス向けの内部エンドポイント（内部トークン必須）
        let internal = Router::new()
            .route("/internal/events", post(publish_event))
            .route(
                "/internal/rooms/{room_id}/members/{user_id}",
                put(add_room_member).delete(remove_room_member),
            )
            .route("/internal/bridge", get(bridge_handler))
            .route_layer(middleware::from_fn_with_state(
                Arc::clone(&self.state),
                require_internal_token,
            ));

        Router::new()
            // WebSocket エンドポイント
            .route("/ws", get(websocket_handler))
            // HTTP エンドポイント
            .route("/api/health", get(health_check))
            .route("/api/stats", get(get_stats))
            .route("/api/users/{user_id}/online", get(get_user_online))
            .route("/api/rooms/{room_id}/online", get(get_room_online))
            .merge(internal)
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state))
    }

    /// Run the server until Ctrl+C or SIGTERM
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the specified address or
    /// if there's an error during server execution.
    pub async fn run(self, host: String, port: u16) -> Result<(), Box<dyn std::error::Error>> {
        let app = self.router();

        let bind_addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

        tracing::info!(
            instance_id = %self.state.instance_id,
            "Tsudoi hub listening on {}",
            listener.local_addr()?
        );
        tracing::info!("Connect to: ws://{}/ws", bind_addr);
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");

        Ok(())
    }
}
