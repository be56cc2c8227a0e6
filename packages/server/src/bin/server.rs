//! Tsudoi connection hub server.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin tsudoi-server
//! cargo run --bin tsudoi-server -- --port 3000 --seed-file seed.json
//! cargo run --bin tsudoi-server -- --peer ws://10.0.0.2:8080/internal/bridge --internal-token s3cret
//! cargo run --bin tsudoi-server -- --redis-url redis://127.0.0.1:6379 --internal-token s3cret
//! ```

use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tsudoi_server::{
    config::{BridgeTransport, Config},
    domain::EventBus,
    infrastructure::{
        directory::{
            InMemoryContactDirectory, InMemoryMessageDirectory, SeedFile, StaticTokenVerifier,
        },
        event_bus::{PeerMeshEventBus, PeerMeshOptions, RedisEventBus},
    },
    ui::{AppState, Server},
    usecase::{CrossProcessBridge, HubBuilder},
};
use tsudoi_shared::{
    logger::setup_logger,
    time::{Clock, SystemClock},
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let config = Config::parse();
    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
    let instance_id = match config.instance_id() {
        Ok(id) => id,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    // Initialize dependencies in order:
    // 1. Collaborators
    // 2. Event bus + bridge relay queue
    // 3. Hub
    // 4. Bridge tasks
    // 5. AppState
    // 6. Server

    // 1. Collaborators (in-memory, optionally seeded)
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let verifier = Arc::new(StaticTokenVerifier::new());
    let contacts = Arc::new(InMemoryContactDirectory::new());
    let messages = Arc::new(InMemoryMessageDirectory::with_capacity(config.message_capacity));
    if let Some(path) = &config.seed_file {
        match SeedFile::load(path) {
            Ok(seed) => {
                let users = seed.apply(&verifier, &contacts).await;
                tracing::info!("Loaded {} users from {}", users, path.display());
            }
            Err(e) => {
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        }
    } else {
        tracing::warn!("No seed file given; every WebSocket upgrade will be rejected");
    }

    if config.internal_token.is_none() {
        tracing::warn!("No internal token given; /internal endpoints will reject every request");
    }

    // 2. Event bus (peer mesh or Redis) and the queue the hub relays into
    let (bus, bridge_inbox): (Arc<dyn EventBus>, Option<Arc<PeerMeshEventBus>>) =
        match config.bridge_transport() {
            BridgeTransport::PeerMesh { peers } => {
                let options = PeerMeshOptions::new(peers).with_token(config.internal_token.clone());
                let mesh = PeerMeshEventBus::spawn(options);
                tracing::info!(
                    instance_id = %instance_id,
                    peers = mesh.peer_count(),
                    "Bridge configured over peer links"
                );
                let bus: Arc<dyn EventBus> = mesh.clone();
                (bus, Some(mesh))
            }
            BridgeTransport::Redis { url, channel } => match RedisEventBus::new(&url, channel) {
                Ok(redis) => {
                    tracing::info!(
                        instance_id = %instance_id,
                        channel = %redis.channel(),
                        "Bridge configured over Redis pub/sub"
                    );
                    (Arc::new(redis), None)
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    std::process::exit(1);
                }
            },
        };
    let (relay_tx, relay_rx) = mpsc::channel(config.bridge_queue_capacity.max(1));

    // 3. Hub
    let hub = HubBuilder::new(contacts, messages)
        .clock(clock.clone())
        .relay(relay_tx)
        .command_capacity(config.command_capacity)
        .spawn();

    // 4. Bridge tasks
    let bridge = Arc::new(CrossProcessBridge::new(instance_id, bus));
    let outbound_task = bridge.spawn_outbound(relay_rx);
    let listener_task = bridge.spawn_listener(hub.clone()).await;

    // 5. AppState
    let state = AppState {
        instance_id,
        hub,
        identity: verifier,
        internal_token: config.internal_token.clone(),
        bridge_inbox,
        clock,
        settings: config.connection_settings(),
    };

    // 6. Create and run the server
    let server = Server::new(state);
    let result = server.run(config.host, config.port).await;

    listener_task.abort();
    outbound_task.abort();

    if let Err(e) = result {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
