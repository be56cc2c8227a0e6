//! Event bus implementations for the cross-process bridge.
//!
//! - `inmemory`: tokio broadcast channel, single process (development, tests)
//! - `peer_mesh`: WebSocket links between instances
//! - `redis_pubsub`: Redis pub/sub channel shared by every instance

pub mod inmemory;
pub mod peer_mesh;
pub mod redis_pubsub;

pub use inmemory::InMemoryEventBus;
pub use peer_mesh::{PeerMeshEventBus, PeerMeshOptions};
pub use redis_pubsub::{DEFAULT_REDIS_CHANNEL, RedisEventBus};
