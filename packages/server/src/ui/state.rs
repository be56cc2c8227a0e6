//! Shared application state.

use std::{sync::Arc, time::Duration};

use tsudoi_shared::time::Clock;

use crate::{
    domain::{DEFAULT_OUTBOUND_CAPACITY, IdentityVerifier, InstanceId},
    infrastructure::event_bus::PeerMeshEventBus,
    usecase::HubHandle,
};

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(54);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-connection tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub outbound_capacity: usize,
    /// Ping after this long without outbound traffic
    pub ping_interval: Duration,
    /// Drop the connection after this long without any inbound frame
    pub read_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            ping_interval: DEFAULT_PING_INTERVAL,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

pub struct AppState {
    pub instance_id: InstanceId,
    /// Hub（接続レジストリを所有するアクターへの窓口）
    pub hub: HubHandle,
    /// IdentityVerifier（トークン認証の抽象化）
    pub identity: Arc<dyn IdentityVerifier>,
    /// Bearer token the chat service and peer instances present on `/internal` routes
    pub internal_token: Option<String>,
    /// Set when peers push bridge envelopes to `/internal/bridge`
    pub bridge_inbox: Option<Arc<PeerMeshEventBus>>,
    pub clock: Arc<dyn Clock>,
    pub settings: ConnectionSettings,
}
