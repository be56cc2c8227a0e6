//! Command line / environment configuration.

use std::{path::PathBuf, time::Duration};

use clap::Parser;

use crate::{
    domain::{DEFAULT_OUTBOUND_CAPACITY, InstanceId},
    infrastructure::{
        directory::{ConfigError, message::DEFAULT_MESSAGE_CAPACITY},
        event_bus::DEFAULT_REDIS_CHANNEL,
    },
    ui::ConnectionSettings,
    usecase::{DEFAULT_BRIDGE_QUEUE_CAPACITY, hub::DEFAULT_COMMAND_CAPACITY},
};

/// Transport the cross-process bridge runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeTransport {
    PeerMesh { peers: Vec<String> },
    Redis { url: String, channel: String },
}

#[derive(Parser, Debug, Clone)]
#[command(name = "tsudoi-server")]
#[command(about = "Real-time connection hub for Tsudoi chat", long_about = None)]
pub struct Config {
    /// Host address to bind the server to
    #[arg(short = 'H', long, env = "TSUDOI_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, env = "TSUDOI_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Pending events buffered per connection before it is dropped as unresponsive
    #[arg(long, env = "TSUDOI_OUTBOUND_CAPACITY", default_value_t = DEFAULT_OUTBOUND_CAPACITY)]
    pub outbound_capacity: usize,

    /// Seconds without outbound traffic before a ping is sent
    #[arg(long, env = "TSUDOI_PING_INTERVAL_SECS", default_value_t = 54)]
    pub ping_interval_secs: u64,

    /// Seconds without any inbound frame before a connection is dropped
    #[arg(long, env = "TSUDOI_READ_TIMEOUT_SECS", default_value_t = 60)]
    pub read_timeout_secs: u64,

    /// Capacity of the hub command channel
    #[arg(long, env = "TSUDOI_COMMAND_CAPACITY", default_value_t = DEFAULT_COMMAND_CAPACITY)]
    pub command_capacity: usize,

    /// Events queued for relay to peer instances before relay copies are dropped
    #[arg(long, env = "TSUDOI_BRIDGE_QUEUE_CAPACITY", default_value_t = DEFAULT_BRIDGE_QUEUE_CAPACITY)]
    pub bridge_queue_capacity: usize,

    /// Bridge endpoints of peer instances (repeat or comma-separate)
    #[arg(long = "peer", env = "TSUDOI_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Redis URL; when set, instances share a Redis pub/sub channel instead of peer links
    #[arg(long, env = "TSUDOI_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Redis channel carrying bridge envelopes
    #[arg(long, env = "TSUDOI_REDIS_CHANNEL", default_value = DEFAULT_REDIS_CHANNEL)]
    pub redis_channel: String,

    /// Shared secret for `/internal` routes and peer links (internal routes are closed without it)
    #[arg(long, env = "TSUDOI_INTERNAL_TOKEN", hide_env_values = true)]
    pub internal_token: Option<String>,

    /// Message senders remembered for read-receipt routing
    #[arg(long, env = "TSUDOI_MESSAGE_CAPACITY", default_value_t = DEFAULT_MESSAGE_CAPACITY)]
    pub message_capacity: usize,

    /// Identifier of this instance on the bridge (random when omitted)
    #[arg(long, env = "TSUDOI_INSTANCE_ID")]
    pub instance_id: Option<String>,

    /// JSON file with users, tokens and contacts for the in-memory directories
    #[arg(long, env = "TSUDOI_SEED_FILE")]
    pub seed_file: Option<PathBuf>,
}

impl Config {
    /// Validate values clap cannot check on its own
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbound_capacity == 0 {
            return Err(ConfigError::Invalid(
                "outbound capacity must be at least 1".to_string(),
            ));
        }
        if self.ping_interval_secs == 0 || self.read_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "ping interval and read timeout must be at least 1 second".to_string(),
            ));
        }
        if self.redis_url.is_some() && !self.peers.is_empty() {
            return Err(ConfigError::Invalid(
                "use either --redis-url or --peer, not both".to_string(),
            ));
        }
        if self.internal_token.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::Invalid(
                "internal token must not be empty".to_string(),
            ));
        }
        if self.ping_interval_secs >= self.read_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "ping interval ({}s) must be shorter than read timeout ({}s)",
                self.ping_interval_secs, self.read_timeout_secs
            )));
        }
        Ok(())
    }

    pub fn instance_id(&self) -> Result<InstanceId, ConfigError> {
        match &self.instance_id {
            Some(value) => {
                InstanceId::parse(value).map_err(|e| ConfigError::Invalid(e.to_string()))
            }
            None => Ok(InstanceId::generate()),
        }
    }

    pub fn bridge_transport(&self) -> BridgeTransport {
        match &self.redis_url {
            Some(url) => BridgeTransport::Redis {
                url: url.clone(),
                channel: self.redis_channel.clone(),
            },
            None => BridgeTransport::PeerMesh {
                peers: self.peers.clone(),
            },
        }
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            outbound_capacity: self.outbound_capacity,
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
        }
    }
}
