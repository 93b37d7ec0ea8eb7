//! Server configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the Parley server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Shared secret used to verify credential tokens.
    pub auth_secret: String,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Seconds a new channel may remain unauthenticated before it is
    /// closed. Bounds resource use from stalled handshakes.
    pub handshake_timeout_secs: u64,
    /// Capacity of each connection's outbound queue; sends to a full
    /// queue are dropped and counted.
    pub outbound_queue_capacity: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            auth_secret: String::new(),
            max_connections: 1024,
            handshake_timeout_secs: 10,
            outbound_queue_capacity: 256,
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}
