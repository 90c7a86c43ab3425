//! Server configuration types and defaults.
//!
//! This module contains the runtime configuration used to construct a
//! [`RelayServer`](crate::RelayServer). File and CLI handling live in the binary;
//! this struct is what they resolve to.

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration structure for the relay server.
///
/// Contains network settings, handshake limits, per-room log capacities and
/// payload limits, plus the descriptive values reported by `/status`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The socket address the WebSocket listener binds to
    pub bind_address: SocketAddr,

    /// The socket address of the HTTP health/status listener (None disables it)
    pub status_address: Option<SocketAddr>,

    /// Maximum number of concurrent client connections
    pub max_connections: usize,

    /// Seconds allowed for a client to complete the WebSocket handshake
    pub handshake_timeout: u64,

    /// Maximum entries kept in a room's chat log
    pub chat_log_capacity: usize,

    /// Maximum entries kept in a room's dice roll log
    pub roll_log_capacity: usize,

    /// Maximum chat message length, in characters
    pub max_chat_length: usize,

    /// Maximum serialized size of a character payload, in bytes
    pub max_character_bytes: usize,

    /// Frames queued per connection before further frames to it are dropped
    pub outbound_queue_capacity: usize,

    /// Browser origin allowed to open connections (None allows any origin)
    pub allowed_origin: Option<String>,

    /// Fixed seed for the dice engine; None seeds from OS entropy
    pub dice_seed: Option<u64>,

    /// Deployment environment name reported by the status endpoints
    pub environment: String,

    /// Base URL of the CRUD backend that mints tokens (informational)
    pub backend_url: String,

    /// API URL of the CRUD backend (informational)
    pub backend_api_url: String,
}

impl ServerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 3001)),
            status_address: Some(SocketAddr::from(([127, 0, 0, 1], 3002))),
            max_connections: 1000,
            handshake_timeout: 10,
            chat_log_capacity: 100,
            roll_log_capacity: 50,
            max_chat_length: 2000,
            max_character_bytes: 64 * 1024,
            outbound_queue_capacity: 256,
            allowed_origin: None,
            dice_seed: None,
            environment: "development".to_string(),
            backend_url: "http://backend:8000".to_string(),
            backend_api_url: "http://backend:8000/api".to_string(),
        }
    }
}
