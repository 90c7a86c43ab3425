//! Convenience constructors.

use crate::auth::TokenVerifier;
use crate::config::ServerConfig;
use crate::server::RelayServer;
use crate::store::{MemoryStore, RoomStore};
use std::sync::Arc;

/// Creates a relay with default configuration and an in-process store.
///
/// # Arguments
///
/// * `secret` - Shared HS256 secret used to verify client tokens
pub fn create_server(secret: &[u8]) -> RelayServer {
    create_server_with_config(ServerConfig::default(), secret, Arc::new(MemoryStore::new()))
}

/// Creates a relay with custom configuration and backing store.
pub fn create_server_with_config(
    config: ServerConfig,
    secret: &[u8],
    store: Arc<dyn RoomStore>,
) -> RelayServer {
    RelayServer::new(config, TokenVerifier::new(secret), store)
}
