//! Configuration management for the relay binary.
//!
//! This module handles loading, validation, and conversion of relay configuration
//! from TOML files and command-line arguments.

use crate::cli::CliArgs;
use relay_server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

/// Store backends the binary knows how to build.
pub const STORE_BACKENDS: [&str; 2] = ["redis", "memory"];

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// WebSocket relay settings
    pub server: ServerSettings,
    /// Token verification settings
    #[serde(default)]
    pub auth: AuthSettings,
    /// Room store settings
    #[serde(default)]
    pub store: StoreSettings,
    /// Health/status listener settings
    #[serde(default)]
    pub status: StatusSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Relay-specific configuration settings.
///
/// Controls network binding, connection limits, room log capacities and payload
/// limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the WebSocket listener to (e.g., "0.0.0.0:3001")
    pub bind_address: String,
    /// Maximum number of concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Handshake timeout in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,
    /// Entries kept per room chat log
    #[serde(default = "default_chat_log_capacity")]
    pub chat_log_capacity: usize,
    /// Entries kept per room roll log
    #[serde(default = "default_roll_log_capacity")]
    pub roll_log_capacity: usize,
    /// Longest accepted chat message, in characters
    #[serde(default = "default_max_chat_length")]
    pub max_chat_length: usize,
    /// Largest accepted character payload, in bytes
    #[serde(default = "default_max_character_bytes")]
    pub max_character_bytes: usize,
    /// Frames buffered per connection for a slow reader
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// Browser origin allowed to connect; any origin when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_origin: Option<String>,
    /// Fixed dice seed, for reproducible sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dice_seed: Option<u64>,
    /// Deployment environment name
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_max_connections() -> usize {
    1000
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_chat_log_capacity() -> usize {
    100
}

fn default_roll_log_capacity() -> usize {
    50
}

fn default_max_chat_length() -> usize {
    2000
}

fn default_max_character_bytes() -> usize {
    64 * 1024
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_environment() -> String {
    "development".to_string()
}

/// Token verification configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthSettings {
    /// HS256 secret shared with the backend. Usually supplied via `JWT_SECRET_KEY`.
    #[serde(default)]
    pub jwt_secret: String,
}

/// Room store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// `redis` or `memory`
    pub backend: String,
    /// Redis connection URL, used by the `redis` backend
    pub redis_url: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: "redis".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
        }
    }
}

/// Health/status HTTP listener configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSettings {
    pub enabled: bool,
    pub bind_address: String,
    /// Backend URLs echoed by `/status`
    pub backend_url: String,
    pub backend_api_url: String,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:3002".to_string(),
            backend_url: "http://backend:8000".to_string(),
            backend_api_url: "http://backend:8000/api".to_string(),
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:3001".to_string(),
                max_connections: default_max_connections(),
                handshake_timeout: default_handshake_timeout(),
                chat_log_capacity: default_chat_log_capacity(),
                roll_log_capacity: default_roll_log_capacity(),
                max_chat_length: default_max_chat_length(),
                max_character_bytes: default_max_character_bytes(),
                outbound_queue_capacity: default_outbound_queue_capacity(),
                allowed_origin: None,
                dice_seed: None,
                environment: default_environment(),
            },
            auth: AuthSettings::default(),
            store: StoreSettings::default(),
            status: StatusSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the specified path
    /// and returns the default configuration. The default file carries no secret.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line and environment overrides.
    pub fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(status_bind) = &args.status_bind_address {
            self.status.bind_address = status_bind.clone();
        }
        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        if let Some(backend) = &args.store_backend {
            self.store.backend = backend.clone();
        }
        if let Some(secret) = &args.jwt_secret {
            self.auth.jwt_secret = secret.clone();
        }
        if let Some(redis_url) = &args.redis_url {
            self.store.redis_url = redis_url.clone();
        }
    }

    /// Converts the application configuration to a relay server configuration.
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let status_address = if self.status.enabled {
            Some(self.status.bind_address.parse()?)
        } else {
            None
        };

        Ok(ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            status_address,
            max_connections: self.server.max_connections,
            handshake_timeout: self.server.handshake_timeout,
            chat_log_capacity: self.server.chat_log_capacity,
            roll_log_capacity: self.server.roll_log_capacity,
            max_chat_length: self.server.max_chat_length,
            max_character_bytes: self.server.max_character_bytes,
            outbound_queue_capacity: self.server.outbound_queue_capacity,
            allowed_origin: self.server.allowed_origin.clone(),
            dice_seed: self.server.dice_seed,
            environment: self.server.environment.clone(),
            backend_url: self.status.backend_url.clone(),
            backend_api_url: self.status.backend_api_url.clone(),
        })
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }
        if self.status.enabled && self.status.bind_address.parse::<SocketAddr>().is_err() {
            return Err(format!(
                "Invalid status bind address: {}",
                &self.status.bind_address
            ));
        }

        if self.server.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }
        if self.server.chat_log_capacity == 0 || self.server.roll_log_capacity == 0 {
            return Err("Room log capacities must be at least 1".to_string());
        }
        if self.server.max_chat_length == 0 || self.server.max_character_bytes == 0 {
            return Err("Payload limits must be at least 1".to_string());
        }
        if self.server.outbound_queue_capacity == 0 {
            return Err("outbound_queue_capacity must be at least 1".to_string());
        }

        if self.auth.jwt_secret.is_empty() {
            return Err("No JWT secret configured (set JWT_SECRET_KEY)".to_string());
        }

        if !STORE_BACKENDS.contains(&self.store.backend.as_str()) {
            return Err(format!(
                "Invalid store backend: {}. Must be one of: {STORE_BACKENDS:?}",
                &self.store.backend
            ));
        }
        if self.store.backend == "redis" && self.store.redis_url.is_empty() {
            return Err("Redis URL cannot be empty".to_string());
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {LOG_LEVELS:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
