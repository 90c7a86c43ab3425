//! Main application entry point for the OnlyRoll relay
//!
//! Provides the CLI interface, configuration loading, logging setup, store
//! selection and relay startup.

mod cli;
mod config;
mod signals;

use cli::CliArgs;
use config::{AppConfig, LoggingSettings};
use relay_server::{MemoryStore, RedisStore, RelayServer, RoomStore, TokenVerifier};
use signals::wait_for_shutdown_signal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging system
///
/// `RUST_LOG` takes precedence over the configured level.
fn setup_logging(config: &LoggingSettings) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

/// Builds the configured room store.
///
/// A Redis store that cannot be reached at startup is fatal.
async fn open_store(config: &AppConfig) -> Result<Arc<dyn RoomStore>, Box<dyn std::error::Error>> {
    match config.store.backend.as_str() {
        "memory" => {
            warn!("🧪 Using the in-process room store; state is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        _ => {
            let store = RedisStore::connect(&config.store.redis_url).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Main application struct
pub struct Application {
    config: AppConfig,
    server: Arc<RelayServer>,
}

impl Application {
    /// Loads configuration, sets up logging and connects the store.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        // Load configuration first (before logging setup)
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_overrides(&args);

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {}", e).into());
        }

        setup_logging(&config.logging)?;

        let server_config = config.to_server_config()?;
        let store = open_store(&config).await?;
        let verifier = TokenVerifier::new(config.auth.jwt_secret.as_bytes());
        let server = Arc::new(RelayServer::new(server_config, verifier, store));

        info!(
            "🎲 OnlyRoll relay v{} ({})",
            env!("CARGO_PKG_VERSION"),
            config.server.environment
        );
        info!("📂 Config: {}", args.config_path.display());

        Ok(Self { config, server })
    }

    /// Runs the relay until a shutdown signal arrives.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("📋 Configuration Summary:");
        info!("  🌐 WebSocket address: {}", self.config.server.bind_address);
        if self.config.status.enabled {
            info!("  🩺 Status address: {}", self.config.status.bind_address);
        }
        info!("  🗄️ Store backend: {}", self.config.store.backend);
        info!(
            "  👥 Max connections: {}",
            self.config.server.max_connections
        );
        info!(
            "  🔒 Allowed origin: {}",
            self.config.server.allowed_origin.as_deref().unwrap_or("*")
        );

        let mut server_handle = {
            let server = self.server.clone();
            tokio::spawn(async move { server.start().await })
        };

        info!("🛑 Press Ctrl+C to gracefully shutdown");

        tokio::select! {
            signal = wait_for_shutdown_signal() => {
                info!("📡 Received {}, initiating graceful shutdown...", signal?);
            }
            finished = &mut server_handle => {
                // The relay only stops on its own when startup failed
                return match finished {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => Err(e.into()),
                };
            }
        }

        self.server.shutdown().await?;

        info!("⏳ Waiting for connections to close...");
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.server.connection_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        match tokio::time::timeout(Duration::from_secs(1), server_handle).await {
            Ok(Ok(Err(e))) => error!("❌ Server error during shutdown: {}", e),
            Ok(Err(e)) => error!("❌ Server task failed: {}", e),
            Ok(Ok(Ok(()))) | Err(_) => {}
        }

        let remaining = self.server.connection_count();
        if remaining > 0 {
            warn!("{} connection(s) still open at exit", remaining);
        }
        info!("✅ OnlyRoll relay shutdown complete");
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_memory_store_selected() {
        let mut config = AppConfig::default();
        config.store.backend = "memory".to_string();
        let store = open_store(&config).await.unwrap();
        assert_eq!(store.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_application_rejects_missing_secret() {
        let dir = tempdir().unwrap();
        let args = CliArgs {
            config_path: dir.path().join("relay.toml"),
            store_backend: Some("memory".to_string()),
            ..CliArgs::default()
        };

        let result = Application::new(args).await;
        let message = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("JWT secret"), "{message}");
    }

    #[tokio::test]
    async fn test_application_builds_with_memory_store() {
        let dir = tempdir().unwrap();
        let args = CliArgs {
            config_path: dir.path().join("relay.toml"),
            store_backend: Some("memory".to_string()),
            jwt_secret: Some("secret".to_string()),
            bind_address: Some("127.0.0.1:0".to_string()),
            ..CliArgs::default()
        };

        let app = Application::new(args).await.unwrap();
        assert_eq!(app.server.connection_count(), 0);
        assert_eq!(app.config.store.backend, "memory");
        assert!(dir.path().join("relay.toml").exists());
    }
}
