//! Core relay server implementation.
//!
//! This module contains the main `RelayServer` struct, which owns every shared
//! component (session manager, room registry, dice engine, token verifier) and runs
//! the WebSocket accept loop plus the HTTP status listener.

use crate::{
    auth::TokenVerifier,
    config::ServerConfig,
    connection::SessionManager,
    dice::DiceEngine,
    error::ServerError,
    messaging::{EventRouter, PayloadLimits},
    registry::RoomRegistry,
    server::handlers::{handle_connection, ConnectionContext},
    status::{self, StatusState},
    store::RoomStore,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Binds a non-blocking listener with `SO_REUSEADDR` set.
///
/// # Arguments
///
/// * `address` - Address to bind; port 0 picks a free port
pub fn bind_listener(address: SocketAddr) -> Result<TcpListener, ServerError> {
    let socket = Socket::new(
        Domain::for_address(address),
        Type::STREAM,
        Some(Protocol::TCP),
    )
    .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;
    socket.set_reuse_address(true).ok();

    socket
        .bind(&address.into())
        .map_err(|e| ServerError::Network(format!("Bind failed: {e}")))?;
    socket
        .listen(1024)
        .map_err(|e| ServerError::Network(format!("Listen failed: {e}")))?;

    let std_listener: StdTcpListener = socket.into();
    std_listener.set_nonblocking(true).ok();

    TcpListener::from_std(std_listener)
        .map_err(|e| ServerError::Network(format!("Tokio listener creation failed: {e}")))
}

/// The relay server.
///
/// # Architecture
///
/// * **Session Manager**: live connections and the local room fan-out index
/// * **Event Router**: decodes client events, writes the store, broadcasts
/// * **Room Registry**: typed access to room state in the backing store
/// * **Status listener**: `/health` and `/status` over plain HTTP
///
/// The server keeps no room state itself; everything shared between relays lives in
/// the [`RoomStore`].
pub struct RelayServer {
    /// Server configuration settings
    config: Arc<ServerConfig>,

    /// Live connections and room subscriptions
    sessions: Arc<SessionManager>,

    /// Store-backed room state
    registry: RoomRegistry,

    /// Client event handling
    router: Arc<EventRouter>,

    /// Handshake token checks
    verifier: Arc<TokenVerifier>,

    /// Channel for coordinating server shutdown
    shutdown_sender: broadcast::Sender<()>,

    /// When this server was constructed, for uptime reporting
    started_at: Instant,
}

impl RelayServer {
    /// Creates a new relay server.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration parameters for server behavior
    /// * `verifier` - Validates handshake tokens
    /// * `store` - Backing store for room state
    pub fn new(config: ServerConfig, verifier: TokenVerifier, store: Arc<dyn RoomStore>) -> Self {
        let sessions = Arc::new(SessionManager::new());
        let registry = RoomRegistry::new(store, config.chat_log_capacity, config.roll_log_capacity);
        let router = Arc::new(EventRouter::new(
            registry.clone(),
            sessions.clone(),
            Arc::new(DiceEngine::new(config.dice_seed)),
            PayloadLimits::from(&config),
        ));
        let (shutdown_sender, _) = broadcast::channel(1);

        Self {
            config: Arc::new(config),
            sessions,
            registry,
            router,
            verifier: Arc::new(verifier),
            shutdown_sender,
            started_at: Instant::now(),
        }
    }

    /// Starts the relay and runs until [`shutdown`](Self::shutdown) is called.
    ///
    /// # Startup Sequence
    ///
    /// 1. Bind the WebSocket listener
    /// 2. Bind and spawn the status listener, if configured
    /// 3. Run the accept loop
    pub async fn start(&self) -> Result<(), ServerError> {
        info!("🚀 Starting relay server on {}", self.config.bind_address);
        info!(
            "🗄️ Room store: {} ({})",
            self.registry.store().backend_name(),
            self.registry.store().endpoint()
        );

        let listener = bind_listener(self.config.bind_address)?;
        info!("✅ WebSocket listener bound on {}", self.config.bind_address);

        if let Some(status_address) = self.config.status_address {
            self.spawn_status_listener(status_address).await?;
        } else {
            info!("⏸️ Status listener disabled");
        }

        self.serve(listener).await
    }

    /// Runs the accept loop on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_receiver = self.shutdown_sender.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Accepted TCP connection from {}", addr);
                        let context = self.connection_context();
                        let shutdown = self.shutdown_sender.subscribe();
                        tokio::spawn(async move {
                            let outcome = handle_connection(stream, addr, context, shutdown).await;
                            if let Err(e) = outcome {
                                warn!("Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        // Usually descriptor exhaustion; keep serving the live connections
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    }
                },
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!(
            "🧹 Closing {} live connection(s)...",
            self.sessions.connection_count()
        );
        info!("Server stopped");
        Ok(())
    }

    async fn spawn_status_listener(&self, address: SocketAddr) -> Result<(), ServerError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| ServerError::Network(format!("Status listener bind failed: {e}")))?;
        let app = self.status_router();
        let mut shutdown_receiver = self.shutdown_sender.subscribe();

        tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_receiver.recv().await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("Status listener failed: {}", e);
            }
        });
        info!("🩺 Status endpoints on http://{}/health and /status", address);
        Ok(())
    }

    fn connection_context(&self) -> ConnectionContext {
        ConnectionContext {
            sessions: self.sessions.clone(),
            router: self.router.clone(),
            verifier: self.verifier.clone(),
            config: self.config.clone(),
        }
    }

    /// Builds the `/health` and `/status` router for this server.
    pub fn status_router(&self) -> axum::Router {
        status::router(StatusState {
            sessions: self.sessions.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            started_at: self.started_at,
            store_timeout: status::STORE_PING_TIMEOUT,
        })
    }

    /// Initiates server shutdown.
    ///
    /// Stops the accept loop and the status listener and asks every live connection
    /// to close; each connection then runs its own disconnect cleanup.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("🛑 Shutting down server...");
        let _ = self.shutdown_sender.send(());
        Ok(())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Gets the session manager tracking live connections.
    pub fn get_session_manager(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    /// Gets the store-backed room registry.
    pub fn get_room_registry(&self) -> RoomRegistry {
        self.registry.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.connection_count()
    }
}
