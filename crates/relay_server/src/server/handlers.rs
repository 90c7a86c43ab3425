//! Per-connection task.
//!
//! [`handle_connection`] gates the WebSocket handshake (origin, capacity, token), then
//! runs a reader loop that hands each text frame to the [`EventRouter`] in receipt
//! order while a separate writer task drains the connection's outbound channel.

use crate::auth::{extract_token, Identity, TokenVerifier};
use crate::config::ServerConfig;
use crate::connection::{ClientSession, ConnectionId, SessionManager};
use crate::error::{AuthError, RelayError, ServerError};
use crate::messaging::EventRouter;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, ORIGIN};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Shared components a connection task needs.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub sessions: Arc<SessionManager>,
    pub router: Arc<EventRouter>,
    pub verifier: Arc<TokenVerifier>,
    pub config: Arc<ServerConfig>,
}

/// Why a handshake was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Unauthorized(AuthError),
    OriginNotAllowed(Option<String>),
    AtCapacity,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::OriginNotAllowed(_) => StatusCode::FORBIDDEN,
            Self::AtCapacity => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn into_response(self) -> ErrorResponse {
        // Auth failures all look the same to the client
        let body = match self {
            Self::Unauthorized(_) => "Authentication error",
            Self::OriginNotAllowed(_) => "Origin not allowed",
            Self::AtCapacity => "Server at capacity",
        };
        let mut response = ErrorResponse::new(Some(body.to_string()));
        *response.status_mut() = self.status();
        response
    }
}

impl ConnectionContext {
    /// Decides whether a handshake may proceed and with which identity.
    pub fn admit(&self, request: &Request) -> Result<Identity, Rejection> {
        if let Some(allowed) = &self.config.allowed_origin {
            let origin = request
                .headers()
                .get(ORIGIN)
                .and_then(|value| value.to_str().ok());
            // Non-browser clients send no Origin and are let through
            if let Some(origin) = origin {
                if origin != allowed {
                    return Err(Rejection::OriginNotAllowed(Some(origin.to_string())));
                }
            }
        }

        if self.sessions.connection_count() >= self.config.max_connections {
            return Err(Rejection::AtCapacity);
        }

        let authorization = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        let token = extract_token(request.uri().query(), authorization)
            .ok_or(Rejection::Unauthorized(AuthError::MissingToken))?;
        self.verifier.verify(&token).map_err(Rejection::Unauthorized)
    }
}

/// Handles a single client connection from handshake to disconnect.
///
/// # Arguments
///
/// * `stream` - TCP stream from the client
/// * `addr` - Client's socket address
/// * `context` - Shared server components
/// * `shutdown` - Fires when the server is stopping
///
/// A rejected handshake is logged and returns `Ok`; only transport failures during
/// the handshake are reported as errors.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    context: ConnectionContext,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let mut verdict: Option<Result<Identity, Rejection>> = None;
    let callback = |request: &Request, response: Response| {
        let outcome = context.admit(request);
        let reply = match &outcome {
            Ok(_) => Ok(response),
            Err(rejection) => Err(rejection.clone().into_response()),
        };
        verdict = Some(outcome);
        reply
    };

    let handshake = timeout(
        context.config.handshake_timeout(),
        accept_hdr_async(stream, callback),
    )
    .await;

    let (ws_stream, identity) = match (handshake, verdict) {
        (Ok(Ok(ws)), Some(Ok(identity))) => (ws, identity),
        (_, Some(Err(rejection))) => {
            warn!("Rejected handshake from {}: {:?}", addr, rejection);
            return Ok(());
        }
        (Ok(Err(e)), _) => {
            return Err(ServerError::Network(format!(
                "WebSocket handshake failed for {addr}: {e}"
            )));
        }
        (Err(_), _) => {
            return Err(ServerError::Network(format!(
                "WebSocket handshake with {addr} timed out"
            )));
        }
        (Ok(Ok(_)), None) => {
            return Err(ServerError::Internal(format!(
                "Handshake with {addr} completed without admission"
            )));
        }
    };

    let connection_id = context.sessions.next_connection_id();
    let mut session = ClientSession::new(connection_id, addr);
    session.authenticate(identity.clone());

    let (mut ws_sink, mut ws_receiver) = ws_stream.split();
    let (sender, mut outbound) =
        mpsc::channel::<Message>(context.config.outbound_queue_capacity.max(1));
    context
        .sessions
        .register(connection_id, identity.clone(), addr, sender.clone());
    info!(
        "Connection {} established from {} as {} ({})",
        connection_id, addr, identity.display_name, identity.user_id
    );

    // Writer: ends when every sender is gone or after a close frame went out
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let closing = matches!(message, Message::Close(_));
            if ws_sink.send(message).await.is_err() || closing {
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = context
                        .router
                        .route_client_message(text.as_str(), &mut session)
                        .await
                    {
                        log_dropped_event(connection_id, &e);
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = sender.try_send(Message::Pong(data));
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Connection {} requested close", connection_id);
                    break;
                }
                Some(Ok(_)) => {
                    debug!("Ignoring non-text frame from connection {}", connection_id);
                }
                Some(Err(e)) => {
                    warn!("WebSocket error for connection {}: {}", connection_id, e);
                    break;
                }
            },
            _ = shutdown.recv() => {
                let _ = sender.try_send(Message::Close(None));
                break;
            }
        }
    }

    context.router.disconnect(&mut session).await;
    context.sessions.unregister(connection_id);
    let lifetime = Utc::now() - session.connected_at();
    info!(
        "Connection {} from {} closed after {}s",
        connection_id,
        session.remote_addr(),
        lifetime.num_seconds()
    );
    Ok(())
}

fn log_dropped_event(connection_id: ConnectionId, error: &RelayError) {
    match error {
        RelayError::NotAuthenticated => {
            debug!("Ignoring event from unauthenticated connection {}", connection_id)
        }
        RelayError::Dice(e) => debug!("Dropped roll from connection {}: {}", connection_id, e),
        RelayError::Malformed(_) | RelayError::Store(_) => {
            warn!("Dropped event from connection {}: {}", connection_id, error)
        }
    }
}
