//! Error types for the relay server.
//!
//! Errors are split by where they stop: [`ServerError`] ends server startup or a
//! transport, while [`RelayError`] and the errors it wraps are contained to the single
//! client event that triggered them.

use thiserror::Error;

/// Failures that affect the server as a whole or a whole connection.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Network-related error (bind, accept, handshake, socket I/O)
    #[error("Network error: {0}")]
    Network(String),
    /// Internal server error (invalid state, misconfiguration)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Bearer token rejection.
///
/// Every variant is reported to the client the same way (HTTP 401 at handshake);
/// the variants only exist for server-side logging.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no token provided")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token is missing the `{0}` claim")]
    MissingClaim(&'static str),
}

/// Unparseable dice notation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiceError {
    #[error("invalid dice spec `{0}`")]
    InvalidDiceSpec(String),
}

/// Failures of the backing room store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached or refused the command.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A stored document could not be decoded.
    #[error("malformed record under `{key}`: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Handler-level failure for one inbound client event.
///
/// None of these terminate the connection; the router logs them and drops the event.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("session has no verified identity")]
    NotAuthenticated,
    #[error("malformed event: {0}")]
    Malformed(String),
    #[error(transparent)]
    Dice(#[from] DiceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
