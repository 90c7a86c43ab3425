//! # Relay Server - Real-Time Game Room Fan-Out
//!
//! The real-time half of OnlyRoll: a WebSocket relay that authenticates players with
//! bearer tokens, groups their connections into game rooms and fans chat, dice rolls,
//! presence and character updates out to everyone in the room.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Token Verifier** ([`auth`]) - HS256 bearer tokens checked at the handshake
//! * **Session Manager** ([`connection`]) - live connections and room fan-out
//! * **Event Router** ([`messaging`]) - decodes client events and runs their handlers
//! * **Room Registry** ([`registry`]) - members, chat and roll logs, character sheets
//! * **Room Store** ([`store`]) - Redis in production, an in-process map otherwise
//! * **Dice Engine** ([`dice`]) - server-side `d<N>` rolls
//! * **Status endpoints** ([`status`]) - `/health` and `/status` over HTTP
//!
//! ### Message Flow
//!
//! 1. Client connects with `?token=<jwt>`; the handshake is refused unless it verifies
//! 2. Client sends `{"event": "joinGame", "data": "<room>"}` and other room events
//! 3. The router writes the change to the store
//! 4. The resulting event is broadcast to the room's connections
//!
//! Room state lives only in the store, so several relays can share one Redis; the
//! fan-out itself is local to each relay.
//!
//! ## Error Handling
//!
//! [`ServerError`] covers startup and transport failures. Everything that goes wrong
//! while handling a single client event is a [`RelayError`]: the event is logged and
//! dropped and the connection stays open.

pub use auth::{Identity, TokenVerifier};
pub use config::ServerConfig;
pub use error::{AuthError, DiceError, RelayError, ServerError, StoreError};
pub use server::RelayServer;
pub use store::{MemoryStore, RedisStore, RoomStore};
pub use utils::{create_server, create_server_with_config};

pub mod auth;
pub mod config;
pub mod connection;
pub mod dice;
pub mod error;
pub mod messaging;
pub mod registry;
pub mod server;
pub mod status;
pub mod store;
pub mod utils;
