//! Connection management for client connections.
//!
//! This module handles the lifecycle of client connections: the per-connection
//! [`ClientSession`] state machine and the server-wide [`SessionManager`] that tracks
//! live connections and fans events out to rooms.

pub mod client;
pub mod manager;

pub use client::{ClientSession, SessionState};
pub use manager::SessionManager;

/// Type alias for connection identifiers.
///
/// Connection IDs are allocated by the [`SessionManager`] and are unique for the
/// lifetime of the process.
pub type ConnectionId = usize;
