//! Per-connection session state.
//!
//! A [`ClientSession`] lives inside its connection task and is never shared. It tracks
//! the verified identity and the rooms joined over this connection; room contents
//! themselves live in the store.

use super::ConnectionId;
use crate::auth::Identity;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::net::SocketAddr;

/// Lifecycle of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake received, token not verified yet
    Connecting,
    /// Identity attached, no rooms joined
    Authenticated,
    /// Member of at least one room
    Active,
    /// Torn down; no further events are processed
    Closed,
}

/// Represents an individual client connection to the server.
#[derive(Debug)]
pub struct ClientSession {
    connection_id: ConnectionId,
    remote_addr: SocketAddr,
    connected_at: DateTime<Utc>,
    identity: Option<Identity>,
    state: SessionState,
    rooms: BTreeSet<String>,
}

impl ClientSession {
    /// Creates a session in the [`SessionState::Connecting`] state.
    pub fn new(connection_id: ConnectionId, remote_addr: SocketAddr) -> Self {
        Self {
            connection_id,
            remote_addr,
            connected_at: Utc::now(),
            identity: None,
            state: SessionState::Connecting,
            rooms: BTreeSet::new(),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Attaches the verified identity.
    ///
    /// Only a `Connecting` session can be authenticated; returns `false` otherwise and
    /// leaves the session untouched.
    pub fn authenticate(&mut self, identity: Identity) -> bool {
        if self.state != SessionState::Connecting {
            return false;
        }
        self.identity = Some(identity);
        self.state = SessionState::Authenticated;
        true
    }

    /// The identity events are attributed to, if the session may still send events.
    pub fn identity(&self) -> Option<&Identity> {
        match self.state {
            SessionState::Authenticated | SessionState::Active => self.identity.as_ref(),
            SessionState::Connecting | SessionState::Closed => None,
        }
    }

    /// Records `room` as joined. Returns `false` if it already was.
    pub fn join(&mut self, room: &str) -> bool {
        if self.identity().is_none() {
            return false;
        }
        let inserted = self.rooms.insert(room.to_string());
        self.state = SessionState::Active;
        inserted
    }

    /// Forgets `room`. Leaving the last room drops back to `Authenticated`.
    pub fn leave(&mut self, room: &str) -> bool {
        let removed = self.rooms.remove(room);
        if self.state == SessionState::Active && self.rooms.is_empty() {
            self.state = SessionState::Authenticated;
        }
        removed
    }

    pub fn is_member(&self, room: &str) -> bool {
        self.rooms.contains(room)
    }

    /// Joined rooms in sorted order.
    pub fn rooms(&self) -> impl Iterator<Item = &str> {
        self.rooms.iter().map(String::as_str)
    }

    /// Moves the session to `Closed` and hands back the rooms it still belonged to.
    pub fn close(&mut self) -> Vec<String> {
        self.state = SessionState::Closed;
        std::mem::take(&mut self.rooms).into_iter().collect()
    }
}
