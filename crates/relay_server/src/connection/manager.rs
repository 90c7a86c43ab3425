//! Live connection tracking and room fan-out.
//!
//! The [`SessionManager`] is owned by the server and handed to every connection task.
//! It holds each connection's outbound channel plus a local room → connections index
//! used only to decide who receives a broadcast; membership as seen by other relays
//! lives in the store.

use super::ConnectionId;
use crate::auth::Identity;
use crate::messaging::ServerEvent;
use dashmap::DashMap;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

/// Outbound half of a connection as seen by the rest of the server.
#[derive(Debug)]
struct ConnectionHandle {
    identity: Identity,
    sender: mpsc::Sender<Message>,
}

/// Registry of live connections and their local room subscriptions.
#[derive(Debug)]
pub struct SessionManager {
    next_id: AtomicUsize,
    connections: DashMap<ConnectionId, ConnectionHandle>,
    rooms: DashMap<String, HashSet<ConnectionId>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(1),
            connections: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    /// Allocates a connection id that has never been handed out before.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Makes a connection reachable by broadcasts.
    ///
    /// # Arguments
    ///
    /// * `connection_id` - Id from [`next_connection_id`](Self::next_connection_id)
    /// * `identity` - Verified identity of the peer
    /// * `remote_addr` - Peer address, for diagnostics
    /// * `sender` - Bounded channel drained by the connection's writer task
    pub fn register(
        &self,
        connection_id: ConnectionId,
        identity: Identity,
        remote_addr: SocketAddr,
        sender: mpsc::Sender<Message>,
    ) {
        debug!(
            "Registered connection {} from {} as {}",
            connection_id, remote_addr, identity.user_id
        );
        self.connections
            .insert(connection_id, ConnectionHandle { identity, sender });
    }

    /// Drops a connection and every room subscription it still had.
    pub fn unregister(&self, connection_id: ConnectionId) {
        self.connections.remove(&connection_id);
        self.rooms.retain(|_, members| {
            members.remove(&connection_id);
            !members.is_empty()
        });
        debug!("Unregistered connection {}", connection_id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn join_room(&self, room: &str, connection_id: ConnectionId) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection_id);
    }

    pub fn leave_room(&self, room: &str, connection_id: ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&connection_id);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    /// Connections subscribed to `room` on this relay.
    pub fn room_connections(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of rooms with at least one local subscriber.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Queues a frame for one connection without waiting.
    ///
    /// Returns `false` if the connection is gone or its outbound queue is full. A full
    /// queue means the peer stopped reading; the frame is dropped for that peer only.
    pub fn send_to(&self, connection_id: ConnectionId, message: Message) -> bool {
        let Some(handle) = self.connections.get(&connection_id) else {
            return false;
        };
        match handle.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Outbound queue full for connection {} ({}), dropping frame",
                    connection_id, handle.identity.user_id
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Sends `event` to every local subscriber of `room`, optionally skipping one.
    ///
    /// Returns the number of connections the event was queued for.
    pub fn broadcast(
        &self,
        room: &str,
        event: &ServerEvent,
        except: Option<ConnectionId>,
    ) -> usize {
        let message = match event.to_message() {
            Ok(message) => message,
            Err(e) => {
                error!("Failed to encode event for room {}: {}", room, e);
                return 0;
            }
        };

        self.room_connections(room)
            .into_iter()
            .filter(|id| Some(*id) != except)
            .filter(|id| self.send_to(*id, message.clone()))
            .count()
    }

    /// Asks every live connection to close.
    pub fn close_all(&self) -> usize {
        self.connections
            .iter()
            .filter(|handle| handle.sender.try_send(Message::Close(None)).is_ok())
            .count()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
