//! Inbound event handling.
//!
//! The [`EventRouter`] decodes a client frame, matches on the event and runs the
//! handler for it. Every handler writes to the store first and broadcasts second, so a
//! failed write never produces a broadcast.

use super::types::{
    event_id, CharacterUpdateRequest, CharacterUpdated, ChatMessage, ChatRequest, ClientEvent,
    DiceRoll, Presence, RollRequest, ServerEvent,
};
use crate::auth::Identity;
use crate::config::ServerConfig;
use crate::connection::{ClientSession, SessionManager};
use crate::dice::DiceEngine;
use crate::error::RelayError;
use crate::registry::{MemberRecord, RoomRegistry};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_CHAT_KIND: &str = "text";

/// Size limits applied to client payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadLimits {
    /// Longest accepted chat message, in characters
    pub max_chat_length: usize,
    /// Largest accepted serialized character payload, in bytes
    pub max_character_bytes: usize,
}

impl From<&ServerConfig> for PayloadLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_chat_length: config.max_chat_length,
            max_character_bytes: config.max_character_bytes,
        }
    }
}

impl Default for PayloadLimits {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// Routes client events to room state and broadcasts.
///
/// One router is shared by all connection tasks; per-connection state is passed in as
/// the caller's [`ClientSession`].
#[derive(Debug)]
pub struct EventRouter {
    registry: RoomRegistry,
    sessions: Arc<SessionManager>,
    dice: Arc<DiceEngine>,
    limits: PayloadLimits,
}

impl EventRouter {
    /// Create a new event router
    ///
    /// # Arguments
    /// * `registry` - Store-backed room state
    /// * `sessions` - Live connections, used for fan-out
    /// * `dice` - Shared dice engine
    /// * `limits` - Payload size limits
    pub fn new(
        registry: RoomRegistry,
        sessions: Arc<SessionManager>,
        dice: Arc<DiceEngine>,
        limits: PayloadLimits,
    ) -> Self {
        Self {
            registry,
            sessions,
            dice,
            limits,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Process one text frame from a client.
    ///
    /// # Errors
    /// Returns [`RelayError`] when the frame is dropped: it does not decode, the session
    /// has no identity, a payload is invalid, or the store write failed. The
    /// connection is unaffected in every case.
    pub async fn route_client_message(
        &self,
        text: &str,
        session: &mut ClientSession,
    ) -> Result<(), RelayError> {
        let event: ClientEvent = serde_json::from_str(text)
            .map_err(|e| RelayError::Malformed(format!("Invalid JSON: {}", e)))?;

        debug!(
            "Received {} from connection {}",
            event.name(),
            session.connection_id()
        );
        self.dispatch(event, session).await
    }

    /// Run the handler for an already decoded event.
    pub async fn dispatch(
        &self,
        event: ClientEvent,
        session: &mut ClientSession,
    ) -> Result<(), RelayError> {
        let identity = session
            .identity()
            .cloned()
            .ok_or(RelayError::NotAuthenticated)?;

        match event {
            ClientEvent::JoinGame(room) => self.handle_join(session, &identity, room).await,
            ClientEvent::LeaveGame(room) => self.handle_leave(session, &identity, room).await,
            ClientEvent::ChatMessage(request) => self.handle_chat(&identity, request).await,
            ClientEvent::RollDice(request) => self.handle_roll(&identity, request).await,
            ClientEvent::UpdateCharacter(request) => {
                self.handle_character(session, &identity, request).await
            }
        }
    }

    async fn handle_join(
        &self,
        session: &mut ClientSession,
        identity: &Identity,
        room: String,
    ) -> Result<(), RelayError> {
        require_room(&room)?;
        let connection_id = session.connection_id();
        let record = MemberRecord {
            connection_id,
            username: identity.display_name.clone(),
            joined_at: Utc::now(),
        };
        self.registry
            .add_member(&room, &identity.user_id, &record)
            .await?;

        session.join(&room);
        self.sessions.join_room(&room, connection_id);
        self.sessions.broadcast(
            &room,
            &ServerEvent::PlayerJoined(Presence::from(identity)),
            Some(connection_id),
        );

        info!(
            "👋 {} ({}) joined game {}",
            identity.display_name, identity.user_id, room
        );
        Ok(())
    }

    async fn handle_leave(
        &self,
        session: &mut ClientSession,
        identity: &Identity,
        room: String,
    ) -> Result<(), RelayError> {
        require_room(&room)?;
        let connection_id = session.connection_id();
        self.registry.remove_member(&room, &identity.user_id).await?;

        session.leave(&room);
        self.sessions.leave_room(&room, connection_id);
        self.sessions.broadcast(
            &room,
            &ServerEvent::PlayerLeft(Presence::from(identity)),
            Some(connection_id),
        );

        info!(
            "🚪 {} ({}) left game {}",
            identity.display_name, identity.user_id, room
        );
        Ok(())
    }

    async fn handle_chat(
        &self,
        identity: &Identity,
        request: ChatRequest,
    ) -> Result<(), RelayError> {
        require_room(&request.game_id)?;
        let length = request.message.chars().count();
        if length > self.limits.max_chat_length {
            return Err(RelayError::Malformed(format!(
                "chat message of {} characters exceeds {}",
                length, self.limits.max_chat_length
            )));
        }

        let now = Utc::now();
        let message = ChatMessage {
            id: event_id(now),
            user_id: identity.user_id.clone(),
            username: identity.display_name.clone(),
            message: request.message,
            kind: request
                .kind
                .unwrap_or_else(|| DEFAULT_CHAT_KIND.to_string()),
            timestamp: now,
        };
        self.registry.push_chat(&request.game_id, &message).await?;

        let delivered = self.sessions.broadcast(
            &request.game_id,
            &ServerEvent::ChatMessage(message),
            None,
        );
        debug!(
            "Chat from {} in {} delivered to {} connection(s)",
            identity.user_id, request.game_id, delivered
        );
        Ok(())
    }

    async fn handle_roll(
        &self,
        identity: &Identity,
        request: RollRequest,
    ) -> Result<(), RelayError> {
        require_room(&request.game_id)?;
        let outcome = self
            .dice
            .roll(&request.dice_type, request.modifier.unwrap_or(0))?;

        let now = Utc::now();
        let roll = DiceRoll {
            id: event_id(now),
            user_id: identity.user_id.clone(),
            username: identity.display_name.clone(),
            dice_type: request.dice_type,
            roll: outcome.roll,
            modifier: outcome.modifier,
            total: outcome.total,
            timestamp: now,
        };
        self.registry.push_roll(&request.game_id, &roll).await?;

        info!(
            "🎲 {} rolled {} in {}: {} ({:+}) = {}",
            identity.display_name,
            roll.dice_type,
            request.game_id,
            roll.roll,
            roll.modifier,
            roll.total
        );
        self.sessions
            .broadcast(&request.game_id, &ServerEvent::DiceRoll(roll), None);
        Ok(())
    }

    async fn handle_character(
        &self,
        session: &ClientSession,
        identity: &Identity,
        request: CharacterUpdateRequest,
    ) -> Result<(), RelayError> {
        require_room(&request.game_id)?;
        let size = request.character_data.encoded_len();
        if size > self.limits.max_character_bytes {
            return Err(RelayError::Malformed(format!(
                "character payload of {} bytes exceeds {}",
                size, self.limits.max_character_bytes
            )));
        }

        self.registry
            .set_character(&request.game_id, &identity.user_id, &request.character_data)
            .await?;

        self.sessions.broadcast(
            &request.game_id,
            &ServerEvent::CharacterUpdated(CharacterUpdated {
                user_id: identity.user_id.clone(),
                character_data: request.character_data,
            }),
            Some(session.connection_id()),
        );
        debug!(
            "Character of {} updated in {}",
            identity.user_id, request.game_id
        );
        Ok(())
    }

    /// Tear down a session: leave every joined room and tell the remaining members.
    ///
    /// Store failures are logged per room and do not stop the other rooms from being
    /// processed; `playerLeft` is broadcast regardless. A room where another connection
    /// of the same user has since re-joined keeps that membership and gets no
    /// `playerLeft`. Returns the number of rooms left.
    pub async fn disconnect(&self, session: &mut ClientSession) -> usize {
        let identity = session.identity().cloned();
        let connection_id = session.connection_id();
        let rooms = session.close();

        let Some(identity) = identity else {
            return 0;
        };

        for room in &rooms {
            self.sessions.leave_room(room, connection_id);
            let released = self
                .registry
                .release_member(room, &identity.user_id, connection_id)
                .await;
            match released {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        "{} is still in game {} on another connection",
                        identity.user_id, room
                    );
                    continue;
                }
                Err(e) => warn!(
                    "Failed to remove {} from game {} on disconnect: {}",
                    identity.user_id, room, e
                ),
            }
            self.sessions.broadcast(
                room,
                &ServerEvent::PlayerLeft(Presence::from(&identity)),
                Some(connection_id),
            );
        }

        if !rooms.is_empty() {
            info!(
                "{} ({}) disconnected from {} game(s)",
                identity.display_name,
                identity.user_id,
                rooms.len()
            );
        }
        rooms.len()
    }
}

fn require_room(room: &str) -> Result<(), RelayError> {
    if room.is_empty() {
        Err(RelayError::Malformed("empty game id".to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DiceError, StoreError};
    use crate::messaging::CharacterData;
    use crate::store::MemoryStore;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    struct Harness {
        store: Arc<MemoryStore>,
        router: EventRouter,
        sessions: Arc<SessionManager>,
    }

    struct Peer {
        session: ClientSession,
        rx: mpsc::Receiver<Message>,
    }

    fn harness_with(limits: PayloadLimits, seed: u64) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let registry = RoomRegistry::new(store.clone(), 100, 50);
        let sessions = Arc::new(SessionManager::new());
        let router = EventRouter::new(
            registry,
            sessions.clone(),
            Arc::new(DiceEngine::seeded(seed)),
            limits,
        );
        Harness {
            store,
            router,
            sessions,
        }
    }

    fn harness() -> Harness {
        harness_with(PayloadLimits::default(), 42)
    }

    impl Harness {
        fn connect(&self, user_id: &str, username: &str) -> Peer {
            let identity = Identity {
                user_id: user_id.into(),
                display_name: username.into(),
            };
            let id = self.sessions.next_connection_id();
            let addr = "127.0.0.1:50000".parse().unwrap();
            let (tx, rx) = mpsc::channel(64);
            self.sessions.register(id, identity.clone(), addr, tx);
            let mut session = ClientSession::new(id, addr);
            session.authenticate(identity);
            Peer { session, rx }
        }

        async fn send(&self, peer: &mut Peer, frame: serde_json::Value) -> Result<(), RelayError> {
            self.router
                .route_client_message(&frame.to_string(), &mut peer.session)
                .await
        }
    }

    impl Peer {
        fn next_event(&mut self) -> Option<serde_json::Value> {
            match self.rx.try_recv().ok()? {
                Message::Text(text) => Some(serde_json::from_str(text.as_str()).unwrap()),
                other => panic!("unexpected frame {other:?}"),
            }
        }
    }

    fn join(room: &str) -> serde_json::Value {
        json!({ "event": "joinGame", "data": room })
    }

    #[tokio::test]
    async fn test_join_notifies_others_only() {
        let h = harness();
        let mut alice = h.connect("u1", "alice");
        let mut bob = h.connect("u2", "bob");

        h.send(&mut alice, join("g1")).await.unwrap();
        h.send(&mut bob, join("g1")).await.unwrap();

        let event = alice.next_event().unwrap();
        assert_eq!(event["event"], "playerJoined");
        assert_eq!(event["data"], json!({ "userId": "u2", "username": "bob" }));
        assert!(alice.next_event().is_none());
        assert!(bob.next_event().is_none());

        let members = h.router.registry().members("g1").await.unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members["u1"].connection_id, alice.session.connection_id());
    }

    #[tokio::test]
    async fn test_leave_removes_member() {
        let h = harness();
        let mut alice = h.connect("u1", "alice");
        let mut bob = h.connect("u2", "bob");
        h.send(&mut alice, join("g1")).await.unwrap();
        h.send(&mut bob, join("g1")).await.unwrap();
        alice.next_event();

        h.send(&mut alice, json!({ "event": "leaveGame", "data": "g1" }))
            .await
            .unwrap();

        let members = h.router.registry().members("g1").await.unwrap();
        assert!(!members.contains_key("u1"));
        assert_eq!(bob.next_event().unwrap()["event"], "playerLeft");
        assert!(alice.next_event().is_none());
        assert!(!alice.session.is_member("g1"));
    }

    #[tokio::test]
    async fn test_chat_echoes_to_sender() {
        let h = harness();
        let mut alice = h.connect("u1", "alice");
        let mut bob = h.connect("u2", "bob");
        h.send(&mut alice, join("g1")).await.unwrap();
        h.send(&mut bob, join("g1")).await.unwrap();
        alice.next_event();

        h.send(
            &mut alice,
            json!({ "event": "chatMessage", "data": { "gameId": "g1", "message": "hello" } }),
        )
        .await
        .unwrap();

        let mine = alice.next_event().unwrap();
        let theirs = bob.next_event().unwrap();
        assert_eq!(mine, theirs);
        assert_eq!(mine["event"], "chatMessage");
        assert_eq!(mine["data"]["type"], "text");
        assert_eq!(mine["data"]["userId"], "u1");
        assert_eq!(mine["data"]["message"], "hello");

        let log = h.router.registry().recent_chat("g1", 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].id, mine["data"]["id"]);
    }

    #[tokio::test]
    async fn test_seeded_roll_broadcast() {
        let h = harness_with(PayloadLimits::default(), 1234);
        let mut alice = h.connect("u1", "alice");
        let mut bob = h.connect("u2", "bob");
        h.send(&mut alice, join("g1")).await.unwrap();
        h.send(&mut bob, join("g1")).await.unwrap();
        alice.next_event();

        h.send(
            &mut alice,
            json!({ "event": "rollDice", "data": { "gameId": "g1", "diceType": "d20", "modifier": 3 } }),
        )
        .await
        .unwrap();

        let expected = DiceEngine::seeded(1234).roll("d20", 3).unwrap();
        let mine = alice.next_event().unwrap();
        assert_eq!(mine, bob.next_event().unwrap());
        assert_eq!(mine["event"], "diceRoll");
        assert_eq!(mine["data"]["userId"], "u1");
        assert_eq!(mine["data"]["username"], "alice");
        assert_eq!(mine["data"]["diceType"], "d20");
        assert_eq!(mine["data"]["roll"], expected.roll);
        assert_eq!(mine["data"]["modifier"], 3);
        assert_eq!(mine["data"]["total"], expected.total);
    }

    #[tokio::test]
    async fn test_invalid_dice_dropped() {
        let h = harness();
        let mut alice = h.connect("u1", "alice");
        h.send(&mut alice, join("g1")).await.unwrap();

        for notation in ["dx", "d0", ""] {
            let result = h
                .send(
                    &mut alice,
                    json!({ "event": "rollDice", "data": { "gameId": "g1", "diceType": notation } }),
                )
                .await;
            assert!(matches!(
                result,
                Err(RelayError::Dice(DiceError::InvalidDiceSpec(_)))
            ));
        }
        assert!(alice.next_event().is_none());
        assert!(h.router.registry().recent_rolls("g1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_character_update_excludes_sender() {
        let h = harness();
        let mut alice = h.connect("u1", "alice");
        let mut bob = h.connect("u2", "bob");
        h.send(&mut alice, join("g1")).await.unwrap();
        h.send(&mut bob, join("g1")).await.unwrap();
        alice.next_event();

        let sheet = json!({ "name": "Tordek", "hp": 12 });
        h.send(
            &mut alice,
            json!({ "event": "updateCharacter", "data": { "gameId": "g1", "characterData": sheet } }),
        )
        .await
        .unwrap();

        assert!(alice.next_event().is_none());
        let event = bob.next_event().unwrap();
        assert_eq!(event["event"], "characterUpdated");
        assert_eq!(event["data"], json!({ "userId": "u1", "characterData": sheet }));
        assert_eq!(
            h.router.registry().characters("g1").await.unwrap()["u1"],
            CharacterData(sheet)
        );
    }

    #[tokio::test]
    async fn test_payload_limits() {
        let h = harness_with(
            PayloadLimits {
                max_chat_length: 5,
                max_character_bytes: 16,
            },
            1,
        );
        let mut alice = h.connect("u1", "alice");
        h.send(&mut alice, join("g1")).await.unwrap();

        // Limit counts characters, not bytes
        h.send(
            &mut alice,
            json!({ "event": "chatMessage", "data": { "gameId": "g1", "message": "héllo" } }),
        )
        .await
        .unwrap();
        alice.next_event().unwrap();

        let long = h
            .send(
                &mut alice,
                json!({ "event": "chatMessage", "data": { "gameId": "g1", "message": "hello!" } }),
            )
            .await;
        assert!(matches!(long, Err(RelayError::Malformed(_))));

        let big = h
            .send(
                &mut alice,
                json!({ "event": "updateCharacter", "data": { "gameId": "g1", "characterData": { "notes": "a long backstory" } } }),
            )
            .await;
        assert!(matches!(big, Err(RelayError::Malformed(_))));
        assert!(alice.next_event().is_none());
    }

    #[tokio::test]
    async fn test_malformed_and_empty_room_ignored() {
        let h = harness();
        let mut alice = h.connect("u1", "alice");

        let garbage = h
            .router
            .route_client_message("{not json", &mut alice.session)
            .await;
        assert!(matches!(garbage, Err(RelayError::Malformed(_))));

        let empty = h.send(&mut alice, join("")).await;
        assert!(matches!(empty, Err(RelayError::Malformed(_))));
        assert_eq!(alice.session.rooms().count(), 0);
    }

    #[tokio::test]
    async fn test_unauthenticated_session_is_ignored() {
        let h = harness();
        let mut session = ClientSession::new(99, "127.0.0.1:1".parse().unwrap());
        let result = h
            .router
            .route_client_message(&join("g1").to_string(), &mut session)
            .await;
        assert!(matches!(result, Err(RelayError::NotAuthenticated)));
        assert!(h.router.registry().members("g1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_outage_drops_event() {
        let h = harness();
        let mut alice = h.connect("u1", "alice");
        let mut bob = h.connect("u2", "bob");
        h.send(&mut alice, join("g1")).await.unwrap();
        h.send(&mut bob, join("g1")).await.unwrap();
        alice.next_event();

        h.store.set_available(false);
        let result = h
            .send(
                &mut alice,
                json!({ "event": "chatMessage", "data": { "gameId": "g1", "message": "lost" } }),
            )
            .await;
        assert!(matches!(
            result,
            Err(RelayError::Store(StoreError::Unavailable(_)))
        ));
        assert!(alice.next_event().is_none());
        assert!(bob.next_event().is_none());

        h.store.set_available(true);
        h.send(
            &mut alice,
            json!({ "event": "chatMessage", "data": { "gameId": "g1", "message": "back" } }),
        )
        .await
        .unwrap();
        assert_eq!(bob.next_event().unwrap()["data"]["message"], "back");
    }

    #[tokio::test]
    async fn test_disconnect_leaves_every_room() {
        let h = harness();
        let mut alice = h.connect("u1", "alice");
        let mut bob = h.connect("u2", "bob");
        for room in ["g1", "g2", "g3"] {
            h.send(&mut alice, join(room)).await.unwrap();
            h.send(&mut bob, join(room)).await.unwrap();
        }
        while alice.next_event().is_some() {}

        assert_eq!(h.router.disconnect(&mut alice.session).await, 3);

        let mut left = 0;
        while let Some(event) = bob.next_event() {
            assert_eq!(event["event"], "playerLeft");
            assert_eq!(event["data"]["userId"], "u1");
            left += 1;
        }
        assert_eq!(left, 3);
        for room in ["g1", "g2", "g3"] {
            let members = h.router.registry().members(room).await.unwrap();
            assert!(!members.contains_key("u1"));
            assert!(members.contains_key("u2"));
        }
        assert!(alice.next_event().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_during_outage_still_notifies() {
        let h = harness();
        let mut alice = h.connect("u1", "alice");
        let mut bob = h.connect("u2", "bob");
        h.send(&mut alice, join("g1")).await.unwrap();
        h.send(&mut bob, join("g1")).await.unwrap();
        h.send(&mut alice, join("g2")).await.unwrap();
        h.send(&mut bob, join("g2")).await.unwrap();

        h.store.set_available(false);
        assert_eq!(h.router.disconnect(&mut alice.session).await, 2);

        let mut left = 0;
        while let Some(event) = bob.next_event() {
            if event["event"] == "playerLeft" {
                left += 1;
            }
        }
        assert_eq!(left, 2);
    }

    #[tokio::test]
    async fn test_stale_connection_keeps_rejoined_membership() {
        let h = harness();
        let mut old_tab = h.connect("u1", "alice");
        let mut new_tab = h.connect("u1", "alice");
        let mut bob = h.connect("u2", "bob");
        h.send(&mut bob, join("g1")).await.unwrap();
        h.send(&mut old_tab, join("g1")).await.unwrap();
        h.send(&mut new_tab, join("g1")).await.unwrap();
        while bob.next_event().is_some() {}
        while old_tab.next_event().is_some() {}

        assert_eq!(h.router.disconnect(&mut old_tab.session).await, 1);

        let members = h.router.registry().members("g1").await.unwrap();
        assert_eq!(members["u1"].connection_id, new_tab.session.connection_id());
        assert!(bob.next_event().is_none());
        assert!(new_tab.next_event().is_none());
        assert_eq!(
            h.sessions.room_connections("g1").len(),
            2,
            "only the closed connection leaves the local fan-out"
        );
    }
}
