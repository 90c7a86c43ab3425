//! Room state access.
//!
//! The [`RoomRegistry`] maps a room id to its members, recent chat, recent rolls and
//! per-player character snapshots, all stored as JSON documents in a [`RoomStore`].
//! Rooms are created by their first write and are never deleted here; expiring them is
//! the store operator's business.

use crate::connection::ConnectionId;
use crate::error::StoreError;
use crate::messaging::{CharacterData, ChatMessage, DiceRoll};
use crate::store::RoomStore;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One entry of a room's member hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    pub connection_id: ConnectionId,
    pub username: String,
    pub joined_at: DateTime<Utc>,
}

fn members_key(room: &str) -> String {
    format!("game_{room}_players")
}

fn chat_key(room: &str) -> String {
    format!("game_{room}_chat")
}

fn rolls_key(room: &str) -> String {
    format!("game_{room}_rolls")
}

fn characters_key(room: &str) -> String {
    format!("game_{room}_characters")
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Malformed {
        key: key.to_string(),
        source,
    })
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|source| StoreError::Malformed {
        key: key.to_string(),
        source,
    })
}

/// Typed access to room state in the shared store.
#[derive(Debug, Clone)]
pub struct RoomRegistry {
    store: Arc<dyn RoomStore>,
    chat_capacity: usize,
    roll_capacity: usize,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn RoomStore>, chat_capacity: usize, roll_capacity: usize) -> Self {
        Self {
            store,
            chat_capacity,
            roll_capacity,
        }
    }

    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    /// Records `user_id` as a member of `room`; a second join overwrites the first.
    pub async fn add_member(
        &self,
        room: &str,
        user_id: &str,
        record: &MemberRecord,
    ) -> Result<(), StoreError> {
        let key = members_key(room);
        let value = encode(&key, record)?;
        self.store.hash_set(&key, user_id, value).await
    }

    pub async fn remove_member(&self, room: &str, user_id: &str) -> Result<(), StoreError> {
        self.store.hash_delete(&members_key(room), user_id).await
    }

    /// Removes `user_id` from `room` unless a different connection holds the entry.
    ///
    /// Returns `false` when another connection of the same user re-joined and owns the
    /// membership; the entry is left alone then. The read and the delete are separate
    /// commands.
    pub async fn release_member(
        &self,
        room: &str,
        user_id: &str,
        connection_id: ConnectionId,
    ) -> Result<bool, StoreError> {
        let owner = self.members(room).await?.remove(user_id);
        match owner {
            Some(record) if record.connection_id != connection_id => Ok(false),
            _ => {
                self.remove_member(room, user_id).await?;
                Ok(true)
            }
        }
    }

    /// Current members of `room`, keyed by user id.
    pub async fn members(&self, room: &str) -> Result<HashMap<String, MemberRecord>, StoreError> {
        let key = members_key(room);
        self.store
            .hash_get_all(&key)
            .await?
            .into_iter()
            .map(|(user_id, raw)| Ok((user_id, decode(&key, &raw)?)))
            .collect()
    }

    /// Prepends `message` to the room's chat log, evicting the oldest past capacity.
    pub async fn push_chat(&self, room: &str, message: &ChatMessage) -> Result<(), StoreError> {
        let key = chat_key(room);
        let value = encode(&key, message)?;
        self.store
            .list_push_capped(&key, value, self.chat_capacity)
            .await
    }

    /// Most recent chat messages first.
    pub async fn recent_chat(
        &self,
        room: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.read_list(&chat_key(room), limit).await
    }

    /// Prepends `roll` to the room's roll log, evicting the oldest past capacity.
    pub async fn push_roll(&self, room: &str, roll: &DiceRoll) -> Result<(), StoreError> {
        let key = rolls_key(room);
        let value = encode(&key, roll)?;
        self.store
            .list_push_capped(&key, value, self.roll_capacity)
            .await
    }

    /// Most recent rolls first.
    pub async fn recent_rolls(
        &self,
        room: &str,
        limit: usize,
    ) -> Result<Vec<DiceRoll>, StoreError> {
        self.read_list(&rolls_key(room), limit).await
    }

    pub async fn set_character(
        &self,
        room: &str,
        user_id: &str,
        data: &CharacterData,
    ) -> Result<(), StoreError> {
        let key = characters_key(room);
        let value = encode(&key, data)?;
        self.store.hash_set(&key, user_id, value).await
    }

    /// Last character payload published by each player in `room`.
    pub async fn characters(
        &self,
        room: &str,
    ) -> Result<HashMap<String, CharacterData>, StoreError> {
        let key = characters_key(room);
        self.store
            .hash_get_all(&key)
            .await?
            .into_iter()
            .map(|(user_id, raw)| Ok((user_id, decode(&key, &raw)?)))
            .collect()
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    async fn read_list<T: DeserializeOwned>(
        &self,
        key: &str,
        limit: usize,
    ) -> Result<Vec<T>, StoreError> {
        self.store
            .list_range(key, limit)
            .await?
            .iter()
            .map(|raw| decode(key, raw))
            .collect()
    }
}
