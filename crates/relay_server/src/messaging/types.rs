//! Message type definitions for client-server communication.
//!
//! Every frame is a JSON text message of the form `{"event": "<name>", "data": <payload>}`.
//! Inbound frames decode into [`ClientEvent`], outbound frames are built from
//! [`ServerEvent`].

use crate::auth::Identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;

/// An event sent from a client to the server.
///
/// # Example
///
/// ```json
/// {
///   "event": "rollDice",
///   "data": { "gameId": "g1", "diceType": "d20", "modifier": 3 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Join the room with the given id.
    JoinGame(String),
    /// Leave the room with the given id.
    LeaveGame(String),
    ChatMessage(ChatRequest),
    RollDice(RollRequest),
    UpdateCharacter(CharacterUpdateRequest),
}

impl ClientEvent {
    /// The wire name of this event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinGame(_) => "joinGame",
            Self::LeaveGame(_) => "leaveGame",
            Self::ChatMessage(_) => "chatMessage",
            Self::RollDice(_) => "rollDice",
            Self::UpdateCharacter(_) => "updateCharacter",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub game_id: String,
    pub message: String,
    /// Free-form message kind; `"text"` when absent.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollRequest {
    pub game_id: String,
    pub dice_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifier: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterUpdateRequest {
    pub game_id: String,
    pub character_data: CharacterData,
}

/// A character sheet as published by its owner.
///
/// The relay never looks inside; the payload is stored and forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterData(pub serde_json::Value);

impl CharacterData {
    /// Size of the payload once serialized, in bytes.
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(&self.0).map_or(0, |bytes| bytes.len())
    }
}

/// A chat line as stored in the room log and broadcast to the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
}

/// A dice roll as stored in the room log and broadcast to the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiceRoll {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub dice_type: String,
    pub roll: u32,
    pub modifier: i32,
    pub total: i64,
    pub timestamp: DateTime<Utc>,
}

/// Who joined or left a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub user_id: String,
    pub username: String,
}

impl From<&Identity> for Presence {
    fn from(identity: &Identity) -> Self {
        Self {
            user_id: identity.user_id.clone(),
            username: identity.display_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterUpdated {
    pub user_id: String,
    pub character_data: CharacterData,
}

/// An event sent from the server to the members of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    PlayerJoined(Presence),
    PlayerLeft(Presence),
    ChatMessage(ChatMessage),
    DiceRoll(DiceRoll),
    CharacterUpdated(CharacterUpdated),
}

impl ServerEvent {
    /// Encodes the event as a WebSocket text frame.
    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(Message::Text(json.into()))
    }
}

/// A fresh event id: the wall clock in milliseconds.
pub(crate) fn event_id(now: DateTime<Utc>) -> String {
    now.timestamp_millis().to_string()
}
