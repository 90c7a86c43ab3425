//! Client event decoding, dispatch and broadcast.
//!
//! [`types`] defines the wire format; [`router`] turns each inbound event into room
//! state changes and outbound broadcasts.

pub mod router;
pub mod types;

pub use router::{EventRouter, PayloadLimits};
pub use types::{
    CharacterData, CharacterUpdateRequest, CharacterUpdated, ChatMessage, ChatRequest,
    ClientEvent, DiceRoll, Presence, RollRequest, ServerEvent,
};
