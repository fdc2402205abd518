//! JSON wire protocol exchanged with clients.
//!
//! Every message is a JSON object with a `type` field plus type-specific
//! fields. Inbound messages ([`ClientMessage`]) drive the session state
//! machine; outbound events ([`ServerEvent`]) are either direct replies or
//! room broadcasts. The participant `state` payload is deliberately opaque —
//! it is stored and relayed as an untyped [`Value`] so richer client payloads
//! never require a server change.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ids::PlayerId;

/// Room joined when a `join` message carries no `roomName`.
pub const DEFAULT_ROOM: &str = "default";

/// Initial transform every participant spawns with: origin at 150 altitude,
/// level attitude, zero speed. Deterministic so a fresh participant is
/// immediately visible to others with a known pose.
#[must_use]
pub fn default_state() -> Value {
    json!({
        "pos": { "x": 0, "y": 150, "z": 0 },
        "heading": 0,
        "pitch": 0,
        "roll": 0,
        "speed": 0,
    })
}

/// Inbound message from a client.
///
/// Unrecognized `type` values deserialize to [`ClientMessage::Unknown`] so a
/// newer client talking to an older server is a no-op rather than an error.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Join (or switch to) a named room.
    Join {
        /// Target room; falls back to [`DEFAULT_ROOM`] when absent.
        #[serde(default)]
        room_name: Option<String>,
    },
    /// Report this player's latest transform state.
    Update {
        /// Opaque state payload, passed through uninterpreted.
        #[serde(default)]
        state: Value,
    },
    /// Leave the current room.
    Leave,
    /// Any message with an unrecognized `type` — discarded silently.
    #[serde(other)]
    Unknown,
}

/// Outbound event sent to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Sent once, immediately after the connection is established.
    Welcome {
        /// The id assigned to this connection.
        player_id: PlayerId,
    },
    /// Reply to a `join`, sent only to the joiner: everyone already present.
    RoomState {
        /// Other participants' latest states, keyed by player id.
        players: HashMap<PlayerId, Value>,
    },
    /// Broadcast when a player joins, excluding the joiner.
    PlayerJoined {
        /// The joining player.
        player_id: PlayerId,
        /// The joiner's initial state.
        state: Value,
    },
    /// Broadcast when a player reports new state, excluding the sender.
    PlayerUpdate {
        /// The reporting player.
        player_id: PlayerId,
        /// The new state payload.
        state: Value,
    },
    /// Broadcast when a player leaves or disconnects.
    PlayerLeft {
        /// The departing player.
        player_id: PlayerId,
    },
}

impl ServerEvent {
    /// Wire name of this event's `type` field, for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::RoomState { .. } => "room-state",
            Self::PlayerJoined { .. } => "player-joined",
            Self::PlayerUpdate { .. } => "player-update",
            Self::PlayerLeft { .. } => "player-left",
        }
    }
}
