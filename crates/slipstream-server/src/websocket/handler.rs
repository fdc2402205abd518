//! Per-connection protocol state machine.
//!
//! Translates inbound [`ClientMessage`]s into registry operations. The
//! connection progresses `CONNECTED` → `IN_ROOM` → back, encoded as
//! `room: Option<String>`. Malformed messages and out-of-sequence protocol
//! use are logged and ignored — nothing a single client sends can close its
//! own connection or disturb another room.

use std::sync::Arc;

use metrics::counter;
use serde_json::Value;
use slipstream_core::{ClientMessage, DEFAULT_ROOM, default_state};
use tracing::{debug, info, warn};

use crate::metrics::WS_MALFORMED_MESSAGES_TOTAL;
use crate::registry::RoomRegistry;
use crate::websocket::connection::ConnectionHandle;

/// Protocol state machine for one connection.
pub struct SessionHandler {
    handle: Arc<ConnectionHandle>,
    registry: Arc<RoomRegistry>,
    /// `Some(room)` while the player is a member of a room.
    room: Option<String>,
}

impl SessionHandler {
    /// Create a handler for a freshly connected client.
    pub fn new(handle: Arc<ConnectionHandle>, registry: Arc<RoomRegistry>) -> Self {
        Self {
            handle,
            registry,
            room: None,
        }
    }

    /// The room this connection is currently a member of, if any.
    pub fn current_room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Parse and dispatch one inbound frame.
    pub async fn handle_message(&mut self, text: &str) {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                counter!(WS_MALFORMED_MESSAGES_TOTAL).increment(1);
                warn!(player_id = %self.handle.id, error = %e, "discarding malformed message");
                return;
            }
        };

        match message {
            ClientMessage::Join { room_name } => self.handle_join(room_name).await,
            ClientMessage::Update { state } => self.handle_update(state).await,
            ClientMessage::Leave => self.handle_leave().await,
            ClientMessage::Unknown => {
                debug!(player_id = %self.handle.id, "ignoring message with unknown type");
            }
        }
    }

    /// Disconnect cleanup — identical effect to an explicit `leave`.
    ///
    /// Idempotent; the gateway calls this exactly once per connection
    /// lifecycle regardless of how the socket died.
    pub async fn handle_disconnect(&mut self) {
        if let Some(room) = self.room.take() {
            let _ = self.registry.leave(&room, &self.handle.id).await;
            info!(player_id = %self.handle.id, room, "player removed on disconnect");
        }
    }

    async fn handle_join(&mut self, room_name: Option<String>) {
        // Joining while already in a room is an implicit leave first.
        if let Some(old) = self.room.take() {
            let _ = self.registry.leave(&old, &self.handle.id).await;
            debug!(player_id = %self.handle.id, room = old, "implicit leave before join");
        }

        let room = room_name.unwrap_or_else(|| DEFAULT_ROOM.to_owned());
        let others = self
            .registry
            .join(&room, self.handle.clone(), default_state())
            .await;
        info!(player_id = %self.handle.id, room, others, "player joined room");
        self.room = Some(room);
    }

    async fn handle_update(&mut self, state: Value) {
        let Some(room) = self.room.as_deref() else {
            debug!(player_id = %self.handle.id, "update before join ignored");
            return;
        };
        if !self.registry.update(room, &self.handle.id, state).await {
            debug!(player_id = %self.handle.id, room, "update for unregistered participant ignored");
        }
    }

    async fn handle_leave(&mut self) {
        let Some(room) = self.room.take() else {
            debug!(player_id = %self.handle.id, "leave before join ignored");
            return;
        };
        let _ = self.registry.leave(&room, &self.handle.id).await;
        info!(player_id = %self.handle.id, room, "player left room");
    }
}
