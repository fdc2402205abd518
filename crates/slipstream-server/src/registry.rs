//! Room registry — the authoritative mapping from room name to participants.
//!
//! Rooms are created lazily by the first join and deleted in the same
//! critical section that removes their last participant, so an empty room is
//! never externally observable. Every compound operation (join / update /
//! leave) mutates, snapshots, and fans out inside one write-lock critical
//! section; fan-out enqueues are `try_send` and never suspend, so the lock is
//! never held across an await point.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::gauge;
use serde_json::Value;
use slipstream_core::{PlayerId, ServerEvent};
use tokio::sync::RwLock;
use tracing::debug;

use crate::broadcast::{self, FanOutReport};
use crate::metrics::{PLAYERS_ACTIVE, ROOMS_ACTIVE};
use crate::websocket::connection::ConnectionHandle;

/// One connected player's membership record within a room.
pub struct Participant {
    /// Last state reported by this participant.
    pub(crate) state: Value,
    /// Send capability for this participant's connection (gateway-owned).
    pub(crate) handle: Arc<ConnectionHandle>,
}

impl Participant {
    pub(crate) fn new(state: Value, handle: Arc<ConnectionHandle>) -> Self {
        Self { state, handle }
    }

    /// Last state reported by this participant.
    pub fn state(&self) -> &Value {
        &self.state
    }
}

/// A named broadcast domain.
#[derive(Default)]
pub(crate) struct Room {
    pub(crate) participants: HashMap<PlayerId, Participant>,
}

/// Process-wide room → participants map.
///
/// Shared via `Arc` across every connection task. Atomic counters shadow the
/// map sizes so count queries never take the lock.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
    room_count: AtomicUsize,
    player_count: AtomicUsize,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            room_count: AtomicUsize::new(0),
            player_count: AtomicUsize::new(0),
        }
    }

    /// Number of rooms currently present.
    pub fn room_count(&self) -> usize {
        self.room_count.load(Ordering::Relaxed)
    }

    /// Number of participants across all rooms.
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    /// Whether a room currently exists.
    pub async fn contains_room(&self, room: &str) -> bool {
        self.rooms.read().await.contains_key(room)
    }

    /// Insert (or overwrite) a participant entry.
    ///
    /// Creates the room if absent. Overwriting an existing id is accepted but
    /// should not occur under correct protocol use.
    pub async fn add_participant(
        &self,
        room: &str,
        handle: Arc<ConnectionHandle>,
        initial_state: Value,
    ) {
        let mut rooms = self.rooms.write().await;
        let _ = self.insert_locked(&mut rooms, room, handle, initial_state);
    }

    /// Overwrite a participant's stored state.
    ///
    /// Returns `false` when the id is not currently a member of that room —
    /// a protocol violation for the caller to ignore, not a fatal error.
    pub async fn update_state(&self, room: &str, id: &PlayerId, new_state: Value) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(entry) = rooms.get_mut(room) else {
            return false;
        };
        let Some(participant) = entry.participants.get_mut(id) else {
            return false;
        };
        participant.state = new_state;
        true
    }

    /// Remove a participant entry; returns whether it existed.
    ///
    /// When the room becomes empty it is deleted in the same critical
    /// section, so no empty room is ever observable.
    pub async fn remove_participant(&self, room: &str, id: &PlayerId) -> bool {
        let mut rooms = self.rooms.write().await;
        self.remove_locked(&mut rooms, room, id)
    }

    /// Point-in-time copy of all participants' states except `exclude`.
    pub async fn snapshot(
        &self,
        room: &str,
        exclude: Option<&PlayerId>,
    ) -> HashMap<PlayerId, Value> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room)
            .map(|entry| snapshot_locked(&entry.participants, exclude))
            .unwrap_or_default()
    }

    /// Fan an event out to every participant of `room` except `exclude`.
    ///
    /// Unknown rooms are a no-op.
    pub async fn broadcast(
        &self,
        room: &str,
        event: &ServerEvent,
        exclude: Option<&PlayerId>,
    ) -> FanOutReport {
        let rooms = self.rooms.read().await;
        rooms
            .get(room)
            .map(|entry| broadcast::fan_out(&entry.participants, event, exclude))
            .unwrap_or_default()
    }

    /// Join `handle`'s player to a room: insert the participant, brief the
    /// joiner with a `room-state` snapshot of everyone else, and announce
    /// `player-joined` to the rest — all in one critical section.
    ///
    /// Returns the number of other participants in the snapshot.
    pub async fn join(&self, room: &str, handle: Arc<ConnectionHandle>, initial_state: Value) -> usize {
        let id = handle.id.clone();
        let mut rooms = self.rooms.write().await;
        let entry = self.insert_locked(&mut rooms, room, handle.clone(), initial_state.clone());

        let players = snapshot_locked(&entry.participants, Some(&id));
        let others = players.len();
        let _ = handle.send_event(&ServerEvent::RoomState { players });

        let announce = ServerEvent::PlayerJoined {
            player_id: id.clone(),
            state: initial_state,
        };
        let report = broadcast::fan_out(&entry.participants, &announce, Some(&id));
        debug!(player_id = %id, room, others, delivered = report.delivered, "join fan-out");
        others
    }

    /// Overwrite a participant's state and announce `player-update` to the
    /// rest of the room, excluding the sender, in one critical section.
    ///
    /// Returns `false` (and changes nothing) when the id is not a member.
    pub async fn update(&self, room: &str, id: &PlayerId, new_state: Value) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(entry) = rooms.get_mut(room) else {
            return false;
        };
        let Some(participant) = entry.participants.get_mut(id) else {
            return false;
        };
        participant.state = new_state.clone();

        let announce = ServerEvent::PlayerUpdate {
            player_id: id.clone(),
            state: new_state,
        };
        let _ = broadcast::fan_out(&entry.participants, &announce, Some(id));
        true
    }

    /// Remove a participant and announce `player-left` to the remaining
    /// members, deleting the room if it emptied — one critical section.
    ///
    /// Returns `false` when the participant was not a member (idempotent).
    pub async fn leave(&self, room: &str, id: &PlayerId) -> bool {
        let mut rooms = self.rooms.write().await;
        if !self.remove_locked(&mut rooms, room, id) {
            return false;
        }
        if let Some(entry) = rooms.get(room) {
            let announce = ServerEvent::PlayerLeft {
                player_id: id.clone(),
            };
            let _ = broadcast::fan_out(&entry.participants, &announce, None);
        }
        true
    }

    /// Insert under an already-held write lock, creating the room if absent.
    fn insert_locked<'a>(
        &self,
        rooms: &'a mut HashMap<String, Room>,
        room: &str,
        handle: Arc<ConnectionHandle>,
        initial_state: Value,
    ) -> &'a mut Room {
        if !rooms.contains_key(room) {
            let _ = self.room_count.fetch_add(1, Ordering::Relaxed);
            gauge!(ROOMS_ACTIVE).increment(1.0);
        }
        let entry = rooms.entry(room.to_owned()).or_default();
        let id = handle.id.clone();
        if entry
            .participants
            .insert(id, Participant::new(initial_state, handle))
            .is_none()
        {
            let _ = self.player_count.fetch_add(1, Ordering::Relaxed);
            gauge!(PLAYERS_ACTIVE).increment(1.0);
        }
        entry
    }

    /// Remove under an already-held write lock, deleting the room if emptied.
    fn remove_locked(
        &self,
        rooms: &mut HashMap<String, Room>,
        room: &str,
        id: &PlayerId,
    ) -> bool {
        let Some(entry) = rooms.get_mut(room) else {
            return false;
        };
        if entry.participants.remove(id).is_none() {
            return false;
        }
        let _ = self.player_count.fetch_sub(1, Ordering::Relaxed);
        gauge!(PLAYERS_ACTIVE).decrement(1.0);
        if entry.participants.is_empty() {
            let _ = rooms.remove(room);
            let _ = self.room_count.fetch_sub(1, Ordering::Relaxed);
            gauge!(ROOMS_ACTIVE).decrement(1.0);
        }
        true
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("rooms", &self.room_count())
            .field("players", &self.player_count())
            .finish()
    }
}

/// Snapshot helper shared by the read and compound paths.
fn snapshot_locked(
    participants: &HashMap<PlayerId, Participant>,
    exclude: Option<&PlayerId>,
) -> HashMap<PlayerId, Value> {
    participants
        .iter()
        .filter(|(id, _)| exclude != Some(*id))
        .map(|(id, p)| (id.clone(), p.state.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use slipstream_core::default_state;
    use tokio::sync::mpsc;

    fn make_handle(id: &str) -> (Arc<ConnectionHandle>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        (
            Arc::new(ConnectionHandle::new(PlayerId::from(id), tx)),
            rx,
        )
    }

    fn recv_event(rx: &mut mpsc::Receiver<Arc<String>>) -> ServerEvent {
        let msg = rx.try_recv().expect("expected a queued event");
        serde_json::from_str(&msg).expect("queued event must be valid wire JSON")
    }

    #[tokio::test]
    async fn add_creates_room_lazily() {
        let registry = RoomRegistry::new();
        assert_eq!(registry.room_count(), 0);

        let (handle, _rx) = make_handle("a");
        registry.add_participant("arena", handle, default_state()).await;
        assert!(registry.contains_room("arena").await);
        assert_eq!(registry.room_count(), 1);
        assert_eq!(registry.player_count(), 1);
    }

    #[tokio::test]
    async fn remove_last_participant_deletes_room() {
        let registry = RoomRegistry::new();
        let (handle, _rx) = make_handle("a");
        registry.add_participant("arena", handle, default_state()).await;

        assert!(registry.remove_participant("arena", &PlayerId::from("a")).await);
        assert!(!registry.contains_room("arena").await);
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.player_count(), 0);
    }

    #[tokio::test]
    async fn remove_keeps_room_with_remaining_members() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = make_handle("a");
        let (b, _rx_b) = make_handle("b");
        registry.add_participant("arena", a, default_state()).await;
        registry.add_participant("arena", b, default_state()).await;

        assert!(registry.remove_participant("arena", &PlayerId::from("a")).await);
        assert!(registry.contains_room("arena").await);
        assert_eq!(registry.player_count(), 1);
    }

    #[tokio::test]
    async fn remove_of_unknown_participant_is_idempotent() {
        let registry = RoomRegistry::new();
        assert!(!registry.remove_participant("arena", &PlayerId::from("ghost")).await);

        let (a, _rx) = make_handle("a");
        registry.add_participant("arena", a, default_state()).await;
        assert!(!registry.remove_participant("arena", &PlayerId::from("ghost")).await);
        assert_eq!(registry.player_count(), 1);
    }

    #[tokio::test]
    async fn update_state_unknown_member_returns_false() {
        let registry = RoomRegistry::new();
        assert!(
            !registry
                .update_state("arena", &PlayerId::from("a"), json!({"speed": 1}))
                .await
        );
    }

    #[tokio::test]
    async fn update_state_overwrites() {
        let registry = RoomRegistry::new();
        let (a, _rx) = make_handle("a");
        registry.add_participant("arena", a, default_state()).await;

        assert!(
            registry
                .update_state("arena", &PlayerId::from("a"), json!({"speed": 250}))
                .await
        );
        let snap = registry.snapshot("arena", None).await;
        assert_eq!(snap[&PlayerId::from("a")], json!({"speed": 250}));
    }

    #[tokio::test]
    async fn snapshot_excludes_given_id() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = make_handle("a");
        let (b, _rx_b) = make_handle("b");
        registry.add_participant("arena", a, json!({"n": 1})).await;
        registry.add_participant("arena", b, json!({"n": 2})).await;

        let snap = registry.snapshot("arena", Some(&PlayerId::from("a"))).await;
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[&PlayerId::from("b")], json!({"n": 2}));
    }

    #[tokio::test]
    async fn snapshot_of_unknown_room_is_empty() {
        let registry = RoomRegistry::new();
        assert!(registry.snapshot("nowhere", None).await.is_empty());
    }

    #[tokio::test]
    async fn join_briefs_joiner_and_announces_to_room() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = make_handle("a");
        let (b, mut rx_b) = make_handle("b");

        let others = registry.join("arena", a, default_state()).await;
        assert_eq!(others, 0);
        match recv_event(&mut rx_a) {
            ServerEvent::RoomState { players } => assert!(players.is_empty()),
            other => panic!("expected room-state, got {other:?}"),
        }

        let others = registry.join("arena", b, default_state()).await;
        assert_eq!(others, 1);
        // b is briefed with a's state
        match recv_event(&mut rx_b) {
            ServerEvent::RoomState { players } => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[&PlayerId::from("a")], default_state());
            }
            other => panic!("expected room-state, got {other:?}"),
        }
        // a is told about b, b gets no echo
        match recv_event(&mut rx_a) {
            ServerEvent::PlayerJoined { player_id, state } => {
                assert_eq!(player_id, PlayerId::from("b"));
                assert_eq!(state, default_state());
            }
            other => panic!("expected player-joined, got {other:?}"),
        }
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn update_announces_to_others_only() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = make_handle("a");
        let (b, mut rx_b) = make_handle("b");
        let _ = registry.join("arena", a, default_state()).await;
        let _ = registry.join("arena", b, default_state()).await;
        // drain join traffic
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        let s1 = json!({"pos": {"x": 10, "y": 180, "z": 4}, "speed": 200});
        assert!(registry.update("arena", &PlayerId::from("a"), s1.clone()).await);

        match recv_event(&mut rx_b) {
            ServerEvent::PlayerUpdate { player_id, state } => {
                assert_eq!(player_id, PlayerId::from("a"));
                assert_eq!(state, s1);
            }
            other => panic!("expected player-update, got {other:?}"),
        }
        // never echoed back to the sender
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn update_for_non_member_is_a_noop() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = make_handle("a");
        let _ = registry.join("arena", a, default_state()).await;
        while rx_a.try_recv().is_ok() {}

        assert!(
            !registry
                .update("arena", &PlayerId::from("stranger"), json!({"n": 1}))
                .await
        );
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_announces_to_remaining_members() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = make_handle("a");
        let (b, mut rx_b) = make_handle("b");
        let _ = registry.join("arena", a, default_state()).await;
        let _ = registry.join("arena", b, default_state()).await;
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        assert!(registry.leave("arena", &PlayerId::from("b")).await);
        match recv_event(&mut rx_a) {
            ServerEvent::PlayerLeft { player_id } => assert_eq!(player_id, PlayerId::from("b")),
            other => panic!("expected player-left, got {other:?}"),
        }
        assert_eq!(registry.player_count(), 1);
    }

    #[tokio::test]
    async fn leave_of_last_member_deletes_room() {
        let registry = RoomRegistry::new();
        let (a, _rx) = make_handle("a");
        let _ = registry.join("x", a, default_state()).await;

        assert!(registry.leave("x", &PlayerId::from("a")).await);
        assert!(!registry.contains_room("x").await);
        assert_eq!(registry.room_count(), 0);
    }

    #[tokio::test]
    async fn leave_twice_is_idempotent() {
        let registry = RoomRegistry::new();
        let (a, _rx) = make_handle("a");
        let _ = registry.join("x", a, default_state()).await;

        assert!(registry.leave("x", &PlayerId::from("a")).await);
        assert!(!registry.leave("x", &PlayerId::from("a")).await);
    }

    #[tokio::test]
    async fn rooms_are_independent_broadcast_domains() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = make_handle("a");
        let (b, mut rx_b) = make_handle("b");
        let _ = registry.join("alpha", a, default_state()).await;
        let _ = registry.join("bravo", b, default_state()).await;
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        assert!(registry.update("alpha", &PlayerId::from("a"), json!({"n": 1})).await);
        assert!(rx_b.try_recv().is_err());
        assert_eq!(registry.room_count(), 2);
    }

    #[tokio::test]
    async fn broadcast_to_unknown_room_is_a_noop() {
        let registry = RoomRegistry::new();
        let report = registry
            .broadcast(
                "nowhere",
                &ServerEvent::PlayerLeft {
                    player_id: PlayerId::from("x"),
                },
                None,
            )
            .await;
        assert_eq!(report, FanOutReport::default());
    }

    #[tokio::test]
    async fn broadcast_excludes_given_id() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = make_handle("a");
        let (b, mut rx_b) = make_handle("b");
        let _ = registry.join("arena", a, default_state()).await;
        let _ = registry.join("arena", b, default_state()).await;
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        let event = ServerEvent::PlayerUpdate {
            player_id: PlayerId::from("a"),
            state: json!({}),
        };
        let report = registry
            .broadcast("arena", &event, Some(&PlayerId::from("a")))
            .await;
        assert_eq!(report.delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn broadcast_failure_does_not_remove_participant() {
        let registry = RoomRegistry::new();
        let (a, rx_a) = make_handle("a");
        let (b, mut rx_b) = make_handle("b");
        let _ = registry.join("arena", a, default_state()).await;
        let _ = registry.join("arena", b, default_state()).await;
        while rx_b.try_recv().is_ok() {}
        // a's connection is gone but no disconnect has been processed yet
        drop(rx_a);

        let report = registry
            .broadcast(
                "arena",
                &ServerEvent::PlayerUpdate {
                    player_id: PlayerId::from("b"),
                    state: json!({}),
                },
                Some(&PlayerId::from("b")),
            )
            .await;
        assert_eq!(report.dropped, 1);
        // membership is untouched — only the disconnect path removes
        assert_eq!(registry.player_count(), 2);
        let snap = registry.snapshot("arena", None).await;
        assert!(snap.contains_key(&PlayerId::from("a")));
    }

    #[tokio::test]
    async fn duplicate_join_overwrites_without_double_counting() {
        let registry = RoomRegistry::new();
        let (a1, _rx1) = make_handle("a");
        let (a2, _rx2) = make_handle("a");
        registry.add_participant("arena", a1, json!({"n": 1})).await;
        registry.add_participant("arena", a2, json!({"n": 2})).await;

        assert_eq!(registry.player_count(), 1);
        let snap = registry.snapshot("arena", None).await;
        assert_eq!(snap[&PlayerId::from("a")], json!({"n": 2}));
    }

    #[tokio::test]
    async fn concurrent_joins_settle_to_exact_membership() {
        let registry = Arc::new(RoomRegistry::new());
        let mut tasks = Vec::new();
        let mut receivers = Vec::new();
        for i in 0..16 {
            let (handle, rx) = make_handle(&format!("p{i}"));
            receivers.push(rx);
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let _ = registry.join("arena", handle, default_state()).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(registry.player_count(), 16);
        assert_eq!(registry.room_count(), 1);
        // every joiner got a consistent snapshot: the union of snapshots plus
        // join announcements must cover all 16 without duplicates
        let snap = registry.snapshot("arena", None).await;
        assert_eq!(snap.len(), 16);
    }
}
