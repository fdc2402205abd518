//! Per-connection send capability.
//!
//! A [`ConnectionHandle`] is the only thing the registry ever holds for a
//! participant's connection: a bounded queue into the connection's writer
//! task plus liveness and drop accounting. The socket itself stays with the
//! gateway.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use slipstream_core::{PlayerId, ServerEvent};
use tokio::sync::mpsc;

/// Send capability and liveness state for one connected client.
pub struct ConnectionHandle {
    /// The player id assigned to this connection.
    pub id: PlayerId,
    /// Queue into the connection's WebSocket writer task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has responded since the last liveness check.
    pub is_alive: AtomicBool,
    /// When the last pong (or ping) was received.
    last_pong: Mutex<Instant>,
    /// Count of messages dropped because the queue was full or closed.
    pub dropped_messages: AtomicU64,
}

impl ConnectionHandle {
    /// Create a handle over the given writer-task queue.
    pub fn new(id: PlayerId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Enqueue an already-serialized message.
    ///
    /// Returns `false` if the queue is full or closed, and increments the
    /// dropped-message counter. Never blocks.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize an event and enqueue it.
    pub fn send_event(&self, event: &ServerEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
