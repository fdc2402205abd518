//! Ping/pong liveness policy.
//!
//! The gateway writer task sends the Ping frames; this loop only watches the
//! alive flag the read loop sets on each Pong. A client that misses
//! `timeout / interval` consecutive checks is declared dead.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::connection::ConnectionHandle;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The client stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally (normal disconnect).
    Cancelled,
}

/// Watch a connection's liveness until it times out or is cancelled.
///
/// At each `interval` tick the alive flag is checked and reset. Consecutive
/// misses accumulate; `max(timeout / interval, 1)` misses in a row return
/// [`HeartbeatOutcome::TimedOut`]. Any pong in between resets the count.
pub async fn run_heartbeat(
    connection: Arc<ConnectionHandle>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatOutcome {
    let mut check = time::interval(interval);
    let interval_secs = interval.as_secs().max(1);
    let max_missed = (timeout.as_secs() / interval_secs).max(1);
    let mut missed: u64 = 0;

    loop {
        tokio::select! {
            _ = check.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatOutcome::TimedOut;
                    }
                }
                // Stay not-alive until the next pong arrives
                connection.is_alive.store(false, Ordering::Relaxed);
            }
            () = cancel.cancelled() => {
                return HeartbeatOutcome::Cancelled;
            }
        }
    }
}
