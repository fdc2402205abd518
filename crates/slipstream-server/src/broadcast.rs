//! Exclusion-aware broadcast fan-out.
//!
//! An event is serialized exactly once and the resulting `Arc<String>` is
//! enqueued onto every participant's send queue except the excluded one.
//! Enqueueing is `try_send` — it never suspends, so callers may fan out while
//! holding the registry lock. A full or closed queue drops that one delivery:
//! it never aborts the batch and never mutates room membership (participants
//! are removed only by the disconnect path, so a broadcast cannot race an
//! in-flight disconnect).

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use slipstream_core::{PlayerId, ServerEvent};
use tracing::warn;

use crate::metrics::WS_BROADCAST_DROPS_TOTAL;
use crate::registry::Participant;

/// Delivery counts for one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Recipients whose queue accepted the message.
    pub delivered: usize,
    /// Recipients whose queue was full or closed.
    pub dropped: usize,
}

/// Serialize `event` once and enqueue it to every participant except
/// `exclude`.
pub(crate) fn fan_out(
    participants: &HashMap<PlayerId, Participant>,
    event: &ServerEvent,
    exclude: Option<&PlayerId>,
) -> FanOutReport {
    let json = match serde_json::to_string(event) {
        Ok(j) => Arc::new(j),
        Err(e) => {
            warn!(event = event.name(), error = %e, "failed to serialize event");
            return FanOutReport::default();
        }
    };

    let mut report = FanOutReport::default();
    for (id, participant) in participants {
        if exclude == Some(id) {
            continue;
        }
        if participant.handle.send(Arc::clone(&json)) {
            report.delivered += 1;
        } else {
            report.dropped += 1;
            counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
            warn!(
                player_id = %id,
                event = event.name(),
                "failed to enqueue event (queue full or closed)"
            );
        }
    }
    report
}
