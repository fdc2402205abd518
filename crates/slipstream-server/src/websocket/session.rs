//! WebSocket session lifecycle — handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use slipstream_core::{PlayerId, ServerEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS,
    WS_DISCONNECTIONS_TOTAL, WS_MALFORMED_MESSAGES_TOTAL,
};
use crate::registry::RoomRegistry;
use crate::websocket::connection::ConnectionHandle;
use crate::websocket::handler::SessionHandler;
use crate::websocket::heartbeat::{run_heartbeat, HeartbeatOutcome};

/// Run a WebSocket session for a connected client.
///
/// 1. Sends a `welcome` event with the assigned player id
/// 2. Spawns the writer task (queue drain + periodic Ping frames)
/// 3. Watches liveness and disconnects unresponsive clients
/// 4. Dispatches inbound frames through the protocol handler
/// 5. Runs disconnect cleanup exactly once, on every exit path
#[instrument(skip_all, fields(player_id = %player_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    player_id: PlayerId,
    registry: Arc<RoomRegistry>,
    config: Arc<ServerConfig>,
    active_connections: Arc<AtomicUsize>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(config.send_queue_depth);
    let connection = Arc::new(ConnectionHandle::new(player_id.clone(), send_tx));
    let mut handler = SessionHandler::new(connection.clone(), registry);

    let connection_start = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    let _ = active_connections.fetch_add(1, Ordering::Relaxed);

    // The client learns its id before anything else happens.
    let welcome = ServerEvent::Welcome {
        player_id: player_id.clone(),
    };
    if let Ok(json) = serde_json::to_string(&welcome) {
        let _ = ws_tx.send(Message::Text(json.into())).await;
    }

    let ping_interval = Duration::from_secs(config.heartbeat_interval_secs);
    let pong_timeout = Duration::from_secs(config.heartbeat_timeout_secs);

    // Writer task: drains the send queue and emits periodic Ping frames.
    let outbound = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        // Skip the immediate first tick
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(Message::Text((*text).clone().into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Liveness watchdog, cancelled on normal disconnect.
    let cancel = CancellationToken::new();
    let mut watchdog = tokio::spawn(run_heartbeat(
        connection.clone(),
        ping_interval,
        pong_timeout,
        cancel.clone(),
    ));

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let Some(Ok(msg)) = frame else { break };
                let text = match msg {
                    Message::Text(ref t) => Some(t.to_string()),
                    Message::Binary(ref data) => {
                        // Some clients send JSON as binary frames
                        match std::str::from_utf8(data) {
                            Ok(s) => Some(s.to_owned()),
                            Err(_) => {
                                counter!(WS_MALFORMED_MESSAGES_TOTAL).increment(1);
                                debug!(len = data.len(), "discarding non-UTF8 binary frame");
                                None
                            }
                        }
                    }
                    Message::Close(_) => {
                        info!("client sent close frame");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => {
                        connection.mark_alive();
                        None
                    }
                };

                let Some(text) = text else { continue };
                handler.handle_message(&text).await;
            }
            outcome = &mut watchdog => {
                if matches!(outcome, Ok(HeartbeatOutcome::TimedOut)) {
                    warn!("client unresponsive, disconnecting");
                }
                break;
            }
        }
    }

    // Cleanup — the only place membership is released, on every exit path.
    handler.handle_disconnect().await;
    cancel.cancel();
    outbound.abort();
    info!("client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    let _ = active_connections.fetch_sub(1, Ordering::Relaxed);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}
