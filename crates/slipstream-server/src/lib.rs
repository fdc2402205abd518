//! # slipstream-server
//!
//! The Slipstream relay core: room registry, exclusion-aware broadcast
//! fan-out, per-connection protocol handling, and the axum WebSocket gateway.
//!
//! - Registry: authoritative room → participants map, one write-lock
//!   critical section per protocol event
//! - Broadcast: serialize-once fan-out over per-connection send queues
//! - Gateway: `/ws` upgrade, heartbeat, disconnect cleanup
//! - HTTP: `/health` and `/metrics`
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod broadcast;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod websocket;
