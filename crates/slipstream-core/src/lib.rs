//! # slipstream-core
//!
//! Wire protocol types and shared primitives for the Slipstream relay:
//!
//! - [`PlayerId`] — branded identifier assigned to each connection
//! - [`protocol`] — the JSON message envelope exchanged with clients
//! - [`logging`] — `tracing` subscriber bootstrap
//!
//! This crate performs no I/O.

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod protocol;

pub use ids::PlayerId;
pub use protocol::{ClientMessage, ServerEvent, DEFAULT_ROOM, default_state};
