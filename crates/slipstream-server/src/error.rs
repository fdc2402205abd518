//! Server error types.

use std::net::AddrParseError;

/// Errors from server startup.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The configured host/port pair is not a valid socket address.
    #[error("invalid bind address {addr}: {source}")]
    InvalidAddr {
        /// The offending address string.
        addr: String,
        /// The underlying parse error.
        #[source]
        source: AddrParseError,
    },

    /// Binding the listener failed (port in use, permission denied, ...).
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The bound listener's local address could not be resolved.
    #[error("failed to resolve local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}
