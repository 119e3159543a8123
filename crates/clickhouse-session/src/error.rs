//! Session-level error types.

use thiserror::Error;

/// Errors reported by a [`Session`](crate::Session) implementation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// Underlying socket or transport failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The server could not be reached or rejected the handshake.
    #[error("connect to {addr} failed: {reason}")]
    Connect {
        /// Target address (`host:port`).
        addr: String,
        /// Human-readable failure cause.
        reason: String,
    },

    /// An operation was issued on a session that is not connected.
    #[error("session is not connected")]
    NotConnected,

    /// The server returned an exception for a query.
    #[error("server error: {0}")]
    Server(String),
}
