//! Client error types.

use clickhouse_session::SessionError;
use thiserror::Error;

/// Convenience alias for client results.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by connections and cursors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A session-level failure (connect, execute, transport).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The server did not answer a liveness check.
    #[error("ping failed for connection to {addr}")]
    PingFailed {
        /// Target address (`host:port`).
        addr: String,
    },

    /// The connection has never been opened.
    #[error("connection to {addr} has never been opened")]
    NotYetOpened {
        /// Target address (`host:port`).
        addr: String,
    },

    /// The connection is already closed.
    #[error("connection to {addr} is already closed")]
    AlreadyClosed {
        /// Target address (`host:port`).
        addr: String,
    },

    /// The operation is not supported by ClickHouse.
    #[error("{0} is not supported by ClickHouse")]
    NotSupported(&'static str),

    /// The cursor was closed before this call.
    #[error("cursor is closed")]
    CursorClosed,

    /// A fetch was issued before any query was executed.
    #[error("no results to fetch")]
    NoResults,

    /// Invalid connection configuration or DSN.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error indicates a broken or unreachable server link.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Session(_) | Error::PingFailed { .. })
    }
}
