//! Pool error types.

use thiserror::Error;

/// Errors reported by the connection pool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Invalid pool configuration, rejected at construction.
    #[error("invalid pool configuration: {0}")]
    Config(String),

    /// The pool has not been opened yet.
    #[error("pool has not been opened")]
    NotOpened,

    /// The pool is closed; closing is terminal.
    #[error("pool is closed")]
    Closed,

    /// A connection-level failure while creating or opening a pooled
    /// connection.
    #[error(transparent)]
    Connection(#[from] clickhouse_client::Error),

    /// Internal bookkeeping no longer satisfies the pool invariants.
    #[error("pool bookkeeping is inconsistent: {0}")]
    Inconsistent(String),
}
