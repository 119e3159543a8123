//! The `Session` and `SessionFactory` traits.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SessionError;
use crate::options::SessionOptions;
use crate::result::QueryResult;

/// One live network link to a ClickHouse server.
///
/// A session is owned by exactly one connection at a time; the pool's
/// acquire/release discipline is what enforces that exclusivity. All
/// methods take `&mut self` so two holders can never talk over the same
/// socket concurrently.
#[async_trait]
pub trait Session: Send {
    /// Establish (or re-establish) the link to the server.
    ///
    /// Implementations must support reconnecting a session that was
    /// previously disconnected.
    async fn connect(&mut self) -> Result<(), SessionError>;

    /// Tear the link down.
    ///
    /// Best-effort and idempotent: disconnecting an already-disconnected
    /// session is a no-op, and failures are swallowed by the
    /// implementation (a session that cannot even close its socket is
    /// abandoned, not retried).
    async fn disconnect(&mut self);

    /// Liveness check. Returns `false` when the link is down or the
    /// server does not answer.
    async fn ping(&mut self) -> bool;

    /// Execute a query and materialize its result.
    async fn execute(&mut self, query: &str) -> Result<QueryResult, SessionError>;
}

/// Creates sessions from connection parameters.
///
/// The connection and pool layers construct sessions only through this
/// seam, which is also where test suites substitute mock sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Create a new, not-yet-connected session for the given options.
    async fn create(&self, options: &SessionOptions) -> Result<Box<dyn Session>, SessionError>;
}

/// Shared handle to a session factory.
pub type DynSessionFactory = Arc<dyn SessionFactory>;
