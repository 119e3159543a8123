//! # clickhouse-testing
//!
//! Mock session infrastructure shared by the driver's test suites.
//!
//! [`MockFactory`] stands in for a ClickHouse server: it hands out
//! [`MockSession`]s through the regular [`SessionFactory`] seam, tracks
//! how many sessions are currently "live" on the fake server, and can be
//! told to refuse further connects or to sever every established link
//! (so health-recovery paths can be exercised without a network).
//!
//! This crate exists as a separate workspace member so that both
//! `clickhouse-client` and `clickhouse-driver-pool` can use it as a
//! dev-dependency without forming a dependency cycle.

#![warn(missing_docs)]
#![deny(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;

use clickhouse_session::{
    Column, QueryResult, Session, SessionError, SessionFactory, SessionOptions, Value,
};

#[derive(Debug, Default)]
struct ServerState {
    /// Sessions currently connected to the fake server.
    live: AtomicUsize,
    /// Sessions ever created by the factory.
    created: AtomicUsize,
    /// Bumped by `sever_links`; sessions holding an older epoch fail pings.
    epoch: AtomicU64,
    /// Remaining successful connects; `isize::MAX` means unlimited.
    connect_permits: AtomicIsize,
}

/// A session factory backed by an in-process fake server.
#[derive(Debug, Clone)]
pub struct MockFactory {
    state: Arc<ServerState>,
}

impl Default for MockFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFactory {
    /// Create a factory whose connects always succeed.
    #[must_use]
    pub fn new() -> Self {
        let state = ServerState {
            connect_permits: AtomicIsize::new(isize::MAX),
            ..ServerState::default()
        };
        Self {
            state: Arc::new(state),
        }
    }

    /// Number of sessions currently connected.
    #[must_use]
    pub fn live_sessions(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Number of sessions ever created.
    #[must_use]
    pub fn created_sessions(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    /// Invalidate every established link, as if the server restarted.
    ///
    /// Existing sessions fail `ping` and `execute` until they reconnect.
    pub fn sever_links(&self) {
        let epoch = self.state.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(epoch, "severed all established mock links");
    }

    /// Allow only `n` further successful connects; later attempts are
    /// refused.
    pub fn set_connect_permits(&self, n: usize) {
        self.state
            .connect_permits
            .store(n as isize, Ordering::SeqCst);
    }

    /// Lift any connect limit set by [`set_connect_permits`](Self::set_connect_permits).
    pub fn allow_unlimited_connects(&self) {
        self.state
            .connect_permits
            .store(isize::MAX, Ordering::SeqCst);
    }
}

impl ServerState {
    fn take_permit(&self) -> bool {
        loop {
            let current = self.connect_permits.load(Ordering::SeqCst);
            if current == isize::MAX {
                return true;
            }
            if current <= 0 {
                return false;
            }
            if self
                .connect_permits
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }
}

#[async_trait]
impl SessionFactory for MockFactory {
    async fn create(&self, options: &SessionOptions) -> Result<Box<dyn Session>, SessionError> {
        self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
            addr: options.addr(),
            connected: false,
            epoch: 0,
        }))
    }
}

/// A scripted in-process session.
///
/// `execute` understands queries of the form `SELECT <integer>` and
/// answers with a single-row, single-column result carrying that integer;
/// anything else yields an empty result.
#[derive(Debug)]
pub struct MockSession {
    state: Arc<ServerState>,
    addr: String,
    connected: bool,
    epoch: u64,
}

impl MockSession {
    fn link_up(&self) -> bool {
        self.connected && self.epoch == self.state.epoch.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for MockSession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        if !self.state.take_permit() {
            return Err(SessionError::Connect {
                addr: self.addr.clone(),
                reason: "connection refused".to_string(),
            });
        }
        if !self.connected {
            self.state.live.fetch_add(1, Ordering::SeqCst);
            self.connected = true;
        }
        // Reconnecting picks up the current epoch, healing a severed link.
        self.epoch = self.state.epoch.load(Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.state.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn ping(&mut self) -> bool {
        self.link_up()
    }

    async fn execute(&mut self, query: &str) -> Result<QueryResult, SessionError> {
        if !self.link_up() {
            return Err(SessionError::NotConnected);
        }
        let trimmed = query.trim();
        let selectee = trimmed
            .strip_prefix("SELECT ")
            .or_else(|| trimmed.strip_prefix("select "))
            .and_then(|rest| rest.trim().parse::<i64>().ok());
        match selectee {
            Some(n) => Ok(QueryResult {
                columns: vec![Column::new(n.to_string(), "Int64")],
                rows: vec![vec![Value::Int64(n)]],
            }),
            None => Ok(QueryResult::empty()),
        }
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        // A session dropped without a disconnect still releases its server
        // slot, the way a closed socket would.
        if self.connected {
            self.state.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_lifecycle_tracks_live_count() {
        let factory = MockFactory::new();
        let opts = SessionOptions::default();

        let mut session = factory.create(&opts).await.unwrap();
        assert_eq!(factory.live_sessions(), 0);

        session.connect().await.unwrap();
        assert_eq!(factory.live_sessions(), 1);
        assert!(session.ping().await);

        session.disconnect().await;
        assert_eq!(factory.live_sessions(), 0);
        assert!(!session.ping().await);
    }

    #[tokio::test]
    async fn test_drop_releases_server_slot() {
        let factory = MockFactory::new();
        let mut session = factory.create(&SessionOptions::default()).await.unwrap();
        session.connect().await.unwrap();
        assert_eq!(factory.live_sessions(), 1);
        drop(session);
        assert_eq!(factory.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_connect_permits_refuse_connects() {
        let factory = MockFactory::new();
        factory.set_connect_permits(1);

        let opts = SessionOptions::default();
        let mut first = factory.create(&opts).await.unwrap();
        let mut second = factory.create(&opts).await.unwrap();

        first.connect().await.unwrap();
        assert!(matches!(
            second.connect().await,
            Err(SessionError::Connect { .. })
        ));
        assert_eq!(factory.live_sessions(), 1);
    }

    #[tokio::test]
    async fn test_severed_link_heals_on_reconnect() {
        let factory = MockFactory::new();
        let mut session = factory.create(&SessionOptions::default()).await.unwrap();
        session.connect().await.unwrap();

        factory.sever_links();
        assert!(!session.ping().await);
        assert!(matches!(
            session.execute("SELECT 1").await,
            Err(SessionError::NotConnected)
        ));

        session.connect().await.unwrap();
        assert!(session.ping().await);
        assert_eq!(factory.live_sessions(), 1);
    }

    #[tokio::test]
    async fn test_execute_select_literal() {
        let factory = MockFactory::new();
        let mut session = factory.create(&SessionOptions::default()).await.unwrap();
        session.connect().await.unwrap();

        let result = session.execute("SELECT 42").await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.rows[0], vec![Value::Int64(42)]);

        let ddl = session.execute("CREATE TABLE t (x UInt8)").await.unwrap();
        assert!(ddl.is_empty());
    }
}
