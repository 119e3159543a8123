//! Connection lifecycle management.

use std::fmt;

use clickhouse_session::{DynSessionFactory, QueryResult, Session, SessionOptions};

use crate::cursor::Cursor;
use crate::error::{Error, Result};

/// Lifecycle state of a [`Connection`].
///
/// Transitions are monotone: `Created -> Opened -> Closed`, with
/// `Closed -> Opened` allowed only through an explicit reconnect. A
/// connection never returns to `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Constructed, never opened.
    Created,
    /// Holding a live session.
    Opened,
    /// Disconnected; no live session.
    Closed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Created => "created",
            ConnectionStatus::Opened => "opened",
            ConnectionStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// One pooled (or standalone) link to a ClickHouse server.
///
/// Wraps a single [`Session`] with an explicit lifecycle state machine
/// and a cursor factory. The connection parameters are fixed at
/// construction; the session itself is created lazily on the first
/// [`connect`](Connection::connect).
pub struct Connection {
    options: SessionOptions,
    factory: DynSessionFactory,
    session: Option<Box<dyn Session>>,
    status: ConnectionStatus,
}

impl Connection {
    /// Create a connection in the `created` state.
    ///
    /// No network traffic happens until [`connect`](Connection::connect).
    #[must_use]
    pub fn new(options: SessionOptions, factory: DynSessionFactory) -> Self {
        Self {
            options,
            factory,
            session: None,
            status: ConnectionStatus::Created,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Whether the connection currently holds a live session.
    #[must_use]
    pub fn is_opened(&self) -> bool {
        self.status == ConnectionStatus::Opened
    }

    /// Whether the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.status == ConnectionStatus::Closed
    }

    /// Server host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.options.host
    }

    /// Server port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.options.port
    }

    /// User name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.options.user
    }

    /// Database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.options.database
    }

    /// The full connection parameters.
    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Open the connection.
    ///
    /// A no-op when already opened. A closed connection reconnects. On
    /// failure the error propagates and the state is left untouched
    /// (`created` or `closed`).
    pub async fn connect(&mut self) -> Result<()> {
        if self.status == ConnectionStatus::Opened {
            return Ok(());
        }
        if self.session.is_none() {
            self.session = Some(self.factory.create(&self.options).await?);
        }
        match self.session.as_mut() {
            Some(session) => session.connect().await?,
            None => return Err(self.not_yet_opened()),
        }
        tracing::debug!(addr = %self.options.addr(), "connection opened");
        self.status = ConnectionStatus::Opened;
        Ok(())
    }

    /// Close the connection.
    ///
    /// Idempotent. The state becomes `closed` unconditionally: session
    /// disconnect is best-effort, so a half-dead session can never keep a
    /// connection wedged open.
    pub async fn close(&mut self) -> Result<()> {
        if self.status == ConnectionStatus::Closed {
            return Ok(());
        }
        if self.status == ConnectionStatus::Opened {
            if let Some(session) = self.session.as_mut() {
                session.disconnect().await;
            }
            tracing::debug!(addr = %self.options.addr(), "connection closed");
        }
        self.status = ConnectionStatus::Closed;
        Ok(())
    }

    /// Check the connection liveliness.
    ///
    /// Does not mutate state.
    pub async fn ping(&mut self) -> Result<()> {
        let session = match self.session.as_mut() {
            Some(session) => session,
            None => return Err(self.not_yet_opened()),
        };
        if session.ping().await {
            Ok(())
        } else {
            Err(Error::PingFailed {
                addr: self.options.addr(),
            })
        }
    }

    /// Ping, and reconnect once when the ping fails.
    ///
    /// Refreshing a connection that was never opened, or one that is
    /// already closed, is an error. When the recovery reconnect also
    /// fails, that failure propagates and the connection stays
    /// unrecovered.
    pub async fn refresh(&mut self) -> Result<()> {
        match self.status {
            ConnectionStatus::Created => return Err(self.not_yet_opened()),
            ConnectionStatus::Closed => {
                return Err(Error::AlreadyClosed {
                    addr: self.options.addr(),
                });
            }
            ConnectionStatus::Opened => {}
        }
        if self.ping().await.is_ok() {
            return Ok(());
        }
        tracing::debug!(addr = %self.options.addr(), "stale connection, reconnecting");
        // Bypass connect()'s opened no-op check: the link is known stale
        // and must actually be re-dialed.
        match self.session.as_mut() {
            Some(session) => session.connect().await?,
            None => return Err(self.not_yet_opened()),
        }
        Ok(())
    }

    /// Execute a query on the underlying session.
    ///
    /// Fails with a not-opened error when the connection was never
    /// connected.
    pub async fn execute(&mut self, query: &str) -> Result<QueryResult> {
        let session = match self.session.as_mut() {
            Some(session) => session,
            None => return Err(self.not_yet_opened()),
        };
        Ok(session.execute(query).await?)
    }

    /// Create a cursor bound to this connection.
    ///
    /// Does not require the connection to be opened yet; execution fails
    /// downstream if it is not.
    pub fn cursor(&mut self) -> Cursor<'_> {
        Cursor::new(self)
    }

    /// Always fails: ClickHouse has no transactions.
    pub async fn commit(&mut self) -> Result<()> {
        Err(Error::NotSupported("commit"))
    }

    /// Always fails: ClickHouse has no transactions.
    pub async fn rollback(&mut self) -> Result<()> {
        Err(Error::NotSupported("rollback"))
    }

    fn not_yet_opened(&self) -> Error {
        Error::NotYetOpened {
            addr: self.options.addr(),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.options.host)
            .field("port", &self.options.port)
            .field("database", &self.options.database)
            .field("status", &self.status)
            .finish()
    }
}

/// Open a connection in one call.
///
/// Equivalent to [`Connection::new`] followed by
/// [`connect`](Connection::connect).
pub async fn connect(options: SessionOptions, factory: DynSessionFactory) -> Result<Connection> {
    let mut conn = Connection::new(options, factory);
    conn.connect().await?;
    Ok(conn)
}
