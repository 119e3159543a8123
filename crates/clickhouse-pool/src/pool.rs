//! Connection pool implementation.
//!
//! All bookkeeping (idle set, acquired count, waiter queue) lives behind
//! one `parking_lot::Mutex` that is never held across an await point;
//! network I/O happens outside it. Saturated callers park in an explicit
//! FIFO queue of oneshot channels, so fair admission is enforced by the
//! pool itself.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use clickhouse_client::Connection;
use clickhouse_session::{DynSessionFactory, SessionOptions};

use crate::config::PoolConfig;
use crate::error::PoolError;

/// Lifecycle state of a [`Pool`].
///
/// `Created -> Opened -> Closed`, terminal at `Closed`. A closed pool
/// cannot be reopened; construct a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// Constructed, never opened.
    Created,
    /// Serving acquisitions.
    Opened,
    /// Shut down.
    Closed,
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoolStatus::Created => "created",
            PoolStatus::Opened => "opened",
            PoolStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Message delivered to a parked acquirer.
enum Handoff {
    /// A released connection, already checked out on the sender's side.
    Connection(PooledConnection),
    /// A creation slot freed up; the receiver should retry acquisition.
    Slot,
    /// The pool closed while the caller was waiting.
    Closed,
}

struct PoolState {
    status: PoolStatus,
    /// Connections not currently checked out.
    idle: VecDeque<Connection>,
    /// Connections currently checked out.
    acquired: usize,
    /// Connections being created right now; they count against `maxsize`.
    creating: usize,
    /// Parked acquirers, oldest first.
    waiters: VecDeque<oneshot::Sender<Handoff>>,
}

impl PoolState {
    fn total(&self) -> usize {
        self.idle.len() + self.acquired + self.creating
    }
}

#[derive(Default)]
struct MetricCounters {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    checkouts_successful: AtomicU64,
    checkouts_failed: AtomicU64,
}

struct PoolInner {
    config: PoolConfig,
    options: SessionOptions,
    factory: DynSessionFactory,
    state: Mutex<PoolState>,
    /// Serializes open/close against each other.
    lifecycle: tokio::sync::Mutex<()>,
    created_at: Instant,
    metrics: MetricCounters,
}

impl PoolInner {
    async fn open_connection(&self) -> Result<Connection, PoolError> {
        let mut conn = Connection::new(self.options.clone(), Arc::clone(&self.factory));
        conn.connect().await?;
        self.metrics
            .connections_created
            .fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    /// Return a connection to the pool, handing it to the oldest live
    /// waiter when one is queued.
    ///
    /// Unconditional: a broken connection is returned all the same, and
    /// its brokenness surfaces to whoever uses it next.
    fn give_back(inner: &Arc<Self>, conn: Connection) {
        let mut state = inner.state.lock();
        if state.acquired == 0 {
            // Structurally unreachable through the guard API; reported
            // rather than guessed at.
            tracing::error!("release without a matching acquire; pool bookkeeping is inconsistent");
        } else {
            state.acquired -= 1;
        }

        if state.status == PoolStatus::Closed {
            drop(state);
            inner.close_connection_in_background(conn);
            return;
        }

        let mut conn = conn;
        loop {
            match state.waiters.pop_front() {
                Some(waiter) => {
                    state.acquired += 1;
                    let guard = PooledConnection::new(conn, Arc::clone(inner));
                    match waiter.send(Handoff::Connection(guard)) {
                        Ok(()) => {
                            tracing::trace!("connection handed to queued waiter");
                            return;
                        }
                        // The waiter cancelled its acquire; take the
                        // connection back out of the rejected guard and
                        // try the next one.
                        Err(Handoff::Connection(mut guard)) => {
                            state.acquired -= 1;
                            match guard.take_raw() {
                                Some(c) => conn = c,
                                None => return,
                            }
                        }
                        Err(_) => return,
                    }
                }
                None => {
                    state.idle.push_back(conn);
                    tracing::trace!(idle = state.idle.len(), "connection returned to idle set");
                    return;
                }
            }
        }
    }

    /// Wake the oldest live waiter with a retry slot after a failed
    /// connection creation, so capacity is never stranded.
    fn wake_slot(&self) {
        let mut state = self.state.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.send(Handoff::Slot).is_ok() {
                return;
            }
        }
    }

    fn close_connection_in_background(&self, mut conn: Connection) {
        self.metrics
            .connections_closed
            .fetch_add(1, Ordering::Relaxed);
        // Without a runtime the drop of the session still closes the
        // socket.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = conn.close().await {
                    tracing::warn!(error = %err, "failed to close connection returned after pool shutdown");
                }
            });
        }
    }

    fn checkout_succeeded(&self) {
        self.metrics
            .checkouts_successful
            .fetch_add(1, Ordering::Relaxed);
    }

    fn checkout_failed(&self) {
        self.metrics
            .checkouts_failed
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Reservation of one in-flight creation slot.
///
/// An armed reservation that drops (the acquirer was cancelled while its
/// connection was being established) releases the slot and wakes a
/// queued waiter, so cancellation mid-creation never strands capacity.
struct CreationSlot {
    inner: Arc<PoolInner>,
    armed: bool,
}

impl CreationSlot {
    fn new(inner: Arc<PoolInner>) -> Self {
        Self { inner, armed: true }
    }

    /// The creation attempt ran to completion; bookkeeping for the slot
    /// is the caller's from here.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CreationSlot {
    fn drop(&mut self) {
        if self.armed {
            {
                let mut state = self.inner.state.lock();
                state.creating -= 1;
            }
            self.inner.wake_slot();
        }
    }
}

/// A bounded, fair pool of ClickHouse connections.
///
/// The pool guarantees at most `maxsize` live connections, serves
/// saturated acquirers in FIFO order, and hands connections out through
/// the [`PooledConnection`] guard so release happens on every exit path.
///
/// `Pool` is cheap to clone; clones share the same state.
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Clone for Pool {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Outcome of one bookkeeping pass inside `acquire`.
enum Attempt {
    Ready(Connection),
    Create,
    Wait(oneshot::Receiver<Handoff>),
}

impl Pool {
    /// Create a pool builder.
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Create a pool.
    ///
    /// Validates the configuration and allocates no connections; call
    /// [`open`](Pool::open) to pre-warm.
    ///
    /// # Errors
    ///
    /// [`PoolError::Config`] for impossible `minsize`/`maxsize`
    /// combinations.
    pub fn new(
        config: PoolConfig,
        options: SessionOptions,
        factory: DynSessionFactory,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        tracing::info!(
            minsize = config.minsize,
            maxsize = config.maxsize,
            "connection pool created"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                options,
                factory,
                state: Mutex::new(PoolState {
                    status: PoolStatus::Created,
                    idle: VecDeque::new(),
                    acquired: 0,
                    creating: 0,
                    waiters: VecDeque::new(),
                }),
                lifecycle: tokio::sync::Mutex::new(()),
                created_at: Instant::now(),
                metrics: MetricCounters::default(),
            }),
        })
    }

    /// Open the pool, eagerly creating `minsize` connections.
    ///
    /// Idempotent while the pool is opened. If any of the eager connects
    /// fails, every connection created so far is closed and the whole
    /// call fails; the pool is never left half-opened with a silent
    /// undercount.
    ///
    /// # Errors
    ///
    /// [`PoolError::Closed`] on a closed pool, or the first connection
    /// failure encountered while pre-warming.
    pub async fn open(&self) -> Result<(), PoolError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        {
            let state = self.inner.state.lock();
            match state.status {
                PoolStatus::Opened => return Ok(()),
                PoolStatus::Closed => return Err(PoolError::Closed),
                PoolStatus::Created => {}
            }
        }

        let minsize = self.inner.config.minsize;
        let results = futures_util::future::join_all(
            (0..minsize).map(|_| self.inner.open_connection()),
        )
        .await;

        let mut connections = Vec::with_capacity(minsize);
        let mut first_error = None;
        for result in results {
            match result {
                Ok(conn) => connections.push(conn),
                Err(err) if first_error.is_none() => first_error = Some(err),
                Err(_) => {}
            }
        }

        if let Some(err) = first_error {
            tracing::warn!(error = %err, "pool open failed, discarding partial connections");
            for mut conn in connections {
                if let Err(close_err) = conn.close().await {
                    tracing::warn!(error = %close_err, "failed to close connection while aborting open");
                }
                self.inner
                    .metrics
                    .connections_closed
                    .fetch_add(1, Ordering::Relaxed);
            }
            return Err(err);
        }

        {
            let mut state = self.inner.state.lock();
            state.idle.extend(connections);
            state.status = PoolStatus::Opened;
        }
        tracing::info!(
            minsize,
            maxsize = self.inner.config.maxsize,
            "connection pool opened"
        );
        Ok(())
    }

    /// Close the pool.
    ///
    /// Idempotent and terminal. Queued waiters fail with
    /// [`PoolError::Closed`]; idle connections are closed best-effort.
    /// Connections still checked out are closed as their guards release
    /// them, so every connection is closed exactly once.
    pub async fn close(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let (idle, waiters) = {
            let mut state = self.inner.state.lock();
            if state.status == PoolStatus::Closed {
                return;
            }
            state.status = PoolStatus::Closed;
            (
                std::mem::take(&mut state.idle),
                std::mem::take(&mut state.waiters),
            )
        };

        for waiter in waiters {
            let _ = waiter.send(Handoff::Closed);
        }

        let teardowns = idle.len();
        for mut conn in idle {
            if let Err(err) = conn.close().await {
                tracing::warn!(error = %err, "failed to close pooled connection during shutdown");
            }
            self.inner
                .metrics
                .connections_closed
                .fetch_add(1, Ordering::Relaxed);
        }
        tracing::info!(closed = teardowns, "connection pool closed");
    }

    /// Acquire a connection.
    ///
    /// Reuses an idle connection when one exists, creates a new one while
    /// under `maxsize`, and otherwise parks the caller in FIFO order
    /// until a release or pool closure. The pool imposes no wait timeout;
    /// wrap the call in `tokio::time::timeout` to bound it, and a
    /// cancelled wait leaves the pool invariants intact.
    ///
    /// Idle connections are not re-validated here: health recovery is
    /// deferred to an explicit [`refresh`](clickhouse_client::Connection::refresh)
    /// by the caller, so acquisition never blocks on a network round trip
    /// beyond connection creation.
    ///
    /// # Errors
    ///
    /// [`PoolError::NotOpened`] before [`open`](Pool::open),
    /// [`PoolError::Closed`] after [`close`](Pool::close), or a
    /// connection failure when growing the pool.
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        loop {
            let attempt = {
                let mut state = self.inner.state.lock();
                match state.status {
                    PoolStatus::Created => {
                        drop(state);
                        self.inner.checkout_failed();
                        return Err(PoolError::NotOpened);
                    }
                    PoolStatus::Closed => {
                        drop(state);
                        self.inner.checkout_failed();
                        return Err(PoolError::Closed);
                    }
                    PoolStatus::Opened => {}
                }
                if let Some(conn) = state.idle.pop_front() {
                    state.acquired += 1;
                    Attempt::Ready(conn)
                } else if state.total() < self.inner.config.maxsize {
                    state.creating += 1;
                    Attempt::Create
                } else if state.total() > self.inner.config.maxsize {
                    drop(state);
                    self.inner.checkout_failed();
                    return Err(PoolError::Inconsistent(format!(
                        "pool holds more than maxsize ({}) connections",
                        self.inner.config.maxsize
                    )));
                } else {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    Attempt::Wait(rx)
                }
            };

            match attempt {
                Attempt::Ready(conn) => {
                    self.inner.checkout_succeeded();
                    return Ok(PooledConnection::new(conn, Arc::clone(&self.inner)));
                }
                Attempt::Create => {
                    // Held across the connect await: a caller cancelled
                    // here must give its reserved slot back.
                    let slot = CreationSlot::new(Arc::clone(&self.inner));
                    match self.inner.open_connection().await {
                        Ok(conn) => {
                            slot.disarm();
                            let closed = {
                                let mut state = self.inner.state.lock();
                                state.creating -= 1;
                                if state.status == PoolStatus::Closed {
                                    true
                                } else {
                                    state.acquired += 1;
                                    false
                                }
                            };
                            if closed {
                                let mut conn = conn;
                                if let Err(err) = conn.close().await {
                                    tracing::warn!(error = %err, "failed to close connection created during shutdown");
                                }
                                self.inner
                                    .metrics
                                    .connections_closed
                                    .fetch_add(1, Ordering::Relaxed);
                                self.inner.checkout_failed();
                                return Err(PoolError::Closed);
                            }
                            self.inner.checkout_succeeded();
                            return Ok(PooledConnection::new(conn, Arc::clone(&self.inner)));
                        }
                        Err(err) => {
                            // The dropped reservation frees the slot and
                            // wakes a queued waiter.
                            drop(slot);
                            self.inner.checkout_failed();
                            return Err(err);
                        }
                    }
                }
                Attempt::Wait(rx) => match rx.await {
                    Ok(Handoff::Connection(guard)) => {
                        self.inner.checkout_succeeded();
                        return Ok(guard);
                    }
                    Ok(Handoff::Slot) => continue,
                    Ok(Handoff::Closed) | Err(_) => {
                        self.inner.checkout_failed();
                        return Err(PoolError::Closed);
                    }
                },
            }
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.inner.state.lock().status
    }

    /// Whether the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.status() == PoolStatus::Closed
    }

    /// Total connections currently managed (idle plus checked out).
    #[must_use]
    pub fn connections(&self) -> usize {
        let state = self.inner.state.lock();
        state.idle.len() + state.acquired
    }

    /// Connections sitting in the idle set.
    #[must_use]
    pub fn free_connections(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Connections currently checked out.
    #[must_use]
    pub fn acquired_connections(&self) -> usize {
        self.inner.state.lock().acquired
    }

    /// Configured minimum size.
    #[must_use]
    pub fn minsize(&self) -> usize {
        self.inner.config.minsize
    }

    /// Configured maximum size.
    #[must_use]
    pub fn maxsize(&self) -> usize {
        self.inner.config.maxsize
    }

    /// An atomically consistent view of the counters, taken under the
    /// bookkeeping lock so external observers never see torn counts.
    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.inner.state.lock();
        PoolSnapshot {
            status: state.status,
            free: state.idle.len(),
            acquired: state.acquired,
            maxsize: self.inner.config.maxsize,
        }
    }

    /// Counters accumulated since the pool was created.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let m = &self.inner.metrics;
        PoolMetrics {
            connections_created: m.connections_created.load(Ordering::Relaxed),
            connections_closed: m.connections_closed.load(Ordering::Relaxed),
            checkouts_successful: m.checkouts_successful.load(Ordering::Relaxed),
            checkouts_failed: m.checkouts_failed.load(Ordering::Relaxed),
            uptime: self.inner.created_at.elapsed(),
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Pool")
            .field("minsize", &self.inner.config.minsize)
            .field("maxsize", &self.inner.config.maxsize)
            .field("status", &state.status)
            .field("free", &state.idle.len())
            .field("acquired", &state.acquired)
            .finish()
    }
}

/// Builder for [`Pool`].
pub struct PoolBuilder {
    config: PoolConfig,
    options: SessionOptions,
    factory: Option<DynSessionFactory>,
}

impl PoolBuilder {
    /// Create a builder with default sizes and options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
            options: SessionOptions::default(),
            factory: None,
        }
    }

    /// Set the minimum pool size.
    #[must_use]
    pub fn minsize(mut self, minsize: usize) -> Self {
        self.config = self.config.minsize(minsize);
        self
    }

    /// Set the maximum pool size.
    #[must_use]
    pub fn maxsize(mut self, maxsize: usize) -> Self {
        self.config = self.config.maxsize(maxsize);
        self
    }

    /// Set the connection parameters used for every pooled connection.
    #[must_use]
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the session factory.
    #[must_use]
    pub fn factory(mut self, factory: DynSessionFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Build the pool.
    ///
    /// # Errors
    ///
    /// [`PoolError::Config`] for invalid sizes or a missing factory.
    pub fn build(self) -> Result<Pool, PoolError> {
        let factory = self
            .factory
            .ok_or_else(|| PoolError::Config("a session factory is required".to_string()))?;
        Pool::new(self.config, self.options, factory)
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A consistent point-in-time view of the pool counters.
#[derive(Debug, Clone, Copy)]
pub struct PoolSnapshot {
    /// Lifecycle state at the time of the snapshot.
    pub status: PoolStatus,
    /// Idle connections.
    pub free: usize,
    /// Checked-out connections.
    pub acquired: usize,
    /// Configured ceiling.
    pub maxsize: usize,
}

impl PoolSnapshot {
    /// Total managed connections.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.free + self.acquired
    }

    /// Checked-out share of the ceiling, in percent.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.maxsize == 0 {
            return 0.0;
        }
        (self.acquired as f64 / self.maxsize as f64) * 100.0
    }

    /// Whether the pool cannot grow any further.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.connections() >= self.maxsize
    }
}

/// Counters accumulated over the pool's lifetime.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Connections created since pool construction.
    pub connections_created: u64,
    /// Connections closed since pool construction.
    pub connections_closed: u64,
    /// Successful checkouts.
    pub checkouts_successful: u64,
    /// Failed checkouts (pool closed, creation failures).
    pub checkouts_failed: u64,
    /// Time since pool construction.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Checkout success rate in `[0.0, 1.0]`.
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }
}

/// A connection checked out of a [`Pool`].
///
/// Dereferences to [`Connection`]. Dropping the guard returns the
/// connection to the pool unconditionally — broken or not — on every
/// exit path, including panics and cancelled futures. This is the scoped
/// acquisition discipline: hold the guard for exactly as long as the
/// connection (and any cursor on it) is in use.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    fn new(conn: Connection, pool: Arc<PoolInner>) -> Self {
        Self {
            conn: Some(conn),
            pool,
        }
    }

    /// Permanently remove the connection from pool management.
    ///
    /// The pool's acquired count drops and the freed slot is offered to
    /// the oldest queued waiter; closing the returned connection is now
    /// the caller's responsibility.
    #[must_use]
    pub fn detach(mut self) -> Connection {
        // Only the internal release path empties the slot, and it
        // consumes the guard; a caller-held guard always has it.
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => unreachable!("pooled connection already taken"),
        };
        {
            let mut state = self.pool.state.lock();
            if state.acquired > 0 {
                state.acquired -= 1;
            }
        }
        self.pool.wake_slot();
        conn
    }

    /// Take the connection out, leaving the guard inert (internal use by
    /// the release path).
    fn take_raw(&mut self) -> Option<Connection> {
        self.conn.take()
    }

    fn conn_ref(&self) -> &Connection {
        match &self.conn {
            Some(conn) => conn,
            // The option is only empty after detach/take, both of which
            // consume access to the guard.
            None => unreachable!("pooled connection already taken"),
        }
    }

    fn conn_mut(&mut self) -> &mut Connection {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection already taken"),
        }
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn_ref()
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn_mut()
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::trace!("returning connection to pool");
            PoolInner::give_back(&self.pool, conn);
        }
    }
}
