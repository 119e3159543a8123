//! Behavioral tests for the connection pool, driven by mock sessions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_test::{assert_pending, assert_ready, task};

use clickhouse_client::{Error, Value};
use clickhouse_driver_pool::{Pool, PoolError, PoolStatus};
use clickhouse_session::{Session, SessionError, SessionFactory, SessionOptions};
use clickhouse_testing::MockFactory;

/// Hands out sessions only once the gate has a permit, so a caller can
/// be cancelled while its connection is still being established.
struct StallingFactory {
    inner: MockFactory,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl SessionFactory for StallingFactory {
    async fn create(&self, options: &SessionOptions) -> Result<Box<dyn Session>, SessionError> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| SessionError::NotConnected)?;
        permit.forget();
        self.inner.create(options).await
    }
}

fn stalling_pool(maxsize: usize) -> (Pool, MockFactory, Arc<Semaphore>) {
    let factory = MockFactory::new();
    let gate = Arc::new(Semaphore::new(0));
    let pool = Pool::builder()
        .minsize(0)
        .maxsize(maxsize)
        .options(SessionOptions::default())
        .factory(Arc::new(StallingFactory {
            inner: factory.clone(),
            gate: Arc::clone(&gate),
        }))
        .build()
        .unwrap();
    (pool, factory, gate)
}

fn test_pool(minsize: usize, maxsize: usize) -> (Pool, MockFactory) {
    let factory = MockFactory::new();
    let pool = Pool::builder()
        .minsize(minsize)
        .maxsize(maxsize)
        .options(SessionOptions::default())
        .factory(Arc::new(factory.clone()))
        .build()
        .unwrap();
    (pool, factory)
}

async fn opened_pool(minsize: usize, maxsize: usize) -> (Pool, MockFactory) {
    let (pool, factory) = test_pool(minsize, maxsize);
    pool.open().await.unwrap();
    (pool, factory)
}

#[tokio::test]
async fn test_open_prewarms_minsize_connections() {
    let (pool, factory) = test_pool(3, 5);
    assert_eq!(pool.status(), PoolStatus::Created);
    assert_eq!(pool.connections(), 0);

    pool.open().await.unwrap();
    assert_eq!(pool.status(), PoolStatus::Opened);
    assert_eq!(pool.free_connections(), 3);
    assert_eq!(pool.acquired_connections(), 0);
    assert_eq!(pool.connections(), 3);
    assert_eq!(factory.live_sessions(), 3);

    pool.close().await;
    assert_eq!(pool.status(), PoolStatus::Closed);
    assert_eq!(pool.connections(), 0);
    assert_eq!(factory.live_sessions(), 0);
}

#[tokio::test]
async fn test_open_and_close_are_idempotent() {
    let (pool, factory) = test_pool(2, 4);
    pool.open().await.unwrap();
    pool.open().await.unwrap();
    assert_eq!(pool.connections(), 2);
    assert_eq!(factory.created_sessions(), 2);

    pool.close().await;
    pool.close().await;
    assert_eq!(pool.status(), PoolStatus::Closed);
}

#[tokio::test]
async fn test_reopening_closed_pool_fails() {
    let (pool, _factory) = opened_pool(1, 2).await;
    pool.close().await;
    assert!(matches!(pool.open().await, Err(PoolError::Closed)));
}

#[tokio::test]
async fn test_acquire_before_open_fails() {
    let (pool, _factory) = test_pool(1, 2);
    assert!(matches!(pool.acquire().await, Err(PoolError::NotOpened)));
}

#[tokio::test]
async fn test_acquire_release_restores_counts() {
    let (pool, _factory) = opened_pool(1, 2).await;

    {
        let conn = pool.acquire().await.unwrap();
        assert!(conn.is_opened());
        assert_eq!(pool.free_connections(), 0);
        assert_eq!(pool.acquired_connections(), 1);
        assert_eq!(pool.connections(), 1);
    } // guard drops, connection released

    assert_eq!(pool.free_connections(), 1);
    assert_eq!(pool.acquired_connections(), 0);
    assert_eq!(pool.connections(), 1);
}

#[tokio::test]
async fn test_acquire_reuses_idle_connections() {
    let (pool, factory) = opened_pool(1, 5).await;
    for _ in 0..4 {
        let conn = pool.acquire().await.unwrap();
        drop(conn);
    }
    assert_eq!(factory.created_sessions(), 1);
    assert_eq!(pool.connections(), 1);
}

#[tokio::test]
async fn test_pool_grows_on_demand_up_to_maxsize() {
    let (pool, factory) = opened_pool(1, 2).await;

    let first = pool.acquire().await.unwrap();
    let second = pool.acquire().await.unwrap();
    assert_eq!(pool.connections(), 2);
    assert_eq!(pool.acquired_connections(), 2);
    assert_eq!(factory.live_sessions(), 2);

    // At capacity: a third acquire parks instead of growing.
    let mut third = task::spawn(pool.acquire());
    assert_pending!(third.poll());
    assert_eq!(pool.connections(), 2);

    drop(third);
    drop(first);
    drop(second);
}

#[tokio::test]
async fn test_saturated_acquire_blocks_until_release() {
    let (pool, _factory) = opened_pool(1, 1).await;

    let held = pool.acquire().await.unwrap();
    let mut waiter = task::spawn(pool.acquire());
    assert_pending!(waiter.poll());

    drop(held);
    assert!(waiter.is_woken());
    let conn = assert_ready!(waiter.poll()).unwrap();
    assert!(conn.is_opened());
    assert_eq!(pool.acquired_connections(), 1);
    assert_eq!(pool.free_connections(), 0);
}

#[tokio::test]
async fn test_waiters_are_served_in_fifo_order() {
    let (pool, _factory) = opened_pool(1, 1).await;
    let held = pool.acquire().await.unwrap();

    let mut first_waiter = task::spawn(pool.acquire());
    assert_pending!(first_waiter.poll());
    let mut second_waiter = task::spawn(pool.acquire());
    assert_pending!(second_waiter.poll());

    drop(held);
    assert!(first_waiter.is_woken());
    let conn = assert_ready!(first_waiter.poll()).unwrap();
    // The release went to the longest-waiting caller only.
    assert_pending!(second_waiter.poll());

    drop(conn);
    assert!(second_waiter.is_woken());
    let conn = assert_ready!(second_waiter.poll()).unwrap();
    assert!(conn.is_opened());
}

#[tokio::test]
async fn test_cancelled_waiter_does_not_lose_connections() {
    let (pool, _factory) = opened_pool(1, 1).await;
    let held = pool.acquire().await.unwrap();

    let mut waiter = task::spawn(pool.acquire());
    assert_pending!(waiter.poll());
    drop(waiter); // caller gives up (timeout, cancellation)

    drop(held);
    // The released connection skipped the dead waiter and is available.
    assert_eq!(pool.free_connections(), 1);
    assert_eq!(pool.acquired_connections(), 0);

    let conn = pool.acquire().await.unwrap();
    assert!(conn.is_opened());
}

#[tokio::test]
async fn test_cancelled_waiter_bounces_handoff_to_next_waiter() {
    let (pool, _factory) = opened_pool(1, 1).await;
    let held = pool.acquire().await.unwrap();

    let mut dead_waiter = task::spawn(pool.acquire());
    assert_pending!(dead_waiter.poll());
    let mut live_waiter = task::spawn(pool.acquire());
    assert_pending!(live_waiter.poll());

    drop(dead_waiter);
    drop(held);

    assert!(live_waiter.is_woken());
    let conn = assert_ready!(live_waiter.poll()).unwrap();
    assert!(conn.is_opened());
    assert_eq!(pool.acquired_connections(), 1);
}

#[tokio::test]
async fn test_broken_connection_is_still_returned_to_idle() {
    let (pool, _factory) = opened_pool(1, 1).await;

    {
        let mut conn = pool.acquire().await.unwrap();
        conn.ping().await.unwrap();
        assert_eq!(pool.free_connections(), 0);
        assert_eq!(pool.acquired_connections(), 1);

        // things go wrong here, the connection gets broken
        conn.close().await.unwrap();
        assert!(matches!(conn.ping().await, Err(Error::PingFailed { .. })));
    }

    // Release is unconditional: the broken connection still counts idle.
    assert_eq!(pool.free_connections(), 1);
    assert_eq!(pool.acquired_connections(), 0);

    // Brokenness surfaces lazily to the next user.
    let mut conn = pool.acquire().await.unwrap();
    assert!(conn.ping().await.is_err());
}

#[tokio::test]
async fn test_concurrent_workload_restores_server_baseline() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (pool, factory) = opened_pool(10, 21).await;
    let baseline = 0usize;

    let mut handles = Vec::new();
    for selectee in 10..22i64 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let mut conn = pool.acquire().await?;
            let mut cursor = conn.cursor();
            cursor.execute(&format!("SELECT {selectee}")).await?;
            let row = cursor.fetchone()?;
            assert_eq!(row, Some(vec![Value::Int64(selectee)]));
            Ok::<i64, PoolError>(selectee)
        }));
    }

    let mut answers = Vec::new();
    for handle in handles {
        answers.push(handle.await.unwrap().unwrap());
    }
    answers.sort_unstable();
    assert_eq!(answers, (10..22i64).collect::<Vec<_>>());

    let snapshot = pool.snapshot();
    assert_eq!(snapshot.acquired, 0);
    assert_eq!(snapshot.connections(), snapshot.free);
    assert!(snapshot.connections() <= 21);

    pool.close().await;
    assert_eq!(factory.live_sessions(), baseline);
}

#[tokio::test]
async fn test_acquire_after_close_fails_fast() {
    let (pool, _factory) = opened_pool(1, 2).await;
    pool.close().await;
    assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
}

#[tokio::test]
async fn test_close_fails_queued_waiters() {
    let (pool, _factory) = opened_pool(1, 1).await;
    let held = pool.acquire().await.unwrap();

    let mut waiter = task::spawn(pool.acquire());
    assert_pending!(waiter.poll());

    pool.close().await;
    assert!(waiter.is_woken());
    assert!(matches!(
        assert_ready!(waiter.poll()),
        Err(PoolError::Closed)
    ));

    drop(held);
}

#[tokio::test]
async fn test_connection_released_after_close_gets_closed() {
    let (pool, factory) = opened_pool(0, 1).await;
    let conn = pool.acquire().await.unwrap();

    pool.close().await;
    assert_eq!(factory.live_sessions(), 1);

    drop(conn); // returned to a closed pool
    // Teardown runs in the background; yield to let it finish.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(factory.live_sessions(), 0);
    assert_eq!(pool.connections(), 0);
}

#[tokio::test]
async fn test_open_partial_failure_discards_all_connections() {
    let (pool, factory) = test_pool(4, 8);
    factory.set_connect_permits(2);

    assert!(pool.open().await.is_err());
    assert_eq!(pool.status(), PoolStatus::Created);
    assert_eq!(pool.connections(), 0);
    assert_eq!(factory.live_sessions(), 0);

    // The failed open left no trace; a retry succeeds.
    factory.allow_unlimited_connects();
    pool.open().await.unwrap();
    assert_eq!(pool.free_connections(), 4);
}

#[tokio::test]
async fn test_failed_growth_frees_capacity() {
    let (pool, factory) = opened_pool(0, 2).await;
    let held = pool.acquire().await.unwrap();

    // Next creation attempt will be refused by the server.
    factory.set_connect_permits(0);

    let failing = pool.acquire().await;
    assert!(matches!(failing, Err(PoolError::Connection(_))));

    // The failure freed its creation slot; a fresh acquire can use it.
    factory.allow_unlimited_connects();
    let second = pool.acquire().await.unwrap();
    assert!(second.is_opened());
    assert_eq!(pool.acquired_connections(), 2);

    drop(held);
    drop(second);
}

#[tokio::test]
async fn test_detach_removes_connection_from_pool() {
    let (pool, factory) = opened_pool(1, 2).await;
    let guard = pool.acquire().await.unwrap();

    let mut conn = guard.detach();
    assert_eq!(pool.connections(), 0);
    assert_eq!(factory.live_sessions(), 1);

    conn.close().await.unwrap();
    assert_eq!(factory.live_sessions(), 0);
}

#[tokio::test]
async fn test_detach_wakes_queued_waiter() {
    let (pool, factory) = opened_pool(1, 1).await;
    let held = pool.acquire().await.unwrap();

    let mut waiter = task::spawn(pool.acquire());
    assert_pending!(waiter.poll());

    // Detaching frees the slot; the waiter must see it, not starve.
    let mut detached = held.detach();
    assert!(waiter.is_woken());
    let conn = assert_ready!(waiter.poll()).unwrap();
    assert!(conn.is_opened());
    assert_eq!(pool.acquired_connections(), 1);

    drop(conn);
    detached.close().await.unwrap();
    assert_eq!(factory.live_sessions(), 1);
}

#[tokio::test]
async fn test_cancelled_creation_frees_reserved_slot() {
    let (pool, _factory, gate) = stalling_pool(1);
    pool.open().await.unwrap();

    let mut cancelled = task::spawn(pool.acquire());
    assert_pending!(cancelled.poll()); // suspended while connecting
    drop(cancelled); // caller gave up (timeout, cancellation)

    assert_eq!(pool.connections(), 0);

    // The reserved creation slot was released; a fresh acquire uses it.
    gate.add_permits(1);
    let mut retry = task::spawn(pool.acquire());
    let conn = assert_ready!(retry.poll()).unwrap();
    assert!(conn.is_opened());
    assert_eq!(pool.acquired_connections(), 1);
}

#[tokio::test]
async fn test_cancelled_creation_wakes_queued_waiter() {
    let (pool, _factory, gate) = stalling_pool(1);
    pool.open().await.unwrap();

    let mut cancelled = task::spawn(pool.acquire());
    assert_pending!(cancelled.poll());
    let mut waiter = task::spawn(pool.acquire());
    assert_pending!(waiter.poll()); // pool at capacity, parked

    gate.add_permits(1);
    drop(cancelled);

    assert!(waiter.is_woken());
    let conn = assert_ready!(waiter.poll()).unwrap();
    assert!(conn.is_opened());
    assert_eq!(pool.acquired_connections(), 1);
}

#[tokio::test]
async fn test_counts_stay_consistent_across_checkouts() {
    let (pool, _factory) = opened_pool(2, 4).await;

    let first = pool.acquire().await.unwrap();
    let second = pool.acquire().await.unwrap();
    let third = pool.acquire().await.unwrap();
    assert_eq!(
        pool.connections(),
        pool.free_connections() + pool.acquired_connections()
    );
    assert_eq!(pool.acquired_connections(), 3);

    drop(second);
    assert_eq!(
        pool.connections(),
        pool.free_connections() + pool.acquired_connections()
    );

    drop(first);
    drop(third);
    assert_eq!(pool.free_connections(), 3);
    assert_eq!(pool.acquired_connections(), 0);
}

#[tokio::test]
async fn test_metrics_track_checkouts() {
    let (pool, _factory) = opened_pool(1, 1).await;

    {
        let _conn = pool.acquire().await.unwrap();
    }
    pool.close().await;
    let failed = pool.acquire().await;
    assert!(failed.is_err());

    let metrics = pool.metrics();
    assert_eq!(metrics.connections_created, 1);
    assert_eq!(metrics.connections_closed, 1);
    assert_eq!(metrics.checkouts_successful, 1);
    assert_eq!(metrics.checkouts_failed, 1);
    assert!(metrics.checkout_success_rate() > 0.49);
}
