//! # clickhouse-driver-pool
//!
//! Bounded, fair connection pool for the ClickHouse driver.
//!
//! The pool owns at most `maxsize` connections, pre-warms `minsize` of
//! them on [`Pool::open`], grows on demand, and parks saturated callers
//! in an explicit FIFO waiter queue so admission order is a property of
//! the pool rather than of the scheduler. Connections come back through
//! the [`PooledConnection`] RAII guard, which releases on every exit
//! path — normal return, panic, or future cancellation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use clickhouse_driver_pool::Pool;
//!
//! let pool = Pool::builder()
//!     .minsize(5)
//!     .maxsize(20)
//!     .options(options)
//!     .factory(factory)
//!     .build()?;
//! pool.open().await?;
//!
//! {
//!     let mut conn = pool.acquire().await?;
//!     let mut cursor = conn.cursor();
//!     cursor.execute("SELECT 1").await?;
//! } // released here
//!
//! pool.close().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod pool;

pub use config::PoolConfig;
pub use error::PoolError;
pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolSnapshot, PoolStatus, PooledConnection};
