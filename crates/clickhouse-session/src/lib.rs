//! # clickhouse-session
//!
//! The session boundary of the ClickHouse driver: one [`Session`] is one
//! live TCP (optionally TLS) link to a server, owned by exactly one
//! connection at a time.
//!
//! This crate deliberately stops at the boundary. The wire-level packet
//! encoding, compression codecs, and TLS handshake live behind the
//! [`Session`] and [`SessionFactory`] traits, so the connection and pool
//! layers in `clickhouse-client` and `clickhouse-driver-pool` never touch
//! protocol details. Test suites plug in mock sessions through the same
//! seam.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod options;
pub mod result;
pub mod session;

pub use error::SessionError;
pub use options::{
    DEFAULT_DATABASE, DEFAULT_HOST, DEFAULT_PASSWORD, DEFAULT_PORT, DEFAULT_USER, SessionOptions,
    TlsOptions,
};
pub use result::{Column, QueryResult, Value};
pub use session::{DynSessionFactory, Session, SessionFactory};
