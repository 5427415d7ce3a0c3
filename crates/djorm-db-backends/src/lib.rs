//! # djorm-db-backends
//!
//! Executors for djorm. Each backend implements
//! [`DbExecutor`](djorm_db::DbExecutor) over one driver and is compiled in
//! behind its cargo feature:
//!
//! - `sqlite` - [`SqliteBackend`](sqlite::SqliteBackend) on `rusqlite`
//! - `postgres` - [`PostgresBackend`](postgresql::PostgresBackend) on `tokio-postgres` + `deadpool-postgres`
//! - `mysql` - [`MySqlBackend`](mysql::MySqlBackend) on `mysql_async`
//!
//! [`connect`] picks the backend from a [`DatabaseConfig`].

#![allow(clippy::result_large_err)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::significant_drop_tightening)]

pub mod base;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgresql;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use base::{connect, DatabaseConfig};
#[cfg(feature = "mysql")]
pub use mysql::{MySqlBackend, MySqlConnection};
#[cfg(feature = "postgres")]
pub use postgresql::{PostgresBackend, PostgresConnection};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;
