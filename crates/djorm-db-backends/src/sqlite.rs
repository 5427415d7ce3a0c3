//! SQLite executor using `rusqlite`.
//!
//! [`SqliteBackend`] holds one connection behind an async mutex and runs every
//! statement through `tokio::task::spawn_blocking`. Because there is only one
//! connection, a [`Transaction`](djorm_db::Transaction) opened on the backend
//! pins it for free.
//!
//! - WAL journal mode and foreign keys are switched on at open
//! - `:memory:` opens an in-memory database

use std::path::PathBuf;
use std::sync::Arc;

use djorm_core::{OrmError, OrmResult};
use djorm_db::dialect::SQLITE;
use djorm_db::{DbExecutor, Row, Value};
use rusqlite::types::ValueRef;
use tokio::sync::Mutex;

/// A SQLite executor.
pub struct SqliteBackend {
    path: PathBuf,
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").field("path", &self.path).finish()
    }
}

impl SqliteBackend {
    /// Opens the database at `path`, or an in-memory one for `:memory:`.
    ///
    /// # Errors
    ///
    /// Returns a driver error if the file cannot be opened or the pragmas fail.
    pub fn open(path: impl Into<PathBuf>) -> OrmResult<Self> {
        let path = path.into();
        let conn = if path.to_str() == Some(":memory:") {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&path)
        }
        .map_err(OrmError::driver)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(OrmError::driver)?;
        tracing::debug!(path = %path.display(), "sqlite database opened");

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns a driver error if the database cannot be created.
    pub fn memory() -> OrmResult<Self> {
        Self::open(":memory:")
    }

    /// The database file path.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn bind_params(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> OrmResult<()> {
        for (i, param) in params.iter().enumerate() {
            let idx = i + 1;
            match param {
                Value::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null),
                Value::Bool(b) => stmt.raw_bind_parameter(idx, b),
                Value::Int(v) => stmt.raw_bind_parameter(idx, v),
                Value::Float(v) => stmt.raw_bind_parameter(idx, v),
                Value::String(s) => stmt.raw_bind_parameter(idx, s.as_str()),
                Value::Bytes(b) => stmt.raw_bind_parameter(idx, b.as_slice()),
                Value::Date(d) => stmt.raw_bind_parameter(idx, d.to_string()),
                Value::DateTime(dt) => {
                    stmt.raw_bind_parameter(idx, dt.format("%Y-%m-%d %H:%M:%S%.f").to_string())
                }
                Value::DateTimeTz(dt) => stmt.raw_bind_parameter(idx, dt.to_rfc3339()),
                Value::Time(t) => stmt.raw_bind_parameter(idx, t.to_string()),
                Value::Duration(d) => {
                    stmt.raw_bind_parameter(idx, d.num_microseconds().unwrap_or(i64::MAX))
                }
                Value::Uuid(u) => stmt.raw_bind_parameter(idx, u.to_string()),
                Value::Json(j) => stmt.raw_bind_parameter(idx, j.to_string()),
                Value::List(vals) => stmt.raw_bind_parameter(idx, list_json(vals)),
            }
            .map_err(OrmError::driver)?;
        }
        Ok(())
    }

    fn convert_row(sqlite_row: &rusqlite::Row<'_>, column_names: &[String]) -> OrmResult<Row> {
        let values = (0..column_names.len())
            .map(|i| {
                Ok(match sqlite_row.get_ref(i).map_err(OrmError::driver)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(v) => Value::Int(v),
                    ValueRef::Real(v) => Value::Float(v),
                    // TEXT that is not valid UTF-8 comes back byte for byte.
                    ValueRef::Text(b) => std::str::from_utf8(b)
                        .map_or_else(|_| Value::Bytes(b.to_vec()), |s| Value::String(s.to_string())),
                    ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
                })
            })
            .collect::<OrmResult<Vec<_>>>()?;
        Ok(Row::new(column_names.to_vec(), values))
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> OrmResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> OrmResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await
        .map_err(OrmError::driver)?
    }
}

/// Lists bind as a JSON array of their text renderings.
fn list_json(vals: &[Value]) -> String {
    serde_json::Value::from(vals.iter().map(ToString::to_string).collect::<Vec<_>>()).to_string()
}

#[async_trait::async_trait]
impl DbExecutor for SqliteBackend {
    fn driver(&self) -> &str {
        SQLITE
    }

    async fn execute_sql(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(OrmError::driver)?;
            Self::bind_params(&mut stmt, &params)?;
            let count = stmt.raw_execute().map_err(OrmError::driver)?;
            Ok(count as u64)
        })
        .await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(OrmError::driver)?;
            let column_names: Vec<String> =
                stmt.column_names().into_iter().map(String::from).collect();
            Self::bind_params(&mut stmt, &params)?;

            let mut raw_rows = stmt.raw_query();
            let mut rows = Vec::new();
            while let Some(row) = raw_rows.next().map_err(OrmError::driver)? {
                rows.push(Self::convert_row(row, &column_names)?);
            }
            Ok(rows)
        })
        .await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> OrmResult<Value> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(OrmError::driver)?;
            Self::bind_params(&mut stmt, &params)?;
            stmt.raw_execute().map_err(OrmError::driver)?;
            Ok(Value::Int(conn.last_insert_rowid()))
        })
        .await
    }
}
