//! Begin/commit/rollback wrapper.
//!
//! [`Transaction::begin`] issues `BEGIN` on an executor and returns a guard
//! that is itself a [`DbExecutor`], so query-set verbs run inside the
//! transaction by passing the guard instead of the connection. The guard is a
//! small state machine: `Active -> Committed | RolledBack`. Any verb, commit,
//! or rollback on a finished transaction fails with
//! [`OrmError::NoTransaction`]. Verbs are serialized by an async mutex.
//!
//! The executor must pin a single connection for the lifetime of the
//! transaction; pooled backends expose a dedicated connection for this.
//!
//! ```ignore
//! let tx = Transaction::begin(&conn).await?;
//! objects::<Todo>().filter_by("id", 1).delete(&tx).await?;
//! tx.commit().await?;
//! ```

use tokio::sync::Mutex;

use crate::cancel::CancelToken;
use crate::dialect::Dialect;
use crate::executor::DbExecutor;
use crate::query::compiler::Row;
use crate::value::Value;
use crate::{OrmError, OrmResult};

/// Where a transaction is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// `BEGIN` ran; statements are accepted.
    Active,
    /// `COMMIT` ran.
    Committed,
    /// `ROLLBACK` ran.
    RolledBack,
}

impl TxState {
    const fn label(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        }
    }
}

/// An open transaction on one executor.
pub struct Transaction<'a> {
    db: &'a dyn DbExecutor,
    state: Mutex<TxState>,
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("driver", &self.db.driver())
            .field("state", &self.state.try_lock().map(|s| *s).ok())
            .finish()
    }
}

impl<'a> Transaction<'a> {
    /// Starts a transaction on `db`.
    pub async fn begin(db: &'a dyn DbExecutor) -> OrmResult<Self> {
        db.execute_sql("BEGIN", &[]).await?;
        tracing::info!(driver = db.driver(), "transaction started");
        Ok(Self {
            db,
            state: Mutex::new(TxState::Active),
        })
    }

    /// The current state.
    pub async fn state(&self) -> TxState {
        *self.state.lock().await
    }

    async fn finish(&self, sql: &str, next: TxState) -> OrmResult<()> {
        let mut state = self.state.lock().await;
        if *state != TxState::Active {
            return Err(OrmError::NoTransaction(format!(
                "cannot {} a transaction that is already {}",
                sql.to_ascii_lowercase(),
                state.label()
            )));
        }
        self.db.execute_sql(sql, &[]).await?;
        *state = next;
        tracing::info!(driver = self.db.driver(), state = next.label(), "transaction finished");
        Ok(())
    }

    /// Commits the transaction.
    pub async fn commit(&self) -> OrmResult<()> {
        self.finish("COMMIT", TxState::Committed).await
    }

    /// Rolls the transaction back.
    pub async fn rollback(&self) -> OrmResult<()> {
        self.finish("ROLLBACK", TxState::RolledBack).await
    }
}

fn inactive(state: TxState) -> OrmError {
    OrmError::NoTransaction(format!("transaction is {}", state.label()))
}

#[async_trait::async_trait]
impl DbExecutor for Transaction<'_> {
    fn driver(&self) -> &str {
        self.db.driver()
    }

    fn dialect(&self) -> Dialect {
        self.db.dialect()
    }

    fn cancel_token(&self) -> Option<&CancelToken> {
        self.db.cancel_token()
    }

    async fn execute_sql(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        let state = self.state.lock().await;
        if *state != TxState::Active {
            return Err(inactive(*state));
        }
        self.db.execute_sql(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        let state = self.state.lock().await;
        if *state != TxState::Active {
            return Err(inactive(*state));
        }
        self.db.query(sql, params).await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> OrmResult<Value> {
        let state = self.state.lock().await;
        if *state != TxState::Active {
            return Err(inactive(*state));
        }
        self.db.insert_returning_id(sql, params).await
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if matches!(self.state.try_lock().map(|s| *s), Ok(TxState::Active)) {
            tracing::warn!(
                driver = self.db.driver(),
                "transaction dropped while active; the connection will roll it back"
            );
        }
    }
}
