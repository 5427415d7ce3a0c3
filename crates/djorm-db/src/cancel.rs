//! Cooperative cancellation of terminal verbs.
//!
//! A [`CancelToken`] is shared between the caller and the execution harness.
//! Every driver call is raced against the token and the materializer checks
//! it between rows; a cancelled verb returns [`OrmError::Cancelled`] and drops
//! any partial results.
//!
//! ```
//! # async fn demo(db: &dyn djorm_db::DbExecutor) {
//! use djorm_db::cancel::{CancelScope, CancelToken};
//!
//! let token = CancelToken::new();
//! let scoped = CancelScope::new(db, token.clone());
//! // hand `scoped` to query-set verbs; call `token.cancel()` from elsewhere
//! # let _ = scoped;
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::dialect::Dialect;
use crate::executor::DbExecutor;
use crate::query::compiler::Row;
use crate::value::Value;
use crate::{OrmError, OrmResult};

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cloneable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every verb observing this token.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves when the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Fails with [`OrmError::Cancelled`] if the token is cancelled.
    pub fn check(&self) -> OrmResult<()> {
        if self.is_cancelled() {
            Err(OrmError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Runs `fut` unless `token` fires first.
pub async fn cancellable<T, F>(token: Option<&CancelToken>, fut: F) -> OrmResult<T>
where
    F: Future<Output = OrmResult<T>>,
{
    let Some(token) = token else {
        return fut.await;
    };
    token.check()?;
    tokio::select! {
        biased;
        () = token.cancelled() => Err(OrmError::Cancelled),
        out = fut => out,
    }
}

/// An executor whose verbs observe a [`CancelToken`].
pub struct CancelScope<'a> {
    inner: &'a dyn DbExecutor,
    token: CancelToken,
}

impl<'a> CancelScope<'a> {
    /// Wraps `inner` so every statement races against `token`.
    pub fn new(inner: &'a dyn DbExecutor, token: CancelToken) -> Self {
        Self { inner, token }
    }

    /// The token observed by this scope.
    pub const fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl std::fmt::Debug for CancelScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelScope")
            .field("driver", &self.inner.driver())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

#[async_trait::async_trait]
impl DbExecutor for CancelScope<'_> {
    fn driver(&self) -> &str {
        self.inner.driver()
    }

    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn cancel_token(&self) -> Option<&CancelToken> {
        Some(&self.token)
    }

    async fn execute_sql(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        cancellable(Some(&self.token), self.inner.execute_sql(sql, params)).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        cancellable(Some(&self.token), self.inner.query(sql, params)).await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> OrmResult<Value> {
        cancellable(Some(&self.token), self.inner.insert_returning_id(sql, params)).await
    }
}
