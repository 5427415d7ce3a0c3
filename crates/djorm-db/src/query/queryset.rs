//! The query-set builder.
//!
//! A [`QuerySet`] is a lazy, typed wrapper around a [`QueryPlan`]. Builder
//! methods take `&self` and return a modified clone, so a query set can be
//! reused as the base of several queries. Nothing touches the database until a
//! terminal verb (`all`, `first`, `get`, `count`, `exists`, `values_list`,
//! `update`, `delete`, `create`, `bulk_create`) is awaited with an executor.
//!
//! Paths are checked as they are added. The first invalid path, lookup or
//! join is recorded on the plan, logged, and returned by the terminal verb.
//!
//! # Examples
//!
//! ```ignore
//! let open = objects::<Todo>()
//!     .filter_by("title__icontains", "test")
//!     .filter_by("done", false)
//!     .order_by(["-id"])
//!     .limit(5)
//!     .all(&db)
//!     .await?;
//! ```

use std::fmt;
use std::marker::PhantomData;

use djorm_core::logging::query_span;
use tracing::Instrument;

use super::compiler::{update_fields, ExplicitJoin, JoinKind, QueryPlan};
use super::expressions::{q, Expression};
use super::materializer::{materialize_as, value_rows};
use super::walker::walk_fields;
use crate::dialect::Dialect;
use crate::executor::{create_instance, run_execute, run_query, DbExecutor};
use crate::hooks::{model_signals, ModelEvent};
use crate::model::Model;
use crate::value::{FromValue, Value};
use crate::{OrmError, OrmResult};

/// Starts a query set over `M`.
pub fn objects<M: Model>() -> QuerySet<M> {
    QuerySet::new()
}

/// A lazy, composable query over model `M`.
pub struct QuerySet<M: Model> {
    plan: QueryPlan,
    model: PhantomData<fn() -> M>,
}

impl<M: Model> Clone for QuerySet<M> {
    fn clone(&self) -> Self {
        Self {
            plan: self.plan.clone(),
            model: PhantomData,
        }
    }
}

impl<M: Model> fmt::Debug for QuerySet<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySet")
            .field("model", &self.plan.model.model_name)
            .field("plan", &self.plan)
            .finish()
    }
}

impl<M: Model> Default for QuerySet<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> QuerySet<M> {
    /// A query set returning every row of `M`.
    pub fn new() -> Self {
        Self {
            plan: QueryPlan::new(M::meta()),
            model: PhantomData,
        }
    }

    /// The accumulated plan.
    pub const fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    fn with(&self, f: impl FnOnce(&mut QueryPlan) -> OrmResult<()>) -> Self {
        let mut next = self.clone();
        if let Err(err) = f(&mut next.plan) {
            next.plan.record_error(err);
        }
        next
    }

    fn check_path(plan: &QueryPlan, path: &str) -> OrmResult<()> {
        walk_fields(plan.model, path).map(|_| ())
    }

    fn check_expression(plan: &QueryPlan, expr: &Expression) -> OrmResult<()> {
        expr.check()?;
        expr.paths()
            .into_iter()
            .try_for_each(|p| Self::check_path(plan, p))
    }

    // ── Projection ─────────────────────────────────────────────────────

    /// Replaces the projection.
    ///
    /// `"*"` selects the root's scalar columns, `"rel.*"` those of `rel`, and a
    /// bare forward relation its key column.
    pub fn select<I, S>(&self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        self.with(|plan| {
            paths.iter().try_for_each(|p| Self::check_path(plan, p))?;
            plan.select = paths;
            Ok(())
        })
    }

    /// Adds a computed column, stored in the root instance's annotations.
    pub fn annotate(&self, alias: impl Into<String>, expr: impl Into<Expression>) -> Self {
        let alias = alias.into();
        let expr = expr.into();
        self.with(|plan| {
            Self::check_expression(plan, &expr)?;
            plan.annotations.push((alias, expr));
            Ok(())
        })
    }

    // ── Predicates ─────────────────────────────────────────────────────

    /// Conjoins a predicate.
    pub fn filter(&self, expr: impl Into<Expression>) -> Self {
        let expr = expr.into();
        self.with(|plan| {
            Self::check_expression(plan, &expr)?;
            plan.filters.push(expr);
            Ok(())
        })
    }

    /// Conjoins `key = value`, where `key` may carry a `__lookup` suffix.
    pub fn filter_by(&self, key: &str, value: impl Into<Value>) -> Self {
        self.filter(q(key, value))
    }

    /// Conjoins every predicate.
    pub fn filter_all(&self, exprs: impl IntoIterator<Item = Expression>) -> Self {
        exprs.into_iter().fold(self.clone(), |qs, e| qs.filter(e))
    }

    /// Conjoins the negation of a predicate.
    pub fn exclude(&self, expr: impl Into<Expression>) -> Self {
        self.filter(!expr.into())
    }

    // ── Ordering and paging ────────────────────────────────────────────

    /// Replaces the ordering. A leading `-` sorts descending; annotation
    /// aliases are accepted.
    pub fn order_by<I, S>(&self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        self.with(|plan| {
            for item in &paths {
                let path = item.strip_prefix('-').unwrap_or(item);
                if !plan.annotations.iter().any(|(a, _)| a == path) {
                    Self::check_path(plan, path)?;
                }
            }
            plan.order_by = Some(paths);
            Ok(())
        })
    }

    /// Caps the number of rows.
    pub fn limit(&self, n: u64) -> Self {
        self.with(|plan| {
            plan.limit = Some(n);
            Ok(())
        })
    }

    /// Skips rows.
    pub fn offset(&self, n: u64) -> Self {
        self.with(|plan| {
            plan.offset = Some(n);
            Ok(())
        })
    }

    /// `SELECT DISTINCT`.
    pub fn distinct(&self) -> Self {
        self.with(|plan| {
            plan.distinct = true;
            Ok(())
        })
    }

    /// Makes `update` write every column field (or exactly the selected
    /// ones), zero values included.
    pub fn explicit_save(&self) -> Self {
        self.with(|plan| {
            plan.explicit_save = true;
            Ok(())
        })
    }

    // ── Joins ──────────────────────────────────────────────────────────

    /// Adds an explicit join to a relation path or a raw table.
    pub fn join(&self, kind: JoinKind, target: &str, condition: Option<(&str, &str, &str)>) -> Self {
        let join = ExplicitJoin::new(kind, target, condition);
        self.with(|plan| {
            plan.joins.push(join?);
            Ok(())
        })
    }

    /// `INNER JOIN`.
    pub fn inner_join(&self, target: &str, condition: Option<(&str, &str, &str)>) -> Self {
        self.join(JoinKind::Inner, target, condition)
    }

    /// `LEFT JOIN`.
    pub fn left_join(&self, target: &str, condition: Option<(&str, &str, &str)>) -> Self {
        self.join(JoinKind::Left, target, condition)
    }

    /// `RIGHT JOIN`.
    pub fn right_join(&self, target: &str, condition: Option<(&str, &str, &str)>) -> Self {
        self.join(JoinKind::Right, target, condition)
    }

    /// `CROSS JOIN`.
    pub fn cross_join(&self, target: &str) -> Self {
        self.join(JoinKind::Cross, target, None)
    }

    /// Compiles the SELECT for `dialect` without running it.
    pub fn to_sql(&self, dialect: &Dialect) -> OrmResult<(String, Vec<Value>)> {
        let compiled = dialect.compiler().compile_select(&self.plan)?;
        Ok((compiled.sql, compiled.args))
    }

    // ── Terminal verbs ─────────────────────────────────────────────────

    fn table(&self) -> &'static str {
        self.plan.model.db_table
    }

    /// Every matching instance.
    pub async fn all(&self, db: &dyn DbExecutor) -> OrmResult<Vec<M>> {
        async {
            let compiled = db.dialect().compiler().compile_select(&self.plan)?;
            let rows = run_query(db, &compiled).await?;
            materialize_as::<M>(&compiled.scan, rows, db.cancel_token())
        }
        .instrument(query_span("all", self.table()))
        .await
    }

    /// The first matching instance, if any.
    pub async fn first(&self, db: &dyn DbExecutor) -> OrmResult<Option<M>> {
        Ok(self.limit(1).all(db).await?.into_iter().next())
    }

    /// Exactly one matching instance.
    ///
    /// Fails with [`OrmError::NotFound`] on no match and
    /// [`OrmError::MultipleFound`] on several.
    pub async fn get(&self, db: &dyn DbExecutor) -> OrmResult<M> {
        let mut found = self.all(db).await?;
        match found.len() {
            0 => Err(OrmError::NotFound(self.plan.model.model_name.to_string())),
            1 => Ok(found.remove(0)),
            count => Err(OrmError::MultipleFound {
                model: self.plan.model.model_name.to_string(),
                count,
            }),
        }
    }

    /// The number of matching rows.
    pub async fn count(&self, db: &dyn DbExecutor) -> OrmResult<u64> {
        async {
            let compiled = db.dialect().compiler().compile_count(&self.plan)?;
            let rows = run_query(db, &compiled).await?;
            let row = rows
                .into_iter()
                .next()
                .ok_or_else(|| OrmError::driver_message("COUNT returned no row"))?;
            let n = row.get_by_index::<i64>(0)?;
            u64::try_from(n).map_err(|_| OrmError::TypeMismatch(format!("negative count {n}")))
        }
        .instrument(query_span("count", self.table()))
        .await
    }

    /// Returns `true` if any row matches.
    pub async fn exists(&self, db: &dyn DbExecutor) -> OrmResult<bool> {
        Ok(self.limit(1).count(db).await? > 0)
    }

    /// Tuples of the requested paths, one per result row.
    pub async fn values_list<I, S>(&self, db: &dyn DbExecutor, paths: I) -> OrmResult<Vec<Vec<Value>>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        async {
            self.plan.check()?;
            for path in &paths {
                Self::check_path(&self.plan, path)?;
            }
            let compiled = db
                .dialect()
                .compiler()
                .compile_values(&self.plan, &paths)?;
            let rows = run_query(db, &compiled).await?;
            value_rows(&compiled.scan, rows, db.cancel_token())
        }
        .instrument(query_span("values_list", self.table()))
        .await
    }

    /// Single-column convenience over [`values_list`](Self::values_list).
    pub async fn values_flat<T: FromValue>(&self, db: &dyn DbExecutor, path: &str) -> OrmResult<Vec<T>> {
        self.values_list(db, [path])
            .await?
            .iter()
            .filter_map(|row| row.first())
            .map(T::from_value)
            .collect()
    }

    /// Updates matching rows from `partial`, returning the rows affected.
    ///
    /// Without [`explicit_save`](Self::explicit_save) only the non-zero
    /// fields of `partial` are written; when there is nothing to write no
    /// statement runs.
    pub async fn update(&self, db: &dyn DbExecutor, partial: &M) -> OrmResult<u64> {
        async {
            self.plan.check()?;
            if self.plan.filters.is_empty() {
                return Err(OrmError::UnsafeUpdate(self.table().to_string()));
            }
            let fields = update_fields(&self.plan, partial)?;
            if fields.is_empty() {
                tracing::debug!(table = self.table(), "update skipped: no fields to write");
                return Ok(0);
            }
            let compiled = db.dialect().compiler().compile_update(&self.plan, partial)?;
            let event = ModelEvent {
                table: self.table(),
                model_name: self.plan.model.model_name,
                driver: db.driver().to_string(),
                pk: Value::Null,
                values: fields.iter().map(|(f, v)| (f.name, v.clone())).collect(),
                created: false,
            };
            model_signals().pre_save.send(&event);
            let affected = run_execute(db, &compiled).await?;
            model_signals().post_save.send(&event);
            Ok(affected)
        }
        .instrument(query_span("update", self.table()))
        .await
    }

    /// Deletes matching rows, returning the rows affected.
    pub async fn delete(&self, db: &dyn DbExecutor) -> OrmResult<u64> {
        async {
            let compiled = db.dialect().compiler().compile_delete(&self.plan)?;
            let event = ModelEvent {
                table: self.table(),
                model_name: self.plan.model.model_name,
                driver: db.driver().to_string(),
                pk: Value::Null,
                values: Vec::new(),
                created: false,
            };
            model_signals().pre_delete.send(&event);
            let affected = run_execute(db, &compiled).await?;
            model_signals().post_delete.send(&event);
            Ok(affected)
        }
        .instrument(query_span("delete", self.table()))
        .await
    }

    /// Inserts `instance`, writing generated columns back onto it.
    pub async fn create(&self, db: &dyn DbExecutor, instance: &mut M) -> OrmResult<()> {
        self.plan.check()?;
        create_instance(db, instance)
            .instrument(query_span("create", self.table()))
            .await
    }

    /// Inserts every instance in order, returning how many were inserted.
    pub async fn bulk_create(&self, db: &dyn DbExecutor, instances: &mut [M]) -> OrmResult<u64> {
        self.plan.check()?;
        async {
            let mut inserted = 0;
            for instance in instances.iter_mut() {
                create_instance(db, instance).await?;
                inserted += 1;
            }
            Ok(inserted)
        }
        .instrument(query_span("bulk_create", self.table()))
        .await
    }
}
