//! Database executor trait and the execution harness.
//!
//! [`DbExecutor`] is the minimal async interface the query layer needs from a
//! backend; the concrete executors live in `djorm-db-backends`. Everything
//! that runs a statement goes through [`run_query`] / [`run_execute`], which
//! log the SQL under the `djorm::sql` target and race the driver call against
//! the executor's cancellation token.
//!
//! The free functions below are the instance-level CRUD helpers. Each write
//! fires the global hooks in [`crate::hooks`].

use djorm_core::logging::SQL_TARGET;

use crate::cancel::{cancellable, CancelToken};
use crate::dialect::{dialect_for, Dialect, Returning};
use crate::hooks::{model_signals, ModelEvent};
use crate::model::Model;
use crate::query::compiler::{CompiledQuery, QueryPlan, Row};
use crate::query::expressions::{and, q, Expression};
use crate::query::queryset::objects;
use crate::value::Value;
use crate::{OrmError, OrmResult};

/// Minimal async database executor.
///
/// Implemented by the backends, by [`Transaction`](crate::transactions::Transaction)
/// and by [`CancelScope`](crate::cancel::CancelScope). Driver errors are
/// returned as [`OrmError::Driver`] without rewording.
#[async_trait::async_trait]
pub trait DbExecutor: Send + Sync {
    /// The driver identity, e.g. `"sqlite"`.
    fn driver(&self) -> &str;

    /// The dialect used to compile statements for this executor.
    fn dialect(&self) -> Dialect {
        dialect_for(self.driver())
    }

    /// The token every statement on this executor observes.
    fn cancel_token(&self) -> Option<&CancelToken> {
        None
    }

    /// Runs a statement that returns no rows; returns the rows affected.
    async fn execute_sql(&self, sql: &str, params: &[Value]) -> OrmResult<u64>;

    /// Runs a query and returns every row.
    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>>;

    /// Runs an INSERT and returns the generated key.
    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> OrmResult<Value>;
}

fn log_statement(db: &dyn DbExecutor, compiled: &CompiledQuery) {
    tracing::debug!(
        target: SQL_TARGET,
        driver = db.driver(),
        sql = %compiled.sql,
        args = compiled.args.len(),
        "executing"
    );
}

/// Runs a compiled query, honouring cancellation.
pub async fn run_query(db: &dyn DbExecutor, compiled: &CompiledQuery) -> OrmResult<Vec<Row>> {
    log_statement(db, compiled);
    cancellable(db.cancel_token(), db.query(&compiled.sql, &compiled.args)).await
}

/// Runs a compiled statement, honouring cancellation.
pub async fn run_execute(db: &dyn DbExecutor, compiled: &CompiledQuery) -> OrmResult<u64> {
    log_statement(db, compiled);
    cancellable(db.cancel_token(), db.execute_sql(&compiled.sql, &compiled.args)).await
}

/// A predicate identifying `instance`: its primary key when set, else the
/// first non-zero unique field, else the first fully set unique-together
/// group.
pub fn unique_predicate(instance: &dyn Model) -> OrmResult<Expression> {
    let meta = instance.definitions();
    if let Some(pk) = meta.pk() {
        let value = instance.get_value(pk.name)?;
        if !value.is_zero() {
            return Ok(q(pk.name, value));
        }
    }
    for field in meta.unique_fields().filter(|f| f.has_column()) {
        let value = instance.get_value(field.name)?;
        if !value.is_zero() {
            return Ok(q(field.name, value));
        }
    }
    for group in &meta.unique_together {
        let values = group
            .iter()
            .map(|name| Ok((*name, instance.get_value(name)?)))
            .collect::<OrmResult<Vec<_>>>()?;
        if values.iter().all(|(_, v)| !v.is_zero()) {
            return Ok(and(values.into_iter().map(|(name, v)| q(name, v))));
        }
    }
    Err(OrmError::NoUniqueKey(meta.db_table.to_string()))
}

/// Inserts `instance` and writes generated columns back onto it.
///
/// Dialects with RETURNING read the generated columns from the statement;
/// last-insert-id dialects write the returned key into the primary key;
/// otherwise the row is read back by its unique fields.
pub async fn create_instance(db: &dyn DbExecutor, instance: &mut dyn Model) -> OrmResult<()> {
    let driver = db.driver().to_string();
    model_signals()
        .pre_save
        .send(&ModelEvent::snapshot(instance, &driver, true)?);

    let meta = instance.definitions();
    let dialect = db.dialect();
    let compiled = dialect.compiler().compile_insert(meta, instance)?;

    match dialect.returning {
        _ if compiled.returning.is_empty() => {
            run_execute(db, &compiled).await?;
        }
        Returning::Columns => {
            let row = run_query(db, &compiled)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| OrmError::driver_message("INSERT ... RETURNING produced no row"))?;
            for (field, value) in compiled.returning.iter().zip(row.into_values()) {
                instance.set_value(field.name, field.field_type.normalize(value)?)?;
            }
        }
        Returning::LastInsertId => {
            log_statement(db, &compiled);
            let id = cancellable(
                db.cancel_token(),
                db.insert_returning_id(&compiled.sql, &compiled.args),
            )
            .await?;
            if let Some(pk) = compiled.returning.iter().find(|f| f.primary_key) {
                instance.set_value(pk.name, pk.field_type.normalize(id)?)?;
            }
        }
        Returning::None => {
            run_execute(db, &compiled).await?;
            let mut plan = QueryPlan::new(meta);
            plan.filters.push(unique_predicate(instance)?);
            let reselect = dialect.compiler().compile_select(&plan)?;
            let rows = run_query(db, &reselect).await?;
            let fetched = crate::query::materializer::materialize(
                &reselect.scan,
                rows,
                db.cancel_token(),
            )?;
            let fetched = match fetched.as_slice() {
                [one] => one,
                [] => return Err(OrmError::NotFound(meta.model_name.to_string())),
                many => {
                    return Err(OrmError::MultipleFound {
                        model: meta.model_name.to_string(),
                        count: many.len(),
                    })
                }
            };
            for field in &compiled.returning {
                instance.set_value(field.name, fetched.get_value(field.name)?)?;
            }
        }
    }

    model_signals()
        .post_save
        .send(&ModelEvent::snapshot(instance, &driver, true)?);
    Ok(())
}

/// Writes every column field of `instance` to the row it identifies.
pub async fn update_instance(db: &dyn DbExecutor, instance: &dyn Model) -> OrmResult<u64> {
    let meta = instance.definitions();
    let mut plan = QueryPlan::new(meta);
    plan.explicit_save = true;
    plan.filters.push(unique_predicate(instance)?);
    let compiled = db.dialect().compiler().compile_update(&plan, instance)?;

    let event = ModelEvent::snapshot(instance, db.driver(), false)?;
    model_signals().pre_save.send(&event);
    let affected = run_execute(db, &compiled).await?;
    model_signals().post_save.send(&event);
    Ok(affected)
}

/// Deletes the row `instance` identifies.
pub async fn delete_instance(db: &dyn DbExecutor, instance: &dyn Model) -> OrmResult<u64> {
    let meta = instance.definitions();
    let mut plan = QueryPlan::new(meta);
    plan.filters.push(unique_predicate(instance)?);
    let compiled = db.dialect().compiler().compile_delete(&plan)?;

    let event = ModelEvent::snapshot(instance, db.driver(), false)?;
    model_signals().pre_delete.send(&event);
    let affected = run_execute(db, &compiled).await?;
    model_signals().post_delete.send(&event);
    Ok(affected)
}

// ── Model CRUD free functions ──────────────────────────────────────────

fn pk_name<T: Model>() -> OrmResult<&'static str> {
    let meta = T::meta();
    meta.pk()
        .map(|pk| pk.name)
        .ok_or_else(|| OrmError::NoUniqueKey(meta.db_table.to_string()))
}

/// Fetches one instance by primary key.
///
/// # Errors
///
/// [`OrmError::NotFound`] when no row has that key.
pub async fn get_object<T: Model>(db: &dyn DbExecutor, id: impl Into<Value>) -> OrmResult<T> {
    objects::<T>().filter_by(pk_name::<T>()?, id).get(db).await
}

/// A page of instances in the given ordering.
pub async fn list_objects<T: Model>(
    db: &dyn DbExecutor,
    offset: u64,
    limit: u64,
    ordering: &[&str],
) -> OrmResult<Vec<T>> {
    let mut qs = objects::<T>().offset(offset).limit(limit);
    if !ordering.is_empty() {
        qs = qs.order_by(ordering.iter().copied());
    }
    qs.all(db).await
}

/// A page of the instances whose primary key is in `ids`.
pub async fn list_objects_by_ids<T: Model>(
    db: &dyn DbExecutor,
    offset: u64,
    limit: u64,
    ids: Vec<Value>,
) -> OrmResult<Vec<T>> {
    let key = format!("{}__in", pk_name::<T>()?);
    objects::<T>()
        .filter_by(&key, Value::List(ids))
        .offset(offset)
        .limit(limit)
        .all(db)
        .await
}

/// The number of rows of `T`.
pub async fn count_objects<T: Model>(db: &dyn DbExecutor) -> OrmResult<u64> {
    objects::<T>().count(db).await
}

/// Inserts `obj`, writing generated columns back.
pub async fn create_object<T: Model>(db: &dyn DbExecutor, obj: &mut T) -> OrmResult<()> {
    create_instance(db, obj).await
}

/// Writes every column of `obj` to the row it identifies.
pub async fn update_object<T: Model>(db: &dyn DbExecutor, obj: &T) -> OrmResult<u64> {
    update_instance(db, obj).await
}

/// Deletes the row `obj` identifies.
///
/// # Errors
///
/// [`OrmError::NoUniqueKey`] when neither the primary key, a unique field,
/// nor a unique-together group is set.
pub async fn delete_object<T: Model>(db: &dyn DbExecutor, obj: &T) -> OrmResult<u64> {
    delete_instance(db, obj).await
}

/// Inserts `obj` when its primary key is zero, otherwise updates it.
///
/// An update that matches no row falls back to an insert. Returns `true`
/// when a row was inserted.
pub async fn save_object<T: Model>(db: &dyn DbExecutor, obj: &mut T) -> OrmResult<bool> {
    if obj.pk_value()?.is_zero() {
        create_instance(db, obj).await?;
        return Ok(true);
    }
    if update_instance(db, obj).await? == 0 {
        create_instance(db, obj).await?;
        return Ok(true);
    }
    Ok(false)
}

/// Reloads `obj` from the row it identifies.
pub async fn refresh_object<T: Model>(db: &dyn DbExecutor, obj: &mut T) -> OrmResult<()> {
    let fresh = objects::<T>().filter(unique_predicate(obj)?).get(db).await?;
    *obj = fresh;
    Ok(())
}

#[cfg(test)]
pub(crate) mod mock {
    //! A scripted executor for unit tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Script {
        statements: Vec<(String, Vec<Value>)>,
        rows: VecDeque<Vec<Row>>,
        ids: VecDeque<i64>,
        affected: u64,
    }

    /// Records statements and replays queued results.
    pub(crate) struct MockExecutor {
        driver: &'static str,
        script: Mutex<Script>,
    }

    impl MockExecutor {
        pub(crate) fn new(driver: &'static str) -> Self {
            Self {
                driver,
                script: Mutex::new(Script {
                    affected: 1,
                    ..Script::default()
                }),
            }
        }

        pub(crate) fn sqlite() -> Self {
            Self::new("sqlite")
        }

        pub(crate) fn row(cells: &[(&str, Value)]) -> Row {
            Row::new(
                cells.iter().map(|(c, _)| (*c).to_string()).collect(),
                cells.iter().map(|(_, v)| v.clone()).collect(),
            )
        }

        pub(crate) fn push_rows(&self, rows: Vec<Row>) {
            self.script.lock().unwrap().rows.push_back(rows);
        }

        pub(crate) fn set_last_insert_ids(&self, ids: impl IntoIterator<Item = i64>) {
            self.script.lock().unwrap().ids.extend(ids);
        }

        pub(crate) fn set_affected(&self, n: u64) {
            self.script.lock().unwrap().affected = n;
        }

        pub(crate) fn statements(&self) -> Vec<(String, Vec<Value>)> {
            self.script.lock().unwrap().statements.clone()
        }

        fn record(&self, sql: &str, params: &[Value]) {
            self.script
                .lock()
                .unwrap()
                .statements
                .push((sql.to_string(), params.to_vec()));
        }
    }

    #[async_trait::async_trait]
    impl DbExecutor for MockExecutor {
        fn driver(&self) -> &str {
            self.driver
        }

        async fn execute_sql(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
            self.record(sql, params);
            Ok(self.script.lock().unwrap().affected)
        }

        async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
            self.record(sql, params);
            Ok(self.script.lock().unwrap().rows.pop_front().unwrap_or_default())
        }

        async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> OrmResult<Value> {
            self.record(sql, params);
            let id = self.script.lock().unwrap().ids.pop_front().unwrap_or(1);
            Ok(Value::Int(id))
        }
    }
}
