//! Global write hooks.
//!
//! Every write verb fires `pre_save`/`post_save` (INSERT, UPDATE) or
//! `pre_delete`/`post_delete` (DELETE) on the process-wide
//! [`ModelSignals<ModelEvent>`] returned by [`model_signals`].
//!
//! ```
//! use std::sync::Arc;
//! use djorm_db::hooks::{model_signals, ModelEvent};
//!
//! model_signals().post_save.connect("audit", Arc::new(|e: &ModelEvent| {
//!     tracing::info!(table = e.table, created = e.created, "saved");
//! }));
//! # djorm_db::hooks::reset_hooks();
//! ```

use djorm_signals::ModelSignals;
use once_cell::sync::Lazy;

use crate::model::Model;
use crate::value::Value;
use crate::OrmResult;

/// Snapshot of one write, handed to hook receivers.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelEvent {
    /// Table written.
    pub table: &'static str,
    /// Model name.
    pub model_name: &'static str,
    /// Driver identity of the executor.
    pub driver: String,
    /// Primary key; NULL for query-set level writes and before an INSERT.
    pub pk: Value,
    /// Column values, in declaration order. Empty for query-set deletes.
    pub values: Vec<(&'static str, Value)>,
    /// The write is an INSERT.
    pub created: bool,
}

impl ModelEvent {
    /// Captures `instance` for a write on `driver`.
    pub fn snapshot(instance: &dyn Model, driver: &str, created: bool) -> OrmResult<Self> {
        let meta = instance.definitions();
        Ok(Self {
            table: meta.db_table,
            model_name: meta.model_name,
            driver: driver.to_string(),
            pk: instance.pk_value()?,
            values: instance.field_values()?,
            created,
        })
    }
}

static MODEL_SIGNALS: Lazy<ModelSignals<ModelEvent>> = Lazy::new(ModelSignals::new);

/// The global write hooks.
pub fn model_signals() -> &'static ModelSignals<ModelEvent> {
    &MODEL_SIGNALS
}

/// Disconnects every hook receiver.
pub fn reset_hooks() {
    MODEL_SIGNALS.reset();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_models::Todo;

    #[test]
    fn test_snapshot() {
        let todo = Todo {
            id: 4,
            title: "t".into(),
            ..Todo::default()
        };
        let event = ModelEvent::snapshot(&todo, "sqlite", false).unwrap();
        assert_eq!(event.table, "todos");
        assert_eq!(event.pk, Value::Int(4));
        assert_eq!(event.values.len(), 4);
        assert_eq!(event.values[1], ("title", Value::from("t")));
        assert!(!event.created);
    }
}
