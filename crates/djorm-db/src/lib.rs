//! # djorm-db
//!
//! The query layer of djorm. Models describe themselves through the
//! [`Model`](model::Model) trait and a static [`ModelMeta`](model::ModelMeta);
//! a [`QuerySet`](query::QuerySet) accumulates a plan from dotted field paths
//! (`"user.profile.email__icontains"`); the [`SqlCompiler`](query::SqlCompiler)
//! turns the plan into dialect-specific SQL plus a scan plan; the
//! materializer maps flat rows back into trees of related instances.
//!
//! ## Module Overview
//!
//! - [`value`] - The backend-agnostic [`Value`](value::Value) and [`FromValue`](value::FromValue)
//! - [`fields`] - Field definitions and relation records
//! - [`model`] - The [`Model`](model::Model) trait and [`ModelMeta`](model::ModelMeta)
//! - [`dialect`] - Dialect registry
//! - [`query`] - Walker, expressions, builder, compiler, materializer
//! - [`executor`] - [`DbExecutor`](executor::DbExecutor), execution harness, CRUD helpers
//! - [`transactions`] - Begin/commit/rollback wrapper
//! - [`cancel`] - Cancellation tokens and scopes
//! - [`hooks`] - Global pre/post save and delete hooks

// These clippy lints are intentionally allowed for the query crate:
// - struct_excessive_bools: FieldDef carries the usual column flags
// - too_many_lines: the compiler's select assembly is one long sequence
// - result_large_err: OrmError is used consistently across the crate
// - format_push_string: format! with push_str reads better for SQL generation
// - doc_markdown: backtick requirements for documentation items are too strict
// - needless_pass_by_value: builder arguments mirror the public API shape
// - return_self_not_must_use: builder pattern methods are self-documenting
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::result_large_err)]
#![allow(clippy::format_push_string)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::use_self)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::match_same_arms)]
// significant_drop_tightening: false positives with async Mutex guards
#![allow(clippy::significant_drop_tightening)]
// future_not_send: terminal verbs borrow trait objects that are Send + Sync
#![allow(clippy::future_not_send)]

pub mod cancel;
pub mod dialect;
pub mod executor;
pub mod fields;
pub mod hooks;
pub mod model;
pub mod query;
pub mod transactions;
pub mod value;

pub use djorm_core::{OrmError, OrmResult};

pub use cancel::{CancelScope, CancelToken};
pub use dialect::{dialect_for, register_dialect, reset_dialects, Dialect, Placeholder, Returning};
pub use executor::{
    count_objects, create_object, delete_object, get_object, list_objects, list_objects_by_ids,
    refresh_object, save_object, update_object, DbExecutor,
};
pub use fields::{FieldDef, FieldType, OnDelete, OnUpdate, Relation, RelationKind, Through};
pub use hooks::{model_signals, reset_hooks, ModelEvent};
pub use model::{Annotations, Model, ModelMeta};
pub use query::expressions::{
    and, expr, not, or, q, q_values, subquery, subquery_count, subquery_exists, subquery_in,
    Expression, FuncExpr, RawExpr,
};
pub use query::{
    objects, CompiledQuery, Compiler, JoinKind, Lookup, QueryPlan, QuerySet, Row, SqlCompiler,
};
pub use transactions::{Transaction, TxState};
pub use value::{from_value_or_default, FromValue, Value};
