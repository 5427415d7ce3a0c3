//! Query building, compilation, and materialization.
//!
//! This module contains the complete query pipeline, leaves first:
//!
//! - [`walker`] - Dotted field paths and join alias generation
//! - [`lookups`] - The closed set of `__lookup` suffixes
//! - [`expressions`] - Predicate and computed-value trees, subqueries
//! - [`queryset`] - The lazy, typed [`QuerySet`] builder and its terminal verbs
//! - [`compiler`] - Query plans and SQL compilation
//! - [`materializer`] - Rows back into model instances

pub mod compiler;
pub mod expressions;
pub mod lookups;
pub mod materializer;
pub mod queryset;
pub mod walker;

pub use compiler::{
    CompiledQuery, Compiler, ExplicitJoin, JoinKind, QueryPlan, Row, ScanPlan, SqlCompiler,
};
pub use expressions::Expression;
pub use lookups::Lookup;
pub use queryset::{objects, QuerySet};
pub use walker::{walk_fields, AliasGenerator, FieldWalk};
