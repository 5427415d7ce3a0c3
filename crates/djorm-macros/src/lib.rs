//! # djorm-macros
//!
//! `#[derive(Model)]` for djorm. The generated code refers to the query crate
//! as `::djorm_db` unless `#[model(crate_path = "...")]` says otherwise (use
//! `"::djorm::db"` when depending on the facade crate only).
//!
//! This crate is independent of the other djorm crates because proc-macro
//! crates cannot depend on crates that use them.

mod model;
mod string_list;

use proc_macro::TokenStream;
use syn::parse_macro_input;

/// Derives `djorm_db::model::Model`.
///
/// Struct attributes: `#[model(table = "...", app = "...", ordering("-id"),
/// unique_together("title, user"), crate_path = "...")]`.
///
/// Field attributes: `primary_key`, `auto`, `null`, `unique`,
/// `max_length = N`, `db_column = "..."`, `foreign_key`, `one_to_one`,
/// `reverse = "<fk field on target>"`, `many_to_many`,
/// `through = "JunctionModel"`, `source = "..."`, `target = "..."`,
/// `on_delete = "..."`, `on_update = "..."`, `annotations`.
///
/// The struct and every related model must implement `Default`.
#[proc_macro_derive(Model, attributes(model, field))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as syn::DeriveInput);
    model::derive_model_impl(input).into()
}
