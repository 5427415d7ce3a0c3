//! String-list attribute values.
//!
//! Accepts `ordering("-id", "title")` and `ordering = ["-id", "title"]`. The
//! literals keep their spans so later validation can point at the offending
//! entry.

use darling::ast::NestedMeta;
use darling::FromMeta;
use syn::{Expr, ExprLit, Lit, LitStr};

#[derive(Debug, Clone, Default)]
pub struct StringList(pub Vec<LitStr>);

fn string_lit(lit: &Lit) -> darling::Result<LitStr> {
    match lit {
        Lit::Str(s) if !s.value().trim().is_empty() => Ok(s.clone()),
        Lit::Str(s) => Err(darling::Error::custom("empty entry").with_span(s)),
        other => Err(darling::Error::unexpected_lit_type(other)),
    }
}

impl StringList {
    /// The entries as written.
    pub fn values(&self) -> Vec<String> {
        self.0.iter().map(LitStr::value).collect()
    }

    /// Each entry split on commas, for `unique_together("title, user")`.
    ///
    /// A group must name at least two fields.
    pub fn groups(&self) -> darling::Result<Vec<Vec<String>>> {
        let mut errors = darling::Error::accumulator();
        let groups = self
            .0
            .iter()
            .filter_map(|lit| {
                let names: Vec<String> = lit
                    .value()
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if names.len() < 2 {
                    errors.push(
                        darling::Error::custom("a unique_together group names two or more fields")
                            .with_span(lit),
                    );
                    return None;
                }
                Some(names)
            })
            .collect();
        errors.finish_with(groups)
    }
}

impl FromMeta for StringList {
    fn from_list(items: &[NestedMeta]) -> darling::Result<Self> {
        let mut errors = darling::Error::accumulator();
        let lits = items
            .iter()
            .filter_map(|item| {
                errors.handle(match item {
                    NestedMeta::Lit(lit) => string_lit(lit),
                    NestedMeta::Meta(meta) => {
                        Err(darling::Error::unsupported_format("meta item").with_span(meta))
                    }
                })
            })
            .collect();
        errors.finish_with(StringList(lits))
    }

    fn from_expr(expr: &Expr) -> darling::Result<Self> {
        let Expr::Array(array) = expr else {
            return Err(darling::Error::unexpected_expr_type(expr));
        };
        let mut errors = darling::Error::accumulator();
        let lits = array
            .elems
            .iter()
            .filter_map(|elem| {
                errors.handle(match elem {
                    Expr::Lit(ExprLit { lit, .. }) => string_lit(lit),
                    other => Err(darling::Error::unexpected_expr_type(other)),
                })
            })
            .collect();
        errors.finish_with(StringList(lits))
    }
}
