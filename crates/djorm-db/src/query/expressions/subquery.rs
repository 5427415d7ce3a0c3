//! Nested queries used as predicates or computed values.
//!
//! ```
//! # use djorm_db::query::expressions::{subquery_in, subquery_exists};
//! # fn build<M: djorm_db::Model>(inner: &djorm_db::QuerySet<M>) {
//! // todos whose user is active
//! let pred = subquery_in("user", inner);
//! let any = subquery_exists(inner);
//! # }
//! ```
//!
//! An inner query set without an explicit `select` projects its primary key.

use super::Expression;
use crate::model::Model;
use crate::query::compiler::{QueryPlan, Renderer, ResolveContext};
use crate::query::queryset::QuerySet;
use crate::{OrmError, OrmResult};

/// How the nested query is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubqueryOp {
    /// `<lhs> IN (<sub>)`.
    In,
    /// `EXISTS (<sub>)`.
    Exists,
    /// `(SELECT COUNT(*) FROM (<sub>) AS sub)`.
    Count,
    /// `(<sub>)` as a scalar value.
    Scalar,
}

/// A nested query node.
#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    /// The inner plan.
    pub plan: QueryPlan,
    /// Operator.
    pub op: SubqueryOp,
    /// Left-hand path for `In`.
    pub lhs: Option<String>,
    pub(super) lhs_column: Option<String>,
}

impl Subquery {
    fn new(plan: QueryPlan, op: SubqueryOp, lhs: Option<String>) -> Self {
        Self {
            plan,
            op,
            lhs,
            lhs_column: None,
        }
    }

    pub(super) fn resolve(&self, ctx: &mut ResolveContext<'_>) -> OrmResult<Self> {
        let mut out = self.clone();
        if let (Some(lhs), None) = (&self.lhs, &self.lhs_column) {
            out.lhs_column = Some(ctx.resolve_path(lhs, false)?);
        }
        Ok(out)
    }

    pub(super) fn render(&self, r: &mut Renderer<'_>) -> OrmResult<String> {
        let mut plan = self.plan.clone();
        if plan.select.is_empty() {
            let pk = plan
                .model
                .pk()
                .ok_or_else(|| OrmError::NoUniqueKey(plan.model.db_table.to_string()))?;
            plan.select = vec![pk.name.to_string()];
        }
        let inner = r.subquery(&plan)?;
        Ok(match self.op {
            SubqueryOp::In => {
                let lhs = self.lhs_column.as_deref().ok_or_else(|| {
                    OrmError::NilPointer("IN subquery without a left-hand column".to_string())
                })?;
                format!("{lhs} IN ({inner})")
            }
            SubqueryOp::Exists => format!("EXISTS ({inner})"),
            SubqueryOp::Count => format!(
                "(SELECT COUNT(*) FROM ({inner}) AS {})",
                r.dialect.quote_ident("djorm_count")
            ),
            SubqueryOp::Scalar => format!("({inner})"),
        })
    }
}

/// The inner query as a scalar value.
pub fn subquery<M: Model>(qs: &QuerySet<M>) -> Expression {
    Expression::Subquery(Box::new(Subquery::new(qs.plan().clone(), SubqueryOp::Scalar, None)))
}

/// `EXISTS (inner)`.
pub fn subquery_exists<M: Model>(qs: &QuerySet<M>) -> Expression {
    Expression::Subquery(Box::new(Subquery::new(qs.plan().clone(), SubqueryOp::Exists, None)))
}

/// `path IN (inner)`.
pub fn subquery_in<M: Model>(path: &str, qs: &QuerySet<M>) -> Expression {
    Expression::Subquery(Box::new(Subquery::new(
        qs.plan().clone(),
        SubqueryOp::In,
        Some(path.to_string()),
    )))
}

/// The number of rows the inner query returns.
pub fn subquery_count<M: Model>(qs: &QuerySet<M>) -> Expression {
    Expression::Subquery(Box::new(Subquery::new(qs.plan().clone(), SubqueryOp::Count, None)))
}
