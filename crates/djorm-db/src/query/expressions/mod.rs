//! Predicate and computed-value expressions.
//!
//! [`Expression`] is a small tagged tree:
//!
//! - [`Leaf`]: `path`, [`Lookup`], values. Built by [`q`], [`q_values`] and [`expr`].
//! - `Raw` / `Func`: a [`Template`] with `%s` column slots and `?` parameter
//!   slots. Built by [`RawExpr`] and [`FuncExpr`].
//! - [`Group`]: AND/OR of children, optionally negated. Built by [`and`],
//!   [`or`], [`not`] and the `&`, `|`, `!` operators.
//! - [`Subquery`]: a nested plan, see [`subquery`](self::subquery).
//!
//! Expressions are built with field paths and resolved against a compilation
//! context, which binds every path to a quoted, qualified column and records
//! the joins it needs. Resolution returns a new tree; resolving a resolved
//! tree yields an identical clone.
//!
//! ```
//! use djorm_db::query::expressions::{q, Expression};
//!
//! let e = q("title__icontains", "test") & q("done", false) | !q("id", 3);
//! assert!(matches!(e, Expression::Group(_)));
//! ```

pub mod subquery;

use std::ops;

use crate::query::compiler::{Renderer, ResolveContext};
use crate::query::lookups::{parse_key, Lookup};
use crate::value::Value;
use crate::{OrmError, OrmResult};

pub use self::subquery::{
    subquery, subquery_count, subquery_exists, subquery_in, Subquery, SubqueryOp,
};

/// A field comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    /// Field path, e.g. `"user.profile.email"`.
    pub path: String,
    /// The comparison.
    pub lookup: Lookup,
    /// Operands; `in` takes several or one list.
    pub values: Vec<Value>,
    unsupported: Option<String>,
    column: Option<String>,
}

impl Leaf {
    /// The resolved column, once bound.
    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }
}

/// A SQL template with `%s` column slots and `?` parameter slots.
///
/// `%%` writes a literal `%`.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    /// The SQL text.
    pub template: String,
    /// Field paths substituted into the `%s` slots, in order.
    pub fields: Vec<String>,
    /// Parameters bound to the `?` slots, in order.
    pub params: Vec<Value>,
    columns: Option<Vec<String>>,
}

impl Template {
    fn new<I, S, P>(template: impl Into<String>, fields: I, params: P) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        P: IntoIterator<Item = Value>,
    {
        Self {
            template: template.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            params: params.into_iter().collect(),
            columns: None,
        }
    }

    fn render(&self, r: &mut Renderer<'_>) -> OrmResult<String> {
        let columns = self.columns.as_ref().ok_or_else(unresolved)?;
        let mut out = String::with_capacity(self.template.len());
        let mut columns = columns.iter();
        let mut params = self.params.iter();
        let mut chars = self.template.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '%' if chars.peek() == Some(&'s') => {
                    chars.next();
                    let col = columns.next().ok_or_else(|| {
                        OrmError::UnsupportedLookup(format!(
                            "template '{}' has more %s slots than fields",
                            self.template
                        ))
                    })?;
                    out.push_str(col);
                }
                '%' if chars.peek() == Some(&'%') => {
                    chars.next();
                    out.push('%');
                }
                '?' => {
                    let param = params.next().ok_or_else(|| {
                        OrmError::UnsupportedLookup(format!(
                            "template '{}' has more ? slots than params",
                            self.template
                        ))
                    })?;
                    out.push_str(&r.bind(param.clone()));
                }
                other => out.push(other),
            }
        }
        if columns.next().is_some() || params.next().is_some() {
            return Err(OrmError::UnsupportedLookup(format!(
                "template '{}' leaves fields or params unused",
                self.template
            )));
        }
        Ok(out)
    }
}

/// Constructor for raw SQL fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct RawExpr(Template);

impl RawExpr {
    /// A raw fragment such as `RawExpr::new("%s > ?", ["id"], [Value::Int(3)])`.
    pub fn new<I, S, P>(template: impl Into<String>, fields: I, params: P) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        P: IntoIterator<Item = Value>,
    {
        Self(Template::new(template, fields, params))
    }
}

/// Constructor for SQL function calls, typically used in annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncExpr(Template);

impl FuncExpr {
    /// A function call such as `FuncExpr::new("UPPER(%s)", ["title"], [])`.
    pub fn new<I, S, P>(template: impl Into<String>, fields: I, params: P) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        P: IntoIterator<Item = Value>,
    {
        Self(Template::new(template, fields, params))
    }
}

/// How a group combines its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    /// All children hold.
    And,
    /// At least one child holds.
    Or,
}

impl Connector {
    const fn sql(self) -> &'static str {
        match self {
            Self::And => " AND ",
            Self::Or => " OR ",
        }
    }
}

/// A logical group.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    /// Children, combined with `connector`.
    pub children: Vec<Expression>,
    /// AND or OR.
    pub connector: Connector,
    /// Wraps the group in `NOT`.
    pub negated: bool,
}

/// An expression tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A field comparison.
    Leaf(Leaf),
    /// A raw SQL fragment.
    Raw(Template),
    /// A function call.
    Func(Template),
    /// A logical group.
    Group(Group),
    /// A nested query.
    Subquery(Box<Subquery>),
}

impl From<RawExpr> for Expression {
    fn from(raw: RawExpr) -> Self {
        Self::Raw(raw.0)
    }
}

impl From<FuncExpr> for Expression {
    fn from(func: FuncExpr) -> Self {
        Self::Func(func.0)
    }
}

fn unresolved() -> OrmError {
    OrmError::NilPointer("expression rendered before it was resolved".to_string())
}

/// A comparison from a `"path__lookup"` key and one value.
///
/// An unsupported lookup is reported when the expression is added to a
/// query set.
pub fn q(key: &str, value: impl Into<Value>) -> Expression {
    q_values(key, [value.into()])
}

/// A comparison from a `"path__lookup"` key and several values (for `in`).
pub fn q_values<I, V>(key: &str, values: I) -> Expression
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    let values = values.into_iter().map(Into::into).collect();
    match parse_key(key) {
        Ok((path, lookup)) => Expression::Leaf(Leaf {
            path,
            lookup,
            values,
            unsupported: None,
            column: None,
        }),
        Err(err) => Expression::Leaf(Leaf {
            path: key.to_string(),
            lookup: Lookup::Exact,
            values,
            unsupported: Some(err.to_string()),
            column: None,
        }),
    }
}

/// A comparison with an explicit lookup.
pub fn expr<I, V>(path: &str, lookup: Lookup, values: I) -> Expression
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    Expression::Leaf(Leaf {
        path: path.to_string(),
        lookup,
        values: values.into_iter().map(Into::into).collect(),
        unsupported: None,
        column: None,
    })
}

/// Conjunction. An empty conjunction is true.
pub fn and(children: impl IntoIterator<Item = Expression>) -> Expression {
    Expression::Group(Group {
        children: children.into_iter().collect(),
        connector: Connector::And,
        negated: false,
    })
}

/// Disjunction. An empty disjunction is false.
pub fn or(children: impl IntoIterator<Item = Expression>) -> Expression {
    Expression::Group(Group {
        children: children.into_iter().collect(),
        connector: Connector::Or,
        negated: false,
    })
}

/// Negation.
pub fn not(inner: Expression) -> Expression {
    !inner
}

impl Expression {
    /// Every field path this expression references, outer query only.
    pub fn paths(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Leaf(leaf) => out.push(&leaf.path),
            Self::Raw(t) | Self::Func(t) => out.extend(t.fields.iter().map(String::as_str)),
            Self::Group(g) => g.children.iter().for_each(|c| c.collect_paths(out)),
            Self::Subquery(s) => out.extend(s.lhs.as_deref()),
        }
    }

    /// Reports construction errors: unsupported lookups and nested plans
    /// carrying a build error.
    pub fn check(&self) -> OrmResult<()> {
        match self {
            Self::Leaf(Leaf {
                unsupported: Some(msg),
                ..
            }) => Err(OrmError::UnsupportedLookup(msg.clone())),
            Self::Leaf(_) | Self::Raw(_) | Self::Func(_) => Ok(()),
            Self::Group(g) => g.children.iter().try_for_each(Self::check),
            Self::Subquery(s) => s.plan.check(),
        }
    }

    /// Returns `true` once every path in the tree is bound to a column.
    pub fn is_resolved(&self) -> bool {
        match self {
            Self::Leaf(leaf) => leaf.column.is_some(),
            Self::Raw(t) | Self::Func(t) => t.columns.is_some(),
            Self::Group(g) => g.children.iter().all(Self::is_resolved),
            Self::Subquery(s) => s.lhs.is_none() || s.lhs_column.is_some(),
        }
    }

    /// Binds every path to a qualified column, adding the joins it needs.
    pub fn resolve(&self, ctx: &mut ResolveContext<'_>) -> OrmResult<Self> {
        self.resolve_in(ctx, true)
    }

    /// `top_level` is true while every enclosing group is a non-negated AND;
    /// only such leaves may turn the joins they introduce into INNER joins.
    fn resolve_in(&self, ctx: &mut ResolveContext<'_>, top_level: bool) -> OrmResult<Self> {
        self.check()?;
        Ok(match self {
            Self::Leaf(leaf) => {
                if leaf.column.is_some() {
                    return Ok(self.clone());
                }
                let prefer_inner = top_level
                    && leaf.lookup == Lookup::Exact
                    && matches!(leaf.values.as_slice(), [v] if !v.is_null());
                let column = ctx.resolve_path(&leaf.path, prefer_inner)?;
                Self::Leaf(Leaf {
                    column: Some(column),
                    ..leaf.clone()
                })
            }
            Self::Raw(t) | Self::Func(t) => {
                let resolved = if t.columns.is_some() {
                    t.clone()
                } else {
                    let columns = t
                        .fields
                        .iter()
                        .map(|f| ctx.resolve_path(f, false))
                        .collect::<OrmResult<Vec<_>>>()?;
                    Template {
                        columns: Some(columns),
                        ..t.clone()
                    }
                };
                if matches!(self, Self::Raw(_)) {
                    Self::Raw(resolved)
                } else {
                    Self::Func(resolved)
                }
            }
            Self::Group(g) => {
                let nested_top = top_level && g.connector == Connector::And && !g.negated;
                Self::Group(Group {
                    children: g
                        .children
                        .iter()
                        .map(|c| c.resolve_in(ctx, nested_top))
                        .collect::<OrmResult<_>>()?,
                    connector: g.connector,
                    negated: g.negated,
                })
            }
            Self::Subquery(s) => Self::Subquery(Box::new(s.resolve(ctx)?)),
        })
    }

    /// Renders resolved SQL, appending bound parameters to the renderer in
    /// SQL order.
    pub fn render(&self, r: &mut Renderer<'_>) -> OrmResult<String> {
        match self {
            Self::Leaf(leaf) => {
                let column = leaf.column.as_deref().ok_or_else(unresolved)?;
                leaf.lookup
                    .render(column, &leaf.values, &mut |v| r.bind(v))
            }
            Self::Raw(t) | Self::Func(t) => t.render(r),
            Self::Group(g) => {
                let inner = if g.children.is_empty() {
                    match g.connector {
                        Connector::And => "1=1".to_string(),
                        Connector::Or => "1=0".to_string(),
                    }
                } else {
                    let parts = g
                        .children
                        .iter()
                        .map(|c| c.render(r))
                        .collect::<OrmResult<Vec<_>>>()?;
                    parts.join(g.connector.sql())
                };
                Ok(if g.negated {
                    format!("NOT ({inner})")
                } else {
                    format!("({inner})")
                })
            }
            Self::Subquery(s) => s.render(r),
        }
    }

    fn combine(self, other: Self, connector: Connector) -> Self {
        let mut children = Vec::new();
        for side in [self, other] {
            match side {
                Self::Group(g) if g.connector == connector && !g.negated => {
                    children.extend(g.children);
                }
                other => children.push(other),
            }
        }
        Self::Group(Group {
            children,
            connector,
            negated: false,
        })
    }
}

impl ops::BitAnd for Expression {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.combine(rhs, Connector::And)
    }
}

impl ops::BitOr for Expression {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.combine(rhs, Connector::Or)
    }
}

impl ops::Not for Expression {
    type Output = Self;

    fn not(self) -> Self {
        match self {
            Self::Group(mut g) => {
                g.negated = !g.negated;
                Self::Group(g)
            }
            other => Self::Group(Group {
                children: vec![other],
                connector: Connector::And,
                negated: true,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::model::test_models::Todo;
    use crate::model::Model;

    fn render_sql(e: &Expression, dialect: &Dialect) -> (String, Vec<Value>) {
        let mut ctx = ResolveContext::new(dialect, Todo::meta());
        let resolved = e.resolve(&mut ctx).unwrap();
        let mut args = Vec::new();
        let mut r = Renderer::new(dialect, &mut args);
        let sql = resolved.render(&mut r).unwrap();
        (sql, args)
    }

    #[test]
    fn test_operators_flatten() {
        let e = q("id", 1) & q("id", 2) & q("id", 3);
        match e {
            Expression::Group(g) => {
                assert_eq!(g.children.len(), 3);
                assert_eq!(g.connector, Connector::And);
            }
            other => panic!("unexpected {other:?}"),
        }
        let e = q("id", 1) | (q("id", 2) & q("id", 3));
        match e {
            Expression::Group(g) => {
                assert_eq!(g.connector, Connector::Or);
                assert_eq!(g.children.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_double_negation() {
        let e = !!and([q("id", 1)]);
        assert!(matches!(e, Expression::Group(Group { negated: false, .. })));
    }

    #[test]
    fn test_render_group_and_not() {
        let e = q("title__icontains", "x") & !q("done", true);
        let (sql, args) = render_sql(&e, &Dialect::sqlite());
        assert_eq!(
            sql,
            "(LOWER(\"todos\".\"title\") LIKE LOWER(?) ESCAPE '!' AND NOT (\"todos\".\"done\" = ?))"
        );
        assert_eq!(args, vec![Value::from("%x%"), Value::Bool(true)]);
    }

    #[test]
    fn test_empty_groups() {
        assert_eq!(render_sql(&and([]), &Dialect::sqlite()).0, "(1=1)");
        assert_eq!(render_sql(&or([]), &Dialect::sqlite()).0, "(1=0)");
    }

    #[test]
    fn test_placeholders_number_left_to_right() {
        let e = or([q("id", 1), q("title", "a")]);
        let (sql, args) = render_sql(&e, &Dialect::postgres());
        assert_eq!(sql, "(\"todos\".\"id\" = $1 OR \"todos\".\"title\" = $2)");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_raw_and_func_templates() {
        let raw: Expression = RawExpr::new("%s > ? AND %s <> '%%'", ["id", "title"], [Value::Int(2)]).into();
        let (sql, args) = render_sql(&raw, &Dialect::sqlite());
        assert_eq!(sql, "\"todos\".\"id\" > ? AND \"todos\".\"title\" <> '%'");
        assert_eq!(args, vec![Value::Int(2)]);

        let func: Expression = FuncExpr::new("UPPER(%s)", ["title"], []).into();
        assert_eq!(render_sql(&func, &Dialect::mysql()).0, "UPPER(`todos`.`title`)");
    }

    #[test]
    fn test_template_arity_mismatch() {
        let raw: Expression = RawExpr::new("%s = ?", ["id"], []).into();
        let dialect = Dialect::sqlite();
        let mut ctx = ResolveContext::new(&dialect, Todo::meta());
        let resolved = raw.resolve(&mut ctx).unwrap();
        let mut args = Vec::new();
        let err = resolved.render(&mut Renderer::new(&dialect, &mut args)).unwrap_err();
        assert!(matches!(err, OrmError::UnsupportedLookup(_)));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let dialect = Dialect::sqlite();
        let mut ctx = ResolveContext::new(&dialect, Todo::meta());
        let e = q("user.name", "ann") & q("title", "t");
        let once = e.resolve(&mut ctx).unwrap();
        assert!(once.is_resolved());
        let twice = once.resolve(&mut ctx).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unsupported_lookup_is_deferred() {
        let e = q("title__regex", "x");
        assert!(matches!(e.check(), Err(OrmError::UnsupportedLookup(_))));
    }

    #[test]
    fn test_paths() {
        let e = q("title", "a") & RawExpr::new("%s = %s", ["id", "user.id"], []).into();
        assert_eq!(e.paths(), vec!["title", "id", "user.id"]);
    }
}
