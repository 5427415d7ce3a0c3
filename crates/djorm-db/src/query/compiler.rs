//! Query plan and SQL compilation.
//!
//! A [`QueryPlan`] is the untyped state a [`QuerySet`](super::QuerySet)
//! accumulates. The [`Compiler`] trait turns a plan into a [`CompiledQuery`]:
//! SQL text, bound arguments in SQL order, and the [`ScanPlan`] the
//! materializer uses to map flat result columns back onto a tree of model
//! instances. [`SqlCompiler`] is the implementation shared by the builtin
//! dialects; it differs per dialect only in quoting, placeholders, paging
//! and RETURNING support.
//!
//! Compilation proceeds in two phases. Resolution walks every path in the
//! projection, the explicit joins, the annotations, the predicates and the
//! ordering, registering joins with a per-compilation
//! [`AliasGenerator`]. Rendering then writes the statement in SQL order so
//! that placeholders are numbered left to right.

use std::sync::Arc;

use crate::dialect::{Dialect, Returning};
use crate::fields::{FieldDef, Relation};
use crate::model::{Model, ModelMeta};
use crate::query::expressions::{and, Expression};
use crate::query::walker::{walk_fields, AliasGenerator, FieldWalk, JoinStep};
use crate::value::{FromValue, Value};
use crate::{OrmError, OrmResult};

// ── Rows ───────────────────────────────────────────────────────────────

/// A database row returned by an executor.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row from column names and values.
    ///
    /// # Panics
    ///
    /// Panics if the number of columns does not match the number of values.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        assert_eq!(
            columns.len(),
            values.len(),
            "Row column count must match value count"
        );
        Self { columns, values }
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the row, returning its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Gets a typed value by column name.
    pub fn get<T: FromValue>(&self, column: &str) -> OrmResult<T> {
        let value = self.get_value(column).ok_or_else(|| OrmError::UnknownField {
            model: "<row>".to_string(),
            field: column.to_string(),
        })?;
        T::from_value(value)
    }

    /// Gets a typed value by column index.
    pub fn get_by_index<T: FromValue>(&self, idx: usize) -> OrmResult<T> {
        let value = self.values.get(idx).ok_or_else(|| {
            OrmError::TypeMismatch(format!(
                "column index {idx} out of bounds (row has {} columns)",
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }

    /// Returns a reference to the raw value of the given column.
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }
}

// ── Plan ───────────────────────────────────────────────────────────────

/// SQL join type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// `INNER JOIN`.
    Inner,
    /// `LEFT JOIN`.
    Left,
    /// `RIGHT JOIN`.
    Right,
    /// `CROSS JOIN`.
    Cross,
}

impl JoinKind {
    /// The SQL keyword.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Cross => "CROSS JOIN",
        }
    }
}

/// A join requested explicitly on the query set.
///
/// `target` is either a relation path on the root model or a raw table
/// name. The condition `(a, op, b)` compares two column references; each
/// side is a root path or a `table.column` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitJoin {
    /// Join type.
    pub kind: JoinKind,
    /// Relation path or table name.
    pub target: String,
    /// Extra ON condition.
    pub condition: Option<(String, String, String)>,
}

const JOIN_OPERATORS: &[&str] = &["=", "<>", "!=", "<", "<=", ">", ">=", "LIKE"];

impl ExplicitJoin {
    /// A join on `target`, rejecting unknown condition operators.
    pub fn new(
        kind: JoinKind,
        target: &str,
        condition: Option<(&str, &str, &str)>,
    ) -> OrmResult<Self> {
        let condition = condition
            .map(|(a, op, b)| {
                let op = op.trim().to_ascii_uppercase();
                if JOIN_OPERATORS.contains(&op.as_str()) {
                    Ok((a.to_string(), op, b.to_string()))
                } else {
                    Err(OrmError::UnsupportedLookup(format!("join operator '{op}'")))
                }
            })
            .transpose()?;
        Ok(Self {
            kind,
            target: target.to_string(),
            condition,
        })
    }
}

/// Untyped state of a query set.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Root model.
    pub model: &'static ModelMeta,
    /// Projection paths; empty means every column of the root.
    pub select: Vec<String>,
    /// Computed columns, in insertion order.
    pub annotations: Vec<(String, Expression)>,
    /// Conjoined predicates.
    pub filters: Vec<Expression>,
    /// Ordering; `None` falls back to the model's default ordering.
    pub order_by: Option<Vec<String>>,
    /// `LIMIT`.
    pub limit: Option<u64>,
    /// `OFFSET`.
    pub offset: Option<u64>,
    /// `SELECT DISTINCT`.
    pub distinct: bool,
    /// Explicit joins.
    pub joins: Vec<ExplicitJoin>,
    /// Updates write every column (or exactly the selected ones), zero or not.
    pub explicit_save: bool,
    /// First error recorded while building.
    pub error: Option<Arc<OrmError>>,
}

impl PartialEq for QueryPlan {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.model, other.model)
            && self.select == other.select
            && self.annotations == other.annotations
            && self.filters == other.filters
            && self.order_by == other.order_by
            && self.limit == other.limit
            && self.offset == other.offset
            && self.distinct == other.distinct
            && self.joins == other.joins
            && self.explicit_save == other.explicit_save
            && self.error.is_some() == other.error.is_some()
    }
}

impl QueryPlan {
    /// An empty plan over `model`.
    pub fn new(model: &'static ModelMeta) -> Self {
        Self {
            model,
            select: Vec::new(),
            annotations: Vec::new(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
            offset: None,
            distinct: false,
            joins: Vec::new(),
            explicit_save: false,
            error: None,
        }
    }

    /// Returns the recorded build error, if any.
    pub fn check(&self) -> OrmResult<()> {
        match &self.error {
            Some(err) => Err(err.duplicate()),
            None => Ok(()),
        }
    }

    /// Records `err` unless an earlier error is already recorded.
    pub fn record_error(&mut self, err: OrmError) {
        if self.error.is_none() {
            tracing::error!(model = self.model.model_name, error = %err, "invalid query");
            self.error = Some(Arc::new(err));
        }
    }

    /// The conjunction of all filters, if any.
    pub fn predicate(&self) -> Option<Expression> {
        match self.filters.as_slice() {
            [] => None,
            [single] => Some(single.clone()),
            many => Some(and(many.iter().cloned())),
        }
    }

    fn has_paging(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }
}

// ── Scan plan ──────────────────────────────────────────────────────────

/// One model instance position in the materialized tree.
#[derive(Debug, Clone)]
pub struct ScanNode {
    /// Parent node; `None` for the root.
    pub parent: Option<usize>,
    /// Relation field on the parent leading here.
    pub relation: Option<&'static FieldDef>,
    /// Model materialized at this node.
    pub meta: &'static ModelMeta,
    /// Table alias in the statement.
    pub alias: String,
    /// Entry holding this node's primary key, if projected.
    pub pk_entry: Option<usize>,
}

impl ScanNode {
    /// Returns `true` if this node collects several instances per parent.
    pub fn is_to_many(&self) -> bool {
        self.relation
            .and_then(|f| f.relation.as_ref())
            .is_some_and(Relation::is_to_many)
    }
}

/// What a projected column feeds.
#[derive(Debug, Clone)]
pub enum ScanTarget {
    /// A field of the instance at `node`.
    Field {
        /// Node index.
        node: usize,
        /// Field written.
        field: &'static FieldDef,
    },
    /// An annotation on the root instance.
    Annotation(String),
}

/// One projected column, in scan order.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    /// Column alias in the statement.
    pub column_alias: String,
    /// Destination.
    pub target: ScanTarget,
}

/// The mapping from flat result columns to the instance tree.
#[derive(Debug, Clone, Default)]
pub struct ScanPlan {
    /// Instance positions; node 0 is the root.
    pub nodes: Vec<ScanNode>,
    /// Columns in projection order.
    pub entries: Vec<ScanEntry>,
    /// Rows sharing a root primary key are merged.
    pub group_rows: bool,
}

impl ScanPlan {
    fn with_root(meta: &'static ModelMeta, alias: &str) -> Self {
        Self {
            nodes: vec![ScanNode {
                parent: None,
                relation: None,
                meta,
                alias: alias.to_string(),
                pk_entry: None,
            }],
            entries: Vec::new(),
            group_rows: false,
        }
    }

    fn ensure_node(
        &mut self,
        parent: usize,
        relation: &'static FieldDef,
        meta: &'static ModelMeta,
        alias: &str,
    ) -> usize {
        if let Some(idx) = self.nodes.iter().position(|n| n.alias == alias) {
            return idx;
        }
        self.nodes.push(ScanNode {
            parent: Some(parent),
            relation: Some(relation),
            meta,
            alias: alias.to_string(),
            pk_entry: None,
        });
        self.nodes.len() - 1
    }

    /// Indices of the children of `node`, in discovery order.
    pub fn children(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, n)| n.parent == Some(node))
            .map(|(i, _)| i)
    }

    /// Returns `true` if any node is a to-many collection.
    pub fn has_to_many(&self) -> bool {
        self.nodes.iter().any(ScanNode::is_to_many)
    }
}

/// The output of compilation.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    /// SQL text.
    pub sql: String,
    /// Bound arguments, in placeholder order.
    pub args: Vec<Value>,
    /// Column-to-instance mapping for SELECTs.
    pub scan: ScanPlan,
    /// Fields returned by `INSERT ... RETURNING`.
    pub returning: Vec<&'static FieldDef>,
}

impl CompiledQuery {
    fn statement(sql: String, args: Vec<Value>) -> Self {
        Self {
            sql,
            args,
            scan: ScanPlan::default(),
            returning: Vec::new(),
        }
    }
}

// ── Resolution context ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Join {
    kind: JoinKind,
    table: String,
    alias: String,
    on: Option<String>,
}

/// Per-compilation state shared by projection, predicates and ordering.
#[derive(Debug)]
pub struct ResolveContext<'a> {
    dialect: &'a Dialect,
    root: &'static ModelMeta,
    root_alias: String,
    aliases: AliasGenerator,
    joins: Vec<Join>,
    has_to_many: bool,
    annotations: Vec<String>,
}

impl<'a> ResolveContext<'a> {
    /// A context rooted at `root`, aliased by its table name.
    pub fn new(dialect: &'a Dialect, root: &'static ModelMeta) -> Self {
        Self {
            dialect,
            root,
            root_alias: root.db_table.to_string(),
            aliases: AliasGenerator::new(),
            joins: Vec::new(),
            has_to_many: false,
            annotations: Vec::new(),
        }
    }

    /// The root table alias.
    pub fn root_alias(&self) -> &str {
        &self.root_alias
    }

    /// Returns `true` once any join can multiply root rows.
    pub const fn has_to_many(&self) -> bool {
        self.has_to_many
    }

    fn add_steps(&mut self, steps: &[JoinStep], kind: JoinKind) {
        for step in steps {
            if self.joins.iter().any(|j| j.alias == step.alias) {
                continue;
            }
            self.has_to_many |= step.to_many;
            self.joins.push(Join {
                kind,
                table: step.table.clone(),
                alias: step.alias.clone(),
                on: Some(format!(
                    "{} = {}",
                    self.dialect.qualify(&step.parent_alias, &step.parent_column),
                    self.dialect.qualify(&step.alias, &step.column)
                )),
            });
        }
    }

    /// Joins every hop of `walk`, returning each hop's field and alias.
    fn join_chain(
        &mut self,
        walk: &FieldWalk,
        kind: JoinKind,
    ) -> OrmResult<Vec<(&'static FieldDef, String)>> {
        let hops = self.aliases.chain_for(&self.root_alias, walk)?;
        let mut out = Vec::with_capacity(hops.len());
        for (&field, (steps, alias)) in walk.chain.iter().zip(hops) {
            self.add_steps(&steps, kind);
            out.push((field, alias));
        }
        Ok(out)
    }

    /// Joins one relation from `parent_alias`, returning the target alias.
    fn join_relation(
        &mut self,
        parent_alias: &str,
        parent: &'static ModelMeta,
        field: &'static FieldDef,
        kind: JoinKind,
    ) -> OrmResult<String> {
        let steps = self.aliases.hop(parent_alias, parent, field)?;
        self.add_steps(&steps, kind);
        Ok(steps
            .last()
            .map_or_else(|| parent_alias.to_string(), |s| s.alias.clone()))
    }

    /// Binds `path` to a quoted, qualified column, joining as needed.
    ///
    /// A bare forward relation resolves to its key column; a bare
    /// column-less relation resolves to the target's primary key through a
    /// join. When `prefer_inner` is set and the path is an equality on the
    /// key of a chain of forward relations, the joins it introduces are
    /// INNER joins.
    pub fn resolve_path(&mut self, path: &str, prefer_inner: bool) -> OrmResult<String> {
        let walk = walk_fields(self.root, path)?;
        let field = walk.field.ok_or_else(|| {
            OrmError::UnsupportedLookup(format!("'{path}' selects several columns"))
        })?;
        let inner = prefer_inner
            && walk.crossed_relation
            && field.primary_key
            && walk
                .chain
                .iter()
                .all(|f| f.relation.as_ref().is_some_and(Relation::owns_column));
        let kind = if inner { JoinKind::Inner } else { JoinKind::Left };
        let alias = self
            .join_chain(&walk, kind)?
            .last()
            .map_or_else(|| self.root_alias.clone(), |(_, a)| a.clone());
        if field.has_column() {
            return Ok(self.dialect.qualify(&alias, &field.column));
        }
        let target_alias = self.join_relation(&alias, walk.model, field, JoinKind::Left)?;
        let target = field
            .relation
            .as_ref()
            .map(Relation::target_meta)
            .ok_or_else(|| OrmError::unknown_field(walk.model.db_table, field.name))?;
        let pk = target
            .pk()
            .ok_or_else(|| OrmError::NoUniqueKey(target.db_table.to_string()))?;
        Ok(self.dialect.qualify(&target_alias, &pk.column))
    }

    fn condition_side(&mut self, side: &str) -> String {
        if let Ok(column) = self.resolve_path(side, false) {
            return column;
        }
        side.split('.')
            .map(|part| self.dialect.quote_ident(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn add_explicit(&mut self, join: &ExplicitJoin) -> OrmResult<()> {
        let condition = match &join.condition {
            Some((a, op, b)) => {
                let op_upper = op.trim().to_ascii_uppercase();
                if !JOIN_OPERATORS.contains(&op_upper.as_str()) {
                    return Err(OrmError::UnsupportedLookup(format!("join operator '{op}'")));
                }
                Some(format!(
                    "{} {op_upper} {}",
                    self.condition_side(a),
                    self.condition_side(b)
                ))
            }
            None => None,
        };

        if let Ok(walk) = walk_fields(self.root, &join.target) {
            if let Some(field) = walk.field.filter(|f| f.is_relation()) {
                let alias = self
                    .join_chain(&walk, join.kind)?
                    .last()
                    .map_or_else(|| self.root_alias.clone(), |(_, a)| a.clone());
                let target_alias = self.join_relation(&alias, walk.model, field, join.kind)?;
                if let (Some(cond), Some(existing)) = (
                    condition,
                    self.joins.iter_mut().find(|j| j.alias == target_alias),
                ) {
                    existing.on = Some(match existing.on.take() {
                        Some(on) => format!("{on} AND {cond}"),
                        None => cond,
                    });
                }
                return Ok(());
            }
        }

        if join.kind != JoinKind::Cross && condition.is_none() {
            return Err(OrmError::UnsupportedLookup(format!(
                "{} on '{}' needs a condition",
                join.kind.as_sql(),
                join.target
            )));
        }
        self.joins.push(Join {
            kind: join.kind,
            table: join.target.clone(),
            alias: join.target.clone(),
            on: if join.kind == JoinKind::Cross {
                None
            } else {
                condition
            },
        });
        Ok(())
    }

    fn render_joins(&self) -> String {
        let mut out = String::new();
        for join in &self.joins {
            out.push(' ');
            out.push_str(join.kind.as_sql());
            out.push(' ');
            out.push_str(&self.dialect.quote_ident(&join.table));
            if join.alias != join.table {
                out.push_str(" AS ");
                out.push_str(&self.dialect.quote_ident(&join.alias));
            }
            if let Some(on) = &join.on {
                out.push_str(" ON ");
                out.push_str(on);
            }
        }
        out
    }
}

/// Accumulates bound arguments while rendering.
#[derive(Debug)]
pub struct Renderer<'a> {
    /// The dialect being rendered.
    pub dialect: &'a Dialect,
    args: &'a mut Vec<Value>,
}

impl<'a> Renderer<'a> {
    /// A renderer appending to `args`.
    pub fn new(dialect: &'a Dialect, args: &'a mut Vec<Value>) -> Self {
        Self { dialect, args }
    }

    /// Binds a value and returns its placeholder.
    pub fn bind(&mut self, value: Value) -> String {
        self.args.push(value);
        self.dialect.placeholder(self.args.len())
    }

    /// Renders a nested SELECT, continuing the placeholder numbering.
    pub fn subquery(&mut self, plan: &QueryPlan) -> OrmResult<String> {
        let compiler = SqlCompiler::new(self.dialect.clone());
        let (sql, _) = compiler.select_into(plan, self.args, true)?;
        Ok(sql)
    }
}

// ── Compiler ───────────────────────────────────────────────────────────

/// Turns plans into SQL for one dialect.
pub trait Compiler: Send + Sync {
    /// The dialect this compiler writes.
    fn dialect(&self) -> &Dialect;

    /// `SELECT` with a scan plan for materialization.
    fn compile_select(&self, plan: &QueryPlan) -> OrmResult<CompiledQuery>;

    /// `SELECT COUNT(...)`.
    fn compile_count(&self, plan: &QueryPlan) -> OrmResult<CompiledQuery>;

    /// `SELECT` of exactly `paths`, in order, for tuple results.
    fn compile_values(&self, plan: &QueryPlan, paths: &[String]) -> OrmResult<CompiledQuery>;

    /// `INSERT` of one instance.
    fn compile_insert(&self, meta: &'static ModelMeta, instance: &dyn Model)
        -> OrmResult<CompiledQuery>;

    /// `UPDATE` from a partial instance.
    fn compile_update(&self, plan: &QueryPlan, partial: &dyn Model) -> OrmResult<CompiledQuery>;

    /// `DELETE`.
    fn compile_delete(&self, plan: &QueryPlan) -> OrmResult<CompiledQuery>;
}

/// The generic SQL compiler.
#[derive(Debug, Clone)]
pub struct SqlCompiler {
    dialect: Dialect,
}

/// The fields an UPDATE writes for `partial` under `plan`.
///
/// By default the non-zero column fields (primary key excluded). With
/// `explicit_save`, the selected root fields, or every column field when
/// nothing is selected.
pub fn update_fields(
    plan: &QueryPlan,
    partial: &dyn Model,
) -> OrmResult<Vec<(&'static FieldDef, Value)>> {
    let meta = plan.model;
    let mut out = Vec::new();
    if plan.explicit_save && !plan.select.is_empty() {
        for name in &plan.select {
            let field = meta
                .field(name)
                .filter(|f| f.has_column())
                .ok_or_else(|| OrmError::unknown_field(meta.db_table, name.as_str()))?;
            out.push((field, partial.get_value(field.name)?));
        }
        return Ok(out);
    }
    for field in meta.column_fields().filter(|f| !f.primary_key) {
        let value = partial.get_value(field.name)?;
        if plan.explicit_save || !value.is_zero() {
            out.push((field, value));
        }
    }
    Ok(out)
}

impl SqlCompiler {
    /// A compiler for `dialect`.
    pub const fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    fn q(&self, ident: &str) -> String {
        self.dialect.quote_ident(ident)
    }

    /// Adds the projection of `path` to `scan` and `columns`.
    fn project_path(
        &self,
        ctx: &mut ResolveContext<'_>,
        scan: &mut ScanPlan,
        columns: &mut Vec<String>,
        path: &str,
        dedupe: bool,
    ) -> OrmResult<()> {
        let walk = walk_fields(ctx.root, path)?;
        let mut node = 0;
        for (field, alias) in ctx.join_chain(&walk, JoinKind::Left)? {
            let target = field
                .relation
                .as_ref()
                .map(Relation::target_meta)
                .ok_or_else(|| OrmError::unknown_field(ctx.root.db_table, field.name))?;
            node = scan.ensure_node(node, field, target, &alias);
        }

        match walk.field {
            None => {
                let meta = scan.nodes[node].meta;
                for field in meta.scalar_fields() {
                    self.project_field(scan, columns, node, field, dedupe);
                }
            }
            Some(field) if field.has_column() => {
                self.project_field(scan, columns, node, field, dedupe);
            }
            Some(field) => {
                let parent = &scan.nodes[node];
                let (parent_alias, parent_meta) = (parent.alias.clone(), parent.meta);
                let target_alias =
                    ctx.join_relation(&parent_alias, parent_meta, field, JoinKind::Left)?;
                let target = field
                    .relation
                    .as_ref()
                    .map(Relation::target_meta)
                    .ok_or_else(|| OrmError::unknown_field(parent_meta.db_table, field.name))?;
                let pk = target
                    .pk()
                    .ok_or_else(|| OrmError::NoUniqueKey(target.db_table.to_string()))?;
                let child = scan.ensure_node(node, field, target, &target_alias);
                self.project_field(scan, columns, child, pk, dedupe);
            }
        }
        Ok(())
    }

    fn project_field(
        &self,
        scan: &mut ScanPlan,
        columns: &mut Vec<String>,
        node: usize,
        field: &'static FieldDef,
        dedupe: bool,
    ) {
        let table_alias = &scan.nodes[node].alias;
        let column_alias = AliasGenerator::field_alias(table_alias, &field.column);
        if dedupe && scan.entries.iter().any(|e| e.column_alias == column_alias) {
            return;
        }
        columns.push(format!(
            "{} AS {}",
            self.dialect.qualify(table_alias, &field.column),
            self.q(&column_alias)
        ));
        if field.primary_key {
            scan.nodes[node].pk_entry = Some(scan.entries.len());
        }
        scan.entries.push(ScanEntry {
            column_alias,
            target: ScanTarget::Field { node, field },
        });
    }

    fn resolve_ordering(
        &self,
        ctx: &mut ResolveContext<'_>,
        plan: &QueryPlan,
        nested: bool,
    ) -> OrmResult<Vec<String>> {
        let ordering: Vec<String> = match &plan.order_by {
            Some(explicit) => explicit.clone(),
            None if nested => Vec::new(),
            None => plan.model.ordering.iter().map(ToString::to_string).collect(),
        };
        ordering
            .iter()
            .map(|item| {
                let (path, dir) = item
                    .strip_prefix('-')
                    .map_or((item.as_str(), "ASC"), |rest| (rest, "DESC"));
                let target = if ctx.annotations.iter().any(|a| a == path) {
                    self.q(path)
                } else {
                    ctx.resolve_path(path, false)?
                };
                Ok(format!("{target} {dir}"))
            })
            .collect()
    }

    fn paging(&self, plan: &QueryPlan) -> String {
        match (plan.limit, plan.offset) {
            (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (None, Some(offset)) => match self.dialect.unbounded_limit {
                Some(all) => format!(" LIMIT {all} OFFSET {offset}"),
                None => format!(" OFFSET {offset}"),
            },
            (None, None) => String::new(),
        }
    }

    fn render_where(
        r: &mut Renderer<'_>,
        filters: &[Expression],
    ) -> OrmResult<String> {
        if filters.is_empty() {
            return Ok(String::new());
        }
        let parts = filters
            .iter()
            .map(|f| f.render(r))
            .collect::<OrmResult<Vec<_>>>()?;
        Ok(format!(" WHERE {}", parts.join(" AND ")))
    }

    /// Compiles a SELECT into `args`, returning the SQL and scan plan.
    ///
    /// `nested` drops the default ordering, for use inside subqueries.
    pub(crate) fn select_into(
        &self,
        plan: &QueryPlan,
        args: &mut Vec<Value>,
        nested: bool,
    ) -> OrmResult<(String, ScanPlan)> {
        self.select_with(plan, &plan.select, args, nested, true)
    }

    fn select_with(
        &self,
        plan: &QueryPlan,
        paths: &[String],
        args: &mut Vec<Value>,
        nested: bool,
        dedupe: bool,
    ) -> OrmResult<(String, ScanPlan)> {
        plan.check()?;
        let mut ctx = ResolveContext::new(&self.dialect, plan.model);
        for join in &plan.joins {
            ctx.add_explicit(join)?;
        }

        let mut scan = ScanPlan::with_root(plan.model, &ctx.root_alias);
        let mut columns = Vec::new();
        if paths.is_empty() {
            for field in plan.model.column_fields() {
                self.project_field(&mut scan, &mut columns, 0, field, dedupe);
            }
        } else {
            for path in paths {
                self.project_path(&mut ctx, &mut scan, &mut columns, path, dedupe)?;
            }
        }

        let annotations = plan
            .annotations
            .iter()
            .map(|(alias, e)| Ok((alias.clone(), e.resolve(&mut ctx)?)))
            .collect::<OrmResult<Vec<_>>>()?;
        ctx.annotations = annotations.iter().map(|(a, _)| a.clone()).collect();

        let filters = plan
            .filters
            .iter()
            .map(|f| f.resolve(&mut ctx))
            .collect::<OrmResult<Vec<_>>>()?;
        let ordering = self.resolve_ordering(&mut ctx, plan, nested)?;

        // Instance selects across a to-many join need the root key to merge rows.
        if dedupe && ctx.has_to_many() && scan.nodes[0].pk_entry.is_none() {
            if let Some(pk) = plan.model.pk() {
                self.project_field(&mut scan, &mut columns, 0, pk, dedupe);
            }
        }

        let mut r = Renderer::new(&self.dialect, args);
        for (alias, e) in &annotations {
            columns.push(format!("{} AS {}", e.render(&mut r)?, self.q(alias)));
            scan.entries.push(ScanEntry {
                column_alias: alias.clone(),
                target: ScanTarget::Annotation(alias.clone()),
            });
        }

        let mut sql = String::from("SELECT ");
        if plan.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&columns.join(", "));
        sql.push_str(" FROM ");
        sql.push_str(&self.q(plan.model.db_table));
        sql.push_str(&ctx.render_joins());
        sql.push_str(&Self::render_where(&mut r, &filters)?);
        if !ordering.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&ordering.join(", "));
        }
        sql.push_str(&self.paging(plan));

        scan.group_rows = ctx.has_to_many() && scan.nodes[0].pk_entry.is_some();
        Ok((sql, scan))
    }

    /// `WHERE` clause for UPDATE/DELETE. Predicates that need joins are
    /// rewritten into `pk IN (SELECT pk FROM (...) AS sub)`.
    fn write_where(&self, plan: &QueryPlan, r: &mut Renderer<'_>) -> OrmResult<Option<String>> {
        if plan.filters.is_empty() {
            return Ok(None);
        }
        let mut ctx = ResolveContext::new(&self.dialect, plan.model);
        for join in &plan.joins {
            ctx.add_explicit(join)?;
        }
        let filters = plan
            .filters
            .iter()
            .map(|f| f.resolve(&mut ctx))
            .collect::<OrmResult<Vec<_>>>()?;
        if ctx.joins.is_empty() {
            return Self::render_where(r, &filters).map(Some);
        }

        let pk = plan
            .model
            .pk()
            .ok_or_else(|| OrmError::NoUniqueKey(plan.model.db_table.to_string()))?;
        let table = self.q(plan.model.db_table);
        let pk_col = self.q(&pk.column);
        let sub = self.q("djorm_sub");
        let mut inner = format!(
            "SELECT DISTINCT {} AS {pk_col} FROM {table}{}",
            self.dialect.qualify(plan.model.db_table, &pk.column),
            ctx.render_joins()
        );
        inner.push_str(&Self::render_where(r, &filters)?);
        Ok(Some(format!(
            " WHERE {} IN (SELECT {sub}.{pk_col} FROM ({inner}) AS {sub})",
            self.dialect.qualify(plan.model.db_table, &pk.column)
        )))
    }
}

impl Compiler for SqlCompiler {
    fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    fn compile_select(&self, plan: &QueryPlan) -> OrmResult<CompiledQuery> {
        let mut args = Vec::new();
        let (sql, scan) = self.select_into(plan, &mut args, false)?;
        Ok(CompiledQuery {
            sql,
            args,
            scan,
            returning: Vec::new(),
        })
    }

    fn compile_count(&self, plan: &QueryPlan) -> OrmResult<CompiledQuery> {
        plan.check()?;
        let mut args = Vec::new();
        if plan.has_paging() || plan.distinct {
            let mut inner = plan.clone();
            inner.order_by = Some(Vec::new());
            let (sub, scan) = self.select_into(&inner, &mut args, true)?;
            let counted = match scan.nodes[0].pk_entry {
                Some(idx) if scan.group_rows => {
                    format!("COUNT(DISTINCT {})", self.q(&scan.entries[idx].column_alias))
                }
                _ => "COUNT(*)".to_string(),
            };
            let sql = format!(
                "SELECT {counted} FROM ({sub}) AS {}",
                self.q("djorm_count")
            );
            return Ok(CompiledQuery::statement(sql, args));
        }

        let mut ctx = ResolveContext::new(&self.dialect, plan.model);
        for join in &plan.joins {
            ctx.add_explicit(join)?;
        }
        let filters = plan
            .filters
            .iter()
            .map(|f| f.resolve(&mut ctx))
            .collect::<OrmResult<Vec<_>>>()?;
        let counted = match plan.model.pk() {
            Some(pk) if ctx.has_to_many() => format!(
                "COUNT(DISTINCT {})",
                self.dialect.qualify(&ctx.root_alias, &pk.column)
            ),
            _ => "COUNT(*)".to_string(),
        };
        let mut r = Renderer::new(&self.dialect, &mut args);
        let where_sql = Self::render_where(&mut r, &filters)?;
        let sql = format!(
            "SELECT {counted} FROM {}{}{where_sql}",
            self.q(plan.model.db_table),
            ctx.render_joins()
        );
        Ok(CompiledQuery::statement(sql, args))
    }

    fn compile_values(&self, plan: &QueryPlan, paths: &[String]) -> OrmResult<CompiledQuery> {
        let mut args = Vec::new();
        let mut plan = plan.clone();
        plan.annotations.clear();
        let (sql, scan) = self.select_with(&plan, paths, &mut args, false, false)?;
        Ok(CompiledQuery {
            sql,
            args,
            scan,
            returning: Vec::new(),
        })
    }

    fn compile_insert(
        &self,
        meta: &'static ModelMeta,
        instance: &dyn Model,
    ) -> OrmResult<CompiledQuery> {
        let mut columns = Vec::new();
        let mut args = Vec::new();
        let mut returning = Vec::new();
        let mut placeholders = Vec::new();
        {
            let mut r = Renderer::new(&self.dialect, &mut args);
            for field in meta.column_fields() {
                let value = instance.get_value(field.name)?;
                if field.auto && value.is_zero() {
                    returning.push(field);
                    continue;
                }
                columns.push(self.q(&field.column));
                placeholders.push(r.bind(value));
            }
        }

        let mut sql = format!("INSERT INTO {}", self.q(meta.db_table));
        if columns.is_empty() {
            sql.push(' ');
            sql.push_str(self.dialect.empty_insert);
        } else {
            sql.push_str(&format!(
                " ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            ));
        }
        if self.dialect.returning == Returning::Columns && !returning.is_empty() {
            let cols: Vec<String> = returning.iter().map(|f| self.q(&f.column)).collect();
            sql.push_str(" RETURNING ");
            sql.push_str(&cols.join(", "));
        }
        Ok(CompiledQuery {
            sql,
            args,
            scan: ScanPlan::default(),
            returning,
        })
    }

    fn compile_update(&self, plan: &QueryPlan, partial: &dyn Model) -> OrmResult<CompiledQuery> {
        plan.check()?;
        let fields = update_fields(plan, partial)?;
        if fields.is_empty() {
            return Err(OrmError::TypeMismatch(format!(
                "nothing to update on '{}': every field is zero",
                plan.model.db_table
            )));
        }
        let mut args = Vec::new();
        let mut r = Renderer::new(&self.dialect, &mut args);
        let sets: Vec<String> = fields
            .into_iter()
            .map(|(f, v)| format!("{} = {}", self.q(&f.column), r.bind(v)))
            .collect();
        let where_sql = self
            .write_where(plan, &mut r)?
            .ok_or_else(|| OrmError::UnsafeUpdate(plan.model.db_table.to_string()))?;
        let sql = format!(
            "UPDATE {} SET {}{where_sql}",
            self.q(plan.model.db_table),
            sets.join(", ")
        );
        Ok(CompiledQuery::statement(sql, args))
    }

    fn compile_delete(&self, plan: &QueryPlan) -> OrmResult<CompiledQuery> {
        plan.check()?;
        let mut args = Vec::new();
        let mut r = Renderer::new(&self.dialect, &mut args);
        let where_sql = self
            .write_where(plan, &mut r)?
            .ok_or_else(|| OrmError::UnsafeDelete(plan.model.db_table.to_string()))?;
        let sql = format!("DELETE FROM {}{where_sql}", self.q(plan.model.db_table));
        Ok(CompiledQuery::statement(sql, args))
    }
}
