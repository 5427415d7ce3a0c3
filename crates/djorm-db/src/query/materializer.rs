//! Row materializer.
//!
//! Turns flat result rows into trees of model instances following the
//! [`ScanPlan`] the compiler registered. Columns are read in scan order,
//! coerced to each field's declared type, and written with
//! [`Model::set_value`]. Related instances are created on first encounter;
//! a related node whose columns are all NULL (a LEFT JOIN miss) stays unset.
//!
//! When the plan joins a to-many relation and projects the root key, rows
//! sharing a root key are merged: to-many children are appended once per
//! child key, recursively.

use std::collections::HashMap;

use crate::cancel::CancelToken;
use crate::model::Model;
use crate::query::compiler::{Row, ScanPlan, ScanTarget};
use crate::value::Value;
use crate::{OrmError, OrmResult};

/// One instance and its related children, before attachment.
struct Built {
    node: usize,
    key: Option<String>,
    instance: Box<dyn Model>,
    children: Vec<Built>,
}

impl Built {
    fn merge(&mut self, other: Self, scan: &ScanPlan) {
        for child in other.children {
            let to_many = scan.nodes[child.node].is_to_many();
            let existing = self.children.iter_mut().find(|c| {
                c.node == child.node && (!to_many || (c.key.is_some() && c.key == child.key))
            });
            match existing {
                Some(slot) => slot.merge(child, scan),
                None => self.children.push(child),
            }
        }
    }

    fn attach(self, scan: &ScanPlan) -> OrmResult<Box<dyn Model>> {
        let mut instance = self.instance;
        for child in self.children {
            let node = &scan.nodes[child.node];
            let relation = node.relation.ok_or_else(|| {
                OrmError::NilPointer(format!("scan node '{}' has no relation", node.alias))
            })?;
            let to_many = node.is_to_many();
            let related = child.attach(scan)?;
            if to_many {
                instance.push_related(relation.name, related)?;
            } else {
                instance.set_related(relation.name, Some(related))?;
            }
        }
        Ok(instance)
    }
}

fn check(cancel: Option<&CancelToken>) -> OrmResult<()> {
    cancel.map_or(Ok(()), CancelToken::check)
}

fn row_tree(scan: &ScanPlan, row: Row) -> OrmResult<Built> {
    let values = row.into_values();
    if values.len() != scan.entries.len() {
        return Err(OrmError::TypeMismatch(format!(
            "row has {} columns, projection has {}",
            values.len(),
            scan.entries.len()
        )));
    }

    let count = scan.nodes.len();
    let mut instances: Vec<Option<Box<dyn Model>>> = (0..count).map(|_| None).collect();
    let mut has_entries = vec![false; count];
    let mut has_values = vec![false; count];
    let mut keys: Vec<Option<String>> = vec![None; count];
    let mut annotations = Vec::new();

    for (idx, (entry, value)) in scan.entries.iter().zip(values).enumerate() {
        match &entry.target {
            ScanTarget::Annotation(alias) => annotations.push((alias.as_str(), value)),
            ScanTarget::Field { node, field } => {
                let node = *node;
                has_entries[node] = true;
                let value = field.field_type.normalize(value)?;
                if scan.nodes[node].pk_entry == Some(idx) && !value.is_null() {
                    keys[node] = Some(value.group_key());
                }
                if value.is_null() && node != 0 {
                    continue;
                }
                has_values[node] |= !value.is_null();
                let instance = instances[node]
                    .get_or_insert_with(|| scan.nodes[node].meta.new_instance());
                instance.set_value(field.name, value)?;
            }
        }
    }

    // Nodes are discovered parent-first, so a reverse sweep settles children
    // before their parents.
    let mut present = vec![false; count];
    present[0] = true;
    for node in (1..count).rev() {
        present[node] = if has_entries[node] {
            has_values[node]
        } else {
            scan.children(node).any(|c| present[c])
        };
    }

    let mut built: Vec<Option<Built>> = Vec::with_capacity(count);
    for (node, instance) in instances.into_iter().enumerate() {
        built.push(present[node].then(|| Built {
            node,
            key: keys[node].take(),
            instance: instance.unwrap_or_else(|| scan.nodes[node].meta.new_instance()),
            children: Vec::new(),
        }));
    }
    for node in (1..count).rev() {
        let Some(child) = built[node].take() else {
            continue;
        };
        if let Some(parent) = scan.nodes[node].parent.and_then(|p| built[p].as_mut()) {
            parent.children.insert(0, child);
        }
    }

    let mut root = built
        .into_iter()
        .next()
        .flatten()
        .ok_or_else(|| OrmError::NilPointer("scan plan has no root node".to_string()))?;
    for (alias, value) in annotations {
        root.instance.set_annotation(alias, value)?;
    }
    Ok(root)
}

/// Materializes `rows` into root instances, in row order.
///
/// With `group_rows` set, the first row of each root key fixes the position of
/// that root.
pub fn materialize(
    scan: &ScanPlan,
    rows: Vec<Row>,
    cancel: Option<&CancelToken>,
) -> OrmResult<Vec<Box<dyn Model>>> {
    let mut roots: Vec<Built> = Vec::with_capacity(rows.len());
    let mut by_key: HashMap<String, usize> = HashMap::new();

    for row in rows {
        check(cancel)?;
        let tree = row_tree(scan, row)?;
        if scan.group_rows {
            if let Some(key) = tree.key.clone() {
                if let Some(&idx) = by_key.get(&key) {
                    roots[idx].merge(tree, scan);
                    continue;
                }
                by_key.insert(key, roots.len());
            }
        }
        roots.push(tree);
    }

    roots.into_iter().map(|r| r.attach(scan)).collect()
}

/// Materializes `rows` and downcasts each root to `M`.
pub fn materialize_as<M: Model>(
    scan: &ScanPlan,
    rows: Vec<Row>,
    cancel: Option<&CancelToken>,
) -> OrmResult<Vec<M>> {
    materialize(scan, rows, cancel)?
        .into_iter()
        .map(<dyn Model>::downcast::<M>)
        .collect()
}

/// Coerces `rows` to tuples without building instances.
pub fn value_rows(
    scan: &ScanPlan,
    rows: Vec<Row>,
    cancel: Option<&CancelToken>,
) -> OrmResult<Vec<Vec<Value>>> {
    rows.into_iter()
        .map(|row| {
            check(cancel)?;
            scan.entries
                .iter()
                .zip(row.into_values())
                .map(|(entry, value)| match &entry.target {
                    ScanTarget::Field { field, .. } => field.field_type.normalize(value),
                    ScanTarget::Annotation(_) => Ok(value),
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::model::test_models::{Todo, User};
    use crate::query::compiler::{CompiledQuery, Compiler, SqlCompiler};
    use crate::query::expressions::FuncExpr;
    use crate::query::queryset::{objects, QuerySet};

    fn compile<M: Model>(qs: &QuerySet<M>) -> CompiledQuery {
        SqlCompiler::new(Dialect::sqlite())
            .compile_select(qs.plan())
            .unwrap()
    }

    fn row(c: &CompiledQuery, values: Vec<Value>) -> Row {
        let columns = c.scan.entries.iter().map(|e| e.column_alias.clone()).collect();
        Row::new(columns, values)
    }

    #[test]
    fn test_flat_rows() {
        let c = compile(&objects::<Todo>());
        let rows = vec![
            row(&c, vec![1.into(), "a".into(), Value::Int(0), Value::Null]),
            row(&c, vec![2.into(), "b".into(), Value::Int(1), 7.into()]),
        ];
        let todos = materialize_as::<Todo>(&c.scan, rows, None).unwrap();
        assert_eq!(todos.len(), 2);
        assert!(!todos[0].done);
        assert!(todos[0].user.is_none());
        assert!(todos[1].done);
        assert_eq!(todos[1].user.as_ref().unwrap().id, 7);
    }

    #[test]
    fn test_nested_and_left_join_miss() {
        let qs = objects::<Todo>().select(["id", "user.*", "user.profile.*"]);
        let c = compile(&qs);
        // todos_id, users: id name, profiles: id name email
        let hit = row(
            &c,
            vec![
                1.into(),
                2.into(),
                "ann".into(),
                3.into(),
                "p".into(),
                "a@example.com".into(),
            ],
        );
        let miss = row(
            &c,
            vec![5.into(), 2.into(), "ann".into(), Value::Null, Value::Null, Value::Null],
        );
        let todos = materialize_as::<Todo>(&c.scan, vec![hit, miss], None).unwrap();
        let user = todos[0].user.as_ref().unwrap();
        assert_eq!(user.name, "ann");
        assert_eq!(user.profile.as_ref().unwrap().email, "a@example.com");
        assert!(todos[1].user.as_ref().unwrap().profile.is_none());
    }

    #[test]
    fn test_to_many_grouping_dedupes() {
        let qs = objects::<Todo>().select(["id", "tags.*"]);
        let c = compile(&qs);
        let rows = vec![
            row(&c, vec![1.into(), 10.into(), "x".into()]),
            row(&c, vec![1.into(), 11.into(), "y".into()]),
            row(&c, vec![1.into(), 10.into(), "x".into()]),
            row(&c, vec![2.into(), Value::Null, Value::Null]),
        ];
        let todos = materialize_as::<Todo>(&c.scan, rows, None).unwrap();
        assert_eq!(todos.len(), 2);
        let labels: Vec<_> = todos[0].tags.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["x", "y"]);
        assert!(todos[1].tags.is_empty());
    }

    #[test]
    fn test_reverse_relation_grouping() {
        let qs = objects::<User>().select(["id", "todos.title"]);
        let c = compile(&qs);
        assert!(c.scan.group_rows);
    }

    #[test]
    fn test_annotations_land_on_root() {
        let qs = objects::<Todo>()
            .select(["id"])
            .annotate("shout", FuncExpr::new("UPPER(%s)", ["title"], []));
        let c = compile(&qs);
        let rows = vec![row(&c, vec![1.into(), "HI".into()])];
        let todos = materialize_as::<Todo>(&c.scan, rows, None).unwrap();
        assert_eq!(todos[0].annotations.get("shout"), Some(&Value::from("HI")));
    }

    #[test]
    fn test_cancel_between_rows() {
        let c = compile(&objects::<Todo>().select(["id"]));
        let token = CancelToken::new();
        token.cancel();
        let rows = vec![row(&c, vec![1.into()])];
        assert!(matches!(
            materialize(&c.scan, rows, Some(&token)),
            Err(OrmError::Cancelled)
        ));
    }

    #[test]
    fn test_column_count_mismatch() {
        let c = compile(&objects::<Todo>().select(["id"]));
        let bad = Row::new(vec!["a".into(), "b".into()], vec![1.into(), 2.into()]);
        assert!(matches!(
            materialize(&c.scan, vec![bad], None),
            Err(OrmError::TypeMismatch(_))
        ));
    }
}
