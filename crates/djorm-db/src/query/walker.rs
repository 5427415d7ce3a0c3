//! Field walker and alias generation.
//!
//! [`walk_fields`] resolves a dotted path such as `"user.profile.email"`
//! against model metadata. [`AliasGenerator`] names the join tables one
//! compilation needs: `{relation_column}_{target_table}_{ordinal}`, with
//! ordinals counted per (parent table, relation) and each (parent alias,
//! relation) pair mapped to exactly one alias. An ordinal already taken by
//! another parent table with the same relation column and target is skipped,
//! so no two joins share an alias.

use std::collections::{HashMap, HashSet};

use crate::fields::{FieldDef, RelationKind};
use crate::model::ModelMeta;
use crate::{OrmError, OrmResult};

/// The result of resolving a path.
#[derive(Debug, Clone)]
pub struct FieldWalk {
    /// The path as given.
    pub path: String,
    /// The model the walk started from.
    pub root: &'static ModelMeta,
    /// The model owning the terminal segment.
    pub model: &'static ModelMeta,
    /// The model the last hop came from, if any hop was taken.
    pub parent: Option<&'static ModelMeta>,
    /// The terminal field; `None` for a trailing `*`.
    pub field: Option<&'static FieldDef>,
    /// Relation fields traversed, excluding the terminal.
    pub chain: Vec<&'static FieldDef>,
    /// The path ended in `*`.
    pub star: bool,
    /// At least one relation was traversed.
    pub crossed_relation: bool,
}

impl FieldWalk {
    /// Returns `true` if the terminal field is a relation.
    pub fn ends_at_relation(&self) -> bool {
        self.field.is_some_and(FieldDef::is_relation)
    }

    /// Returns `true` if any traversed relation (or a column-less terminal
    /// relation) can multiply rows.
    pub fn is_to_many(&self) -> bool {
        self.chain
            .iter()
            .chain(self.field.iter().filter(|f| !f.has_column()))
            .filter_map(|f| f.relation.as_ref())
            .any(crate::fields::Relation::is_to_many)
    }
}

/// Resolves `path` against `root`.
///
/// Every non-terminal segment must be a relation. The terminal may be a
/// scalar, a relation, or `*`.
///
/// # Errors
///
/// [`OrmError::UnknownField`] when a segment does not exist and
/// [`OrmError::UnreachableRelation`] when a non-terminal segment is a scalar.
pub fn walk_fields(root: &'static ModelMeta, path: &str) -> OrmResult<FieldWalk> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut model = root;
    let mut parent = None;
    let mut chain = Vec::new();

    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        if last && *segment == "*" {
            return Ok(FieldWalk {
                path: path.to_string(),
                root,
                model,
                parent,
                field: None,
                star: true,
                crossed_relation: !chain.is_empty(),
                chain,
            });
        }
        let field = model
            .field(segment)
            .ok_or_else(|| OrmError::unknown_field(model.db_table, *segment))?;
        if last {
            return Ok(FieldWalk {
                path: path.to_string(),
                root,
                model,
                parent,
                field: Some(field),
                star: false,
                crossed_relation: !chain.is_empty(),
                chain,
            });
        }
        let relation = field
            .relation
            .as_ref()
            .ok_or_else(|| OrmError::UnreachableRelation {
                model: model.db_table.to_string(),
                field: (*segment).to_string(),
            })?;
        chain.push(field);
        parent = Some(model);
        model = relation.target_meta();
    }

    Err(OrmError::unknown_field(root.db_table, path))
}

/// One join needed to reach a hop's target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinStep {
    /// Alias of the table joined from.
    pub parent_alias: String,
    /// Table joined to.
    pub table: String,
    /// Alias given to `table`.
    pub alias: String,
    /// Column on `parent_alias` in the ON condition.
    pub parent_column: String,
    /// Column on `alias` in the ON condition.
    pub column: String,
    /// The step can yield several rows per parent row.
    pub to_many: bool,
}

/// Deterministic namer of join tables for one compilation.
#[derive(Debug, Default)]
pub struct AliasGenerator {
    ordinals: HashMap<(String, String), usize>,
    assigned: HashMap<(String, String), String>,
    used: HashSet<String>,
}

impl AliasGenerator {
    /// Creates an empty generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the alias for `relation` followed from `parent_alias`.
    ///
    /// The first request for a (parent alias, relation) pair takes the next
    /// free ordinal for (parent table, relation); later requests return the
    /// same alias.
    pub fn table_alias(
        &mut self,
        parent_alias: &str,
        parent_table: &str,
        relation: &str,
        target_table: &str,
    ) -> String {
        let key = (parent_alias.to_string(), relation.to_string());
        if let Some(alias) = self.assigned.get(&key) {
            return alias.clone();
        }
        let ordinal = self
            .ordinals
            .entry((parent_table.to_string(), relation.to_string()))
            .or_insert(0);
        let alias = loop {
            *ordinal += 1;
            let candidate = format!("{relation}_{target_table}_{ordinal}");
            if !self.used.contains(&candidate) {
                break candidate;
            }
        };
        self.used.insert(alias.clone());
        self.assigned.insert(key, alias.clone());
        alias
    }

    /// Returns the alias of a projected column.
    pub fn field_alias(table_alias: &str, column: &str) -> String {
        format!("{table_alias}_{column}")
    }

    /// Computes the joins for one relation hop from `parent_alias`.
    ///
    /// Forward relations join on the owned key column, reverse relations on
    /// the target's key column, and many-to-many relations take two steps
    /// through the junction table.
    pub fn hop(
        &mut self,
        parent_alias: &str,
        parent: &'static ModelMeta,
        field: &'static FieldDef,
    ) -> OrmResult<Vec<JoinStep>> {
        let relation = field.relation.as_ref().ok_or_else(|| OrmError::UnreachableRelation {
            model: parent.db_table.to_string(),
            field: field.name.to_string(),
        })?;
        let target = relation.target_meta();
        let target_pk = target
            .pk()
            .ok_or_else(|| OrmError::NoUniqueKey(target.db_table.to_string()))?;

        if relation.owns_column() {
            let alias =
                self.table_alias(parent_alias, parent.db_table, &field.column, target.db_table);
            return Ok(vec![JoinStep {
                parent_alias: parent_alias.to_string(),
                table: target.db_table.to_string(),
                alias,
                parent_column: field.column.clone(),
                column: target_pk.column.clone(),
                to_many: false,
            }]);
        }

        let parent_pk = parent
            .pk()
            .ok_or_else(|| OrmError::NoUniqueKey(parent.db_table.to_string()))?;

        if relation.kind == RelationKind::ManyToMany {
            let junction = relation.junction(parent, field.name)?;
            let through_alias =
                self.table_alias(parent_alias, parent.db_table, field.name, &junction.table);
            let alias = self.table_alias(
                &through_alias,
                &junction.table,
                &junction.target_column,
                target.db_table,
            );
            return Ok(vec![
                JoinStep {
                    parent_alias: parent_alias.to_string(),
                    table: junction.table.clone(),
                    alias: through_alias.clone(),
                    parent_column: parent_pk.column.clone(),
                    column: junction.source_column,
                    to_many: true,
                },
                JoinStep {
                    parent_alias: through_alias,
                    table: target.db_table.to_string(),
                    alias,
                    parent_column: junction.target_column,
                    column: target_pk.column.clone(),
                    to_many: false,
                },
            ]);
        }

        let related_name = relation.related_field.ok_or_else(|| {
            OrmError::unknown_field(target.db_table, format!("<reverse of {}>", field.name))
        })?;
        let related = target
            .field(related_name)
            .ok_or_else(|| OrmError::unknown_field(target.db_table, related_name))?;
        let alias = self.table_alias(parent_alias, parent.db_table, field.name, target.db_table);
        Ok(vec![JoinStep {
            parent_alias: parent_alias.to_string(),
            table: target.db_table.to_string(),
            alias,
            parent_column: parent_pk.column.clone(),
            column: related.column.clone(),
            to_many: relation.is_to_many(),
        }])
    }

    /// Computes the joins for every hop of `walk`, starting at `root_alias`.
    ///
    /// Returns the steps grouped per hop together with the alias of each hop's
    /// target table.
    pub fn chain_for(
        &mut self,
        root_alias: &str,
        walk: &FieldWalk,
    ) -> OrmResult<Vec<(Vec<JoinStep>, String)>> {
        let mut current_alias = root_alias.to_string();
        let mut current_model = walk.root;
        let mut hops = Vec::with_capacity(walk.chain.len());
        for &field in &walk.chain {
            let steps = self.hop(&current_alias, current_model, field)?;
            let target_alias = steps
                .last()
                .map_or_else(|| current_alias.clone(), |s| s.alias.clone());
            current_alias.clone_from(&target_alias);
            current_model = field
                .relation
                .as_ref()
                .map_or(current_model, crate::fields::Relation::target_meta);
            hops.push((steps, target_alias));
        }
        Ok(hops)
    }

    /// The table alias reached by each hop of `walk`.
    pub fn aliases_for(&mut self, root_alias: &str, walk: &FieldWalk) -> OrmResult<Vec<String>> {
        Ok(self
            .chain_for(root_alias, walk)?
            .into_iter()
            .map(|(_, alias)| alias)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_models::{Category, Todo, User};
    use crate::model::Model;

    #[test]
    fn test_walk_scalar() {
        let walk = walk_fields(Todo::meta(), "title").unwrap();
        assert_eq!(walk.field.unwrap().name, "title");
        assert!(walk.chain.is_empty());
        assert!(!walk.crossed_relation);
        assert!(walk.parent.is_none());
        assert_eq!(walk.model.db_table, "todos");
    }

    #[test]
    fn test_walk_nested() {
        let walk = walk_fields(Todo::meta(), "user.profile.email").unwrap();
        let chain: Vec<_> = walk.chain.iter().map(|f| f.name).collect();
        assert_eq!(chain, vec!["user", "profile"]);
        assert_eq!(walk.model.db_table, "profiles");
        assert_eq!(walk.parent.unwrap().db_table, "users");
        assert!(walk.crossed_relation);
        assert!(!walk.is_to_many());
    }

    #[test]
    fn test_walk_star_and_bare_relation() {
        let star = walk_fields(Todo::meta(), "user.*").unwrap();
        assert!(star.star);
        assert!(star.field.is_none());
        assert_eq!(star.model.db_table, "users");

        let bare = walk_fields(Todo::meta(), "user").unwrap();
        assert!(bare.ends_at_relation());
        assert!(!bare.crossed_relation);

        let m2m = walk_fields(Todo::meta(), "tags").unwrap();
        assert!(m2m.is_to_many());
    }

    #[test]
    fn test_walk_errors() {
        let err = walk_fields(Todo::meta(), "nope").unwrap_err();
        assert!(matches!(err, OrmError::UnknownField { ref field, .. } if field == "nope"));

        let err = walk_fields(Todo::meta(), "title.length").unwrap_err();
        assert!(matches!(err, OrmError::UnreachableRelation { ref field, .. } if field == "title"));

        let err = walk_fields(Todo::meta(), "user.nope").unwrap_err();
        assert!(matches!(err, OrmError::UnknownField { ref model, .. } if model == "users"));
    }

    #[test]
    fn test_alias_stability_and_dedupe() {
        let mut gen = AliasGenerator::new();
        let a = gen.table_alias("todos", "todos", "user_id", "users");
        let b = gen.table_alias("todos", "todos", "user_id", "users");
        assert_eq!(a, "user_id_users_1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_shared_column_from_different_parents_gets_distinct_aliases() {
        let mut gen = AliasGenerator::new();
        let direct = gen.table_alias("todos", "todos", "user_id", "users");
        let nested = gen.table_alias("note_id_notes_1", "notes", "user_id", "users");
        assert_eq!(direct, "user_id_users_1");
        assert_eq!(nested, "user_id_users_2");
        assert_eq!(
            gen.table_alias("note_id_notes_1", "notes", "user_id", "users"),
            nested
        );
        let again = gen.table_alias("other", "notes", "user_id", "users");
        assert_eq!(again, "user_id_users_3");
    }

    #[test]
    fn test_self_reference_gets_distinct_ordinals() {
        let mut gen = AliasGenerator::new();
        let walk = walk_fields(Category::meta(), "parent.parent.name").unwrap();
        let aliases = gen.aliases_for("categories", &walk).unwrap();
        assert_eq!(aliases, vec!["parent_id_categories_1", "parent_id_categories_2"]);
    }

    #[test]
    fn test_hop_shapes() {
        let mut gen = AliasGenerator::new();
        let user_field = Todo::meta().field("user").unwrap();
        let steps = gen.hop("todos", Todo::meta(), user_field).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].parent_column, "user_id");
        assert_eq!(steps[0].column, "id");

        let reverse = User::meta().field("todos").unwrap();
        let steps = gen.hop("users", User::meta(), reverse).unwrap();
        assert_eq!(steps[0].alias, "todos_todos_1");
        assert_eq!(steps[0].parent_column, "id");
        assert_eq!(steps[0].column, "user_id");
        assert!(steps[0].to_many);

        let tags = Todo::meta().field("tags").unwrap();
        let steps = gen.hop("todos", Todo::meta(), tags).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].table, "todos_tags");
        assert_eq!(steps[0].alias, "tags_todos_tags_1");
        assert_eq!(steps[0].column, "todos_id");
        assert_eq!(steps[1].alias, "tags_id_tags_1");
        assert_eq!(steps[1].parent_column, "tags_id");
    }

    #[test]
    fn test_field_alias() {
        assert_eq!(AliasGenerator::field_alias("todos", "id"), "todos_id");
    }
}
