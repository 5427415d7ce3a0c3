//! Field type definitions for the ORM.
//!
//! [`FieldDef`] captures everything the query layer needs about one model
//! field: its column, declared [`FieldType`], flags, and an optional
//! [`Relation`] describing how to join to another model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::model::ModelMeta;
use crate::value::{FromValue, Value};
use crate::{OrmError, OrmResult};

/// The declared type of a model field.
///
/// Drivers return loosely typed values (SQLite booleans are integers, MySQL
/// numerics can arrive as text). [`FieldType::normalize`] turns a scanned
/// value into the canonical [`Value`] variant for the declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FieldType {
    /// Auto-incrementing 32-bit integer primary key.
    AutoField,
    /// Auto-incrementing 64-bit integer primary key.
    BigAutoField,
    /// Variable-length string.
    CharField,
    /// Unlimited-length text.
    TextField,
    /// 32-bit signed integer.
    IntegerField,
    /// 64-bit signed integer.
    BigIntegerField,
    /// 16-bit signed integer.
    SmallIntegerField,
    /// 64-bit floating-point number.
    FloatField,
    /// Boolean (true/false).
    BooleanField,
    /// Date without time.
    DateField,
    /// Date and time without timezone.
    DateTimeField,
    /// Date and time in UTC.
    DateTimeTzField,
    /// Time without date.
    TimeField,
    /// Duration / interval.
    DurationField,
    /// UUID field.
    UuidField,
    /// Raw binary data.
    BinaryField,
    /// JSON data.
    JsonField,
    /// Many-to-one relationship; the column holds the target's key.
    ForeignKey,
    /// One-to-one relationship.
    OneToOneField,
    /// Reverse side of a foreign key (one-to-many). No column.
    ReverseForeignKey,
    /// Many-to-many relationship through a junction table. No column.
    ManyToManyField,
}

impl FieldType {
    /// Coerces a scanned value into the canonical variant for this type.
    ///
    /// NULL passes through. Relation types pass the value through unchanged:
    /// the key type is the target's concern.
    pub fn normalize(self, value: Value) -> OrmResult<Value> {
        if value.is_null() {
            return Ok(value);
        }
        Ok(match self {
            Self::AutoField
            | Self::BigAutoField
            | Self::IntegerField
            | Self::BigIntegerField
            | Self::SmallIntegerField => Value::Int(i64::from_value(&value)?),
            Self::FloatField => Value::Float(f64::from_value(&value)?),
            Self::BooleanField => Value::Bool(bool::from_value(&value)?),
            Self::CharField | Self::TextField => Value::String(String::from_value(&value)?),
            Self::DateField => Value::Date(NaiveDate::from_value(&value)?),
            Self::DateTimeField => Value::DateTime(NaiveDateTime::from_value(&value)?),
            Self::DateTimeTzField => Value::DateTimeTz(DateTime::<Utc>::from_value(&value)?),
            Self::TimeField => Value::Time(NaiveTime::from_value(&value)?),
            Self::DurationField => Value::Duration(chrono::Duration::from_value(&value)?),
            Self::UuidField => Value::Uuid(uuid::Uuid::from_value(&value)?),
            Self::BinaryField => Value::Bytes(Vec::<u8>::from_value(&value)?),
            Self::JsonField => Value::Json(serde_json::Value::from_value(&value)?),
            Self::ForeignKey
            | Self::OneToOneField
            | Self::ReverseForeignKey
            | Self::ManyToManyField => value,
        })
    }

    /// Returns `true` for the auto-incrementing integer types.
    pub const fn is_auto(self) -> bool {
        matches!(self, Self::AutoField | Self::BigAutoField)
    }
}

/// Referential action for `ON DELETE` / `ON UPDATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum OnDelete {
    /// Propagate the change to related rows.
    Cascade,
    /// Refuse the change while related rows exist.
    Protect,
    /// Set the foreign key to NULL.
    SetNull,
    /// Set the foreign key to its default value.
    SetDefault,
    /// Refuse the change (checked immediately).
    Restrict,
    /// Take no action.
    #[default]
    DoNothing,
}

/// `ON UPDATE` uses the same set of actions.
pub type OnUpdate = OnDelete;

impl OnDelete {
    /// The SQL keyword for this action.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::Protect | Self::Restrict => "RESTRICT",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
            Self::DoNothing => "NO ACTION",
        }
    }
}

impl FromStr for OnDelete {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "cascade" => Ok(Self::Cascade),
            "protect" => Ok(Self::Protect),
            "set_null" => Ok(Self::SetNull),
            "set_default" => Ok(Self::SetDefault),
            "restrict" => Ok(Self::Restrict),
            "do_nothing" | "no_action" => Ok(Self::DoNothing),
            other => Err(OrmError::Configuration(format!(
                "unknown referential action '{other}'"
            ))),
        }
    }
}

/// The cardinality of a relation, seen from the declaring model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Forward foreign key.
    ManyToOne,
    /// Reverse foreign key: the target holds a key pointing back.
    OneToMany,
    /// Unique foreign key, forward or reverse.
    OneToOne,
    /// Junction-table relation.
    ManyToMany,
}

/// An explicit junction model for a many-to-many relation.
#[derive(Clone, Copy)]
pub struct Through {
    /// Metadata accessor of the junction model.
    pub model: fn() -> &'static ModelMeta,
    /// Foreign-key field on the junction pointing at the declaring model.
    pub source_field: &'static str,
    /// Foreign-key field on the junction pointing at the target model.
    pub target_field: &'static str,
}

impl fmt::Debug for Through {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Through")
            .field("model", &(self.model)().db_table)
            .field("source_field", &self.source_field)
            .field("target_field", &self.target_field)
            .finish()
    }
}

/// The junction table and its two key columns, resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunctionTable {
    /// Table name.
    pub table: String,
    /// Column referencing the declaring model's key.
    pub source_column: String,
    /// Column referencing the target model's key.
    pub target_column: String,
}

/// How a relation field reaches its target.
#[derive(Clone)]
pub struct Relation {
    /// Cardinality.
    pub kind: RelationKind,
    /// Target metadata accessor. Evaluated lazily so cyclic models work.
    pub target: fn() -> &'static ModelMeta,
    /// For reverse relations, the foreign-key field on the target.
    pub related_field: Option<&'static str>,
    /// For many-to-many relations, the explicit junction model.
    pub through: Option<Through>,
    /// `ON DELETE` action.
    pub on_delete: OnDelete,
    /// `ON UPDATE` action.
    pub on_update: OnUpdate,
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("kind", &self.kind)
            .field("target", &(self.target)().db_table)
            .field("related_field", &self.related_field)
            .field("through", &self.through)
            .finish_non_exhaustive()
    }
}

impl Relation {
    const fn with_kind(kind: RelationKind, target: fn() -> &'static ModelMeta) -> Self {
        Self {
            kind,
            target,
            related_field: None,
            through: None,
            on_delete: OnDelete::DoNothing,
            on_update: OnDelete::DoNothing,
        }
    }

    /// A forward foreign key.
    pub const fn many_to_one(target: fn() -> &'static ModelMeta) -> Self {
        Self::with_kind(RelationKind::ManyToOne, target)
    }

    /// A forward one-to-one key. Chain [`reverse`](Self::reverse) for the
    /// reverse side.
    pub const fn one_to_one(target: fn() -> &'static ModelMeta) -> Self {
        Self::with_kind(RelationKind::OneToOne, target)
    }

    /// A reverse foreign key: `related_field` is the key on the target.
    pub const fn one_to_many(
        target: fn() -> &'static ModelMeta,
        related_field: &'static str,
    ) -> Self {
        Self::with_kind(RelationKind::OneToMany, target).reverse(related_field)
    }

    /// A many-to-many relation with an implicit junction table.
    pub const fn many_to_many(target: fn() -> &'static ModelMeta) -> Self {
        Self::with_kind(RelationKind::ManyToMany, target)
    }

    /// Marks this relation as the reverse side of `related_field` on the target.
    #[must_use]
    pub const fn reverse(mut self, related_field: &'static str) -> Self {
        self.related_field = Some(related_field);
        self
    }

    /// Sets the explicit junction model.
    #[must_use]
    pub const fn through(mut self, through: Through) -> Self {
        self.through = Some(through);
        self
    }

    /// Sets the `ON DELETE` action.
    #[must_use]
    pub const fn on_delete(mut self, action: OnDelete) -> Self {
        self.on_delete = action;
        self
    }

    /// Sets the `ON UPDATE` action.
    #[must_use]
    pub const fn on_update(mut self, action: OnUpdate) -> Self {
        self.on_update = action;
        self
    }

    /// The target model.
    pub fn target_meta(&self) -> &'static ModelMeta {
        (self.target)()
    }

    /// Forward relations store the target's key in a column of their own.
    pub const fn owns_column(&self) -> bool {
        match self.kind {
            RelationKind::ManyToOne => true,
            RelationKind::OneToOne => self.related_field.is_none(),
            RelationKind::OneToMany | RelationKind::ManyToMany => false,
        }
    }

    /// Relations that can yield more than one related row per parent.
    pub const fn is_to_many(&self) -> bool {
        matches!(self.kind, RelationKind::OneToMany | RelationKind::ManyToMany)
    }

    /// Resolves the junction table of a many-to-many relation declared as
    /// `field` on `source`.
    ///
    /// Without an explicit [`Through`] the junction is
    /// `{source_table}_{field}` with columns `{source_table}_id` and
    /// `{target_table}_id`.
    pub fn junction(&self, source: &ModelMeta, field: &str) -> OrmResult<JunctionTable> {
        let target = self.target_meta();
        match &self.through {
            Some(through) => {
                let junction = (through.model)();
                let column_of = |name: &str| {
                    junction
                        .field(name)
                        .map(|f| f.column.clone())
                        .ok_or_else(|| OrmError::unknown_field(junction.db_table, name))
                };
                Ok(JunctionTable {
                    table: junction.db_table.to_string(),
                    source_column: column_of(through.source_field)?,
                    target_column: column_of(through.target_field)?,
                })
            }
            None => {
                let (source_column, target_column) = if source.db_table == target.db_table {
                    (
                        format!("from_{}_id", source.db_table),
                        format!("to_{}_id", target.db_table),
                    )
                } else {
                    (
                        format!("{}_id", source.db_table),
                        format!("{}_id", target.db_table),
                    )
                };
                Ok(JunctionTable {
                    table: format!("{}_{field}", source.db_table),
                    source_column,
                    target_column,
                })
            }
        }
    }
}

/// Complete definition of a model field.
///
/// Usually built by `#[derive(Model)]`; can be assembled by hand with the
/// builder methods when implementing [`Model`](crate::model::Model) manually.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// The declared Rust field name; paths use this.
    pub name: &'static str,
    /// The database column name. For forward relations, the key column.
    pub column: String,
    /// The declared type.
    pub field_type: FieldType,
    /// Whether this field is the primary key.
    pub primary_key: bool,
    /// Whether NULL is allowed.
    pub null: bool,
    /// Whether a UNIQUE constraint applies.
    pub unique: bool,
    /// Whether the database generates the value on insert.
    pub auto: bool,
    /// Maximum character length, if declared.
    pub max_length: Option<usize>,
    /// Relation details for relational fields.
    pub relation: Option<Relation>,
}

impl FieldDef {
    /// Creates a non-null, non-unique scalar field whose column is its name.
    pub fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            column: name.to_string(),
            field_type,
            primary_key: false,
            null: false,
            unique: false,
            auto: field_type.is_auto(),
            max_length: None,
            relation: None,
        }
    }

    /// Sets the database column name.
    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Marks this field as the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Allows NULL values in the database.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    /// Marks this field as having a UNIQUE constraint.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks this field as database-generated.
    #[must_use]
    pub const fn auto(mut self) -> Self {
        self.auto = true;
        self
    }

    /// Sets the maximum character length.
    #[must_use]
    pub const fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Attaches relation details.
    ///
    /// Column-less relations (reverse, many-to-many) get an empty column.
    #[must_use]
    pub fn relation(mut self, relation: Relation) -> Self {
        if !relation.owns_column() {
            self.column = String::new();
        }
        self.relation = Some(relation);
        self
    }

    /// Returns `true` if this field represents a relation.
    pub const fn is_relation(&self) -> bool {
        self.relation.is_some()
    }

    /// Returns `true` if this field maps to a column on its own table:
    /// scalars and forward relations.
    pub fn has_column(&self) -> bool {
        self.relation.as_ref().map_or(true, Relation::owns_column)
    }

    /// Returns `true` if this field is a plain scalar column.
    pub const fn is_scalar(&self) -> bool {
        self.relation.is_none()
    }
}
