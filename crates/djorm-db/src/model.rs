//! Model trait and metadata for the ORM.
//!
//! The [`Model`] trait is how the query layer reads and writes user structs:
//! field values by declared name, related instances by relation name, and an
//! annotation side-map. [`ModelMeta`] is the static descriptor (table, fields,
//! keys, default ordering, factory) shared by every instance of a type.
//!
//! The trait is object-safe so the materializer can build trees of
//! heterogeneous models through `Box<dyn Model>`. In practice it is derived:
//!
//! ```ignore
//! #[derive(Model, Default)]
//! #[model(table = "todos")]
//! struct Todo {
//!     #[field(primary_key, auto)]
//!     id: i64,
//!     title: String,
//!     #[field(foreign_key)]
//!     user: Option<Box<User>>,
//! }
//! ```

use std::any::Any;
use std::collections::BTreeMap;

use crate::fields::FieldDef;
use crate::value::Value;
use crate::{OrmError, OrmResult};

/// Computed values attached to a materialized instance, keyed by alias.
pub type Annotations = BTreeMap<String, Value>;

/// Upcasting helpers so `dyn Model` can be downcast to its concrete type.
pub trait AsAny: Any {
    /// `&self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
    /// `&mut self` as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// `Box<Self>` as `Box<dyn Any>`.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// The core trait for all ORM models.
///
/// Field names are the declared Rust names. For a forward relation,
/// `get_value` returns the related key (or NULL) and `set_value` writes the key
/// into a stub related instance, creating it if needed; NULL clears the slot.
pub trait Model: AsAny + Send + Sync {
    /// Returns the static metadata for this model type.
    fn meta() -> &'static ModelMeta
    where
        Self: Sized;

    /// Returns the static metadata through an instance.
    fn definitions(&self) -> &'static ModelMeta;

    /// Reads a column-bearing field.
    fn get_value(&self, field: &str) -> OrmResult<Value>;

    /// Writes a column-bearing field, coercing the value to the field's type.
    fn set_value(&mut self, field: &str, value: Value) -> OrmResult<()>;

    /// The related instance behind a single-valued relation.
    fn related(&self, field: &str) -> OrmResult<Option<&dyn Model>>;

    /// Mutable access to the related instance behind a single-valued relation.
    fn related_mut(&mut self, field: &str) -> OrmResult<Option<&mut dyn Model>>;

    /// Replaces the related instance behind a single-valued relation.
    fn set_related(&mut self, field: &str, related: Option<Box<dyn Model>>) -> OrmResult<()>;

    /// The related instances behind a to-many relation.
    fn related_many(&self, field: &str) -> OrmResult<Vec<&dyn Model>>;

    /// Mutable access to the related instances behind a to-many relation.
    fn related_many_mut(&mut self, field: &str) -> OrmResult<Vec<&mut dyn Model>>;

    /// Appends to a to-many relation.
    fn push_related(&mut self, field: &str, related: Box<dyn Model>) -> OrmResult<()>;

    /// Stores a computed value. Models without an annotations map refuse.
    fn set_annotation(&mut self, alias: &str, value: Value) -> OrmResult<()> {
        let _ = value;
        Err(OrmError::NilPointer(format!(
            "model '{}' has no annotations map for '{alias}'",
            self.definitions().model_name
        )))
    }

    /// Reads a computed value.
    fn annotation(&self, alias: &str) -> Option<&Value> {
        let _ = alias;
        None
    }

    /// The primary key value, or NULL for models without one.
    fn pk_value(&self) -> OrmResult<Value> {
        match self.definitions().pk() {
            Some(pk) => self.get_value(pk.name),
            None => Ok(Value::Null),
        }
    }

    /// Writes the primary key.
    fn set_pk_value(&mut self, value: Value) -> OrmResult<()> {
        let meta = self.definitions();
        let pk = meta
            .pk()
            .ok_or_else(|| OrmError::NoUniqueKey(meta.db_table.to_string()))?;
        self.set_value(pk.name, value)
    }

    /// Snapshot of every column-bearing field, in declaration order.
    fn field_values(&self) -> OrmResult<Vec<(&'static str, Value)>> {
        self.definitions()
            .column_fields()
            .map(|f| Ok((f.name, self.get_value(f.name)?)))
            .collect()
    }
}

impl dyn Model {
    /// Downcasts to a concrete model.
    pub fn downcast_ref<T: Model>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Downcasts a boxed instance to a concrete model.
    pub fn downcast<T: Model>(self: Box<Self>) -> OrmResult<T> {
        let model_name = self.definitions().model_name;
        self.into_any()
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| {
                OrmError::TypeMismatch(format!(
                    "instance of '{model_name}' is not a {}",
                    std::any::type_name::<T>()
                ))
            })
    }
}

/// Static descriptor of a model type.
#[derive(Debug)]
pub struct ModelMeta {
    /// The application label (e.g. "todo").
    pub app_label: &'static str,
    /// The model name in lowercase (e.g. "todo").
    pub model_name: &'static str,
    /// The database table name.
    pub db_table: &'static str,
    /// Field definitions, in declaration order.
    pub fields: Vec<FieldDef>,
    /// Groups of fields that are unique together.
    pub unique_together: Vec<Vec<&'static str>>,
    /// Default ordering, e.g. `["-id"]`.
    pub ordering: Vec<&'static str>,
    /// Creates an empty instance.
    pub factory: fn() -> Box<dyn Model>,
}

impl ModelMeta {
    /// Looks up a field by declared name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The primary-key field, if any.
    pub fn pk(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// Fields mapped to a column of this table: scalars and forward relations.
    pub fn column_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.has_column())
    }

    /// Plain scalar fields.
    pub fn scalar_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.is_scalar())
    }

    /// Fields carrying a unique constraint (excluding the primary key).
    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.unique && !f.primary_key)
    }

    /// Creates an empty instance.
    pub fn new_instance(&self) -> Box<dyn Model> {
        (self.factory)()
    }
}
