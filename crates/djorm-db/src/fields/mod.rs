//! Field definitions for the ORM.
//!
//! This module provides the [`FieldDef`] struct, the [`FieldType`] enum used
//! to coerce scanned values, and the [`Relation`] record that tells the field
//! walker how to join from one model to another.

pub mod types;

pub use types::{
    FieldDef, FieldType, JunctionTable, OnDelete, OnUpdate, Relation, RelationKind, Through,
};
