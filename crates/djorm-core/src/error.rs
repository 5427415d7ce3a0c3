//! Error types for the djorm query layer.
//!
//! [`OrmError`] is the closed taxonomy every terminal verb propagates. Shape
//! errors (unknown fields, unreachable relations, unsupported lookups, unsafe
//! writes) are programmer mistakes; data errors (`NotFound`, `Cancelled`,
//! `Driver`, ...) are ordinary outcomes the caller is expected to handle.

use thiserror::Error;

/// A boxed driver error, kept verbatim as the error source.
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type for djorm operations.
#[derive(Error, Debug)]
pub enum OrmError {
    // ── Shape errors ─────────────────────────────────────────────────

    /// A path segment does not exist on the model it was looked up on.
    #[error("unknown field '{field}' on model '{model}'")]
    UnknownField {
        /// The model (table) that was searched.
        model: String,
        /// The missing segment.
        field: String,
    },

    /// A non-terminal path segment is a scalar, so the walk cannot continue.
    #[error("field '{field}' on model '{model}' is not a relation and cannot be traversed")]
    UnreachableRelation {
        /// The model (table) owning the scalar.
        model: String,
        /// The scalar segment that was used as a hop.
        field: String,
    },

    /// The lookup suffix (or the values supplied to it) is not supported.
    #[error("unsupported lookup: {0}")]
    UnsupportedLookup(String),

    /// DELETE attempted without any predicate.
    #[error("refusing to DELETE from '{0}' without a WHERE clause")]
    UnsafeDelete(String),

    /// UPDATE attempted without any predicate.
    #[error("refusing to UPDATE '{0}' without a WHERE clause")]
    UnsafeUpdate(String),

    // ── Data errors ──────────────────────────────────────────────────

    /// A traversal hit an absent related instance.
    #[error("nil relation: {0}")]
    NilPointer(String),

    /// `get` matched no rows.
    #[error("{0} matching query does not exist")]
    NotFound(String),

    /// `get` matched more than one row.
    #[error("get() returned more than one {model}: it returned {count}")]
    MultipleFound {
        /// The model (table) queried.
        model: String,
        /// Number of rows returned.
        count: usize,
    },

    /// No primary key, unique field, or unique-together group is set on the instance.
    #[error("cannot build a WHERE clause for '{0}': no primary key or unique fields set")]
    NoUniqueKey(String),

    /// Commit, rollback or a verb on a transaction that is no longer active.
    #[error("transaction is not active: {0}")]
    NoTransaction(String),

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Error raised by the underlying database driver.
    #[error("driver error: {0}")]
    Driver(#[source] DriverError),

    // ── Ambient errors ───────────────────────────────────────────────

    /// A scanned or supplied value cannot be coerced to the declared type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Settings could not be loaded or are invalid.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl OrmError {
    /// Wraps any driver error verbatim.
    pub fn driver<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Driver(Box::new(err))
    }

    /// Wraps a driver-side message that has no error type of its own.
    pub fn driver_message(message: impl Into<String>) -> Self {
        Self::Driver(message.into().into())
    }

    /// Shorthand for [`OrmError::UnknownField`].
    pub fn unknown_field(model: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            model: model.into(),
            field: field.into(),
        }
    }

    /// Returns `true` for programmer errors: bad paths, bad lookups, and
    /// unguarded writes.
    pub const fn is_shape_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownField { .. }
                | Self::UnreachableRelation { .. }
                | Self::UnsupportedLookup(_)
                | Self::UnsafeDelete(_)
                | Self::UnsafeUpdate(_)
        )
    }

    /// Clones the error for re-reporting. Driver errors lose their concrete
    /// type and keep their message.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        match self {
            Self::UnknownField { model, field } => Self::UnknownField {
                model: model.clone(),
                field: field.clone(),
            },
            Self::UnreachableRelation { model, field } => Self::UnreachableRelation {
                model: model.clone(),
                field: field.clone(),
            },
            Self::UnsupportedLookup(s) => Self::UnsupportedLookup(s.clone()),
            Self::UnsafeDelete(s) => Self::UnsafeDelete(s.clone()),
            Self::UnsafeUpdate(s) => Self::UnsafeUpdate(s.clone()),
            Self::NilPointer(s) => Self::NilPointer(s.clone()),
            Self::NotFound(s) => Self::NotFound(s.clone()),
            Self::MultipleFound { model, count } => Self::MultipleFound {
                model: model.clone(),
                count: *count,
            },
            Self::NoUniqueKey(s) => Self::NoUniqueKey(s.clone()),
            Self::NoTransaction(s) => Self::NoTransaction(s.clone()),
            Self::Cancelled => Self::Cancelled,
            Self::Driver(e) => Self::driver_message(e.to_string()),
            Self::TypeMismatch(s) => Self::TypeMismatch(s.clone()),
            Self::Configuration(s) => Self::Configuration(s.clone()),
        }
    }
}

/// A convenience type alias for `Result<T, OrmError>`.
pub type OrmResult<T> = Result<T, OrmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_field_display() {
        let err = OrmError::unknown_field("todos", "titel");
        assert_eq!(err.to_string(), "unknown field 'titel' on model 'todos'");
    }

    #[test]
    fn test_multiple_found_display() {
        let err = OrmError::MultipleFound {
            model: "todos".into(),
            count: 3,
        };
        assert_eq!(
            err.to_string(),
            "get() returned more than one todos: it returned 3"
        );
    }

    #[test]
    fn test_shape_error_classification() {
        assert!(OrmError::unknown_field("a", "b").is_shape_error());
        assert!(OrmError::UnsupportedLookup("regex".into()).is_shape_error());
        assert!(OrmError::UnsafeDelete("todos".into()).is_shape_error());
        assert!(OrmError::UnsafeUpdate("todos".into()).is_shape_error());
        assert!(!OrmError::NotFound("todos".into()).is_shape_error());
        assert!(!OrmError::Cancelled.is_shape_error());
        assert!(!OrmError::driver_message("boom").is_shape_error());
    }

    #[test]
    fn test_driver_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "socket closed");
        let err = OrmError::driver(io);
        assert_eq!(err.to_string(), "driver error: socket closed");
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("socket closed"));
    }

    #[test]
    fn test_duplicate_preserves_variant() {
        let err = OrmError::UnreachableRelation {
            model: "todos".into(),
            field: "title".into(),
        };
        assert!(matches!(
            err.duplicate(),
            OrmError::UnreachableRelation { ref field, .. } if field == "title"
        ));
        assert!(matches!(
            OrmError::driver_message("x").duplicate(),
            OrmError::Driver(_)
        ));
    }
}
