//! # djorm
//!
//! A Django-style ORM query layer for Rust.
//!
//! This is the meta-crate that re-exports the djorm crates for convenient
//! access. Depend on `djorm` to get everything, or on the individual crates
//! for finer-grained control. Backends are chosen with the `sqlite`,
//! `postgres` and `mysql` features.
//!
//! ```ignore
//! use djorm::prelude::*;
//!
//! let settings = djorm::core::settings_loader::from_toml_file_with_env("djorm.toml")?;
//! let db = djorm::init(&settings).await?;
//! let open = objects::<Todo>()
//!     .filter(q("user.profile.email__icontains", "example"))
//!     .filter_by("done", false)
//!     .order_by(["-id"])
//!     .all(&*db)
//!     .await?;
//! ```

/// Error taxonomy, settings, and logging setup.
pub use djorm_core as core;

/// Query layer: models, query sets, expressions, compiler, execution.
pub use djorm_db as db;

/// Executors for SQLite, PostgreSQL and MySQL.
pub use djorm_db_backends as db_backends;

/// `#[derive(Model)]`.
#[cfg(feature = "macros")]
pub use djorm_macros as macros;

/// Signal dispatcher behind the write hooks.
#[cfg(feature = "signals")]
pub use djorm_signals as signals;

pub use djorm_core::{OrmError, OrmResult};
pub use djorm_db_backends::{connect, DatabaseConfig};

use djorm_core::logging::setup_logging;
use djorm_core::settings::Settings;
use djorm_db::DbExecutor;

/// Installs logging from `settings` and connects to the configured database.
pub async fn init(settings: &Settings) -> OrmResult<Box<dyn DbExecutor>> {
    setup_logging(settings);
    let config = DatabaseConfig::from_settings(&settings.database);
    connect(&config).await
}

/// The names most programs need.
pub mod prelude {
    pub use djorm_db::{
        and, expr, not, objects, or, q, q_values, subquery, subquery_count, subquery_exists,
        subquery_in, Annotations, CancelScope, CancelToken, DbExecutor, FuncExpr, JoinKind,
        Lookup, Model, OrmError, OrmResult, QuerySet, RawExpr, Transaction, Value,
    };
    pub use djorm_db::{
        count_objects, create_object, delete_object, get_object, list_objects, refresh_object,
        save_object, update_object,
    };

    #[cfg(feature = "macros")]
    pub use djorm_macros::Model;
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_connects_configured_sqlite() {
        let mut settings = Settings::default();
        settings.database.name = ":memory:".to_string();
        let db = init(&settings).await.unwrap();
        assert_eq!(db.driver(), "sqlite");
        db.execute_sql("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();
        let rows = db.query("SELECT COUNT(*) FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_init_rejects_unknown_driver() {
        let mut settings = Settings::default();
        settings.database.driver = "oracle".to_string();
        let err = init(&settings).await.err().unwrap();
        assert!(matches!(err, OrmError::Configuration(_)));
    }
}
