//! Connection configuration and the executor factory.
//!
//! [`DatabaseConfig`] is the backend-side view of
//! [`DatabaseSettings`](djorm_core::DatabaseSettings). [`connect`] builds the
//! executor for the configured driver; each driver is behind its cargo
//! feature.

use std::collections::HashMap;

use djorm_core::{DatabaseSettings, OrmError, OrmResult};
use djorm_db::DbExecutor;

/// Configuration for connecting to a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Driver identity: `"sqlite"`, `"postgres"` or `"mysql"`.
    pub driver: String,
    /// The database name or file path.
    pub name: String,
    /// The database host (for network-based backends).
    pub host: Option<String>,
    /// The database port.
    pub port: Option<u16>,
    /// The database user.
    pub user: Option<String>,
    /// The database password.
    pub password: Option<String>,
    /// Maximum pooled connections.
    pub max_connections: usize,
    /// Additional connection options.
    pub options: HashMap<String, String>,
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

impl DatabaseConfig {
    fn local(driver: &str, name: impl Into<String>) -> Self {
        Self {
            driver: driver.to_string(),
            name: name.into(),
            host: None,
            port: None,
            user: None,
            password: None,
            max_connections: 1,
            options: HashMap::new(),
        }
    }

    fn network(
        driver: &str,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            driver: driver.to_string(),
            name: name.into(),
            host: Some(host.into()),
            port: Some(port),
            user: Some(user.into()),
            password: Some(password.into()),
            max_connections: 16,
            options: HashMap::new(),
        }
    }

    /// Creates a configuration for an in-memory SQLite database.
    pub fn sqlite_memory() -> Self {
        Self::local(djorm_db::dialect::SQLITE, ":memory:")
    }

    /// Creates a configuration for a SQLite file database.
    pub fn sqlite_file(path: impl Into<String>) -> Self {
        Self::local(djorm_db::dialect::SQLITE, path)
    }

    /// Creates a configuration for a PostgreSQL database.
    pub fn postgres(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::network(djorm_db::dialect::POSTGRES, name, host, port, user, password)
    }

    /// Creates a configuration for a MySQL database.
    pub fn mysql(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::network(djorm_db::dialect::MYSQL, name, host, port, user, password)
    }

    /// Builds a configuration from loaded settings. Empty strings and a zero
    /// port mean "driver default".
    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        Self {
            driver: settings.driver.clone(),
            name: settings.name.clone(),
            host: non_empty(&settings.host),
            port: (settings.port != 0).then_some(settings.port),
            user: non_empty(&settings.user),
            password: non_empty(&settings.password),
            max_connections: settings.max_connections.max(1),
            options: settings.options.clone(),
        }
    }
}

/// Opens an executor for `config.driver`.
///
/// # Errors
///
/// [`OrmError::Configuration`] for an unknown driver or one whose cargo
/// feature is disabled; driver errors from opening the connection.
pub async fn connect(config: &DatabaseConfig) -> OrmResult<Box<dyn DbExecutor>> {
    tracing::info!(driver = %config.driver, name = %config.name, "connecting");
    match config.driver.as_str() {
        #[cfg(feature = "sqlite")]
        djorm_db::dialect::SQLITE => Ok(Box::new(crate::sqlite::SqliteBackend::open(&config.name)?)),
        #[cfg(feature = "postgres")]
        djorm_db::dialect::POSTGRES => {
            Ok(Box::new(crate::postgresql::PostgresBackend::from_config(config)?))
        }
        #[cfg(feature = "mysql")]
        djorm_db::dialect::MYSQL => Ok(Box::new(crate::mysql::MySqlBackend::from_config(config)?)),
        other => Err(OrmError::Configuration(format!(
            "no backend compiled in for driver '{other}'"
        ))),
    }
}
