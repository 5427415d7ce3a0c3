//! Settings for djorm.
//!
//! [`Settings`] holds the database connection parameters and the logging
//! switches. Load it with [`settings_loader`](crate::settings_loader) or
//! build it in code; [`SETTINGS`] is a process-wide slot for applications
//! that want a global instance.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Database connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Driver identity used for dialect lookup ("sqlite", "postgres", "mysql").
    pub driver: String,
    /// The database name (or file path for SQLite, `:memory:` for in-memory).
    pub name: String,
    /// The database user.
    pub user: String,
    /// The database password.
    pub password: String,
    /// The database host.
    pub host: String,
    /// The database port; `0` means the driver default.
    pub port: u16,
    /// Maximum pooled connections for network backends.
    pub max_connections: usize,
    /// Additional driver-specific options.
    pub options: HashMap<String, String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            driver: "sqlite".to_string(),
            name: "db.sqlite3".to_string(),
            user: String::new(),
            password: String::new(),
            host: String::new(),
            port: 0,
            max_connections: 16,
            options: HashMap::new(),
        }
    }
}

/// The complete set of djorm settings.
///
/// # Examples
///
/// ```
/// use djorm_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert!(settings.debug);
/// assert_eq!(settings.database.driver, "sqlite");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Pretty logs when true, JSON logs otherwise.
    pub debug: bool,
    /// The log filter (e.g. "info", "djorm=debug").
    pub log_level: String,
    /// Emit every compiled statement at debug level.
    pub log_sql: bool,
    /// The default database.
    pub database: DatabaseSettings,
    /// Settings that don't fit the fields above.
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: true,
            log_level: "info".to_string(),
            log_sql: false,
            database: DatabaseSettings::default(),
            extra: HashMap::new(),
        }
    }
}

/// Global settings slot, set once at startup.
pub static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Returns the global settings, or the defaults if none were installed.
pub fn settings() -> &'static Settings {
    SETTINGS.get_or_init(Settings::default)
}
