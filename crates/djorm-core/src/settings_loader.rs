//! Settings loading from configuration files and the environment.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON document (overriding defaults, deep-merged).
//! 3. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `DJORM_DEBUG` | `debug` |
//! | `DJORM_LOG_LEVEL` | `log_level` |
//! | `DJORM_LOG_SQL` | `log_sql` |
//! | `DJORM_DATABASE_DRIVER` | `database.driver` |
//! | `DJORM_DATABASE_NAME` | `database.name` |
//! | `DJORM_DATABASE_HOST` | `database.host` |
//! | `DJORM_DATABASE_PORT` | `database.port` |
//! | `DJORM_DATABASE_USER` | `database.user` |
//! | `DJORM_DATABASE_PASSWORD` | `database.password` |
//! | `DJORM_DATABASE_MAX_CONNECTIONS` | `database.max_connections` |
//!
//! ```rust,no_run
//! use djorm_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file_with_env("config/djorm.toml").unwrap();
//! ```

use std::path::Path;

use crate::error::OrmError;
use crate::settings::Settings;

/// Loads settings from a TOML string. Missing keys keep their defaults.
pub fn from_toml_str(toml_str: &str) -> Result<Settings, OrmError> {
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| OrmError::Configuration(format!("failed to parse TOML: {e}")))?;
    merge_into_defaults(toml_to_json(toml_value), "TOML")
}

/// Loads settings from a TOML file.
pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Settings, OrmError> {
    from_toml_str(&read_file(path.as_ref())?)
}

/// Loads settings from a TOML file, then applies environment overrides.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> Result<Settings, OrmError> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a JSON string. Missing keys keep their defaults.
pub fn from_json_str(json_str: &str) -> Result<Settings, OrmError> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| OrmError::Configuration(format!("failed to parse JSON: {e}")))?;
    merge_into_defaults(json_value, "JSON")
}

/// Loads settings from a JSON file.
pub fn from_json_file(path: impl AsRef<Path>) -> Result<Settings, OrmError> {
    from_json_str(&read_file(path.as_ref())?)
}

/// Loads settings from environment variables only, starting from defaults.
pub fn from_env() -> Settings {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies `DJORM_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut Settings) {
    apply_overrides_with(settings, |key| std::env::var(key).ok());
}

/// Applies overrides read through `lookup`, using the `DJORM_*` key names.
///
/// Values that fail to parse (ports, counts) are ignored and logged.
pub fn apply_overrides_with<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("DJORM_DEBUG") {
        settings.debug = parse_flag(&val);
    }
    if let Some(val) = lookup("DJORM_LOG_LEVEL") {
        settings.log_level = val;
    }
    if let Some(val) = lookup("DJORM_LOG_SQL") {
        settings.log_sql = parse_flag(&val);
    }

    let db = &mut settings.database;
    if let Some(val) = lookup("DJORM_DATABASE_DRIVER") {
        db.driver = val;
    }
    if let Some(val) = lookup("DJORM_DATABASE_NAME") {
        db.name = val;
    }
    if let Some(val) = lookup("DJORM_DATABASE_HOST") {
        db.host = val;
    }
    if let Some(val) = lookup("DJORM_DATABASE_PORT") {
        match val.parse::<u16>() {
            Ok(port) => db.port = port,
            Err(e) => tracing::warn!(value = %val, error = %e, "ignoring DJORM_DATABASE_PORT"),
        }
    }
    if let Some(val) = lookup("DJORM_DATABASE_USER") {
        db.user = val;
    }
    if let Some(val) = lookup("DJORM_DATABASE_PASSWORD") {
        db.password = val;
    }
    if let Some(val) = lookup("DJORM_DATABASE_MAX_CONNECTIONS") {
        match val.parse::<usize>() {
            Ok(n) => db.max_connections = n,
            Err(e) => {
                tracing::warn!(value = %val, error = %e, "ignoring DJORM_DATABASE_MAX_CONNECTIONS");
            }
        }
    }
}

// ============================================================
// Helpers
// ============================================================

fn read_file(path: &Path) -> Result<String, OrmError> {
    std::fs::read_to_string(path).map_err(|e| {
        OrmError::Configuration(format!("failed to read '{}': {e}", path.display()))
    })
}

fn parse_flag(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

fn merge_into_defaults(document: serde_json::Value, format: &str) -> Result<Settings, OrmError> {
    let defaults = serde_json::to_value(Settings::default()).map_err(|e| {
        OrmError::Configuration(format!("failed to serialize default settings: {e}"))
    })?;
    serde_json::from_value(merge_json(defaults, document)).map_err(|e| {
        OrmError::Configuration(format!("failed to deserialize settings from {format}: {e}"))
    })
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => serde_json::Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Deep-merges two JSON values; `override_val` wins.
fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = match base_map.remove(&key) {
                    Some(base_v) => merge_json(base_v, override_v),
                    None => override_v,
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_from_toml_str_database() {
        let toml = r#"
            debug = false
            log_sql = true

            [database]
            driver = "postgres"
            name = "todos"
            host = "localhost"
            port = 5432
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert!(!settings.debug);
        assert!(settings.log_sql);
        assert_eq!(settings.database.driver, "postgres");
        assert_eq!(settings.database.name, "todos");
        assert_eq!(settings.database.port, 5432);
        // Defaults preserved inside the merged table
        assert_eq!(settings.database.max_connections, 16);
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_from_toml_str_empty() {
        let settings = from_toml_str("").unwrap();
        assert!(settings.debug);
        assert_eq!(settings.database.driver, "sqlite");
    }

    #[test]
    fn test_from_toml_str_invalid() {
        let result = from_toml_str("[[invalid toml content");
        assert!(matches!(result, Err(OrmError::Configuration(_))));
    }

    #[test]
    fn test_from_toml_str_wrong_type() {
        let result = from_toml_str("[database]\nport = \"not a port\"");
        assert!(matches!(result, Err(OrmError::Configuration(_))));
    }

    #[test]
    fn test_from_json_str_basic() {
        let json = r#"{ "log_level": "djorm=debug", "database": { "driver": "mysql" } }"#;
        let settings = from_json_str(json).unwrap();
        assert_eq!(settings.log_level, "djorm=debug");
        assert_eq!(settings.database.driver, "mysql");
        assert_eq!(settings.database.name, "db.sqlite3");
    }

    #[test]
    fn test_from_json_str_empty_object() {
        let settings = from_json_str("{}").unwrap();
        assert!(settings.debug);
    }

    #[test]
    fn test_from_toml_file_missing() {
        let result = from_toml_file("/nonexistent/djorm.toml");
        assert!(matches!(result, Err(OrmError::Configuration(_))));
    }

    #[test]
    fn test_apply_overrides_with() {
        let env: HashMap<&str, &str> = [
            ("DJORM_DEBUG", "false"),
            ("DJORM_LOG_SQL", "yes"),
            ("DJORM_DATABASE_DRIVER", "postgres"),
            ("DJORM_DATABASE_PORT", "6543"),
            ("DJORM_DATABASE_USER", "app"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        apply_overrides_with(&mut settings, |k| env.get(k).map(ToString::to_string));
        assert!(!settings.debug);
        assert!(settings.log_sql);
        assert_eq!(settings.database.driver, "postgres");
        assert_eq!(settings.database.port, 6543);
        assert_eq!(settings.database.user, "app");
        assert_eq!(settings.database.name, "db.sqlite3");
    }

    #[test]
    fn test_apply_overrides_ignores_bad_port() {
        let mut settings = Settings::default();
        apply_overrides_with(&mut settings, |k| {
            (k == "DJORM_DATABASE_PORT").then(|| "seventy".to_string())
        });
        assert_eq!(settings.database.port, 0);
    }

    #[test]
    fn test_merge_json_nested() {
        let base = serde_json::json!({"a": {"b": 1, "c": 2}});
        let over = serde_json::json!({"a": {"c": 3}});
        assert_eq!(merge_json(base, over), serde_json::json!({"a": {"b": 1, "c": 3}}));
    }
}
