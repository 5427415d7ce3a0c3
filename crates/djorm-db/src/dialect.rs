//! Dialect registry.
//!
//! A [`Dialect`] records how one driver spells SQL: the identifier quote
//! character, the placeholder style, how generated keys come back from an
//! INSERT, and which compiler to use. Dialects live in a process-wide
//! registry keyed by driver identity; the three builtin drivers are
//! registered on first use and [`reset_dialects`] restores them.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use once_cell::sync::Lazy;

use crate::query::compiler::{Compiler, SqlCompiler};

/// Driver identity of the builtin SQLite dialect.
pub const SQLITE: &str = "sqlite";
/// Driver identity of the builtin PostgreSQL dialect.
pub const POSTGRES: &str = "postgres";
/// Driver identity of the builtin MySQL dialect.
pub const MYSQL: &str = "mysql";

/// How bind parameters are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `?` for every parameter.
    Question,
    /// `$1`, `$2`, ... numbered from one.
    Dollar,
}

impl Placeholder {
    /// Renders the placeholder for the `n`-th parameter (1-based).
    pub fn render(self, n: usize) -> String {
        match self {
            Self::Question => "?".to_string(),
            Self::Dollar => format!("${n}"),
        }
    }
}

/// How an INSERT reports generated values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returning {
    /// Nothing comes back; the row is re-selected by a unique key.
    None,
    /// The driver exposes the last generated integer key.
    LastInsertId,
    /// `INSERT ... RETURNING <cols>` is supported.
    Columns,
}

/// Builds the compiler for a dialect.
pub type CompilerFactory = fn(&Dialect) -> Box<dyn Compiler>;

/// A driver's SQL dialect.
#[derive(Debug, Clone)]
pub struct Dialect {
    /// Driver identity, e.g. `"sqlite"`.
    pub driver: String,
    /// Identifier quote character.
    pub quote: char,
    /// Placeholder style.
    pub placeholder: Placeholder,
    /// Returning capability.
    pub returning: Returning,
    /// The `LIMIT` written when only an offset is requested, if the dialect
    /// cannot express a bare `OFFSET`.
    pub unbounded_limit: Option<&'static str>,
    /// The statement tail used for an INSERT with no columns.
    pub empty_insert: &'static str,
    /// Compiler factory.
    pub compiler: CompilerFactory,
}

fn sql_compiler(dialect: &Dialect) -> Box<dyn Compiler> {
    Box::new(SqlCompiler::new(dialect.clone()))
}

impl Dialect {
    /// A dialect with `"` quoting, `?` placeholders and no returning support.
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            quote: '"',
            placeholder: Placeholder::Question,
            returning: Returning::None,
            unbounded_limit: None,
            empty_insert: "DEFAULT VALUES",
            compiler: sql_compiler,
        }
    }

    /// Builtin SQLite dialect.
    pub fn sqlite() -> Self {
        Self {
            returning: Returning::LastInsertId,
            unbounded_limit: Some("-1"),
            ..Self::new(SQLITE)
        }
    }

    /// Builtin PostgreSQL dialect.
    pub fn postgres() -> Self {
        Self {
            placeholder: Placeholder::Dollar,
            returning: Returning::Columns,
            ..Self::new(POSTGRES)
        }
    }

    /// Builtin MySQL dialect.
    pub fn mysql() -> Self {
        Self {
            quote: '`',
            returning: Returning::LastInsertId,
            unbounded_limit: Some("18446744073709551615"),
            empty_insert: "() VALUES ()",
            ..Self::new(MYSQL)
        }
    }

    /// Quotes an identifier, doubling any embedded quote character.
    ///
    /// ```
    /// use djorm_db::dialect::Dialect;
    ///
    /// assert_eq!(Dialect::postgres().quote_ident("user"), "\"user\"");
    /// assert_eq!(Dialect::mysql().quote_ident("order"), "`order`");
    /// ```
    pub fn quote_ident(&self, ident: &str) -> String {
        let q = self.quote;
        let escaped = ident.replace(q, &format!("{q}{q}"));
        format!("{q}{escaped}{q}")
    }

    /// Quotes `alias.column`.
    pub fn qualify(&self, table_alias: &str, column: &str) -> String {
        format!("{}.{}", self.quote_ident(table_alias), self.quote_ident(column))
    }

    /// Renders the placeholder for the `n`-th parameter (1-based).
    pub fn placeholder(&self, n: usize) -> String {
        self.placeholder.render(n)
    }

    /// Builds this dialect's compiler.
    pub fn compiler(&self) -> Box<dyn Compiler> {
        (self.compiler)(self)
    }
}

fn builtins() -> HashMap<String, Dialect> {
    [Dialect::sqlite(), Dialect::postgres(), Dialect::mysql()]
        .into_iter()
        .map(|d| (d.driver.clone(), d))
        .collect()
}

static DIALECTS: Lazy<RwLock<HashMap<String, Dialect>>> = Lazy::new(|| RwLock::new(builtins()));

/// Registers a dialect, replacing any earlier registration for its driver.
pub fn register_dialect(dialect: Dialect) {
    tracing::debug!(driver = %dialect.driver, "registering dialect");
    DIALECTS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(dialect.driver.clone(), dialect);
}

/// Returns the dialect registered for `driver`, or the default dialect.
pub fn dialect_for(driver: &str) -> Dialect {
    DIALECTS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(driver)
        .cloned()
        .unwrap_or_else(|| Dialect::new(driver))
}

/// Returns the registered driver identities, sorted.
pub fn registered_drivers() -> Vec<String> {
    let mut drivers: Vec<String> = DIALECTS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect();
    drivers.sort();
    drivers
}

/// Restores the registry to the builtin dialects.
pub fn reset_dialects() {
    *DIALECTS.write().unwrap_or_else(PoisonError::into_inner) = builtins();
}
