//! Lookup suffixes for filtering.
//!
//! A filter key is a field path optionally followed by `__<lookup>`, as in
//! `"user.profile.email__icontains"`. The set of lookups is closed and the
//! suffix is case-sensitive.
//!
//! # Examples
//!
//! ```
//! use djorm_db::query::lookups::{parse_key, Lookup};
//!
//! let (path, lookup) = parse_key("title__icontains").unwrap();
//! assert_eq!(path, "title");
//! assert_eq!(lookup, Lookup::IContains);
//!
//! let (path, lookup) = parse_key("user.id").unwrap();
//! assert_eq!(path, "user.id");
//! assert_eq!(lookup, Lookup::Exact);
//! ```

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::value::{FromValue, Value};
use crate::{OrmError, OrmResult};

/// Escape clause appended to every LIKE comparison.
const LIKE_ESCAPE: &str = " ESCAPE '!'";

/// Escapes LIKE wildcards in a user value so it matches literally.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '!' | '%' | '_') {
            out.push('!');
        }
        out.push(c);
    }
    out
}

/// A field-level comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lookup {
    /// `col = ?`, or `col IS NULL` for a NULL value.
    Exact,
    /// `LOWER(col) LIKE LOWER(?)` with `%v%`.
    IContains,
    /// `col LIKE ?` with `%v%`.
    Contains,
    /// `LOWER(col) LIKE LOWER(?)` with `v%`.
    IStartsWith,
    /// `col LIKE ?` with `v%`.
    StartsWith,
    /// `LOWER(col) LIKE LOWER(?)` with `%v`.
    IEndsWith,
    /// `col LIKE ?` with `%v`.
    EndsWith,
    /// `col > ?`.
    Gt,
    /// `col >= ?`.
    Gte,
    /// `col < ?`.
    Lt,
    /// `col <= ?`.
    Lte,
    /// `col IN (?, ...)`.
    In,
    /// `col IS [NOT] NULL`.
    IsNull,
}

impl Lookup {
    /// Every supported lookup, in suffix order.
    pub const ALL: [Self; 13] = [
        Self::Exact,
        Self::IContains,
        Self::Contains,
        Self::IStartsWith,
        Self::StartsWith,
        Self::IEndsWith,
        Self::EndsWith,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::In,
        Self::IsNull,
    ];

    /// The `__suffix` spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::IContains => "icontains",
            Self::Contains => "contains",
            Self::IStartsWith => "istartswith",
            Self::StartsWith => "startswith",
            Self::IEndsWith => "iendswith",
            Self::EndsWith => "endswith",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::IsNull => "isnull",
        }
    }

    /// Renders the comparison of an already-qualified column.
    ///
    /// `bind` is called once per parameter, in SQL order, and returns the
    /// placeholder to write.
    pub fn render(
        self,
        column: &str,
        values: &[Value],
        bind: &mut dyn FnMut(Value) -> String,
    ) -> OrmResult<String> {
        if self == Self::In {
            let items: Vec<Value> = match values {
                [Value::List(items)] => items.clone(),
                _ => values.to_vec(),
            };
            if items.is_empty() {
                return Ok("1=0".to_string());
            }
            let placeholders: Vec<String> = items.into_iter().map(&mut *bind).collect();
            return Ok(format!("{column} IN ({})", placeholders.join(", ")));
        }

        let value = match values {
            [Value::List(_)] => {
                return Err(OrmError::UnsupportedLookup(format!(
                    "'{}' does not accept a list",
                    self.as_str()
                )))
            }
            [v] => v.clone(),
            _ => {
                return Err(OrmError::UnsupportedLookup(format!(
                    "'{}' expects exactly one value, got {}",
                    self.as_str(),
                    values.len()
                )))
            }
        };

        let text = escape_like(&value.to_string());
        let pattern = |prefix: &str, suffix: &str| Value::String(format!("{prefix}{text}{suffix}"));

        Ok(match self {
            Self::Exact if value.is_null() => format!("{column} IS NULL"),
            Self::Exact => format!("{column} = {}", bind(value)),
            Self::IsNull => {
                if bool::from_value(&value)? {
                    format!("{column} IS NULL")
                } else {
                    format!("{column} IS NOT NULL")
                }
            }
            Self::IContains => format!("LOWER({column}) LIKE LOWER({}){LIKE_ESCAPE}", bind(pattern("%", "%"))),
            Self::IStartsWith => format!("LOWER({column}) LIKE LOWER({}){LIKE_ESCAPE}", bind(pattern("", "%"))),
            Self::IEndsWith => format!("LOWER({column}) LIKE LOWER({}){LIKE_ESCAPE}", bind(pattern("%", ""))),
            Self::Contains => format!("{column} LIKE {}{LIKE_ESCAPE}", bind(pattern("%", "%"))),
            Self::StartsWith => format!("{column} LIKE {}{LIKE_ESCAPE}", bind(pattern("", "%"))),
            Self::EndsWith => format!("{column} LIKE {}{LIKE_ESCAPE}", bind(pattern("%", ""))),
            Self::Gt => format!("{column} > {}", bind(value)),
            Self::Gte => format!("{column} >= {}", bind(value)),
            Self::Lt => format!("{column} < {}", bind(value)),
            Self::Lte => format!("{column} <= {}", bind(value)),
            Self::In => unreachable!("handled above"),
        })
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lookup {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| OrmError::UnsupportedLookup(s.to_string()))
    }
}

static KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<path>.+?)(?:__(?P<lookup>[A-Za-z]+))?$").expect("valid regex")
});

/// Splits `"path__lookup"` into the path and the lookup (default `exact`).
///
/// The suffix after the last `__` is the lookup.
pub fn parse_key(key: &str) -> OrmResult<(String, Lookup)> {
    let caps = KEY
        .captures(key)
        .ok_or_else(|| OrmError::UnknownField {
            model: String::new(),
            field: key.to_string(),
        })?;
    let path = caps.name("path").map_or("", |m| m.as_str()).to_string();
    let lookup = caps
        .name("lookup")
        .map_or(Ok(Lookup::Exact), |m| m.as_str().parse())?;
    Ok((path, lookup))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(lookup: Lookup, values: &[Value]) -> (String, Vec<Value>) {
        let mut args = Vec::new();
        let sql = lookup
            .render("\"t\".\"c\"", values, &mut |v| {
                args.push(v);
                "?".to_string()
            })
            .unwrap();
        (sql, args)
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("title").unwrap(), ("title".into(), Lookup::Exact));
        assert_eq!(
            parse_key("user.profile.email__icontains").unwrap(),
            ("user.profile.email".into(), Lookup::IContains)
        );
        assert_eq!(parse_key("id__in").unwrap(), ("id".into(), Lookup::In));
        assert!(matches!(
            parse_key("title__regex"),
            Err(OrmError::UnsupportedLookup(s)) if s == "regex"
        ));
        assert!(matches!(
            parse_key("title__IContains"),
            Err(OrmError::UnsupportedLookup(_))
        ));
    }

    #[test]
    fn test_exact_and_null() {
        assert_eq!(
            render(Lookup::Exact, &[Value::Int(1)]),
            ("\"t\".\"c\" = ?".into(), vec![Value::Int(1)])
        );
        assert_eq!(
            render(Lookup::Exact, &[Value::Null]),
            ("\"t\".\"c\" IS NULL".into(), vec![])
        );
        assert_eq!(
            render(Lookup::IsNull, &[Value::Bool(false)]).0,
            "\"t\".\"c\" IS NOT NULL"
        );
    }

    #[test]
    fn test_like_patterns() {
        let (sql, args) = render(Lookup::IContains, &[Value::from("Test")]);
        assert_eq!(sql, "LOWER(\"t\".\"c\") LIKE LOWER(?) ESCAPE '!'");
        assert_eq!(args, vec![Value::from("%Test%")]);

        let (_, args) = render(Lookup::IStartsWith, &[Value::from("ab")]);
        assert_eq!(args, vec![Value::from("ab%")]);

        let (sql, args) = render(Lookup::EndsWith, &[Value::from("z")]);
        assert_eq!(sql, "\"t\".\"c\" LIKE ? ESCAPE '!'");
        assert_eq!(args, vec![Value::from("%z")]);
    }

    #[test]
    fn test_like_wildcards_in_value_are_literal() {
        let (_, args) = render(Lookup::Contains, &[Value::from("50%_off!")]);
        assert_eq!(args, vec![Value::from("%50!%!_off!!%")]);
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_in() {
        let (sql, args) = render(Lookup::In, &[Value::list([1, 2, 3])]);
        assert_eq!(sql, "\"t\".\"c\" IN (?, ?, ?)");
        assert_eq!(args.len(), 3);

        let (sql, args) = render(Lookup::In, &[Value::Int(4), Value::Int(5)]);
        assert_eq!(sql, "\"t\".\"c\" IN (?, ?)");
        assert_eq!(args, vec![Value::Int(4), Value::Int(5)]);

        assert_eq!(render(Lookup::In, &[Value::List(vec![])]).0, "1=0");
    }

    #[test]
    fn test_arity_errors() {
        let mut bind = |_: Value| "?".to_string();
        assert!(Lookup::Gt.render("c", &[], &mut bind).is_err());
        assert!(Lookup::Exact
            .render("c", &[Value::list([1])], &mut bind)
            .is_err());
    }
}
