//! Backend-agnostic values and typed extraction.
//!
//! [`Value`] carries query parameters and scanned columns between the query
//! layer and the drivers. [`FromValue`] converts a scanned `Value` into a Rust
//! field type, applying the coercions drivers make necessary: integer
//! widening, booleans stored as integers or strings, numerics returned as
//! text, and timestamps returned as RFC 3339 or SQL-formatted strings.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::OrmError;

/// A backend-agnostic representation of a database value.
///
/// # Examples
///
/// ```
/// use djorm_db::value::Value;
///
/// let v = Value::from(42_i64);
/// assert_eq!(v, Value::Int(42));
///
/// let v = Value::from("hello");
/// assert_eq!(v, Value::String("hello".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// SQL NULL.
    Null,
    /// A boolean value.
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit floating-point number.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// Raw binary data.
    Bytes(Vec<u8>),
    /// A date without time.
    Date(NaiveDate),
    /// A date and time without timezone.
    DateTime(NaiveDateTime),
    /// A date and time in UTC.
    DateTimeTz(DateTime<Utc>),
    /// A time without date.
    Time(NaiveTime),
    /// A duration / interval.
    Duration(chrono::Duration),
    /// A UUID value.
    Uuid(uuid::Uuid),
    /// A JSON value.
    Json(serde_json::Value),
    /// A list of values, used by `in` lookups.
    List(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::Date(d) => write!(f, "{d}"),
            Self::DateTime(dt) => write!(f, "{dt}"),
            Self::DateTimeTz(dt) => write!(f, "{}", dt.to_rfc3339()),
            Self::Time(t) => write!(f, "{t}"),
            Self::Duration(d) => write!(f, "{d}"),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Json(j) => write!(f, "{j}"),
            Self::List(vals) => {
                write!(f, "[")?;
                for (i, v) in vals.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

// ── From implementations ───────────────────────────────────────────────

macro_rules! value_from {
    ($($ty:ty => $variant:ident $(via $conv:path)?),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant($($conv)?(v))
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i16 => Int via i64::from,
    i32 => Int via i64::from,
    i64 => Int,
    u32 => Int via i64::from,
    f32 => Float via f64::from,
    f64 => Float,
    String => String,
    Vec<u8> => Bytes,
    NaiveDate => Date,
    NaiveDateTime => DateTime,
    DateTime<Utc> => DateTimeTz,
    NaiveTime => Time,
    chrono::Duration => Duration,
    uuid::Uuid => Uuid,
    serde_json::Value => Json,
    Vec<Value> => List,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl Value {
    /// Builds a [`Value::List`] from any iterator of convertible items.
    ///
    /// ```
    /// use djorm_db::value::Value;
    ///
    /// let ids = Value::list([1, 3]);
    /// assert_eq!(ids, Value::List(vec![Value::Int(1), Value::Int(3)]));
    /// ```
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Self>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Returns `true` if this value is `Null`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` for the zero value of its type: NULL, `false`, `0`,
    /// `0.0`, and empty strings, byte strings and lists.
    ///
    /// Partial updates skip zero-valued fields.
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(b) => !b,
            Self::Int(i) => *i == 0,
            Self::Float(f) => *f == 0.0,
            Self::String(s) => s.is_empty(),
            Self::Bytes(b) => b.is_empty(),
            Self::List(l) => l.is_empty(),
            Self::Uuid(u) => u.is_nil(),
            Self::Duration(d) => d.is_zero(),
            Self::Date(_)
            | Self::DateTime(_)
            | Self::DateTimeTz(_)
            | Self::Time(_)
            | Self::Json(_) => false,
        }
    }

    /// Attempts to extract a boolean value.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Attempts to extract an integer value.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Attempts to extract a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// A stable textual key used to group rows by primary key.
    pub(crate) fn group_key(&self) -> String {
        match self {
            Self::String(s) => format!("s:{s}"),
            other => format!("v:{other}"),
        }
    }
}

// ── Typed extraction ───────────────────────────────────────────────────

/// Conversion from a scanned [`Value`] into a Rust type.
pub trait FromValue: Sized {
    /// Attempts to convert a value reference to this type.
    fn from_value(value: &Value) -> Result<Self, OrmError>;
}

/// Converts `value`, mapping NULL to the type's default.
///
/// Generated model code uses this for non-`Option` fields so that a NULL
/// column leaves the field at its zero value.
pub fn from_value_or_default<T: FromValue + Default>(value: &Value) -> Result<T, OrmError> {
    if value.is_null() {
        Ok(T::default())
    } else {
        T::from_value(value)
    }
}

fn mismatch(expected: &str, value: &Value) -> OrmError {
    OrmError::TypeMismatch(format!("expected {expected}, got {value:?}"))
}

fn text_of(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s.trim()),
        Value::Bytes(b) => std::str::from_utf8(b).ok().map(str::trim),
        _ => None,
    }
}

impl FromValue for i64 {
    #[allow(clippy::cast_possible_truncation)]
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(Self::from(*b)),
            Value::Float(f) if f.fract() == 0.0 => Ok(*f as Self),
            _ => text_of(value)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| mismatch("integer", value)),
        }
    }
}

macro_rules! narrow_int {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> Result<Self, OrmError> {
                    let wide = i64::from_value(value)?;
                    <$ty>::try_from(wide).map_err(|e| {
                        OrmError::TypeMismatch(format!(
                            "{wide} out of range for {}: {e}",
                            stringify!($ty)
                        ))
                    })
                }
            }
        )*
    };
}

narrow_int!(i32, i16, u32);

impl FromValue for f64 {
    #[allow(clippy::cast_precision_loss)]
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as Self),
            _ => text_of(value)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| mismatch("float", value)),
        }
    }
}

impl FromValue for f32 {
    #[allow(clippy::cast_possible_truncation)]
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        f64::from_value(value).map(|f| f as Self)
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            _ => match text_of(value).map(str::to_ascii_lowercase).as_deref() {
                Some("1" | "true" | "t") => Ok(true),
                Some("0" | "false" | "f") => Ok(false),
                _ => Err(mismatch("boolean", value)),
            },
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Bytes(b) => {
                Self::from_utf8(b.clone()).map_err(|_| mismatch("UTF-8 text", value))
            }
            Value::Json(serde_json::Value::String(s)) => Ok(s.clone()),
            Value::Null | Value::List(_) => Err(mismatch("string", value)),
            other => Ok(other.to_string()),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::String(s) => Ok(s.clone().into_bytes()),
            _ => Err(mismatch("bytes", value)),
        }
    }
}

impl FromValue for uuid::Uuid {
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::Uuid(u) => Ok(*u),
            Value::Bytes(b) if b.len() == 16 => {
                Self::from_slice(b).map_err(|_| mismatch("uuid", value))
            }
            _ => text_of(value)
                .and_then(|s| Self::parse_str(s).ok())
                .ok_or_else(|| mismatch("uuid", value)),
        }
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::DateTime(dt) => Ok(*dt),
            Value::DateTimeTz(dt) => Ok(dt.naive_utc()),
            Value::Date(d) => d.and_hms_opt(0, 0, 0).ok_or_else(|| mismatch("datetime", value)),
            _ => text_of(value)
                .and_then(parse_naive_datetime)
                .ok_or_else(|| mismatch("datetime", value)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::DateTimeTz(dt) => Ok(*dt),
            Value::Int(secs) => {
                Self::from_timestamp(*secs, 0).ok_or_else(|| mismatch("timestamp", value))
            }
            _ => NaiveDateTime::from_value(value).map(|dt| dt.and_utc()),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::Date(d) => Ok(*d),
            Value::DateTime(dt) => Ok(dt.date()),
            Value::DateTimeTz(dt) => Ok(dt.date_naive()),
            _ => text_of(value)
                .and_then(|s| {
                    Self::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .or_else(|| parse_naive_datetime(s).map(|dt| dt.date()))
                })
                .ok_or_else(|| mismatch("date", value)),
        }
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::Time(t) => Ok(*t),
            Value::DateTime(dt) => Ok(dt.time()),
            _ => text_of(value)
                .and_then(|s| {
                    Self::parse_from_str(s, "%H:%M:%S%.f")
                        .or_else(|_| Self::parse_from_str(s, "%H:%M"))
                        .ok()
                })
                .ok_or_else(|| mismatch("time", value)),
        }
    }
}

impl FromValue for chrono::Duration {
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::Duration(d) => Ok(*d),
            Value::Int(micros) => Ok(Self::microseconds(*micros)),
            _ => Err(mismatch("duration", value)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        Ok(match value {
            Value::Json(j) => j.clone(),
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(i) => Self::from(*i),
            Value::Float(f) => Self::from(*f),
            Value::String(s) => {
                serde_json::from_str(s).unwrap_or_else(|_| Self::String(s.clone()))
            }
            Value::Bytes(b) => serde_json::from_slice(b).map_err(|_| mismatch("json", value))?,
            other => Self::String(other.to_string()),
        })
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::Null => Ok(None),
            _ => T::from_value(value).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_conversions() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42_i32), Value::Int(42));
        assert_eq!(Value::from(42_i16), Value::Int(42));
        assert_eq!(Value::from(1.5_f64), Value::Float(1.5));
        assert_eq!(Value::from("hi"), Value::String("hi".into()));
        assert_eq!(Value::from(vec![1_u8, 2]), Value::Bytes(vec![1, 2]));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(7_i64)), Value::Int(7));
    }

    #[test]
    fn test_is_zero() {
        assert!(Value::Null.is_zero());
        assert!(Value::Int(0).is_zero());
        assert!(Value::Bool(false).is_zero());
        assert!(Value::String(String::new()).is_zero());
        assert!(Value::Uuid(uuid::Uuid::nil()).is_zero());
        assert!(!Value::Int(3).is_zero());
        assert!(!Value::String("x".into()).is_zero());
        assert!(!Value::Bool(true).is_zero());
        let date = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert!(!Value::Date(date).is_zero());
    }

    #[test]
    fn test_integer_widening() {
        assert_eq!(i64::from_value(&Value::Int(5)).unwrap(), 5);
        assert_eq!(i64::from_value(&Value::Bool(true)).unwrap(), 1);
        assert_eq!(i64::from_value(&Value::String(" 12 ".into())).unwrap(), 12);
        assert_eq!(i64::from_value(&Value::Bytes(b"99".to_vec())).unwrap(), 99);
        assert_eq!(i64::from_value(&Value::Float(3.0)).unwrap(), 3);
        assert!(i64::from_value(&Value::Float(3.5)).is_err());
        assert_eq!(i32::from_value(&Value::Int(7)).unwrap(), 7);
        assert!(i16::from_value(&Value::Int(70_000)).is_err());
    }

    #[test]
    fn test_bool_parsing() {
        for (v, expected) in [
            (Value::Int(1), true),
            (Value::Int(0), false),
            (Value::String("1".into()), true),
            (Value::String("0".into()), false),
            (Value::String("true".into()), true),
            (Value::String("FALSE".into()), false),
            (Value::String("t".into()), true),
        ] {
            assert_eq!(bool::from_value(&v).unwrap(), expected, "{v:?}");
        }
        assert!(bool::from_value(&Value::String("maybe".into())).is_err());
    }

    #[test]
    fn test_string_stringifies_numerics() {
        assert_eq!(String::from_value(&Value::Int(10)).unwrap(), "10");
        assert_eq!(String::from_value(&Value::Float(1.25)).unwrap(), "1.25");
        assert!(String::from_value(&Value::Null).is_err());
    }

    #[test]
    fn test_float_from_text() {
        let v = Value::String("19.99".into());
        assert!((f64::from_value(&v).unwrap() - 19.99).abs() < f64::EPSILON);
        assert!((f64::from_value(&Value::Int(2)).unwrap() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_datetime_parsing() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        for s in [
            "2024-03-09 08:30:00",
            "2024-03-09T08:30:00",
            "2024-03-09T08:30:00Z",
            "2024-03-09T09:30:00+01:00",
        ] {
            let got = NaiveDateTime::from_value(&Value::String(s.into())).unwrap();
            assert_eq!(got, expected, "{s}");
        }
        let tz = DateTime::<Utc>::from_value(&Value::String("2024-03-09 08:30:00".into())).unwrap();
        assert_eq!(tz.naive_utc(), expected);
    }

    #[test]
    fn test_date_and_time_parsing() {
        let d = NaiveDate::from_value(&Value::String("2024-03-09".into())).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        let t = NaiveTime::from_value(&Value::String("12:15:30".into())).unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(12, 15, 30).unwrap());
    }

    #[test]
    fn test_uuid_and_json() {
        let u = uuid::Uuid::new_v4();
        assert_eq!(uuid::Uuid::from_value(&Value::String(u.to_string())).unwrap(), u);
        let j = serde_json::Value::from_value(&Value::String(r#"{"a":1}"#.into())).unwrap();
        assert_eq!(j, serde_json::json!({"a": 1}));
    }

    #[test]
    fn test_option_and_default() {
        assert_eq!(Option::<i64>::from_value(&Value::Null).unwrap(), None);
        assert_eq!(Option::<i64>::from_value(&Value::Int(1)).unwrap(), Some(1));
        assert_eq!(from_value_or_default::<String>(&Value::Null).unwrap(), "");
        assert_eq!(from_value_or_default::<i64>(&Value::Int(4)).unwrap(), 4);
    }

    #[test]
    fn test_display_list() {
        let v = Value::list([1, 2]);
        assert_eq!(v.to_string(), "[1, 2]");
    }

    #[test]
    fn test_serde_roundtrip() {
        let v = Value::Int(42);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"type":"Int","value":42}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
