//! PostgreSQL executor using `tokio-postgres` and `deadpool-postgres`.
//!
//! Statements are prepared (and cached per connection) before binding so that
//! every [`Value`] can be encoded for the exact parameter type the server
//! inferred: an `Int` bound to an `int4` column is narrowed, a `Null` is typed
//! to match, and numbers bound to text parameters are rendered. `NUMERIC`
//! travels through [`Decimal`] and surfaces as a [`Value::String`].
//!
//! [`PostgresBackend`] checks out a pooled client per statement;
//! [`PostgresBackend::connection`] pins one for transactions.

use djorm_core::{OrmError, OrmResult};
use djorm_db::dialect::POSTGRES;
use djorm_db::{DbExecutor, Row, Value};
use rust_decimal::Decimal;
use tokio_postgres::types::{FromSql, ToSql, Type};

use crate::base::DatabaseConfig;

type Param = Box<dyn ToSql + Sync + Send>;

/// A `NUMERIC` column value rendered as decimal text, scale included.
#[derive(Debug, PartialEq)]
struct Numeric(String);

impl<'a> FromSql<'a> for Numeric {
    fn from_sql(
        ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        <Decimal as FromSql>::from_sql(ty, raw).map(|d| Self(d.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// A pooled PostgreSQL executor.
pub struct PostgresBackend {
    pool: deadpool_postgres::Pool,
}

impl std::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend")
            .field("status", &self.pool.status())
            .finish()
    }
}

impl PostgresBackend {
    /// Wraps an existing pool.
    pub const fn new(pool: deadpool_postgres::Pool) -> Self {
        Self { pool }
    }

    /// Creates a backend from a [`DatabaseConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Configuration`] if the pool cannot be created.
    pub fn from_config(config: &DatabaseConfig) -> OrmResult<Self> {
        let mut pg_config = deadpool_postgres::Config::new();
        pg_config.dbname = Some(config.name.clone());
        pg_config.host.clone_from(&config.host);
        pg_config.port = config.port;
        pg_config.user.clone_from(&config.user);
        pg_config.password.clone_from(&config.password);
        pg_config.application_name = config.options.get("application_name").cloned();
        pg_config.pool = Some(deadpool_postgres::PoolConfig::new(config.max_connections));

        let pool = pg_config
            .create_pool(Some(deadpool_postgres::Runtime::Tokio1), tokio_postgres::NoTls)
            .map_err(|e| OrmError::Configuration(format!("failed to create pool: {e}")))?;
        Ok(Self { pool })
    }

    async fn client(&self) -> OrmResult<deadpool_postgres::Client> {
        self.pool.get().await.map_err(OrmError::driver)
    }

    /// Checks out a dedicated client, e.g. to run a transaction on.
    ///
    /// # Errors
    ///
    /// Returns a driver error if the pool cannot hand out a client.
    pub async fn connection(&self) -> OrmResult<PostgresConnection> {
        Ok(PostgresConnection {
            client: self.client().await?,
        })
    }
}

fn typed_null(ty: &Type) -> Param {
    match *ty {
        Type::BOOL => Box::new(Option::<bool>::None),
        Type::INT2 => Box::new(Option::<i16>::None),
        Type::INT4 => Box::new(Option::<i32>::None),
        Type::INT8 => Box::new(Option::<i64>::None),
        Type::FLOAT4 => Box::new(Option::<f32>::None),
        Type::FLOAT8 => Box::new(Option::<f64>::None),
        Type::NUMERIC => Box::new(Option::<Decimal>::None),
        Type::BYTEA => Box::new(Option::<Vec<u8>>::None),
        Type::UUID => Box::new(Option::<uuid::Uuid>::None),
        Type::DATE => Box::new(Option::<chrono::NaiveDate>::None),
        Type::TIMESTAMP => Box::new(Option::<chrono::NaiveDateTime>::None),
        Type::TIMESTAMPTZ => Box::new(Option::<chrono::DateTime<chrono::Utc>>::None),
        Type::TIME => Box::new(Option::<chrono::NaiveTime>::None),
        Type::JSON | Type::JSONB => Box::new(Option::<serde_json::Value>::None),
        _ => Box::new(Option::<String>::None),
    }
}

fn out_of_range(value: &Value, ty: &Type) -> OrmError {
    OrmError::TypeMismatch(format!("{value} does not fit a {ty} parameter"))
}

/// Encodes `value` for a parameter of type `ty`.
fn bind(value: &Value, ty: &Type) -> OrmResult<Param> {
    Ok(match (value, ty) {
        (Value::Null, _) => typed_null(ty),
        (Value::Int(i), &Type::NUMERIC) => Box::new(Decimal::from(*i)),
        (Value::Float(f), &Type::NUMERIC) => {
            Box::new(Decimal::try_from(*f).map_err(|_| out_of_range(value, ty))?)
        }
        (Value::String(s), &Type::NUMERIC) => Box::new(
            s.parse::<Decimal>()
                .map_err(|e| OrmError::TypeMismatch(format!("{s:?} is not a decimal: {e}")))?,
        ),
        (Value::Int(i), &Type::INT2) => {
            Box::new(i16::try_from(*i).map_err(|_| out_of_range(value, ty))?)
        }
        (Value::Int(i), &Type::INT4) => {
            Box::new(i32::try_from(*i).map_err(|_| out_of_range(value, ty))?)
        }
        #[allow(clippy::cast_precision_loss)]
        (Value::Int(i), &Type::FLOAT8) => Box::new(*i as f64),
        (Value::Int(i), &Type::BOOL) => Box::new(*i != 0),
        #[allow(clippy::cast_possible_truncation)]
        (Value::Float(f), &Type::FLOAT4) => Box::new(*f as f32),
        (Value::Bool(b), _) => Box::new(*b),
        (Value::Int(i), _) if *ty == Type::TEXT || *ty == Type::VARCHAR => Box::new(i.to_string()),
        (Value::Int(i), _) => Box::new(*i),
        (Value::Float(f), _) => Box::new(*f),
        (Value::String(s), &Type::UUID) => Box::new(
            uuid::Uuid::parse_str(s).map_err(|e| OrmError::TypeMismatch(e.to_string()))?,
        ),
        (Value::String(s), _) => Box::new(s.clone()),
        (Value::Bytes(b), _) => Box::new(b.clone()),
        (Value::Date(d), _) => Box::new(*d),
        (Value::DateTime(dt), &Type::TIMESTAMPTZ) => Box::new(dt.and_utc()),
        (Value::DateTime(dt), _) => Box::new(*dt),
        (Value::DateTimeTz(dt), &Type::TIMESTAMP) => Box::new(dt.naive_utc()),
        (Value::DateTimeTz(dt), _) => Box::new(*dt),
        (Value::Time(t), _) => Box::new(*t),
        (Value::Duration(d), _) => Box::new(d.num_microseconds().unwrap_or(i64::MAX)),
        (Value::Uuid(u), &Type::TEXT | &Type::VARCHAR) => Box::new(u.to_string()),
        (Value::Uuid(u), _) => Box::new(*u),
        (Value::Json(j), &Type::TEXT | &Type::VARCHAR) => Box::new(j.to_string()),
        (Value::Json(j), _) => Box::new(j.clone()),
        (Value::List(vals), _) => Box::new(
            serde_json::Value::from(vals.iter().map(ToString::to_string).collect::<Vec<_>>())
                .to_string(),
        ),
    })
}

fn column_value(pg_row: &tokio_postgres::Row, i: usize, ty: &Type) -> OrmResult<Value> {
    fn get<'a, T: tokio_postgres::types::FromSql<'a>>(
        row: &'a tokio_postgres::Row,
        i: usize,
    ) -> OrmResult<Option<T>> {
        row.try_get::<_, Option<T>>(i).map_err(OrmError::driver)
    }

    Ok(match *ty {
        Type::BOOL => get::<bool>(pg_row, i)?.map_or(Value::Null, Value::Bool),
        Type::INT2 => get::<i16>(pg_row, i)?.map_or(Value::Null, |v| Value::Int(v.into())),
        Type::INT4 => get::<i32>(pg_row, i)?.map_or(Value::Null, |v| Value::Int(v.into())),
        Type::INT8 => get::<i64>(pg_row, i)?.map_or(Value::Null, Value::Int),
        Type::FLOAT4 => get::<f32>(pg_row, i)?.map_or(Value::Null, |v| Value::Float(v.into())),
        Type::FLOAT8 => get::<f64>(pg_row, i)?.map_or(Value::Null, Value::Float),
        Type::NUMERIC => get::<Numeric>(pg_row, i)?.map_or(Value::Null, |n| Value::String(n.0)),
        Type::BYTEA => get::<Vec<u8>>(pg_row, i)?.map_or(Value::Null, Value::Bytes),
        Type::UUID => get::<uuid::Uuid>(pg_row, i)?.map_or(Value::Null, Value::Uuid),
        Type::DATE => get::<chrono::NaiveDate>(pg_row, i)?.map_or(Value::Null, Value::Date),
        Type::TIMESTAMP => {
            get::<chrono::NaiveDateTime>(pg_row, i)?.map_or(Value::Null, Value::DateTime)
        }
        Type::TIMESTAMPTZ => {
            get::<chrono::DateTime<chrono::Utc>>(pg_row, i)?.map_or(Value::Null, Value::DateTimeTz)
        }
        Type::TIME => get::<chrono::NaiveTime>(pg_row, i)?.map_or(Value::Null, Value::Time),
        Type::JSON | Type::JSONB => {
            get::<serde_json::Value>(pg_row, i)?.map_or(Value::Null, Value::Json)
        }
        _ => match pg_row.try_get::<_, Option<String>>(i) {
            Ok(text) => text.map_or(Value::Null, Value::String),
            Err(e) => {
                tracing::warn!(
                    column = pg_row.columns()[i].name(),
                    %ty,
                    error = %e,
                    "unsupported column type, reading as NULL"
                );
                Value::Null
            }
        },
    })
}

fn convert_row(pg_row: &tokio_postgres::Row) -> OrmResult<Row> {
    let columns = pg_row.columns();
    let names = columns.iter().map(|c| c.name().to_string()).collect();
    let values = columns
        .iter()
        .enumerate()
        .map(|(i, col)| column_value(pg_row, i, col.type_()))
        .collect::<OrmResult<Vec<_>>>()?;
    Ok(Row::new(names, values))
}

async fn prepare(
    client: &deadpool_postgres::Client,
    sql: &str,
    params: &[Value],
) -> OrmResult<(tokio_postgres::Statement, Vec<Param>)> {
    let stmt = client.prepare_cached(sql).await.map_err(OrmError::driver)?;
    if stmt.params().len() != params.len() {
        return Err(OrmError::TypeMismatch(format!(
            "statement expects {} parameters, got {}",
            stmt.params().len(),
            params.len()
        )));
    }
    let bound = params
        .iter()
        .zip(stmt.params())
        .map(|(value, ty)| bind(value, ty))
        .collect::<OrmResult<Vec<_>>>()?;
    Ok((stmt, bound))
}

fn refs(params: &[Param]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect()
}

async fn exec_on(client: &deadpool_postgres::Client, sql: &str, params: &[Value]) -> OrmResult<u64> {
    let (stmt, bound) = prepare(client, sql, params).await?;
    client.execute(&stmt, &refs(&bound)).await.map_err(OrmError::driver)
}

async fn query_on(
    client: &deadpool_postgres::Client,
    sql: &str,
    params: &[Value],
) -> OrmResult<Vec<Row>> {
    let (stmt, bound) = prepare(client, sql, params).await?;
    client
        .query(&stmt, &refs(&bound))
        .await
        .map_err(OrmError::driver)?
        .iter()
        .map(convert_row)
        .collect()
}

/// Runs an `INSERT ... RETURNING` and yields the first returned column.
async fn insert_on(
    client: &deadpool_postgres::Client,
    sql: &str,
    params: &[Value],
) -> OrmResult<Value> {
    let rows = query_on(client, sql, params).await?;
    Ok(rows
        .into_iter()
        .next()
        .and_then(|row| row.into_values().into_iter().next())
        .unwrap_or(Value::Null))
}

#[async_trait::async_trait]
impl DbExecutor for PostgresBackend {
    fn driver(&self) -> &str {
        POSTGRES
    }

    async fn execute_sql(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        exec_on(&self.client().await?, sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        query_on(&self.client().await?, sql, params).await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> OrmResult<Value> {
        insert_on(&self.client().await?, sql, params).await
    }
}

/// One checked-out PostgreSQL client.
pub struct PostgresConnection {
    client: deadpool_postgres::Client,
}

impl std::fmt::Debug for PostgresConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConnection").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl DbExecutor for PostgresConnection {
    fn driver(&self) -> &str {
        POSTGRES
    }

    async fn execute_sql(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        exec_on(&self.client, sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        query_on(&self.client, sql, params).await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> OrmResult<Value> {
        insert_on(&self.client, sql, params).await
    }
}
