//! PostgreSQL/PostGIS store on a `sqlx` connection pool.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, TypeInfo};

use super::{Param, Record, SpatialStore, Statement, StoreConnector, Value};
use crate::config::DatabaseConfig;
use crate::error::{CjdbError, DbErrorKind, Result};

const DUPLICATE_TABLE: &str = "42P07";

fn map_err(err: sqlx::Error) -> CjdbError {
    let kind = match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(DUPLICATE_TABLE) => {
            DbErrorKind::DuplicateTable
        }
        sqlx::Error::Database(_) | sqlx::Error::RowNotFound | sqlx::Error::TypeNotFound { .. } => {
            DbErrorKind::Query
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::Decode(_) => DbErrorKind::Decode,
        _ => DbErrorKind::Connection,
    };
    CjdbError::database(kind, err.to_string())
}

/// Connection settings translated to `sqlx` options.
pub fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.dbname)
        .username(&config.user);
    if let Some(password) = &config.password {
        options = options.password(password);
    }
    options
}

/// A pooled PostGIS connection.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open a pool with at most `max_connections` connections.
    ///
    /// Temporary tables live in one session, so work that creates one needs a
    /// pool of a single connection.
    pub async fn connect(options: PgConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| {
                log::error!("Could not connect to the database: {}", e);
                map_err(e)
            })?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_all<'q>(stmt: &'q Statement) -> Query<'q, Postgres, PgArguments> {
    stmt.params()
        .iter()
        .fold(sqlx::query(stmt.sql()), |query, param| match param {
            Param::Float(v) => query.bind(*v),
            Param::Int(v) => query.bind(*v),
            Param::Text(v) => query.bind(v.as_str()),
            Param::TextArray(v) => query.bind(v.as_slice()),
        })
}

fn get<'r, T>(row: &'r PgRow, index: usize) -> std::result::Result<Option<T>, sqlx::Error>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<Option<T>, _>(index)
}

fn decode_column(row: &PgRow, index: usize, type_name: &str) -> Result<Value> {
    use Value as V;

    fn or_null<T>(v: Option<T>, f: impl FnOnce(T) -> Value) -> Value {
        v.map(f).unwrap_or(Value::Null)
    }

    let value = match type_name {
        "BOOL" => get::<bool>(row, index).map(|v| or_null(v, V::Bool)),
        "INT2" => get::<i16>(row, index).map(|v| or_null(v, |i| V::Int(i.into()))),
        "INT4" => get::<i32>(row, index).map(|v| or_null(v, |i| V::Int(i.into()))),
        "INT8" => get::<i64>(row, index).map(|v| or_null(v, V::Int)),
        "FLOAT4" => get::<f32>(row, index).map(|v| or_null(v, |f| V::Float(f.into()))),
        "FLOAT8" => get::<f64>(row, index).map(|v| or_null(v, V::Float)),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => {
            get::<String>(row, index).map(|v| or_null(v, V::Text))
        }
        "DATE" => get::<NaiveDate>(row, index).map(|v| or_null(v, V::Date)),
        "TIME" => get::<NaiveTime>(row, index).map(|v| or_null(v, V::Time)),
        "TIMESTAMP" => get::<NaiveDateTime>(row, index).map(|v| or_null(v, V::Timestamp)),
        "TIMESTAMPTZ" => get::<DateTime<Utc>>(row, index).map(|v| or_null(v, V::TimestampTz)),
        "JSON" | "JSONB" => get::<serde_json::Value>(row, index).map(|v| or_null(v, V::Json)),
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" => {
            get::<Vec<Option<String>>>(row, index).map(|v| or_null(v, V::TextArray))
        }
        "INT2[]" => get::<Vec<Option<i16>>>(row, index).map(|v| {
            or_null(v, |a| V::IntArray(a.into_iter().map(|i| i.map(i64::from)).collect()))
        }),
        "INT4[]" => get::<Vec<Option<i32>>>(row, index).map(|v| {
            or_null(v, |a| V::IntArray(a.into_iter().map(|i| i.map(i64::from)).collect()))
        }),
        "INT8[]" => get::<Vec<Option<i64>>>(row, index).map(|v| or_null(v, V::IntArray)),
        "FLOAT8[]" => get::<Vec<Option<f64>>>(row, index).map(|v| or_null(v, V::FloatArray)),
        "FLOAT4[]" => get::<Vec<Option<f32>>>(row, index).map(|v| {
            or_null(v, |a| V::FloatArray(a.into_iter().map(|f| f.map(f64::from)).collect()))
        }),
        other => {
            log::warn!(
                "Column {} has the unsupported type {}, it is exported as null",
                row.column(index).name(),
                other
            );
            Ok(Value::Null)
        }
    };
    value.map_err(map_err)
}

fn decode_row(row: &PgRow) -> Result<Record> {
    let mut record = Record::new();
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.type_info().name())?;
        record.push(column.name(), value);
    }
    Ok(record)
}

#[async_trait]
impl SpatialStore for PgStore {
    async fn execute(&self, stmt: &Statement) -> Result<u64> {
        log::debug!("{}", stmt);
        let result = bind_all(stmt).execute(&self.pool).await.map_err(map_err)?;
        Ok(result.rows_affected())
    }

    async fn fetch(&self, stmt: &Statement) -> Result<Vec<Record>> {
        log::debug!("{}", stmt);
        let rows = bind_all(stmt).fetch_all(&self.pool).await.map_err(map_err)?;
        rows.iter().map(decode_row).collect()
    }
}

/// Opens a new [`PgStore`] pool per call.
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            options: connect_options(config),
        }
    }
}

#[async_trait]
impl StoreConnector for PgConnector {
    async fn connect(&self, max_connections: u32) -> Result<Arc<dyn SpatialStore>> {
        let store = PgStore::connect(self.options.clone(), max_connections).await?;
        Ok(Arc::new(store))
    }
}
