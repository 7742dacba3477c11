//! Storage boundary for the spatial database.
//!
//! Everything that talks to PostGIS goes through the [`SpatialStore`] trait, so
//! the tile index, the query builder and the exporter can run against an
//! in-memory store in tests. [`postgres::PgStore`] is the real implementation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::error::{CjdbError, DbErrorKind, Result};

pub mod postgres;
pub mod sql;

pub use postgres::{PgConnector, PgStore};
pub use sql::{Ident, Param, Statement};

/// Name of the server function that turns a (multi)polygon into nested
/// `[[[x, y, z], ...], ...]` surface arrays.
pub const MULTISURFACE_FUNCTION: &str = "cjdb_multipolygon_to_multisurface";

/// A value read from a result column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
    TextArray(Vec<Option<String>>),
    IntArray(Vec<Option<i64>>),
    FloatArray(Vec<Option<f64>>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric values as `f64`, text is parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// The value as text, for use as an identifier. Null yields `None`.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(format!("{other:?}")),
        }
    }
}

/// One result row, columns in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.columns.push((name.into(), value));
    }

    /// First column called `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A table column as listed by `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    /// SQL type name such as `integer`, `numeric` or `ARRAY`, empty when unknown
    pub data_type: String,
}

impl TableColumn {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A connection (or pool of connections) to a spatial database.
#[async_trait]
pub trait SpatialStore: Send + Sync {
    /// Run a statement and return the number of affected rows.
    async fn execute(&self, stmt: &Statement) -> Result<u64>;

    /// Run a query and return every row.
    async fn fetch(&self, stmt: &Statement) -> Result<Vec<Record>>;

    /// Columns of a table in declaration order.
    async fn table_columns(&self, schema: &str, table: &str) -> Result<Vec<TableColumn>> {
        let mut stmt = Statement::new(
            "SELECT column_name::text AS column_name, data_type::text AS data_type \
             FROM information_schema.columns WHERE table_schema = ",
        );
        stmt.push_bind(schema)
            .push(" AND table_name = ")
            .push_bind(table)
            .push(" ORDER BY ordinal_position");
        let rows = self.fetch(&stmt).await?;
        rows.iter()
            .map(|row| {
                let name = row.get("column_name").and_then(Value::as_str).ok_or_else(|| {
                    CjdbError::database(
                        DbErrorKind::Decode,
                        format!("column listing of {schema}.{table} returned no name"),
                    )
                })?;
                let data_type = row.get("data_type").and_then(Value::as_str).unwrap_or_default();
                Ok(TableColumn::new(name, data_type))
            })
            .collect()
    }
}

/// Opens stores. Each export unit connects on its own.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, max_connections: u32) -> Result<Arc<dyn SpatialStore>>;
}

/// Create or replace the server functions the exporter relies on.
pub async fn install_functions(store: &dyn SpatialStore) -> Result<()> {
    let stmt = Statement::new(format!(
        r#"CREATE OR REPLACE FUNCTION {MULTISURFACE_FUNCTION}(geom geometry)
RETURNS jsonb
LANGUAGE sql IMMUTABLE STRICT PARALLEL SAFE AS $fn$
    WITH points AS (
        SELECT dp.path[1] AS surface_idx,
               dp.path[2] AS ring_idx,
               dp.path[3] AS point_idx,
               dp.geom AS pt
        FROM ST_DumpPoints(ST_Multi(geom)) AS dp
    ),
    rings AS (
        SELECT surface_idx, ring_idx,
               jsonb_agg(
                   jsonb_build_array(ST_X(pt), ST_Y(pt), COALESCE(ST_Z(pt), 0))
                   ORDER BY point_idx
               ) AS ring
        FROM points
        WHERE point_idx > 1
        GROUP BY surface_idx, ring_idx
    ),
    surfaces AS (
        SELECT surface_idx, jsonb_agg(ring ORDER BY ring_idx) AS surface
        FROM rings
        GROUP BY surface_idx
    )
    SELECT COALESCE(jsonb_agg(surface ORDER BY surface_idx), '[]'::jsonb)
    FROM surfaces;
$fn$"#
    ));
    log::debug!("{}", stmt);
    store.execute(&stmt).await?;
    Ok(())
}

/// Version string of the PostGIS extension.
///
/// # Errors
///
/// A database error when the extension is not installed.
pub async fn check_postgis(store: &dyn SpatialStore) -> Result<String> {
    let stmt = Statement::new("SELECT PostGIS_version() AS version");
    let rows = store.fetch(&stmt).await?;
    rows.first()
        .and_then(|row| row.get("version"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CjdbError::database(DbErrorKind::Query, "PostGIS_version() returned nothing"))
}

#[cfg(test)]
pub(crate) mod testing {
    //! A store that records statements and answers from a script.

    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    type Responder = Box<dyn Fn(&Statement) -> Option<Result<Vec<Record>>> + Send + Sync>;

    #[derive(Default)]
    pub struct RecordingStore {
        pub statements: Mutex<Vec<Statement>>,
        responders: Vec<Responder>,
        delays: Vec<(&'static str, Duration)>,
    }

    impl RecordingStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer statements whose SQL contains `needle`.
        pub fn respond(
            mut self,
            needle: &'static str,
            answer: impl Fn() -> Result<Vec<Record>> + Send + Sync + 'static,
        ) -> Self {
            self.responders.push(Box::new(move |stmt| {
                stmt.sql().contains(needle).then(&answer)
            }));
            self
        }

        /// Hold back the answer to statements whose SQL contains `needle`.
        pub fn delay(mut self, needle: &'static str, delay: Duration) -> Self {
            self.delays.push((needle, delay));
            self
        }

        pub fn sql(&self) -> Vec<String> {
            self.statements
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.sql().to_string())
                .collect()
        }

        fn answer(&self, stmt: &Statement) -> Result<Vec<Record>> {
            self.statements.lock().unwrap().push(stmt.clone());
            self.responders
                .iter()
                .find_map(|r| r(stmt))
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    #[async_trait]
    impl SpatialStore for RecordingStore {
        async fn execute(&self, stmt: &Statement) -> Result<u64> {
            self.answer(stmt).map(|rows| rows.len() as u64)
        }

        async fn fetch(&self, stmt: &Statement) -> Result<Vec<Record>> {
            let delay = self
                .delays
                .iter()
                .find(|(needle, _)| stmt.sql().contains(needle))
                .map(|(_, delay)| *delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.answer(stmt)
        }
    }
}
