//! In-memory stores for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cjdb::store::sql::{Param, Statement};
use cjdb::store::{Record, SpatialStore, StoreConnector, Value};
use cjdb::{CjdbError, Config, DbErrorKind, Result};
use serde_json::json;

pub const CONFIG: &str = r#"
[geometries]
lod = 1.2
type = "MultiSurface"

[database]
dbname = "db3dnl"
user = "cjdb"

[tile_index]
schema = "tile_index"
table = "tiles"
srid = 7415
[tile_index.field]
pk = "id"
geometry = "geom"

[[cityobject_type.Building]]
schema = "public"
table = "building"
[cityobject_type.Building.field]
pk = "ogc_fid"
cityobject_id = "identificatie"
semantics = "labels"
[cityobject_type.Building.field.geometry]
lod22 = { name = "geometry_lod22", type = "Solid" }

[[cityobject_type.WaterBody]]
schema = "public"
table = "water"
[cityobject_type.WaterBody.field]
pk = "fid"
cityobject_id = "id"
geometry = "wkb_geometry"

[semantics_mapping]
0 = "GroundSurface"
1 = "RoofSurface"
"#;

pub fn config() -> Config {
    Config::from_toml(CONFIG).unwrap()
}

pub fn query_error(message: &str) -> CjdbError {
    CjdbError::Database {
        kind: DbErrorKind::Query,
        message: message.to_string(),
    }
}

/// A building row located at `x`.
pub fn building(id: &str, x: f64) -> Record {
    let ground = json!([[[x, 0.0, 0.0], [x, 1.0, 0.0], [x + 1.0, 1.0, 0.0], [x + 1.0, 0.0, 0.0]]]);
    let roof = json!([[[x, 0.0, 3.0], [x + 1.0, 0.0, 3.0], [x + 1.0, 1.0, 3.0], [x, 1.0, 3.0]]]);
    Record::new()
        .with("pk", Value::Int(1))
        .with("coid", Value::Text(id.to_string()))
        .with("bouwjaar", Value::Int(1990))
        .with("labels", Value::IntArray(vec![Some(0), Some(1)]))
        .with("geom_lod22", Value::Json(json!([ground, roof])))
}

/// The tile IDs a statement was bound to, if any.
pub fn tiles_of(stmt: &Statement) -> Vec<String> {
    stmt.params()
        .iter()
        .find_map(|p| match p {
            Param::TextArray(ids) => Some(ids.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

type Answer = dyn Fn(&Statement) -> Result<Vec<Record>> + Send + Sync;
type Delay = dyn Fn(&Statement) -> Duration + Send + Sync;

/// Records every statement and answers queries with a closure.
pub struct MemoryStore {
    statements: Mutex<Vec<Statement>>,
    answer: Box<Answer>,
    delay: Box<Delay>,
}

impl MemoryStore {
    pub fn new(answer: impl Fn(&Statement) -> Result<Vec<Record>> + Send + Sync + 'static) -> Self {
        Self {
            statements: Mutex::new(Vec::new()),
            answer: Box::new(answer),
            delay: Box::new(|_| Duration::ZERO),
        }
    }

    /// Hold back the answer to each query by what `delay` returns for it.
    pub fn with_delay(
        mut self,
        delay: impl Fn(&Statement) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay = Box::new(delay);
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

    pub fn statements(&self) -> Vec<Statement> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpatialStore for MemoryStore {
    async fn execute(&self, stmt: &Statement) -> Result<u64> {
        self.statements.lock().unwrap().push(stmt.clone());
        (self.answer)(stmt).map(|rows| rows.len() as u64)
    }

    async fn fetch(&self, stmt: &Statement) -> Result<Vec<Record>> {
        self.statements.lock().unwrap().push(stmt.clone());
        if stmt.sql().contains("information_schema.columns") {
            return Ok(["ogc_fid", "identificatie", "bouwjaar", "labels", "geometry_lod22"]
                .iter()
                .map(|c| Record::new().with("column_name", Value::Text(c.to_string())))
                .collect());
        }
        let delay = (self.delay)(stmt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        (self.answer)(stmt)
    }
}

/// Hands out the same store and counts the connections.
pub struct MemoryConnector {
    pub store: Arc<MemoryStore>,
    pub connections: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store: Arc::new(store),
            connections: AtomicUsize::new(0),
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, _max_connections: u32) -> Result<Arc<dyn SpatialStore>> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        let store: Arc<dyn SpatialStore> = self.store.clone();
        Ok(store)
    }
}
