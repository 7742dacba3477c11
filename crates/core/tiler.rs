//! Building the tile index table in the database.
//!
//! The usual sequence is: stage the extent polygon in a temporary table, create
//! the tile table, upload every grid cell with its ID and southwest boundary,
//! delete the cells outside the extent, and index the geometry columns. The
//! steps log and report expected database failures as `false`. Only invalid
//! configuration is returned as an error.
//!
//! The extent table is temporary, so every step must run on the same session.
//! Use a store with a single connection.

use cjdb_types::polygon::{linestring_to_ewkt, southwest_boundary, to_ewkt};

use crate::config::{Config, TileIndexConfig};
use crate::error::{CjdbError, DbErrorKind, Result};
use crate::store::SpatialStore;
use crate::store::sql::{Ident, Statement};
use crate::tiling::{Grid, QuadtreeIndex};

/// Rows per `INSERT` round trip.
pub const INSERT_BATCH_SIZE: usize = 1000;

/// Outcome of creating the tile table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateTable {
    Created,
    /// The table exists and was not dropped first
    AlreadyExists,
    Failed,
}

fn check_srid(srid: i32) -> Result<()> {
    if srid <= 0 {
        return Err(CjdbError::InvalidInput(format!(
            "SRID={srid} is not valid. Set it in the configuration file at tile_index.srid"
        )));
    }
    Ok(())
}

/// Run a statement, logging a failure and turning it into `false`.
async fn send(store: &dyn SpatialStore, stmt: &Statement) -> bool {
    log::debug!("{}", stmt);
    match store.execute(stmt).await {
        Ok(_) => true,
        Err(e) => {
            log::error!("{}", e);
            false
        }
    }
}

/// Create the temporary table that holds the extent polygon.
pub async fn create_extent_table(
    store: &dyn SpatialStore,
    extent: &Ident,
    srid: i32,
) -> Result<bool> {
    check_srid(srid)?;
    let stmt = Statement::new(format!(
        "CREATE TEMPORARY TABLE {extent} (gid serial PRIMARY KEY, geom geometry(POLYGON, {srid}))"
    ));
    Ok(send(store, &stmt).await)
}

/// Insert a polygon given as EWKT into the extent table.
pub async fn insert_ewkt(store: &dyn SpatialStore, extent: &Ident, ewkt: &str) -> bool {
    let mut stmt = Statement::new(format!("INSERT INTO {extent} (geom) VALUES (ST_GeomFromEWKT("));
    stmt.push_bind(ewkt).push("))");
    send(store, &stmt).await
}

/// Create the schema and the tile table, optionally dropping an existing one.
pub async fn create_tile_table(
    store: &dyn SpatialStore,
    tile_index: &TileIndexConfig,
    srid: i32,
    drop: bool,
) -> Result<CreateTable> {
    check_srid(srid)?;
    let table = tile_index.ident();

    let schema = Statement::new(format!(
        "CREATE SCHEMA IF NOT EXISTS {}",
        Ident::new(&tile_index.schema)
    ));
    if !send(store, &schema).await {
        return Ok(CreateTable::Failed);
    }

    if drop {
        let stmt = Statement::new(format!("DROP TABLE IF EXISTS {table} CASCADE"));
        if !send(store, &stmt).await {
            return Ok(CreateTable::Failed);
        }
    }

    let stmt = Statement::new(format!(
        "CREATE TABLE {table} ({} text PRIMARY KEY, {} geometry(POLYGON, {srid}), {} geometry(LINESTRING, {srid}))",
        tile_index.pk(),
        tile_index.geometry(),
        tile_index.geometry_sw(),
    ));
    log::debug!("{}", stmt);
    match store.execute(&stmt).await {
        Ok(_) => Ok(CreateTable::Created),
        Err(e) if e.is_db(DbErrorKind::DuplicateTable) => {
            log::error!("{}", e);
            Ok(CreateTable::AlreadyExists)
        }
        Err(e) => {
            log::error!("{}", e);
            Ok(CreateTable::Failed)
        }
    }
}

/// Delete the tiles `rows` from the tile table, returning how many are left.
async fn remove_tiles(
    store: &dyn SpatialStore,
    tile_index: &TileIndexConfig,
    rows: &[(String, String, String)],
) -> usize {
    let mut stmt = Statement::new(format!(
        "DELETE FROM {} WHERE {}::text = ANY(",
        tile_index.ident(),
        tile_index.pk()
    ));
    stmt.push_bind(rows.iter().map(|r| r.0.clone()).collect::<Vec<_>>())
        .push(")");
    if send(store, &stmt).await {
        0
    } else {
        rows.len()
    }
}

/// Upload every labeled cell with its southwest boundary.
///
/// Returns the number of tiles in the table. The first failed batch stops the
/// upload and the tiles of the earlier batches are deleted again, so the table
/// holds either every tile or none.
pub async fn insert_tiles(
    store: &dyn SpatialStore,
    tile_index: &TileIndexConfig,
    grid: &Grid,
    quadtree: &QuadtreeIndex,
    srid: i32,
) -> Result<usize> {
    check_srid(srid)?;

    let mut rows = Vec::with_capacity(quadtree.len());
    for (id, key) in quadtree.iter() {
        let cell = grid.get(key).ok_or_else(|| {
            CjdbError::QuadtreeInvariant(format!("tile {id} has no cell with key {key}"))
        })?;
        let sw = southwest_boundary(cell).ok_or_else(|| {
            CjdbError::InvalidInput(format!("the cell of tile {id} is empty"))
        })?;
        rows.push((
            id.to_string(),
            to_ewkt(cell, srid),
            linestring_to_ewkt(&sw, srid),
        ));
    }

    let header = format!(
        "INSERT INTO {} ({}, {}, {}) SELECT id, ST_GeomFromEWKT(geom), ST_GeomFromEWKT(geom_sw) \
         FROM UNNEST(",
        tile_index.ident(),
        tile_index.pk(),
        tile_index.geometry(),
        tile_index.geometry_sw(),
    );

    let mut written = 0;
    for batch in rows.chunks(INSERT_BATCH_SIZE) {
        let mut stmt = Statement::new(header.clone());
        let ids: Vec<String> = batch.iter().map(|r| r.0.clone()).collect();
        let polygons: Vec<String> = batch.iter().map(|r| r.1.clone()).collect();
        let boundaries: Vec<String> = batch.iter().map(|r| r.2.clone()).collect();
        stmt.push_bind(ids)
            .push("::text[], ")
            .push_bind(polygons)
            .push("::text[], ")
            .push_bind(boundaries)
            .push("::text[]) AS t(id, geom, geom_sw)");
        if let Err(e) = store.execute(&stmt).await {
            log::error!("Could not insert the tiles: {}", e);
            if written > 0 {
                written = remove_tiles(store, tile_index, &rows[..written]).await;
            }
            break;
        }
        written += batch.len();
    }
    log::info!("Inserted {} of {} tiles into {}", written, rows.len(), tile_index.ident());
    Ok(written)
}

/// Delete the tiles that do not intersect the extent.
pub async fn clip_grid(store: &dyn SpatialStore, tile_index: &TileIndexConfig, extent: &Ident) -> bool {
    let stmt = Statement::new(format!(
        "DELETE FROM {table} ti WHERE NOT ST_Intersects(ti.{geom}, (SELECT ST_Union(n.geom) FROM {extent} n))",
        table = tile_index.ident(),
        geom = tile_index.geometry(),
    ));
    send(store, &stmt).await
}

/// Create GiST indexes on both geometry columns of the tile table.
pub async fn gist_on_grid(store: &dyn SpatialStore, tile_index: &TileIndexConfig) -> bool {
    let table = tile_index.ident();
    for (column, suffix) in [
        (tile_index.geometry(), "_geom_idx"),
        (tile_index.geometry_sw(), "_geom_sw_idx"),
    ] {
        let stmt = Statement::new(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {table} USING gist ({column})",
            table.derived(suffix)
        ));
        if !send(store, &stmt).await {
            return false;
        }
    }
    true
}

/// Index the centroid of the first geometry of every mapped table.
///
/// Strict tile queries filter on these centroids. Returns `true` when every
/// index was created.
pub async fn create_centroid_indexes(store: &dyn SpatialStore, cfg: &Config) -> bool {
    let mut ok = true;
    for mapping in cfg.tables() {
        let column = &mapping.primary_geometry().column;
        let name = Ident::new(format!("{}_{}_centroid_idx", mapping.table, column));
        let stmt = Statement::new(format!(
            "CREATE INDEX IF NOT EXISTS {name} ON {} USING gist (ST_Centroid({}))",
            mapping.ident(),
            Ident::new(column)
        ));
        ok &= send(store, &stmt).await;
    }
    ok
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::TileIndexFields;
    use crate::store::sql::Param;
    use crate::store::testing::RecordingStore;
    use crate::tiling::{build_grid, label};
    use cjdb_types::BoundingBox;

    fn tile_index() -> TileIndexConfig {
        TileIndexConfig {
            schema: "tile_index".into(),
            table: "tiles".into(),
            srid: 7415,
            field: TileIndexFields {
                pk: "id".into(),
                geometry: "geom".into(),
                geometry_sw_boundary: "geom_sw".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_invalid_srid_is_an_error() {
        let store = RecordingStore::new();
        let extent = Ident::new("extent");
        assert!(create_extent_table(&store, &extent, 0).await.is_err());
        assert!(create_tile_table(&store, &tile_index(), -1, false).await.is_err());
        assert!(store.sql().is_empty());
    }

    #[tokio::test]
    async fn test_create_tile_table_with_drop() {
        let store = RecordingStore::new();
        let created = create_tile_table(&store, &tile_index(), 7415, true).await.unwrap();
        assert_eq!(created, CreateTable::Created);
        assert_eq!(
            store.sql(),
            vec![
                "CREATE SCHEMA IF NOT EXISTS \"tile_index\"".to_string(),
                "DROP TABLE IF EXISTS \"tile_index\".\"tiles\" CASCADE".to_string(),
                "CREATE TABLE \"tile_index\".\"tiles\" (\"id\" text PRIMARY KEY, \
                 \"geom\" geometry(POLYGON, 7415), \"geom_sw\" geometry(LINESTRING, 7415))"
                    .to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_existing_tile_table() {
        let store = RecordingStore::new().respond("CREATE TABLE", || {
            Err(CjdbError::database(
                DbErrorKind::DuplicateTable,
                "relation \"tiles\" already exists",
            ))
        });
        let created = create_tile_table(&store, &tile_index(), 7415, false).await.unwrap();
        assert_eq!(created, CreateTable::AlreadyExists);
    }

    #[tokio::test]
    async fn test_insert_tiles_in_batches() {
        let store = RecordingStore::new();
        // 64x64 cells, 4096 tiles
        let bbox = BoundingBox::new(0.0, 0.0, 640.0, 640.0);
        let grid = build_grid(&bbox, 10.0, 10.0).unwrap();
        let quadtree = label(&grid).unwrap();
        let written = insert_tiles(&store, &tile_index(), &grid, &quadtree, 7415)
            .await
            .unwrap();
        assert_eq!(written, 4096);

        let statements = store.statements.lock().unwrap();
        assert_eq!(statements.len(), 5);
        let first = &statements[0];
        assert!(first.sql().contains("FROM UNNEST($1::text[], $2::text[], $3::text[])"));
        match &first.params()[1] {
            Param::TextArray(polygons) => {
                assert_eq!(polygons.len(), INSERT_BATCH_SIZE);
                assert!(polygons[0].starts_with("SRID=7415;POLYGON(("));
            }
            other => panic!("unexpected parameter {other:?}"),
        }
        match &statements[4].params()[2] {
            Param::TextArray(lines) => {
                assert_eq!(lines.len(), 96);
                assert!(lines[0].starts_with("SRID=7415;LINESTRING("));
            }
            other => panic!("unexpected parameter {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_batch_removes_earlier_batches() {
        let inserts = AtomicUsize::new(0);
        let store = RecordingStore::new().respond("INSERT", move || {
            if inserts.fetch_add(1, Ordering::SeqCst) == 2 {
                Err(CjdbError::database(DbErrorKind::Connection, "server closed the connection"))
            } else {
                Ok(Vec::new())
            }
        });
        let bbox = BoundingBox::new(0.0, 0.0, 640.0, 640.0);
        let grid = build_grid(&bbox, 10.0, 10.0).unwrap();
        let quadtree = label(&grid).unwrap();
        let written = insert_tiles(&store, &tile_index(), &grid, &quadtree, 7415)
            .await
            .unwrap();
        assert_eq!(written, 0);

        let statements = store.statements.lock().unwrap();
        assert_eq!(statements.len(), 4);
        let delete = &statements[3];
        assert_eq!(
            delete.sql(),
            "DELETE FROM \"tile_index\".\"tiles\" WHERE \"id\"::text = ANY($1)"
        );
        match &delete.params()[0] {
            Param::TextArray(ids) => assert_eq!(ids.len(), 2 * INSERT_BATCH_SIZE),
            other => panic!("unexpected parameter {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_steps_report_false() {
        let store = RecordingStore::new()
            .respond("DELETE", || Err(CjdbError::database(DbErrorKind::Query, "boom")));
        let extent = Ident::new("extent");
        assert!(!clip_grid(&store, &tile_index(), &extent).await);
        assert!(insert_ewkt(&store, &extent, "SRID=7415;POLYGON((0 0,1 0,1 1,0 0))").await);
    }

    #[tokio::test]
    async fn test_gist_index_names() {
        let store = RecordingStore::new();
        assert!(gist_on_grid(&store, &tile_index()).await);
        assert_eq!(
            store.sql(),
            vec![
                "CREATE INDEX IF NOT EXISTS \"tiles_geom_idx\" ON \"tile_index\".\"tiles\" USING gist (\"geom\")",
                "CREATE INDEX IF NOT EXISTS \"tiles_geom_sw_idx\" ON \"tile_index\".\"tiles\" USING gist (\"geom_sw\")",
            ]
        );
    }
}
