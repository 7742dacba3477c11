//! Querying every mapped table, one after another or concurrently.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;

use crate::config::{Config, TableMapping, TileIndexConfig};
use crate::error::{CjdbError, Result};
use crate::query::{SpatialFilter, query_for_table};
use crate::store::{Record, SpatialStore};

/// The rows selected from one mapped table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableExport {
    pub mapping: TableMapping,
    pub records: Vec<Record>,
}

/// Number of store connections a fetch with `threads` needs.
pub fn pool_size(cfg: &Config, threads: Option<usize>) -> u32 {
    match threads {
        Some(1) => 1,
        _ => cfg.table_count() as u32 + 1,
    }
}

async fn fetch_table(
    store: &dyn SpatialStore,
    mapping: &TableMapping,
    tile_index: &TileIndexConfig,
    filter: &SpatialFilter,
    epsg: i32,
) -> Result<Vec<Record>> {
    log::debug!(
        "CityObject {} from table {}",
        mapping.cityobject_type,
        mapping.qualified_name()
    );
    let stmt = query_for_table(store, mapping, tile_index, filter, epsg).await?;
    store.fetch(&stmt).await
}

fn table_failed(mapping: &TableMapping, error: &CjdbError) -> CjdbError {
    log::error!("Could not query {}: {}", mapping.qualified_name(), error);
    CjdbError::TableQuery {
        table: mapping.qualified_name(),
    }
}

/// Query every mapped table with `filter`.
///
/// With `threads == Some(1)` the tables are queried in declaration order and
/// the first failure stops the fetch. Otherwise every table gets its own task,
/// at most `threads` at a time (one per table when `None`), and the results
/// come back in completion order. A failing table does not cancel the others:
/// all queries finish and the first failure is returned.
///
/// The store should hold at least [`pool_size`] connections.
pub async fn fetch_tables(
    store: Arc<dyn SpatialStore>,
    cfg: &Config,
    filter: &SpatialFilter,
    threads: Option<usize>,
) -> Result<Vec<TableExport>> {
    let threads = threads.unwrap_or_else(|| cfg.table_count().max(1));
    if threads == 0 {
        return Err(CjdbError::InvalidInput(
            "the number of threads must be at least 1".into(),
        ));
    }

    if threads == 1 {
        log::debug!("Running on a single thread.");
        let mut exports = Vec::with_capacity(cfg.table_count());
        for mapping in cfg.tables() {
            let records =
                fetch_table(store.as_ref(), mapping, &cfg.tile_index, filter, cfg.epsg)
                    .await
                    .map_err(|e| table_failed(mapping, &e))?;
            exports.push(TableExport {
                mapping: mapping.clone(),
                records,
            });
        }
        return Ok(exports);
    }

    log::debug!("Running with {} concurrent queries", threads);
    let mut pending = cfg.tables().cloned();
    let mut running = FuturesUnordered::new();
    let spawn = |mapping: TableMapping| {
        let store = Arc::clone(&store);
        let tile_index = cfg.tile_index.clone();
        let filter = filter.clone();
        let epsg = cfg.epsg;
        async move {
            let task_mapping = mapping.clone();
            let joined = tokio::spawn(async move {
                fetch_table(store.as_ref(), &task_mapping, &tile_index, &filter, epsg).await
            })
            .await;
            (mapping, joined)
        }
    };
    for mapping in pending.by_ref().take(threads) {
        running.push(spawn(mapping));
    }

    let mut exports = Vec::with_capacity(cfg.table_count());
    let mut first_error = None;
    while let Some((mapping, joined)) = running.next().await {
        if let Some(next) = pending.next() {
            running.push(spawn(next));
        }
        match joined.map_err(CjdbError::from).and_then(|result| result) {
            Ok(records) => exports.push(TableExport { mapping, records }),
            Err(e) => {
                let failed = table_failed(&mapping, &e);
                first_error.get_or_insert(failed);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(exports),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::DbErrorKind;
    use crate::export::convert::convert;
    use crate::export::testing::{building_config, building_row};
    use crate::store::Value;
    use crate::store::testing::RecordingStore;

    fn columns() -> Result<Vec<Record>> {
        Ok(["ogc_fid", "identificatie", "bouwjaar", "geometry_lod22"]
            .iter()
            .map(|c| Record::new().with("column_name", Value::Text(c.to_string())))
            .collect())
    }

    fn store() -> RecordingStore {
        RecordingStore::new().respond("information_schema.columns", columns)
    }

    fn failing_building() -> Arc<RecordingStore> {
        Arc::new(store().respond("\"building\"", || {
            Err(CjdbError::database(DbErrorKind::Query, "relation does not exist"))
        }))
    }

    fn queried(store: &RecordingStore, table: &str) -> bool {
        store
            .sql()
            .iter()
            .any(|sql| sql.contains("attr_in_extent") && sql.contains(table))
    }

    #[tokio::test]
    async fn test_sequential_fetch_in_declaration_order() {
        let cfg = building_config();
        let store = Arc::new(store().respond("\"building\"", || Ok(vec![building_row("b", 1)])));
        let exports = fetch_tables(store.clone(), &cfg, &SpatialFilter::All, Some(1))
            .await
            .unwrap();
        let types: Vec<&str> = exports
            .iter()
            .map(|e| e.mapping.cityobject_type.as_str())
            .collect();
        assert_eq!(types, vec!["Building", "WaterBody"]);
        assert_eq!(exports[0].records.len(), 1);
        assert!(exports[1].records.is_empty());
    }

    #[tokio::test]
    async fn test_sequential_failure_stops() {
        let cfg = building_config();
        let store = failing_building();
        let err = fetch_tables(store.clone(), &cfg, &SpatialFilter::All, Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CjdbError::TableQuery { ref table } if table == "public.building"));
        assert!(!queried(&store, "\"water\""));
    }

    #[tokio::test]
    async fn test_concurrent_failure_drains() {
        let _ = env_logger::builder().is_test(true).try_init();
        let cfg = building_config();
        let store = failing_building();
        let err = fetch_tables(store.clone(), &cfg, &SpatialFilter::All, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CjdbError::TableQuery { ref table } if table == "public.building"));
        assert!(queried(&store, "\"water\""));
    }

    #[tokio::test]
    async fn test_concurrent_fetch_returns_every_table() {
        let cfg = building_config();
        let store = Arc::new(store());
        let mut exports = fetch_tables(store, &cfg, &SpatialFilter::All, Some(4))
            .await
            .unwrap();
        exports.sort_by(|a, b| a.mapping.table.cmp(&b.mapping.table));
        let tables: Vec<&str> = exports.iter().map(|e| e.mapping.table.as_str()).collect();
        assert_eq!(tables, vec!["building", "water"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetch_completes_out_of_order() {
        let cfg = building_config();
        let store = Arc::new(
            store()
                .respond("\"building\"", || Ok(vec![building_row("b", 1)]))
                .delay("\"building\"", Duration::from_secs(5)),
        );

        let sequential = fetch_tables(store.clone(), &cfg, &SpatialFilter::All, Some(1))
            .await
            .unwrap();
        let concurrent = fetch_tables(store.clone(), &cfg, &SpatialFilter::All, None)
            .await
            .unwrap();

        let completed: Vec<&str> = concurrent.iter().map(|e| e.mapping.table.as_str()).collect();
        assert_eq!(completed, vec!["water", "building"]);

        let mut reordered = concurrent.clone();
        reordered.sort_by_key(|e| cfg.tables().position(|m| *m == e.mapping));
        assert_eq!(reordered, sequential);

        let expected = convert(&sequential, &cfg).unwrap().to_cityjson(None);
        let actual = convert(&concurrent, &cfg).unwrap().to_cityjson(None);
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_panicking_table_fails_fetch() {
        let cfg = building_config();
        let store = Arc::new(store().respond("\"water\"", || panic!("connection reset")));
        let err = fetch_tables(store.clone(), &cfg, &SpatialFilter::All, Some(2))
            .await
            .unwrap_err();
        assert!(matches!(err, CjdbError::TableQuery { ref table } if table == "public.water"));
        assert!(queried(&store, "\"building\""));
    }

    #[tokio::test]
    async fn test_zero_threads() {
        let cfg = building_config();
        let result = fetch_tables(Arc::new(store()), &cfg, &SpatialFilter::All, Some(0)).await;
        assert!(matches!(result, Err(CjdbError::InvalidInput(_))));
    }

    #[test]
    fn test_pool_size() {
        let cfg = building_config();
        assert_eq!(pool_size(&cfg, Some(1)), 1);
        assert_eq!(pool_size(&cfg, None), 3);
        assert_eq!(pool_size(&cfg, Some(8)), 3);
    }
}
