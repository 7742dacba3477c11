//! Exporting many tiles at once, each tile to its own file.
//!
//! Every tile is an independent unit of work with its own store connection. A
//! failing or panicking tile is recorded and the rest of the batch carries on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;

use crate::cityjson::{CityModel, write_document};
use crate::config::Config;
use crate::error::{CjdbError, Result};
use crate::export::convert::convert;
use crate::export::fetch::{fetch_tables, pool_size};
use crate::query::{SpatialFilter, resolve_tiles};
use crate::store::{SpatialStore, StoreConnector, install_functions};

/// Translation shared by every CityJSONFeature of a features export.
pub const FEATURES_TRANSLATE: [f64; 3] = [171800.0, 472700.0, 0.0];

/// Suffix of CityJSON files.
pub const CITYJSON_SUFFIX: &str = ".city.json";

/// Suffix of the files holding one CityJSONFeature.
pub const FEATURE_SUFFIX: &str = ".city.jsonl";

/// The file at the root of a features export with the transform and the CRS.
pub const METADATA_FILE: &str = "metadata.city.json";

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    /// Tiles exported at the same time
    pub jobs: usize,
    pub gzip: bool,
    /// One CityJSONFeature per file, grouped in a directory per tile
    pub features: bool,
    /// Prepended to every tile file name
    pub prefix: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            gzip: false,
            features: false,
            prefix: String::new(),
        }
    }
}

impl ExportOptions {
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    pub fn with_features(mut self, features: bool) -> Self {
        self.features = features;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// Outcome of a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub exported: usize,
    /// Tile IDs, in completion order
    pub failed: Vec<String>,
}

impl BatchReport {
    pub fn summary(&self) -> String {
        format!(
            "Done. Exported {} tiles. Failed {} tiles: {:?}",
            self.exported,
            self.failed.len(),
            self.failed
        )
    }
}

/// Install the server functions and check the requested tiles against the index.
pub async fn tile_list(
    store: &dyn SpatialStore,
    cfg: &Config,
    tokens: &[String],
) -> Result<Vec<String>> {
    install_functions(store).await.map_err(|e| {
        log::error!("Could not create the required functions in PostgreSQL: {}", e);
        e
    })?;
    resolve_tiles(store, &cfg.tile_index, tokens).await
}

/// File name of a feature, with path separators and control characters
/// replaced by `_`.
///
/// # Errors
///
/// [`CjdbError::InvalidInput`] when the ID is empty, `.` or `..`.
pub fn feature_file_name(id: &str) -> Result<String> {
    if matches!(id, "" | "." | "..") {
        return Err(CjdbError::InvalidInput(format!(
            "{id:?} cannot be used as a file name"
        )));
    }
    let name: String = id
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    Ok(format!("{name}{FEATURE_SUFFIX}"))
}

async fn write_feature(
    dir: &Path,
    id: &str,
    feature: &serde_json::Value,
    gzip: bool,
) -> Result<PathBuf> {
    let path = dir.join(feature_file_name(id)?);
    write_document(&path, feature, gzip).await
}

async fn export_tile(
    connector: Arc<dyn StoreConnector>,
    cfg: Arc<Config>,
    dir: PathBuf,
    tile: String,
    options: ExportOptions,
) -> Result<PathBuf> {
    let store = connector.connect(1).await?;
    let filter = SpatialFilter::Tiles {
        ids: vec![tile.clone()],
        strict: options.features,
    };
    let exports = fetch_tables(store, &cfg, &filter, Some(1)).await?;
    let mut model = convert(&exports, &cfg)?;
    drop(exports);

    if options.features {
        let tile_dir = dir.join(&tile);
        tokio::fs::create_dir_all(&tile_dir).await?;
        let mut failed = Vec::new();
        let mut first_error = None;
        for (id, feature) in model.features(FEATURES_TRANSLATE) {
            if let Err(e) = write_feature(&tile_dir, &id, &feature, options.gzip).await {
                failed.push(id);
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            log::error!("Could not write the features {:?} of tile {}", failed, tile);
            return Err(e);
        }
        Ok(tile_dir)
    } else {
        let path = dir.join(format!("{}{}{CITYJSON_SUFFIX}", options.prefix, tile));
        model.file_identifier = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        write_document(&path, &model.to_cityjson(None), options.gzip).await
    }
}

/// Export every tile in `tiles` into `dir`, `options.jobs` tiles at a time.
///
/// In features mode `metadata.city.json` is written first, and when that fails
/// nothing else is attempted. Tile failures are collected in the report.
pub async fn export_tiles(
    connector: Arc<dyn StoreConnector>,
    cfg: Arc<Config>,
    dir: &Path,
    tiles: &[String],
    options: &ExportOptions,
) -> Result<BatchReport> {
    if !dir.is_dir() {
        return Err(CjdbError::InvalidInput(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    if options.jobs == 0 {
        return Err(CjdbError::InvalidInput(
            "the number of jobs must be at least 1".into(),
        ));
    }

    if options.features {
        let document = CityModel::metadata_document(cfg.epsg, FEATURES_TRANSLATE);
        let path = write_document(&dir.join(METADATA_FILE), &document, options.gzip).await?;
        log::info!("Written CityJSON metadata file to {}", path.display());
    }

    let total = tiles.len();
    let mut units = stream::iter(tiles.iter().cloned())
        .map(|tile| {
            let handle = tokio::spawn(export_tile(
                Arc::clone(&connector),
                Arc::clone(&cfg),
                dir.to_path_buf(),
                tile.clone(),
                options.clone(),
            ));
            async move { (tile, handle.await) }
        })
        .buffer_unordered(options.jobs);

    let mut report = BatchReport::default();
    let mut done = 0;
    while let Some((tile, joined)) = units.next().await {
        done += 1;
        match joined.map_err(CjdbError::from).and_then(|result| result) {
            Ok(path) => {
                report.exported += 1;
                if options.features {
                    log::info!("[{}/{}] Saved all features from tile {}", done, total, tile);
                } else {
                    log::info!("[{}/{}] Saved {}", done, total, path.display());
                }
            }
            Err(e) => {
                log::error!("Failed to export tile {}\n{}", tile, e);
                report.failed.push(tile);
            }
        }
    }

    log::info!("{}", report.summary());
    Ok(report)
}

/// Export everything `filter` selects into a single CityJSON file.
///
/// Used for the whole database, a bounding box, a polygon and merged tiles.
pub async fn export_to_file(
    connector: &dyn StoreConnector,
    cfg: &Config,
    filter: &SpatialFilter,
    path: &Path,
    threads: Option<usize>,
) -> Result<PathBuf> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.is_dir()
    {
        return Err(CjdbError::InvalidInput(format!(
            "Directory {} does not exist",
            parent.display()
        )));
    }

    let store = connector.connect(pool_size(cfg, threads)).await?;
    install_functions(store.as_ref()).await?;
    let exports = fetch_tables(store, cfg, filter, threads).await?;
    let mut model = convert(&exports, cfg)?;
    model.file_identifier = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    write_document(path, &model.to_cityjson(None), false).await
}
