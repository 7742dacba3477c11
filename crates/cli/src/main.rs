use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use cjdb::export::tile_list;
use cjdb::store::sql::Ident;
use cjdb::store::check_postgis;
use cjdb::tiler::{
    CreateTable, clip_grid, create_centroid_indexes, create_extent_table, create_tile_table,
    gist_on_grid, insert_ewkt, insert_tiles,
};
use cjdb::{
    BoundingBox, Config, ExportOptions, PgConnector, Polygon, SpatialFilter, StoreConnector, build_grid,
    export_tiles, export_to_file, label, read_geojson_polygon,
};
use cjdb_types::polygon::to_ewkt;
use tracing::{debug, info};

/// Export tool from PostGIS to CityJSON.
#[derive(Parser, Debug)]
#[command(name = "cjdb", version, about, long_about = None)]
struct Args {
    /// The TOML configuration file
    configuration: PathBuf,

    /// Logging level of the log file
    #[arg(
        long,
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"],
        ignore_case = true
    )]
    log: String,

    #[arg(long, default_value = "cjdb.log")]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export the whole database into a CityJSON file
    Export {
        /// Path of the output file
        filename: PathBuf,
    },
    /// Export the objects within the given tiles, one CityJSON file per tile
    ///
    /// TILES is a list of tile IDs from the tile index, or 'all' for every
    /// tile. With --features a directory per tile is created that holds one
    /// CityJSONFeature per file, and 'metadata.city.json' with the CRS and the
    /// transform is written to the root of DIR.
    ExportTiles {
        /// Merge the requested tiles into a single file
        #[arg(long)]
        merge: bool,
        /// Gzip the output files
        #[arg(long)]
        zip: bool,
        /// The number of tiles exported at the same time
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,
        /// Export CityJSONFeatures
        #[arg(long)]
        features: bool,
        #[arg(required = true, num_args = 1..)]
        tiles: Vec<String>,
        /// Output directory, created when missing
        dir: PathBuf,
    },
    /// Export the objects within a 2D bounding box into a CityJSON file
    ///
    /// The coordinates are in the CRS of the database.
    ExportBbox {
        #[arg(allow_hyphen_values = true)]
        minx: f64,
        #[arg(allow_hyphen_values = true)]
        miny: f64,
        #[arg(allow_hyphen_values = true)]
        maxx: f64,
        #[arg(allow_hyphen_values = true)]
        maxy: f64,
        filename: PathBuf,
    },
    /// Export the objects within a polygon into a CityJSON file
    ExportExtent {
        /// GeoJSON file with a single Polygon, in the CRS of the database
        extent: PathBuf,
        filename: PathBuf,
    },
    /// Create a tile index for an extent
    ///
    /// Lays a grid of WIDTH x HEIGHT tiles over the bounding box of EXTENT,
    /// orders the tiles along a Morton curve, names them with quadtree IDs,
    /// uploads them into the tile_index table and removes the tiles outside
    /// the extent.
    Index {
        /// Drop the tile index table if it exists
        #[arg(long)]
        drop: bool,
        /// GeoJSON file with a single Polygon
        extent: PathBuf,
        width: f64,
        height: f64,
    },
    /// Index the centroid of the first geometry of every mapped table
    IndexCentroids,
}

fn init_logging(level: &str, path: &Path) -> anyhow::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Could not open the log file {}", path.display()))?;
    let level = level.to_lowercase();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{level},sqlx=warn").into()),
        )
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

async fn read_polygon(path: &Path) -> anyhow::Result<Polygon> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Could not read {}", path.display()))?;
    Ok(read_geojson_polygon(&text)?)
}

async fn export_file(
    connector: &PgConnector,
    cfg: &Config,
    filter: SpatialFilter,
    path: &Path,
) -> anyhow::Result<()> {
    let written = export_to_file(connector, cfg, &filter, path, Some(1)).await?;
    println!("Saved CityJSON to {}", written.display());
    Ok(())
}

async fn export_tiles_cmd(
    connector: PgConnector,
    cfg: Config,
    tiles: Vec<String>,
    dir: PathBuf,
    merge: bool,
    options: ExportOptions,
) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Could not create {}", dir.display()))?;

    let store = connector.connect(1).await?;
    let tiles = tile_list(store.as_ref(), &cfg, &tiles).await?;
    drop(store);

    if merge {
        println!("Exporting merged tiles {:?}", tiles);
        let path = dir.join("merged.city.json");
        let filter = SpatialFilter::Tiles {
            ids: tiles,
            strict: false,
        };
        return export_file(&connector, &cfg, filter, &path).await;
    }

    println!("Exporting {} tiles...", tiles.len());
    println!("Output directory: {}", dir.display());
    let report = export_tiles(Arc::new(connector), Arc::new(cfg), &dir, &tiles, &options).await?;
    println!("{}", report.summary());
    Ok(())
}

async fn index(
    connector: &PgConnector,
    cfg: &Config,
    extent: &Path,
    width: f64,
    height: f64,
    drop: bool,
) -> anyhow::Result<()> {
    let polygon = read_polygon(extent).await?;
    let bbox = BoundingBox::of_polygon(&polygon).context("The extent polygon is empty")?;
    debug!("BBOX {}", bbox);
    println!("Tilesize is set to width={width}, height={height} in CRS units");

    let grid = build_grid(&bbox, width, height)?;
    println!("Created {} tiles", grid.len());
    let quadtree = label(&grid)?;

    // The extent table is temporary, every step runs on one connection.
    let store = connector.connect(1).await?;
    let store = store.as_ref();
    let dbname = &cfg.database.dbname;
    let version = check_postgis(store)
        .await
        .with_context(|| format!("PostGIS is not installed in {dbname}"))?;
    debug!("PostGIS version={}", version);

    let srid = cfg.tile_index.srid;
    let extent_table = Ident::new("extent");
    if !create_extent_table(store, &extent_table, srid).await? {
        bail!("Could not create TEMPORARY TABLE for the extent. Check the logs for details.");
    }
    if !insert_ewkt(store, &extent_table, &to_ewkt(&polygon, srid)).await {
        bail!("Could not insert the extent into the 'extent' temporary table. Check the logs for details.");
    }

    let table = format!("{}.{}", cfg.tile_index.schema, cfg.tile_index.table);
    match create_tile_table(store, &cfg.tile_index, srid, drop).await? {
        CreateTable::Created => println!("Created {table} in {dbname}"),
        CreateTable::AlreadyExists => {
            bail!("{table} already exists in {dbname}. Use --drop to replace it.")
        }
        CreateTable::Failed => {
            bail!("Could not create {table} in {dbname}. Check the logs for details.")
        }
    }

    let inserted = insert_tiles(store, &cfg.tile_index, &grid, &quadtree, srid).await?;
    if inserted != quadtree.len() {
        bail!(
            "Inserted only {inserted} of {} tiles into {table}. Check the logs for details.",
            quadtree.len()
        );
    }
    println!("Inserted {inserted} tiles into {table}");

    println!("Clipping tile index {table} to the provided extent polygon");
    if !clip_grid(store, &cfg.tile_index, &extent_table).await {
        bail!("Could not clip the tile index to the extent. Check the logs for details.");
    }
    if !gist_on_grid(store, &cfg.tile_index).await {
        bail!("Could not create GiST indexes on {table}. Check the logs for details.");
    }
    Ok(())
}

async fn index_centroids(connector: &PgConnector, cfg: &Config) -> anyhow::Result<()> {
    let store = connector.connect(1).await?;
    if !create_centroid_indexes(store.as_ref(), cfg).await {
        bail!("Could not create all centroid indexes. Check the logs for details.");
    }
    println!("Created the centroid indexes");
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let cfg = Config::from_path(&args.configuration).with_context(|| {
        format!(
            "Could not load the configuration {}",
            args.configuration.display()
        )
    })?;
    let connector = PgConnector::new(&cfg.database);

    match args.command {
        Command::Export { filename } => {
            println!("Exporting the whole database");
            export_file(&connector, &cfg, SpatialFilter::All, &filename).await
        }
        Command::ExportTiles {
            merge,
            zip,
            jobs,
            features,
            tiles,
            dir,
        } => {
            let options = ExportOptions::default()
                .with_jobs(jobs)
                .with_gzip(zip)
                .with_features(features);
            export_tiles_cmd(connector, cfg, tiles, dir, merge, options).await
        }
        Command::ExportBbox {
            minx,
            miny,
            maxx,
            maxy,
            filename,
        } => {
            if minx > maxx || miny > maxy {
                bail!("The bounding box must be given as MINX MINY MAXX MAXY");
            }
            let bbox = BoundingBox::new(minx, miny, maxx, maxy);
            println!("Exporting with BBOX={bbox}");
            export_file(&connector, &cfg, SpatialFilter::BBox(bbox), &filename).await
        }
        Command::ExportExtent { extent, filename } => {
            let polygon = read_polygon(&extent).await?;
            println!(
                "Exporting with polygonal selection. Polygon={}",
                extent.display()
            );
            export_file(&connector, &cfg, SpatialFilter::Extent(polygon), &filename).await
        }
        Command::Index {
            drop,
            extent,
            width,
            height,
        } => index(&connector, &cfg, &extent, width, height, drop).await,
        Command::IndexCentroids => index_centroids(&connector, &cfg).await,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log, &args.log_file)?;
    println!("Writing logs to {}", args.log_file.display());
    info!("cjdb {}", cjdb::VERSION);

    let log_file = args.log_file.clone();
    run(args)
        .await
        .with_context(|| format!("Check the log file {} for details", log_file.display()))
}
