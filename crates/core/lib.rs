//! Quadtree tile index and CityJSON exporter for 3D city models in PostGIS.
//!
//! ## Features
//! - **Tile index**: a square grid of 4^n cells over an extent, ordered along a
//!   Morton curve and labelled with quadtree tile IDs, stored in PostGIS
//! - **Export**: the objects of mapped tables as CityJSON, for the whole
//!   database, a bounding box, a polygon or a list of tiles
//! - **Batches**: one file per tile, several tiles at a time, optionally as
//!   CityJSONFeatures and gzip compressed
//!
//! Tiles own what lies inside them or on their southwest boundary, so a strict
//! tile export puts every object in exactly one tile.
//!
//! ```rust
//! use cjdb::BoundingBox;
//! use cjdb::tiling::{build_grid, label};
//!
//! let extent = BoundingBox::new(0.0, 0.0, 40.0, 40.0);
//! let grid = build_grid(&extent, 10.0, 10.0)?;
//! assert_eq!(grid.len(), 16);
//!
//! let index = label(&grid)?;
//! assert!(index.contains("a1"));
//! # Ok::<(), cjdb::CjdbError>(())
//! ```

pub mod cityjson;
pub mod config;
pub mod error;
pub mod export;
pub mod lod;
pub mod query;
pub mod store;
pub mod tiler;
pub mod tiling;

pub use cjdb_types::{BoundingBox, read_geojson_polygon};
pub use geo::Polygon;
pub use error::{CjdbError, DbErrorKind, Result};

pub use cityjson::{CityModel, CityObject};
pub use config::{Config, DatabaseConfig, GeometryType, TableMapping, TileIndexConfig};
pub use export::{BatchReport, ExportOptions, export_tiles, export_to_file};
pub use query::SpatialFilter;
pub use store::{PgConnector, PgStore, SpatialStore, StoreConnector};
pub use tiling::{Grid, QuadtreeIndex, build_grid, label};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {
    pub use crate::{CjdbError, Config, Result};

    pub use crate::{BoundingBox, SpatialFilter};

    pub use crate::{ExportOptions, export_tiles, export_to_file};

    pub use crate::{PgConnector, SpatialStore, StoreConnector};
}
