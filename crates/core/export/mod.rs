//! From mapped tables to CityJSON files.
//!
//! [`fetch`] queries the tables, [`convert`] turns their rows into a
//! [`CityModel`](crate::cityjson::CityModel) and [`batch`] writes the results,
//! one file per tile or one file for a whole selection.

pub mod batch;
pub mod convert;
pub mod fetch;

pub use batch::{
    BatchReport, ExportOptions, FEATURES_TRANSLATE, METADATA_FILE, export_tiles, export_to_file,
    tile_list,
};
pub use convert::{convert, table_to_cityobjects};
pub use fetch::{TableExport, fetch_tables, pool_size};
