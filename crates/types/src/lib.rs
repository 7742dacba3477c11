//! # cjdb-types
//!
//! Geometry value types shared by the cjdb tile index and the exporter.
//!
//! - **Bounding boxes**: [`BoundingBox`](bbox::BoundingBox), a `geo::Rect` wrapper
//!   with the `(min_x, min_y, max_x, max_y)` accessors the tiler works with
//! - **Polygons**: rectangle construction, ring means, the southwest boundary of a
//!   cell, and EWKT encoding for PostGIS
//! - **GeoJSON**: reading the single extent polygon that drives `index` and
//!   `export-extent`
//!
//! ## Examples
//!
//! ```rust
//! use cjdb_types::bbox::BoundingBox;
//! use cjdb_types::polygon::{rectangle, to_ewkt};
//!
//! let cell = rectangle(0.0, 10.0, 10.0, 0.0);
//! let bbox = BoundingBox::of_polygon(&cell).unwrap();
//! assert_eq!(bbox.as_tuple(), (0.0, 0.0, 10.0, 10.0));
//! assert!(to_ewkt(&cell, 7415).starts_with("SRID=7415;POLYGON(("));
//! ```

pub mod bbox;
pub mod extent;
pub mod polygon;

pub use bbox::BoundingBox;
pub use extent::{GeoJsonError, read_geojson_polygon};
