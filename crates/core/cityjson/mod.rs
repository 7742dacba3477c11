//! A small CityJSON model and its serialization.
//!
//! Objects are assembled with real-world coordinates. Vertices are deduplicated
//! and quantized to integers only when a document is produced, either as one
//! CityJSON file or as a metadata document followed by one CityJSONFeature per
//! object.

mod model;
pub mod writer;

pub use model::{
    Boundaries, CITYJSON_VERSION, CityModel, CityObject, Geometry, IMPORTANT_DIGITS, Point3,
    Ring, SemanticSurface, Shell, Surface, SurfaceIndex, Transform,
};
pub use writer::write_document;
