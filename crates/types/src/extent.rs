//! Reading the extent polygon from GeoJSON.

use geo::{LineString, Polygon};
use geojson::{GeoJson, Geometry, Value};

/// Error type for GeoJSON extent reading.
#[derive(Debug)]
pub enum GeoJsonError {
    /// The document is not valid GeoJSON
    Deserialization(String),
    /// The document holds no geometry to read
    Empty,
    /// The geometry is not a single Polygon
    InvalidGeometry(String),
    /// A position has fewer than two ordinates
    InvalidCoordinates(String),
}

impl std::fmt::Display for GeoJsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deserialization(msg) => write!(f, "GeoJSON deserialization error: {}", msg),
            Self::Empty => write!(f, "GeoJSON document does not contain a geometry"),
            Self::InvalidGeometry(msg) => write!(f, "Invalid GeoJSON geometry: {}", msg),
            Self::InvalidCoordinates(msg) => write!(f, "Invalid GeoJSON coordinates: {}", msg),
        }
    }
}

impl std::error::Error for GeoJsonError {}

/// Read a single polygon from a GeoJSON document.
///
/// For a FeatureCollection the first feature is used. Only `Polygon` is accepted,
/// `MultiPolygon` extents are rejected. The CRS of the document must match the
/// CRS of the tile index, it is not checked.
///
/// # Examples
///
/// ```
/// use cjdb_types::read_geojson_polygon;
///
/// let doc = r#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{},
///   "geometry":{"type":"Polygon","coordinates":[[[0,0],[4,0],[4,4],[0,4],[0,0]]]}}]}"#;
/// let polygon = read_geojson_polygon(doc).unwrap();
/// assert_eq!(polygon.exterior().0.len(), 5);
/// ```
pub fn read_geojson_polygon(text: &str) -> Result<Polygon, GeoJsonError> {
    let gjson: GeoJson = text
        .parse()
        .map_err(|e: geojson::Error| GeoJsonError::Deserialization(e.to_string()))?;

    let geometry = match gjson {
        GeoJson::FeatureCollection(fc) => fc
            .features
            .into_iter()
            .next()
            .and_then(|f| f.geometry)
            .ok_or(GeoJsonError::Empty)?,
        GeoJson::Feature(f) => f.geometry.ok_or(GeoJsonError::Empty)?,
        GeoJson::Geometry(g) => g,
    };

    polygon_from_geometry(geometry)
}

fn polygon_from_geometry(geometry: Geometry) -> Result<Polygon, GeoJsonError> {
    let rings = match geometry.value {
        Value::Polygon(rings) => rings,
        other => {
            return Err(GeoJsonError::InvalidGeometry(format!(
                "the first geometry is {}, only Polygon is allowed",
                type_name(&other)
            )));
        }
    };

    let mut rings = rings.into_iter().map(|ring| {
        ring.into_iter()
            .map(|pos| match pos.as_slice() {
                [x, y, ..] => Ok((*x, *y)),
                _ => Err(GeoJsonError::InvalidCoordinates(format!(
                    "position {:?} has fewer than 2 ordinates",
                    pos
                ))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(LineString::from)
    });

    let exterior = rings.next().ok_or(GeoJsonError::Empty)??;
    let interiors = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
        _ => "Polygon",
    }
}
