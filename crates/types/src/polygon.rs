//! Polygon helpers for grid cells and extents.
//!
//! Cells are single-ring axis-aligned rectangles. PostGIS receives geometries as
//! EWKT (`SRID=<srid>;POLYGON((...))`), which only ever carries the exterior ring
//! here because neither cells nor extents have holes.

use geo::{Coord, LineString, Polygon};
use std::fmt::Write;

/// Build a rectangle anchored at its top-left corner `(x1, y1)` with its
/// bottom-right corner at `(x2, y2)`.
///
/// The ring is `(x1,y1) (x1,y2) (x2,y2) (x2,y1) (x1,y1)`: down the west edge,
/// along the south edge, up the east edge.
pub fn rectangle(x1: f64, y1: f64, x2: f64, y2: f64) -> Polygon {
    Polygon::new(
        LineString::from(vec![(x1, y1), (x1, y2), (x2, y2), (x2, y1), (x1, y1)]),
        vec![],
    )
}

/// Mean x and y of a ring's vertices, ignoring the closing duplicate.
///
/// # Examples
///
/// ```
/// use cjdb_types::polygon::{mean_coordinate, rectangle};
///
/// let cell = rectangle(0.0, 10.0, 10.0, 0.0);
/// assert_eq!(mean_coordinate(cell.exterior()), (5.0, 5.0));
/// ```
pub fn mean_coordinate(ring: &LineString) -> (f64, f64) {
    let coords = open_ring(ring);
    if coords.is_empty() {
        return (0.0, 0.0);
    }
    let n = coords.len() as f64;
    let (sx, sy) = coords
        .iter()
        .fold((0.0, 0.0), |(sx, sy), c| (sx + c.x, sy + c.y));
    (sx / n, sy / n)
}

/// The south and west edges of a polygon's bounding rectangle as one linestring:
/// northwest corner, southwest corner, southeast corner.
///
/// A tile owns a point on a shared edge when the point lies on this line.
pub fn southwest_boundary(polygon: &Polygon) -> Option<LineString> {
    let bbox = crate::bbox::BoundingBox::of_polygon(polygon)?;
    Some(LineString::from(vec![
        (bbox.min_x(), bbox.max_y()),
        (bbox.min_x(), bbox.min_y()),
        (bbox.max_x(), bbox.min_y()),
    ]))
}

/// Encode the exterior ring of a polygon as EWKT.
///
/// # Examples
///
/// ```
/// use cjdb_types::polygon::{rectangle, to_ewkt};
///
/// let cell = rectangle(0.0, 1.0, 1.0, 0.0);
/// assert_eq!(
///     to_ewkt(&cell, 7415),
///     "SRID=7415;POLYGON((0 1,0 0,1 0,1 1,0 1))"
/// );
/// ```
pub fn to_ewkt(polygon: &Polygon, srid: i32) -> String {
    let mut ewkt = format!("SRID={srid};POLYGON((");
    write_coords(&mut ewkt, polygon.exterior().0.iter());
    ewkt.push_str("))");
    ewkt
}

/// Encode a linestring as EWKT.
pub fn linestring_to_ewkt(line: &LineString, srid: i32) -> String {
    let mut ewkt = format!("SRID={srid};LINESTRING(");
    write_coords(&mut ewkt, line.0.iter());
    ewkt.push(')');
    ewkt
}

fn write_coords<'a>(out: &mut String, coords: impl Iterator<Item = &'a Coord>) {
    for (i, c) in coords.enumerate() {
        if i > 0 {
            out.push(',');
        }
        // Writing into a String cannot fail.
        let _ = write!(out, "{} {}", c.x, c.y);
    }
}

fn open_ring(ring: &LineString) -> &[Coord] {
    let coords = ring.0.as_slice();
    match (coords.first(), coords.last()) {
        (Some(first), Some(last)) if coords.len() > 1 && first == last => {
            &coords[..coords.len() - 1]
        }
        _ => coords,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangle_ring_order() {
        let cell = rectangle(2.0, 8.0, 4.0, 6.0);
        let ring: Vec<(f64, f64)> = cell.exterior().coords().map(|c| (c.x, c.y)).collect();
        assert_eq!(
            ring,
            vec![(2.0, 8.0), (2.0, 6.0), (4.0, 6.0), (4.0, 8.0), (2.0, 8.0)]
        );
    }

    #[test]
    fn test_mean_excludes_closing_vertex() {
        let cell = rectangle(0.0, 4.0, 2.0, 0.0);
        assert_eq!(mean_coordinate(cell.exterior()), (1.0, 2.0));
    }

    #[test]
    fn test_southwest_boundary() {
        let cell = rectangle(0.0, 10.0, 10.0, 0.0);
        let sw = southwest_boundary(&cell).unwrap();
        let pts: Vec<(f64, f64)> = sw.coords().map(|c| (c.x, c.y)).collect();
        assert_eq!(pts, vec![(0.0, 10.0), (0.0, 0.0), (10.0, 0.0)]);
        assert_eq!(
            linestring_to_ewkt(&sw, 28992),
            "SRID=28992;LINESTRING(0 10,0 0,10 0)"
        );
    }

    #[test]
    fn test_ewkt_fractional_coordinates() {
        let cell = rectangle(0.5, 1.25, 1.5, 0.25);
        assert_eq!(
            to_ewkt(&cell, 7415),
            "SRID=7415;POLYGON((0.5 1.25,0.5 0.25,1.5 0.25,1.5 1.25,0.5 1.25))"
        );
    }
}
