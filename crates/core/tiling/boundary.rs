//! Deciding which tile owns a point that lies on a shared tile edge.
//!
//! A tile owns a point when the point is in the interior of the tile polygon or
//! on the tile's southwest boundary (west edge plus south edge). This is the
//! predicate strict tile queries evaluate in PostGIS against feature centroids,
//! mirrored here so that the tile index can be checked without a database.

use cjdb_types::polygon::southwest_boundary;
use geo::{Contains, Intersects, LineString, Point, Polygon};

/// A tile with its precomputed southwest boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedTile {
    pub id: String,
    pub polygon: Polygon,
    pub southwest: LineString,
}

impl OwnedTile {
    /// `None` for an empty polygon.
    pub fn new(id: impl Into<String>, polygon: Polygon) -> Option<Self> {
        let southwest = southwest_boundary(&polygon)?;
        Some(Self {
            id: id.into(),
            polygon,
            southwest,
        })
    }

    /// Whether this tile owns `point` in strict mode.
    pub fn owns(&self, point: &Point) -> bool {
        self.polygon.contains(point) || self.southwest.intersects(point)
    }
}

/// IDs of all tiles that own `point`.
///
/// Inside a tiling this is exactly one tile for interior points and for points
/// in the middle of a shared edge. The southwest boundary runs from the
/// northwest corner to the southeast corner inclusive, so a point on a tile
/// corner can have several owners. A point on the north or east edge of the
/// tiled area belongs to no tile.
pub fn owners<'a>(tiles: &'a [OwnedTile], point: &Point) -> Vec<&'a str> {
    tiles
        .iter()
        .filter(|tile| tile.owns(point))
        .map(|tile| tile.id.as_str())
        .collect()
}
