use geo::{BoundingRect, Polygon, Rect};
use serde::{Deserialize, Serialize};

/// A 2D axis-aligned bounding box in the source coordinate reference system.
///
/// This is a wrapper around `geo::Rect`, so `min_x <= max_x` and `min_y <= max_y`
/// always hold regardless of the order the corners were given in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// The underlying geometric rectangle
    pub rect: Rect,
}

impl BoundingBox {
    /// Create a new bounding box from minimum and maximum coordinates.
    ///
    /// # Examples
    ///
    /// ```
    /// use cjdb_types::bbox::BoundingBox;
    ///
    /// let bbox = BoundingBox::new(192837.734, 465644.179, 193701.818, 466898.821);
    /// assert!(bbox.width() > 864.0);
    /// ```
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            rect: Rect::new(
                geo::coord! { x: min_x, y: min_y },
                geo::coord! { x: max_x, y: max_y },
            ),
        }
    }

    /// Create a bounding box from a `geo::Rect`.
    pub fn from_rect(rect: Rect) -> Self {
        Self { rect }
    }

    /// Compute the bounding box of every ring of a polygon.
    ///
    /// Returns `None` for an empty polygon. A closing duplicate vertex does not
    /// change the result.
    ///
    /// # Examples
    ///
    /// ```
    /// use cjdb_types::bbox::BoundingBox;
    /// use geo::{LineString, Polygon};
    ///
    /// let poly = Polygon::new(
    ///     LineString::from(vec![(1.0, 4.0), (3.0, 1.0), (6.0, 2.0), (6.0, 6.0), (2.0, 7.0)]),
    ///     vec![],
    /// );
    /// let bbox = BoundingBox::of_polygon(&poly).unwrap();
    /// assert_eq!(bbox.as_tuple(), (1.0, 1.0, 6.0, 7.0));
    /// ```
    pub fn of_polygon(polygon: &Polygon) -> Option<Self> {
        polygon.bounding_rect().map(Self::from_rect)
    }

    pub fn min_x(&self) -> f64 {
        self.rect.min().x
    }

    pub fn min_y(&self) -> f64 {
        self.rect.min().y
    }

    pub fn max_x(&self) -> f64 {
        self.rect.max().x
    }

    pub fn max_y(&self) -> f64 {
        self.rect.max().y
    }

    /// Get the width of the bounding box.
    pub fn width(&self) -> f64 {
        self.max_x() - self.min_x()
    }

    /// Get the height of the bounding box.
    pub fn height(&self) -> f64 {
        self.max_y() - self.min_y()
    }

    /// The box as `(min_x, min_y, max_x, max_y)`.
    pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
        (self.min_x(), self.min_y(), self.max_x(), self.max_y())
    }

    /// Check if this bounding box intersects with another.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !(self.max_x() < other.min_x()
            || self.min_x() > other.max_x()
            || self.max_y() < other.min_y()
            || self.min_y() > other.max_y())
    }
}

impl From<(f64, f64, f64, f64)> for BoundingBox {
    fn from((min_x, min_y, max_x, max_y): (f64, f64, f64, f64)) -> Self {
        Self::new(min_x, min_y, max_x, max_y)
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.min_x(),
            self.min_y(),
            self.max_x(),
            self.max_y()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::LineString;

    #[test]
    fn test_corners_are_normalized() {
        let bbox = BoundingBox::new(10.0, 20.0, 0.0, 5.0);
        assert_eq!(bbox.as_tuple(), (0.0, 5.0, 10.0, 20.0));
    }

    #[test]
    fn test_bbox_of_polygon_with_closing_vertex() {
        let poly = Polygon::new(
            LineString::from(vec![
                (1.0, 4.0),
                (3.0, 1.0),
                (6.0, 2.0),
                (6.0, 6.0),
                (2.0, 7.0),
                (1.0, 4.0),
            ]),
            vec![],
        );
        let bbox = BoundingBox::of_polygon(&poly).unwrap();
        assert_eq!(bbox.as_tuple(), (1.0, 1.0, 6.0, 7.0));
    }

    #[test]
    fn test_bbox_includes_interior_rings() {
        let poly = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)]),
            vec![LineString::from(vec![(1.0, 1.0), (2.0, 1.0), (2.0, 2.0)])],
        );
        let bbox = BoundingBox::of_polygon(&poly).unwrap();
        assert_eq!(bbox.as_tuple(), (0.0, 0.0, 4.0, 4.0));
    }

    #[test]
    fn test_intersects() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(10.0, 10.0, 20.0, 20.0);
        let c = BoundingBox::new(10.1, 0.0, 20.0, 5.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }
}
