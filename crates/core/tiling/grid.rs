//! Regular rectangular grids over a bounding box.
//!
//! [`build_grid`] pads the grid so it forms the full leaf level of a quadtree and
//! keys every cell by the Morton code of its center. [`build_plain_grid`] covers
//! the box with as few cells as needed and does not key them.

use std::collections::BTreeMap;
use std::collections::btree_map;

use cjdb_types::BoundingBox;
use cjdb_types::polygon::{mean_coordinate, rectangle};
use geo::Polygon;

use super::morton::morton_code;
use crate::error::{CjdbError, Result};

/// Cells of a quadtree leaf level, ordered by their Morton key.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    cells: BTreeMap<u64, Polygon>,
    side: usize,
}

impl Grid {
    /// Number of cells, always a power of 4.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of cells along one axis.
    pub fn side(&self) -> usize {
        self.side
    }

    pub fn get(&self, key: u64) -> Option<&Polygon> {
        self.cells.get(&key)
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.cells.keys().copied()
    }

    /// Cells in ascending key order.
    pub fn iter(&self) -> btree_map::Iter<'_, u64, Polygon> {
        self.cells.iter()
    }
}

impl<'a> IntoIterator for &'a Grid {
    type Item = (&'a u64, &'a Polygon);
    type IntoIter = btree_map::Iter<'a, u64, Polygon>;

    fn into_iter(self) -> Self::IntoIter {
        self.cells.iter()
    }
}

fn check_spacing(cell_width: f64, cell_height: f64) -> Result<()> {
    for (name, value) in [("width", cell_width), ("height", cell_height)] {
        if !value.is_finite() || value <= 0.0 {
            return Err(CjdbError::InvalidInput(format!(
                "cell {name} must be a positive number, got {value}"
            )));
        }
    }
    Ok(())
}

fn cells_along(extent: f64, spacing: f64) -> usize {
    ((extent.ceil() / spacing).ceil() as usize).max(1)
}

fn round_up_to_multiple_of_4(n: usize) -> usize {
    n.div_ceil(4) * 4
}

/// Exponent of the smallest power of 4 that is at least `n`.
fn log4_ceil(n: usize) -> u32 {
    let mut exponent = 0;
    let mut power: usize = 1;
    while power < n {
        power = power.saturating_mul(4);
        exponent += 1;
    }
    exponent
}

/// Build the full quadtree leaf grid that covers `bbox`.
///
/// Cells are `cell_width` by `cell_height` and anchored at the top-left corner
/// `(min_x, max_y)` of the box, so the grid grows right and down and may reach
/// well beyond the box. The number of cells per axis is rounded up to a multiple
/// of 4, equalized, and then raised until the cell count is a power of 4.
///
/// # Errors
///
/// [`CjdbError::InvalidInput`] for non-positive cell sizes or coordinates that
/// cannot be Morton coded. [`CjdbError::QuadtreeInvariant`] when two cell
/// centers quantize to the same key, which happens with cells smaller than
/// the key quantization.
///
/// # Examples
///
/// ```
/// use cjdb::tiling::grid::build_grid;
/// use cjdb_types::BoundingBox;
///
/// let bbox = BoundingBox::new(0.0, 0.0, 100.0, 60.0);
/// let grid = build_grid(&bbox, 10.0, 10.0)?;
/// assert_eq!(grid.len(), 256);
/// assert_eq!(grid.side(), 16);
/// # Ok::<(), cjdb::CjdbError>(())
/// ```
pub fn build_grid(bbox: &BoundingBox, cell_width: f64, cell_height: f64) -> Result<Grid> {
    check_spacing(cell_width, cell_height)?;

    let mut cols = round_up_to_multiple_of_4(cells_along(bbox.width(), cell_width));
    let mut rows = round_up_to_multiple_of_4(cells_along(bbox.height(), cell_height));
    if rows < cols {
        rows = cols;
    } else if cols < rows {
        cols = rows;
    }

    let exponent = log4_ceil(rows * cols);
    let side = 1usize << exponent;
    log::debug!(
        "Grid of {}x{} cells expanded to {side}x{side} ({} cells) over {bbox}",
        cols,
        rows,
        side * side
    );

    let mut cells = BTreeMap::new();
    for col in 0..side {
        let x1 = bbox.min_x() + col as f64 * cell_width;
        let x2 = x1 + cell_width;
        for row in 0..side {
            let y1 = bbox.max_y() - row as f64 * cell_height;
            let y2 = y1 - cell_height;

            let cell = rectangle(x1, y1, x2, y2);
            let (cx, cy) = mean_coordinate(cell.exterior());
            let key = morton_code(cx, cy)?;
            if cells.insert(key, cell).is_some() {
                return Err(CjdbError::QuadtreeInvariant(format!(
                    "cells at column {col} and row {row} share the Morton key {key}, \
                     the cell size is too small"
                )));
            }
        }
    }

    Ok(Grid { cells, side })
}

/// Cover `bbox` with cells column by column, without padding or keys.
///
/// Columns run left to right from `min_x`, and each column runs top to bottom
/// from `max_y`.
pub fn build_plain_grid(
    bbox: &BoundingBox,
    cell_width: f64,
    cell_height: f64,
) -> Result<Vec<Polygon>> {
    check_spacing(cell_width, cell_height)?;

    let cols = (bbox.width().ceil() / cell_width).ceil() as usize;
    let rows = (bbox.height().ceil() / cell_height).ceil() as usize;

    let mut cells = Vec::with_capacity(cols * rows);
    for col in 0..cols {
        let x1 = bbox.min_x() + col as f64 * cell_width;
        let x2 = x1 + cell_width;
        for row in 0..rows {
            let y1 = bbox.max_y() - row as f64 * cell_height;
            cells.push(rectangle(x1, y1, x2, y1 - cell_height));
        }
    }
    Ok(cells)
}
