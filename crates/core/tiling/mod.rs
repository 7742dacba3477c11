//! Quadtree tiling of an extent.
//!
//! [`grid::build_grid`] lays out the leaf cells, [`quadtree::label`] names them,
//! and [`boundary`] settles which tile owns a point on a shared edge.

pub mod boundary;
pub mod grid;
pub mod morton;
pub mod quadtree;

pub use grid::{Grid, build_grid, build_plain_grid};
pub use morton::{deinterleave, interleave, morton_code, rev_morton_code};
pub use quadtree::{QuadtreeIndex, label};
