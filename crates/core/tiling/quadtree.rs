//! Tile IDs for the leaves of a full quadtree.
//!
//! A leaf at position `i` in Morton order gets one symbol per level, most
//! significant level first. The symbol for level `j` is picked from that level's
//! alphabet by `(i mod 4^j) / 4^(j-1)`, which is the quadrant the leaf falls in
//! at that level.

use std::collections::HashMap;

use super::grid::Grid;
use crate::error::{CjdbError, Result};

/// Symbols per level, indexed by `level - 1`. Deeper levels start over at the
/// first entry.
pub const LEVEL_ALPHABETS: [[char; 4]; 5] = [
    ['1', '2', '3', '4'],
    ['a', 'b', 'c', 'd'],
    ['e', 'f', 'g', 'i'],
    ['1', '2', '3', '4'],
    ['1', '2', '3', '4'],
];

/// Tile IDs of a grid, kept in the Morton order of their cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuadtreeIndex {
    tiles: Vec<(String, u64)>,
    by_id: HashMap<String, usize>,
    levels: u32,
}

impl QuadtreeIndex {
    /// Number of levels, which is also the length of every tile ID.
    pub fn levels(&self) -> u32 {
        self.levels
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Morton key of the cell a tile ID was given to.
    pub fn key(&self, tile_id: &str) -> Option<u64> {
        self.by_id.get(tile_id).map(|&i| self.tiles[i].1)
    }

    pub fn contains(&self, tile_id: &str) -> bool {
        self.by_id.contains_key(tile_id)
    }

    /// `(tile ID, Morton key)` pairs in Morton order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.tiles.iter().map(|(id, key)| (id.as_str(), *key))
    }
}

/// The tile ID of the leaf at `position` in a quadtree with `levels` levels.
///
/// # Examples
///
/// ```
/// use cjdb::tiling::quadtree::tile_id;
///
/// assert_eq!(tile_id(0, 3), "ea1");
/// assert_eq!(tile_id(63, 3), "id4");
/// ```
pub fn tile_id(position: usize, levels: u32) -> String {
    (1..=levels)
        .rev()
        .map(|j| {
            let alphabet = &LEVEL_ALPHABETS[(j as usize - 1) % LEVEL_ALPHABETS.len()];
            let span = 4usize.pow(j - 1);
            let quadrant = (position % (span * 4)) / span;
            alphabet[quadrant]
        })
        .collect()
}

fn exact_log4(n: usize) -> Option<u32> {
    if n == 0 || !n.is_power_of_two() || n.trailing_zeros() % 2 != 0 {
        return None;
    }
    Some(n.trailing_zeros() / 2)
}

/// Label every cell of `grid` with its tile ID.
///
/// # Errors
///
/// [`CjdbError::QuadtreeInvariant`] when the grid does not hold `4^L` cells or
/// when the same ID comes up twice.
pub fn label(grid: &Grid) -> Result<QuadtreeIndex> {
    let levels = exact_log4(grid.len()).ok_or_else(|| {
        CjdbError::QuadtreeInvariant(format!(
            "There are {} cells in the grid. The grid must contain 4^L cells to \
             form a full quadtree.",
            grid.len()
        ))
    })?;
    log::debug!("Nr. levels={}, cells={}", levels, grid.len());
    label_keys(grid.keys(), levels)
}

fn label_keys(keys: impl Iterator<Item = u64>, levels: u32) -> Result<QuadtreeIndex> {
    let mut index = QuadtreeIndex {
        levels,
        ..Default::default()
    };
    for (position, key) in keys.enumerate() {
        let id = tile_id(position, levels);
        if index.by_id.contains_key(&id) {
            return Err(CjdbError::QuadtreeInvariant(format!(
                "ID {id} already exists in the quadtree"
            )));
        }
        index.by_id.insert(id.clone(), index.tiles.len());
        index.tiles.push((id, key));
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::grid::build_grid;
    use cjdb_types::BoundingBox;
    use std::collections::HashSet;

    #[test]
    fn test_exact_log4() {
        assert_eq!(exact_log4(1), Some(0));
        assert_eq!(exact_log4(4), Some(1));
        assert_eq!(exact_log4(4096), Some(6));
        assert_eq!(exact_log4(0), None);
        assert_eq!(exact_log4(2), None);
        assert_eq!(exact_log4(8), None);
        assert_eq!(exact_log4(12), None);
    }

    #[test]
    fn test_single_level_uses_digits() {
        let ids: Vec<String> = (0..4).map(|i| tile_id(i, 1)).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn test_three_level_ids() {
        // Known tiles of a three level index
        assert_eq!(tile_id(38, 3), "gb3");
        assert_eq!(tile_id(37, 3), "gb2");
        assert_eq!(tile_id(56, 3), "ic1");
        assert_eq!(tile_id(15, 3), "ed4");
    }

    #[test]
    fn test_deep_levels_reuse_alphabets() {
        assert_eq!(tile_id(0, 7), "a111ea1");
        assert_eq!(tile_id(4usize.pow(7) - 1, 7), "d444id4");
    }

    #[test]
    fn test_labels_are_unique_and_sized() {
        let bbox = BoundingBox::new(0.0, 0.0, 900.0, 700.0);
        let grid = build_grid(&bbox, 10.0, 10.0).unwrap();
        let index = label(&grid).unwrap();
        assert_eq!(index.len(), grid.len());
        assert_eq!(index.levels(), 7);

        let ids: HashSet<&str> = index.iter().map(|(id, _)| id).collect();
        assert_eq!(ids.len(), grid.len());
        assert!(index.iter().all(|(id, _)| id.chars().count() == 7));
    }

    #[test]
    fn test_labels_follow_key_order() {
        let bbox = BoundingBox::new(0.0, 0.0, 40.0, 40.0);
        let grid = build_grid(&bbox, 10.0, 10.0).unwrap();
        let index = label(&grid).unwrap();
        let keys: Vec<u64> = index.iter().map(|(_, key)| key).collect();
        assert_eq!(keys, grid.keys().collect::<Vec<_>>());
        let first = grid.keys().next().unwrap();
        assert_eq!(index.key("a1"), Some(first));
        assert!(index.contains("d4"));
        assert!(!index.contains("e1"));
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        assert_eq!(label_keys(0..4u64, 1).unwrap().len(), 4);
        // A fifth leaf on a single level wraps around to "1" again
        assert!(matches!(
            label_keys(0..5u64, 1),
            Err(CjdbError::QuadtreeInvariant(_))
        ));
    }
}
