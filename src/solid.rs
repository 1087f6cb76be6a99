//! Boxes ("solids") stored as points of twice the dimensionality.
//!
//! A box with corners `lower` and `upper` in `D` dimensions is the `2D` point
//! `lower ++ upper`. Containment and intersection queries against a query box
//! then become plain range queries on the backing tree.

use crate::error::{PhError, Result};
use crate::iter::{PhIter, PhQuery};
use crate::node::low_mask;
use crate::{PhTree, PhTreeConfig};

/// A map from axis-aligned boxes to values.
#[derive(Clone, Debug)]
pub struct PhTreeSolid<V> {
    tree: PhTree<V>,
    dims: usize,
}

/// Which stored boxes a [`PhSolidQuery`] reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolidMode {
    /// Boxes lying entirely inside the query box.
    Include,
    /// Boxes sharing at least one point with the query box.
    Intersect,
}

/// A stored box with its value.
#[derive(Clone, Debug, PartialEq)]
pub struct PhSolidEntry<'a, V> {
    /// Lower corner.
    pub lower: Vec<u64>,
    /// Upper corner.
    pub upper: Vec<u64>,
    /// Stored value.
    pub value: &'a V,
}

fn split_entry<'a, V>(dims: usize, key: Vec<u64>, value: &'a V) -> PhSolidEntry<'a, V> {
    let mut lower = key;
    let upper = lower.split_off(dims);
    PhSolidEntry { lower, upper, value }
}

impl<V> PhTreeSolid<V> {
    /// Box map over `dims` dimensions with 64-bit coordinates.
    pub fn new(dims: usize) -> Result<Self> {
        Self::from_tree(PhTree::new(dims * 2)?)
    }

    /// Box map over `dims` dimensions with `depth` bits per coordinate.
    pub fn with_depth(dims: usize, depth: u32) -> Result<Self> {
        Self::from_tree(PhTree::with_config(PhTreeConfig::new(dims * 2).with_depth(depth))?)
    }

    /// Wrap an empty or box-encoded tree. Its dimensionality must be even.
    pub fn from_tree(tree: PhTree<V>) -> Result<Self> {
        if tree.dims() % 2 != 0 {
            return Err(PhError::InvalidConfig(format!(
                "box trees need an even number of dimensions, got {}",
                tree.dims()
            )));
        }
        let dims = tree.dims() / 2;
        Ok(Self { tree, dims })
    }

    /// Dimensions of a single box corner.
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Number of stored boxes.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Whether no box is stored.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Remove all boxes.
    pub fn clear(&mut self) {
        self.tree.clear();
    }

    fn encode(&self, lower: &[u64], upper: &[u64]) -> Result<Vec<u64>> {
        crate::check_dims(self.dims, lower)?;
        crate::check_dims(self.dims, upper)?;
        let mut key = Vec::with_capacity(self.dims * 2);
        key.extend_from_slice(lower);
        key.extend_from_slice(upper);
        Ok(key)
    }

    /// Store `value` under the box, returning the previous value.
    pub fn put(&mut self, lower: &[u64], upper: &[u64], value: V) -> Result<Option<V>> {
        let key = self.encode(lower, upper)?;
        self.tree.put(&key, value)
    }

    /// Value stored under the box.
    pub fn get(&self, lower: &[u64], upper: &[u64]) -> Result<Option<&V>> {
        self.tree.get(&self.encode(lower, upper)?)
    }

    /// Whether the exact box is stored.
    pub fn contains(&self, lower: &[u64], upper: &[u64]) -> Result<bool> {
        self.tree.contains(&self.encode(lower, upper)?)
    }

    /// Remove the box, returning its value.
    pub fn remove(&mut self, lower: &[u64], upper: &[u64]) -> Result<Option<V>> {
        let key = self.encode(lower, upper)?;
        self.tree.remove(&key)
    }

    /// Move a value to a different box, see [`PhTree::update`].
    pub fn update(
        &mut self,
        old_lower: &[u64],
        old_upper: &[u64],
        new_lower: &[u64],
        new_upper: &[u64],
    ) -> Result<Option<&V>> {
        let old = self.encode(old_lower, old_upper)?;
        let new = self.encode(new_lower, new_upper)?;
        self.tree.update(&old, &new)
    }

    /// All stored boxes.
    pub fn iter(&self) -> PhSolidIter<'_, V> {
        PhSolidIter {
            inner: self.tree.query_extent(),
            dims: self.dims,
        }
    }

    /// Boxes lying entirely inside `[lower, upper]`.
    pub fn query_include(&self, lower: &[u64], upper: &[u64]) -> Result<PhSolidQuery<'_, V>> {
        self.query(SolidMode::Include, lower, upper)
    }

    /// Boxes intersecting `[lower, upper]`.
    pub fn query_intersect(&self, lower: &[u64], upper: &[u64]) -> Result<PhSolidQuery<'_, V>> {
        self.query(SolidMode::Intersect, lower, upper)
    }

    fn query(&self, mode: SolidMode, lower: &[u64], upper: &[u64]) -> Result<PhSolidQuery<'_, V>> {
        let max_coord = low_mask(self.tree.depth());
        let (min, max) = point_box(mode, self.dims, max_coord, lower, upper)?;
        Ok(PhSolidQuery {
            inner: self.tree.query(&min, &max)?,
            dims: self.dims,
            mode,
            max_coord,
        })
    }

    /// The backing point tree.
    pub fn as_tree(&self) -> &PhTree<V> {
        &self.tree
    }
}

/// Range on the backing tree that selects boxes for `mode`.
fn point_box(
    mode: SolidMode,
    dims: usize,
    max_coord: u64,
    lower: &[u64],
    upper: &[u64],
) -> Result<(Vec<u64>, Vec<u64>)> {
    crate::check_dims(dims, lower)?;
    crate::check_dims(dims, upper)?;
    let mut min = Vec::with_capacity(dims * 2);
    let mut max = Vec::with_capacity(dims * 2);
    match mode {
        SolidMode::Include => {
            min.extend_from_slice(lower);
            min.extend_from_slice(lower);
            max.extend_from_slice(upper);
            max.extend_from_slice(upper);
        }
        SolidMode::Intersect => {
            min.resize(dims, 0);
            min.extend_from_slice(lower);
            max.extend_from_slice(upper);
            max.resize(dims * 2, max_coord);
        }
    }
    Ok((min, max))
}

/// Iterator over every box of a [`PhTreeSolid`].
pub struct PhSolidIter<'a, V> {
    inner: PhIter<'a, V>,
    dims: usize,
}

impl<'a, V> Iterator for PhSolidIter<'a, V> {
    type Item = PhSolidEntry<'a, V>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = self.inner.next()?;
        Some(split_entry(self.dims, key, value))
    }
}

/// Resettable containment or intersection query over a [`PhTreeSolid`].
pub struct PhSolidQuery<'a, V> {
    inner: PhQuery<'a, V>,
    dims: usize,
    mode: SolidMode,
    max_coord: u64,
}

impl<V> PhSolidQuery<'_, V> {
    /// Restart with a new query box, keeping the mode.
    pub fn reset(&mut self, lower: &[u64], upper: &[u64]) -> Result<()> {
        let (min, max) = point_box(self.mode, self.dims, self.max_coord, lower, upper)?;
        self.inner.reset(&min, &max)
    }
}

impl<'a, V> Iterator for PhSolidQuery<'a, V> {
    type Item = PhSolidEntry<'a, V>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = self.inner.next()?;
        Some(split_entry(self.dims, key, value))
    }
}
