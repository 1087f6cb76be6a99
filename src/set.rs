//! Key-only PH-tree.

use crate::error::Result;
use crate::iter::{PhIter, PhQuery};
use crate::{PhTree, PhTreeConfig};

/// A set of `u64` key vectors backed by a [`PhTree<()>`].
#[derive(Clone, Debug)]
pub struct PhTreeSet {
    tree: PhTree<()>,
}

/// Iterator over the keys of a [`PhTreeSet`] range.
pub struct PhSetKeys<I> {
    inner: I,
}

impl<'a, I: Iterator<Item = (Vec<u64>, &'a ())>> Iterator for PhSetKeys<I> {
    type Item = Vec<u64>;

    fn next(&mut self) -> Option<Vec<u64>> {
        self.inner.next().map(|(key, _)| key)
    }
}

impl PhTreeSet {
    /// Create a set with `dims` dimensions of 64 bits each.
    pub fn new(dims: usize) -> Result<Self> {
        Ok(Self {
            tree: PhTree::new(dims)?,
        })
    }

    /// Create a set from an explicit configuration.
    pub fn with_config(config: PhTreeConfig) -> Result<Self> {
        Ok(Self {
            tree: PhTree::with_config(config)?,
        })
    }

    /// Add `key`. Returns true if it was not present.
    pub fn insert(&mut self, key: &[u64]) -> Result<bool> {
        Ok(self.tree.put(key, ())?.is_none())
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &[u64]) -> Result<bool> {
        self.tree.contains(key)
    }

    /// Remove `key`. Returns true if it was present.
    pub fn remove(&mut self, key: &[u64]) -> Result<bool> {
        Ok(self.tree.remove(key)?.is_some())
    }

    /// Move `old_key` to `new_key`. Returns false, leaving the set unchanged,
    /// if `old_key` is absent or `new_key` is present.
    pub fn update(&mut self, old_key: &[u64], new_key: &[u64]) -> Result<bool> {
        Ok(self.tree.update(old_key, new_key)?.is_some())
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Whether the set holds no keys.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Remove all keys.
    pub fn clear(&mut self) {
        self.tree.clear();
    }

    /// All keys in traversal order.
    pub fn iter(&self) -> PhSetKeys<PhIter<'_, ()>> {
        PhSetKeys {
            inner: self.tree.query_extent(),
        }
    }

    /// Keys inside the box `[min, max]`.
    pub fn query(&self, min: &[u64], max: &[u64]) -> Result<PhSetKeys<PhQuery<'_, ()>>> {
        Ok(PhSetKeys {
            inner: self.tree.query(min, max)?,
        })
    }

    /// The `n` nearest keys, see [`PhTree::nearest_neighbour`].
    pub fn nearest_neighbour(&self, n: usize, key: &[u64]) -> Result<Vec<Vec<u64>>> {
        self.tree.nearest_neighbour(n, key)
    }

    /// The underlying tree, for introspection.
    pub fn as_tree(&self) -> &PhTree<()> {
        &self.tree
    }
}
