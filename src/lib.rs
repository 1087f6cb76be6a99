//! # phtree
//!
//! A multi-dimensional index based on the PH-tree (Patricia/Hypercube tree).
//!
//! Keys are vectors of `D` unsigned integers of `W` bits each. The tree
//! interleaves the bits of all dimensions: every node consumes one bit of each
//! dimension and addresses its entries by the resulting `D`-bit hypercube
//! position. Runs of levels with a single branch are collapsed into a node
//! infix, so the tree never holds chains of one-child nodes.
//!
//! Based on "The PH-Tree: A Space-Efficient Storage Structure and
//! Multi-Dimensional Index" (SIGMOD 2014, Zäschke, Zimmerli, Norrie).
//!
//! ## Example
//!
//! ```rust
//! use phtree::PhTree;
//!
//! let mut tree: PhTree<&str> = PhTree::new(2).unwrap();
//! tree.put(&[1, 1], "a").unwrap();
//! tree.put(&[5, 5], "b").unwrap();
//! tree.put(&[1, 5], "c").unwrap();
//!
//! assert_eq!(tree.get(&[5, 5]).unwrap(), Some(&"b"));
//!
//! let hits: Vec<_> = tree.query(&[0, 0], &[4, 4]).unwrap().collect();
//! assert_eq!(hits, vec![(vec![1, 1], &"a")]);
//! ```
//!
//! Signed and floating point coordinates are supported through the
//! order-preserving codec in [`key`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod iter;
pub mod key;
pub mod mapper;
mod nn;
mod node;
mod set;
mod solid;
mod stats;
mod tracing_helpers;

pub use config::{PhTreeConfig, DEFAULT_MAX_DENSE_DIMS, MAX_DEPTH, MAX_DIMS};
pub use error::{PhError, Result};
pub use iter::{PhEntry, PhIter, PhQuery};
pub use nn::{PhDimFilter, PhDistance, PhDistanceF, PhDistanceL};
pub use set::{PhSetKeys, PhTreeSet};
pub use solid::{PhSolidEntry, PhSolidIter, PhSolidQuery, PhTreeSolid, SolidMode};
pub use stats::{PhTreeQuality, PhTreeStats};

use crate::iter::Traversal;
use crate::node::{
    hc_pos, highest_diff_bit, postfix_matches, postfix_of, prefix_of, KeyBuf, Node,
    NodeArena, NodeId, Slot,
};
use crate::tracing_helpers::{debug_log, trace_log};

#[inline]
pub(crate) fn check_dims(dims: usize, key: &[u64]) -> Result<()> {
    if key.len() != dims {
        return Err(PhError::DimensionMismatch {
            expected: dims,
            actual: key.len(),
        });
    }
    Ok(())
}

/// What a descent found at the slot addressed by the key.
enum Descent {
    Empty,
    Match,
    /// A terminal with a different key; carries that key.
    Diverge(KeyBuf),
    /// A child whose prefix agrees with the key.
    Enter(NodeId),
    /// A child whose infix disagrees with the key.
    SplitInfix(NodeId),
}

// =============================================================================
// PhTree
// =============================================================================

/// A k-dimensional PH-tree mapping `u64` key vectors to values.
///
/// The tree assumes a single writer. Iterators borrow it immutably.
pub struct PhTree<V> {
    config: PhTreeConfig,
    nodes: NodeArena<V>,
    root: Option<NodeId>,
    size: usize,
}

impl<V> PhTree<V> {
    /// Create a tree with `dims` dimensions of 64 bits each.
    pub fn new(dims: usize) -> Result<Self> {
        Self::with_config(PhTreeConfig::new(dims))
    }

    /// Create a tree from an explicit configuration.
    pub fn with_config(config: PhTreeConfig) -> Result<Self> {
        config.validate()?;
        debug_log!(dims = config.dims, depth = config.depth, "created PH-tree");
        Ok(Self {
            config,
            nodes: NodeArena::new(),
            root: None,
            size: 0,
        })
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether the tree holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of live nodes, including the root.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of dimensions.
    #[inline]
    pub fn dims(&self) -> usize {
        self.config.dims
    }

    /// Bits per dimension.
    #[inline]
    pub fn depth(&self) -> u32 {
        self.config.depth
    }

    /// Configuration the tree was created with.
    pub fn config(&self) -> &PhTreeConfig {
        &self.config
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        debug_log!(size = self.size, nodes = self.nodes.len(), "clearing PH-tree");
        self.nodes.clear();
        self.root = None;
        self.size = 0;
    }

    fn check_key(&self, key: &[u64]) -> Result<()> {
        check_dims(self.config.dims, key)?;
        let depth = self.config.depth;
        if depth < 64 {
            if let Some((dim, &value)) = key.iter().enumerate().find(|&(_, &k)| k >> depth != 0) {
                return Err(PhError::KeyOutOfRange { dim, value, depth });
            }
        }
        Ok(())
    }

    fn check_box(&self, min: &[u64], max: &[u64]) -> Result<()> {
        check_dims(self.config.dims, min)?;
        check_dims(self.config.dims, max)
    }

    #[inline]
    fn root_post_len(&self) -> u32 {
        self.config.depth - 1
    }

    /// Locate the terminal slot holding `key`.
    fn find(&self, key: &[u64]) -> Option<(NodeId, u64)> {
        let mut id = self.root?;
        loop {
            let node = self.nodes.get(id);
            let pos = hc_pos(key, node.post_len);
            match node.get(pos)? {
                Slot::Child(child) => {
                    if !self.nodes.get(*child).infix_matches(key) {
                        return None;
                    }
                    id = *child;
                }
                Slot::Terminal { postfix, .. } => {
                    return postfix_matches(postfix, key, node.post_len).then_some((id, pos));
                }
            }
        }
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &[u64]) -> Result<Option<&V>> {
        self.check_key(key)?;
        Ok(self.find(key).and_then(|(id, pos)| match self.nodes.get(id).get(pos) {
            Some(Slot::Terminal { value, .. }) => Some(value),
            _ => None,
        }))
    }

    /// Mutable access to the value stored under `key`.
    pub fn get_mut(&mut self, key: &[u64]) -> Result<Option<&mut V>> {
        self.check_key(key)?;
        let Some((id, pos)) = self.find(key) else {
            return Ok(None);
        };
        Ok(match self.nodes.get_mut(id).get_mut(pos) {
            Some(Slot::Terminal { value, .. }) => Some(value),
            _ => None,
        })
    }

    /// Whether an entry is stored under `key`.
    pub fn contains(&self, key: &[u64]) -> Result<bool> {
        self.check_key(key)?;
        Ok(self.find(key).is_some())
    }

    /// Insert `value` under `key`, returning the previous value if the key existed.
    pub fn put(&mut self, key: &[u64], value: V) -> Result<Option<V>> {
        self.check_key(key)?;
        let dense = self.config.dense_allowed();

        let Some(root) = self.root else {
            let post_len = self.root_post_len();
            let mut node = Node::new(post_len, 0, KeyBuf::from_elem(0, self.config.dims));
            node.insert(
                hc_pos(key, post_len),
                Slot::Terminal {
                    postfix: postfix_of(key, post_len),
                    value,
                },
                dense,
            );
            self.root = Some(self.nodes.alloc(node));
            self.size = 1;
            return Ok(None);
        };

        let mut id = root;
        loop {
            let node = self.nodes.get(id);
            let post_len = node.post_len;
            let pos = hc_pos(key, post_len);
            let descent = match node.get(pos) {
                None => Descent::Empty,
                Some(Slot::Terminal { postfix, .. }) => {
                    if postfix_matches(postfix, key, post_len) {
                        Descent::Match
                    } else {
                        let mut existing = KeyBuf::from_elem(0, key.len());
                        node.write_key(pos, postfix, &mut existing);
                        Descent::Diverge(existing)
                    }
                }
                Some(Slot::Child(child)) => {
                    if self.nodes.get(*child).infix_matches(key) {
                        Descent::Enter(*child)
                    } else {
                        Descent::SplitInfix(*child)
                    }
                }
            };

            match descent {
                Descent::Enter(child) => {
                    id = child;
                    continue;
                }
                Descent::Empty => {
                    let slot = Slot::Terminal {
                        postfix: postfix_of(key, post_len),
                        value,
                    };
                    self.nodes.get_mut(id).insert(pos, slot, dense);
                }
                Descent::Match => {
                    let old = match self.nodes.get_mut(id).get_mut(pos) {
                        Some(Slot::Terminal { value: old, .. }) => std::mem::replace(old, value),
                        _ => unreachable!("terminal slot changed during put"),
                    };
                    return Ok(Some(old));
                }
                Descent::Diverge(existing) => {
                    self.split_terminal(id, pos, &existing, key, value);
                }
                Descent::SplitInfix(child) => {
                    self.split_infix(id, pos, child, key, value);
                }
            }
            self.size += 1;
            debug_assert!(self.find(key).is_some(), "key missing right after insert");
            return Ok(None);
        }
    }

    /// Replace the terminal at `(parent, pos)` by a node holding it and `key`.
    fn split_terminal(&mut self, parent: NodeId, pos: u64, existing: &[u64], key: &[u64], value: V) {
        let parent_post_len = self.nodes.get(parent).post_len;
        let diff = match highest_diff_bit(existing, key) {
            Some(bit) => bit,
            None => unreachable!("diverging keys are equal"),
        };
        debug_assert!(diff < parent_post_len);
        trace_log!(parent_post_len, diff, "splitting terminal");

        let dense = self.config.dense_allowed();
        let mut sub = Node::new(diff, parent_post_len - 1 - diff, prefix_of(key, diff));
        sub.insert(
            hc_pos(key, diff),
            Slot::Terminal {
                postfix: postfix_of(key, diff),
                value,
            },
            dense,
        );
        let sub_id = self.nodes.alloc(sub);
        let old = self.nodes.get_mut(parent).replace(pos, Slot::Child(sub_id));
        let Slot::Terminal { value: old_value, .. } = old else {
            unreachable!("split_terminal on a child slot");
        };
        self.nodes.get_mut(sub_id).insert(
            hc_pos(existing, diff),
            Slot::Terminal {
                postfix: postfix_of(existing, diff),
                value: old_value,
            },
            dense,
        );
    }

    /// Insert a node between `(parent, pos)` and `child` where `key` leaves the
    /// child's infix.
    fn split_infix(&mut self, parent: NodeId, pos: u64, child: NodeId, key: &[u64], value: V) {
        let parent_post_len = self.nodes.get(parent).post_len;
        let (child_post_len, child_prefix) = {
            let c = self.nodes.get(child);
            (c.post_len, c.prefix.clone())
        };
        let diff = match highest_diff_bit(&child_prefix, key) {
            Some(bit) => bit,
            None => unreachable!("infix mismatch without differing bits"),
        };
        debug_assert!(diff > child_post_len && diff < parent_post_len);
        trace_log!(parent_post_len, child_post_len, diff, "splitting infix");

        self.nodes.get_mut(child).infix_len = diff - 1 - child_post_len;

        let dense = self.config.dense_allowed();
        let mut mid = Node::new(diff, parent_post_len - 1 - diff, prefix_of(key, diff));
        mid.insert(hc_pos(&child_prefix, diff), Slot::Child(child), dense);
        mid.insert(
            hc_pos(key, diff),
            Slot::Terminal {
                postfix: postfix_of(key, diff),
                value,
            },
            dense,
        );
        let mid_id = self.nodes.alloc(mid);
        self.nodes.get_mut(parent).replace(pos, Slot::Child(mid_id));
    }

    /// Remove `key`, returning its value if it was present.
    pub fn remove(&mut self, key: &[u64]) -> Result<Option<V>> {
        self.check_key(key)?;
        let Some(mut id) = self.root else {
            return Ok(None);
        };
        let mut parent: Option<(NodeId, u64)> = None;
        let pos = loop {
            let node = self.nodes.get(id);
            let pos = hc_pos(key, node.post_len);
            match node.get(pos) {
                None => return Ok(None),
                Some(Slot::Child(child)) => {
                    if !self.nodes.get(*child).infix_matches(key) {
                        return Ok(None);
                    }
                    parent = Some((id, pos));
                    id = *child;
                }
                Some(Slot::Terminal { postfix, .. }) => {
                    if !postfix_matches(postfix, key, node.post_len) {
                        return Ok(None);
                    }
                    break pos;
                }
            }
        };

        let node = self.nodes.get_mut(id);
        let value = match node.take(pos) {
            Some(Slot::Terminal { value, .. }) => value,
            _ => unreachable!("terminal slot changed during remove"),
        };
        let remaining = node.len();
        self.size -= 1;

        match parent {
            None => {
                if remaining == 0 {
                    self.nodes.free(id);
                    self.root = None;
                }
            }
            Some((parent_id, parent_pos)) => {
                if remaining == 1 {
                    self.merge_into_parent(parent_id, parent_pos, id);
                }
            }
        }
        Ok(Some(value))
    }

    /// Collapse a node left with a single slot into its parent.
    fn merge_into_parent(&mut self, parent: NodeId, parent_pos: u64, id: NodeId) {
        let mut node = self.nodes.free(id);
        let (pos, slot) = node.take_single();
        let parent_post_len = self.nodes.get(parent).post_len;
        trace_log!(parent_post_len, post_len = node.post_len, "merging node into parent");

        let replacement = match slot {
            Slot::Terminal { postfix, value } => {
                let mut full = KeyBuf::from_elem(0, node.dims());
                node.write_key(pos, &postfix, &mut full);
                Slot::Terminal {
                    postfix: postfix_of(&full, parent_post_len),
                    value,
                }
            }
            Slot::Child(child) => {
                self.nodes.get_mut(child).infix_len += node.infix_len + 1;
                Slot::Child(child)
            }
        };
        self.nodes.get_mut(parent).replace(parent_pos, replacement);
    }

    /// Move the value stored under `old_key` to `new_key`.
    ///
    /// Returns `None` and leaves the tree unchanged if `old_key` is absent or
    /// `new_key` is already present (this includes `old_key == new_key`).
    pub fn update(&mut self, old_key: &[u64], new_key: &[u64]) -> Result<Option<&V>> {
        self.check_key(old_key)?;
        self.check_key(new_key)?;
        if self.find(new_key).is_some() || self.find(old_key).is_none() {
            return Ok(None);
        }
        let Some(value) = self.remove(old_key)? else {
            return Ok(None);
        };
        self.put(new_key, value)?;
        self.get(new_key)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    fn traversal(&self, min: &[u64], max: &[u64]) -> Traversal<'_, V> {
        Traversal::new(&self.nodes, self.root, self.config.depth, min, max)
    }

    /// Iterate over all entries in interleaved-bit order.
    pub fn query_extent(&self) -> PhIter<'_, V> {
        let dims = self.config.dims;
        let min = KeyBuf::from_elem(0, dims);
        let max = KeyBuf::from_elem(u64::MAX, dims);
        PhIter::new(self.traversal(&min, &max))
    }

    /// Iterate over all entries with `min[i] <= key[i] <= max[i]` in every dimension.
    pub fn query(&self, min: &[u64], max: &[u64]) -> Result<PhQuery<'_, V>> {
        self.check_box(min, max)?;
        Ok(PhQuery::new(self.traversal(min, max), self.config.dims))
    }

    /// Iterate over all entries with `min <= key[dim] <= max`, leaving every
    /// other dimension unbounded.
    pub fn query_dim(&self, dim: usize, min: u64, max: u64) -> Result<PhQuery<'_, V>> {
        let dims = self.config.dims;
        if dim >= dims {
            return Err(PhError::DimensionOutOfRange { dim, dims });
        }
        let mut lower = KeyBuf::from_elem(0, dims);
        let mut upper = KeyBuf::from_elem(u64::MAX, dims);
        lower[dim] = min;
        upper[dim] = max;
        self.query(&lower, &upper)
    }

    /// Collect all entries inside the box.
    pub fn query_all(&self, min: &[u64], max: &[u64]) -> Result<Vec<(Vec<u64>, &V)>> {
        Ok(self.query(min, max)?.collect())
    }

    /// Collect up to `max_results` mapped entries inside the box that pass `filter`.
    ///
    /// See [`mapper`] for common mappers.
    pub fn query_all_with<'a, R, P, M>(
        &'a self,
        min: &[u64],
        max: &[u64],
        max_results: usize,
        mut filter: P,
        mut mapper: M,
    ) -> Result<Vec<R>>
    where
        P: FnMut(&[u64]) -> bool,
        M: FnMut(&[u64], &'a V) -> R,
    {
        self.check_box(min, max)?;
        let mut traversal = self.traversal(min, max);
        let mut out = Vec::new();
        while out.len() < max_results {
            let Some(value) = traversal.find_next(true) else {
                break;
            };
            if filter(traversal.key()) {
                out.push(mapper(traversal.key(), value));
            }
        }
        Ok(out)
    }

    /// Whether no entry lies inside the box.
    pub fn is_range_empty(&self, min: &[u64], max: &[u64]) -> Result<bool> {
        self.check_box(min, max)?;
        Ok(self.traversal(min, max).find_next(false).is_none())
    }
}

impl<V: Clone> Clone for PhTree<V> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            nodes: self.nodes.clone(),
            root: self.root,
            size: self.size,
        }
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for PhTree<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.query_extent()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree8(dims: usize) -> PhTree<u64> {
        PhTree::with_config(PhTreeConfig::new(dims).with_depth(8)).unwrap()
    }

    #[test]
    fn test_scenario_2d() {
        let mut t: PhTree<&str> =
            PhTree::with_config(PhTreeConfig::new(2).with_depth(8)).unwrap();
        assert_eq!(t.put(&[1, 1], "a").unwrap(), None);
        assert_eq!(t.put(&[5, 5], "b").unwrap(), None);
        assert_eq!(t.put(&[1, 5], "c").unwrap(), None);

        let hits: Vec<_> = t.query(&[0, 0], &[4, 4]).unwrap().collect();
        assert_eq!(hits, vec![(vec![1, 1], &"a")]);

        let all: Vec<_> = t.query_extent().collect();
        assert_eq!(
            all,
            vec![(vec![1, 1], &"a"), (vec![1, 5], &"c"), (vec![5, 5], &"b")]
        );

        assert_eq!(t.remove(&[5, 5]).unwrap(), Some("b"));
        assert!(!t.contains(&[5, 5]).unwrap());
        assert_eq!(t.len(), 2);
        t.check_consistency().unwrap();
    }

    #[test]
    fn test_basic() {
        let mut t = tree8(3);
        t.put(&[1, 2, 3], 10).unwrap();
        t.put(&[3, 2, 1], 20).unwrap();
        assert_eq!(t.get(&[1, 2, 3]).unwrap(), Some(&10));
        assert_eq!(t.get(&[3, 2, 1]).unwrap(), Some(&20));
        assert_eq!(t.get(&[0, 0, 0]).unwrap(), None);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_put_existing() {
        let mut t = tree8(2);
        assert_eq!(t.put(&[7, 7], 1).unwrap(), None);
        assert_eq!(t.put(&[7, 7], 2).unwrap(), Some(1));
        assert_eq!(t.get(&[7, 7]).unwrap(), Some(&2));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_get_mut() {
        let mut t = tree8(2);
        t.put(&[4, 9], 1).unwrap();
        *t.get_mut(&[4, 9]).unwrap().unwrap() += 41;
        assert_eq!(t.get(&[4, 9]).unwrap(), Some(&42));
        assert!(t.get_mut(&[9, 4]).unwrap().is_none());
    }

    #[test]
    fn test_invalid_arguments() {
        let mut t = tree8(2);
        assert_eq!(
            t.put(&[1, 2, 3], 0).unwrap_err(),
            PhError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
        assert_eq!(
            t.put(&[256, 0], 0).unwrap_err(),
            PhError::KeyOutOfRange {
                dim: 0,
                value: 256,
                depth: 8
            }
        );
        assert!(t.get(&[1]).is_err());
        assert!(t.query(&[0], &[1, 1]).is_err());
        assert!(t.is_empty(), "failed calls must not mutate");
        assert!(PhTree::<u64>::new(0).is_err());
    }

    #[test]
    fn test_remove_merges_nodes() {
        let mut t = tree8(2);
        t.put(&[0, 0], 0).unwrap();
        t.put(&[0, 1], 1).unwrap();
        t.put(&[0, 3], 3).unwrap();
        t.put(&[200, 200], 4).unwrap();
        let before = t.node_count();
        assert!(before >= 3);

        assert_eq!(t.remove(&[0, 1]).unwrap(), Some(1));
        t.check_consistency().unwrap();
        assert_eq!(t.remove(&[0, 3]).unwrap(), Some(3));
        t.check_consistency().unwrap();
        assert_eq!(t.node_count(), 1, "only the root should remain");
        assert_eq!(t.remove(&[0, 3]).unwrap(), None);
        assert_eq!(t.len(), 2);

        assert_eq!(t.remove(&[0, 0]).unwrap(), Some(0));
        assert_eq!(t.remove(&[200, 200]).unwrap(), Some(4));
        assert_eq!(t.node_count(), 0);
        assert!(t.root.is_none());
        assert!(t.is_empty());
    }

    #[test]
    fn test_infix_split() {
        let mut t = tree8(2);
        // Two keys sharing a long prefix create a node with an infix.
        t.put(&[0b1010_1000, 0], 1).unwrap();
        t.put(&[0b1010_1001, 0], 2).unwrap();
        t.check_consistency().unwrap();
        // A key leaving that infix halfway forces an intermediate node.
        t.put(&[0b1011_0000, 0], 3).unwrap();
        t.check_consistency().unwrap();
        assert_eq!(t.node_count(), 3);
        assert_eq!(t.get(&[0b1010_1000, 0]).unwrap(), Some(&1));
        assert_eq!(t.get(&[0b1010_1001, 0]).unwrap(), Some(&2));
        assert_eq!(t.get(&[0b1011_0000, 0]).unwrap(), Some(&3));
        // Lookups that leave an infix must not match.
        assert_eq!(t.get(&[0b1010_0001, 0]).unwrap(), None);
        assert_eq!(t.remove(&[0b1010_0001, 0]).unwrap(), None);

        assert_eq!(t.remove(&[0b1011_0000, 0]).unwrap(), Some(3));
        t.check_consistency().unwrap();
        assert_eq!(t.node_count(), 2);
    }

    #[test]
    fn test_update() {
        let mut t = tree8(2);
        t.put(&[1, 1], 11).unwrap();
        t.put(&[2, 2], 22).unwrap();

        assert_eq!(t.update(&[1, 1], &[3, 3]).unwrap(), Some(&11));
        assert!(!t.contains(&[1, 1]).unwrap());
        assert_eq!(t.get(&[3, 3]).unwrap(), Some(&11));

        // Target exists: nothing changes.
        assert_eq!(t.update(&[3, 3], &[2, 2]).unwrap(), None);
        assert_eq!(t.get(&[3, 3]).unwrap(), Some(&11));
        assert_eq!(t.get(&[2, 2]).unwrap(), Some(&22));

        // Source missing: nothing changes.
        assert_eq!(t.update(&[9, 9], &[8, 8]).unwrap(), None);
        assert!(!t.contains(&[8, 8]).unwrap());
        assert_eq!(t.len(), 2);
        t.check_consistency().unwrap();
    }

    #[test]
    fn test_clear() {
        let mut t = tree8(2);
        for i in 0..50 {
            t.put(&[i, 255 - i], i).unwrap();
        }
        t.clear();
        assert_eq!(t.len(), 0);
        assert_eq!(t.node_count(), 0);
        assert_eq!(t.query_extent().count(), 0);
        t.clear();
        assert!(t.is_empty());
        t.put(&[1, 1], 1).unwrap();
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_depth_64() {
        let mut t: PhTree<u64> = PhTree::new(2).unwrap();
        let keys = [
            [0u64, 0],
            [u64::MAX, u64::MAX],
            [u64::MAX, 0],
            [1 << 63, 1],
            [(1 << 63) - 1, 12345],
        ];
        for (i, k) in keys.iter().enumerate() {
            assert_eq!(t.put(k, i as u64).unwrap(), None);
        }
        for (i, k) in keys.iter().enumerate() {
            assert_eq!(t.get(k).unwrap(), Some(&(i as u64)));
        }
        t.check_consistency().unwrap();
        let hits = t.query_all(&[1 << 62, 0], &[u64::MAX, 1]).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(t.query_extent().count(), keys.len());
    }

    #[test]
    fn test_one_bit_depth() {
        let mut t = PhTree::with_config(PhTreeConfig::new(3).with_depth(1)).unwrap();
        for pos in 0..8u64 {
            let key = [pos >> 2 & 1, pos >> 1 & 1, pos & 1];
            t.put(&key, pos).unwrap();
        }
        assert_eq!(t.node_count(), 1);
        let values: Vec<u64> = t.query_extent().map(|(_, v)| *v).collect();
        assert_eq!(values, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_query_matches_brute_force() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        let mut t = tree8(3);
        let mut keys = Vec::new();
        for i in 0..500u64 {
            let k = vec![rng.gen_range(0..256), rng.gen_range(0..256), rng.gen_range(0..256)];
            if t.put(&k, i).unwrap().is_none() {
                keys.push(k);
            }
        }
        for _ in 0..200 {
            let a: Vec<u64> = (0..3).map(|_| rng.gen_range(0..256)).collect();
            let b: Vec<u64> = (0..3).map(|_| rng.gen_range(0..256)).collect();
            let min: Vec<u64> = a.iter().zip(&b).map(|(x, y)| *x.min(y)).collect();
            let max: Vec<u64> = a.iter().zip(&b).map(|(x, y)| *x.max(y)).collect();

            let mut got: Vec<Vec<u64>> = t.query(&min, &max).unwrap().map(|(k, _)| k).collect();
            let mut expected: Vec<Vec<u64>> = keys
                .iter()
                .filter(|k| (0..3).all(|i| min[i] <= k[i] && k[i] <= max[i]))
                .cloned()
                .collect();
            got.sort();
            expected.sort();
            assert_eq!(got, expected);
            assert_eq!(t.is_range_empty(&min, &max).unwrap(), expected.is_empty());
        }
    }

    #[test]
    fn test_query_reuse_and_reset() {
        let mut t = tree8(2);
        for x in 0..16u64 {
            for y in 0..16u64 {
                t.put(&[x * 16, y * 16], x * 16 + y).unwrap();
            }
        }
        let mut q = t.query(&[0, 0], &[31, 31]).unwrap();
        let mut entry = PhEntry::new();
        let mut n = 0;
        while q.advance(&mut entry) {
            assert!(entry.key()[0] <= 31 && entry.key()[1] <= 31);
            n += 1;
        }
        assert_eq!(n, 4);
        assert!(entry.value().is_none());
        assert!(!q.advance(&mut entry), "finished query stays finished");

        q.reset(&[100, 100], &[140, 140]).unwrap();
        let mut keys = Vec::new();
        while let Some((k, _)) = q.next_entry_reuse() {
            keys.push(k.to_vec());
        }
        assert_eq!(keys, vec![vec![112, 112], vec![112, 128], vec![128, 112], vec![128, 128]]);

        q.reset(&[0, 0], &[255, 255]).unwrap();
        assert_eq!(q.count(), 256);
    }

    #[test]
    fn test_query_single_dimension() {
        let mut t = tree8(3);
        for i in 0..50u64 {
            t.put(&[i, 255 - i, (i * 7) % 256], i).unwrap();
        }
        let mut got: Vec<u64> = t.query_dim(1, 230, 240).unwrap().map(|(_, v)| *v).collect();
        got.sort();
        assert_eq!(got, (15..=25).collect::<Vec<u64>>());

        let mut q = t.query_dim(0, 0, 0).unwrap();
        assert_eq!(q.next(), Some((vec![0, 255, 0], &0)));
        assert_eq!(q.next(), None);

        assert_eq!(t.query_dim(2, 1, 0).unwrap().count(), 0);
        assert_eq!(
            t.query_dim(3, 0, 1).err(),
            Some(PhError::DimensionOutOfRange { dim: 3, dims: 3 })
        );
    }

    #[test]
    fn test_query_all_with() {
        let mut t = tree8(2);
        for i in 0..20u64 {
            t.put(&[i, i], i * 10).unwrap();
        }
        let even = t
            .query_all_with(&[0, 0], &[255, 255], usize::MAX, |k| k[0] % 2 == 0, mapper::values())
            .unwrap();
        assert_eq!(even.len(), 10);
        assert!(even.iter().all(|v| *v % 20 == 0));

        let first3 = t
            .query_all_with(&[5, 5], &[255, 255], 3, |_| true, mapper::keys())
            .unwrap();
        assert_eq!(first3, vec![vec![5, 5], vec![6, 6], vec![7, 7]]);
    }

    #[test]
    fn test_iterator_stack_depth_is_bounded() {
        let mut t = tree8(1);
        for i in 0..256u64 {
            t.put(&[i], i).unwrap();
        }
        let mut traversal = t.traversal(&[0], &[255]);
        let mut max_stack = 0;
        while traversal.find_next(true).is_some() {
            max_stack = max_stack.max(traversal.stack_len());
        }
        assert!(max_stack <= 8, "stack grew to {max_stack}");
    }

    #[test]
    fn test_randomized_insert_remove_get() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        use std::collections::BTreeMap;

        let mut rng = StdRng::seed_from_u64(2);
        let mut t = tree8(2);
        let mut m: BTreeMap<Vec<u64>, u64> = BTreeMap::new();

        for _ in 0..20_000 {
            let op = rng.gen_range(0..100);
            let key = vec![rng.gen_range(0..256u64), rng.gen_range(0..64u64)];
            match op {
                0..=49 => {
                    let v: u64 = rng.gen();
                    assert_eq!(t.put(&key, v).unwrap(), m.insert(key, v));
                }
                50..=74 => {
                    assert_eq!(t.remove(&key).unwrap(), m.remove(&key));
                }
                _ => {
                    assert_eq!(t.get(&key).unwrap().copied(), m.get(&key).copied());
                }
            }
        }

        assert_eq!(t.len(), m.len());
        t.check_consistency().unwrap();
        let mut got: Vec<(Vec<u64>, u64)> = t.query_extent().map(|(k, v)| (k, *v)).collect();
        got.sort();
        let expected: Vec<(Vec<u64>, u64)> = m.into_iter().collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_clone() {
        let mut t = tree8(2);
        t.put(&[1, 2], 3).unwrap();
        t.put(&[4, 5], 6).unwrap();
        let mut t2 = t.clone();
        t2.remove(&[1, 2]).unwrap();
        assert_eq!(t.get(&[1, 2]).unwrap(), Some(&3));
        assert_eq!(t2.get(&[1, 2]).unwrap(), None);
        assert_eq!(t2.get(&[4, 5]).unwrap(), Some(&6));
    }

    #[test]
    fn test_debug_format() {
        let mut t = tree8(2);
        t.put(&[1, 1], 7).unwrap();
        assert_eq!(format!("{t:?}"), "{[1, 1]: 7}");
    }
}

#[cfg(test)]
mod proptests;
