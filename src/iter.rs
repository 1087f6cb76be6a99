//! Range traversal: per-node cursors, the cursor stack and the public iterators.
//!
//! A traversal is a depth-first walk driven by an [`IteratorStack`] of
//! [`NodeIter`] frames, one per trie level on the current root-to-leaf path.
//! Frames are plain values re-initialised in place, so a running query does not
//! allocate per node or per result (the allocating iterators only allocate the
//! returned key).
//!
//! Iterators borrow the tree immutably; the tree cannot be modified while one
//! is alive.

use crate::node::{in_range, Hypercube, KeyBuf, Node, NodeArena, NodeId, Slot};

// =============================================================================
// NodeIter
// =============================================================================

/// Next position after `v` that satisfies the hypercube masks.
#[inline]
fn inc(v: u64, lower: u64, upper: u64) -> Option<u64> {
    let next = ((v | !upper).wrapping_add(1) & upper) | lower;
    if next <= v {
        None
    } else {
        Some(next)
    }
}

/// Cursor over the occupied slots of one node that may hold matches for a box.
///
/// Positions are visited in ascending order. Terminal slots are only reported
/// if their full key lies inside the box; child slots are reported whenever
/// their position passes the hypercube masks, and are pruned by the stack
/// before descending.
pub(crate) struct NodeIter<'a, V> {
    node: &'a Node<V>,
    mask_lower: u64,
    mask_upper: u64,
    /// Dense: next position to examine. Sparse: next index into the entries.
    cursor: u64,
    exhausted: bool,
    next: Option<(u64, &'a Slot<V>)>,
}

impl<'a, V> NodeIter<'a, V> {
    pub(crate) fn new(node: &'a Node<V>, min: &[u64], max: &[u64], scratch: &mut [u64]) -> Self {
        let mut it = Self {
            node,
            mask_lower: 0,
            mask_upper: 0,
            cursor: 0,
            exhausted: false,
            next: None,
        };
        it.init(node, min, max, scratch);
        it
    }

    /// Rebind this cursor to `node` and position it on the first match.
    pub(crate) fn init(&mut self, node: &'a Node<V>, min: &[u64], max: &[u64], scratch: &mut [u64]) {
        let (lower, upper) = node.hc_masks(min, max);
        self.node = node;
        self.mask_lower = lower;
        self.mask_upper = upper;
        self.cursor = if node.is_dense() { lower } else { 0 };
        self.exhausted = false;
        self.find_next(min, max, scratch);
    }

    #[inline]
    pub(crate) fn has_next(&self) -> bool {
        self.next.is_some()
    }

    /// Hypercube position of the current slot.
    #[inline]
    pub(crate) fn current_pos(&self) -> Option<u64> {
        self.next.map(|(pos, _)| pos)
    }

    #[inline]
    pub(crate) fn is_next_sub(&self) -> bool {
        matches!(self.next, Some((_, Slot::Child(_))))
    }

    #[inline]
    pub(crate) fn current_sub_node(&self) -> Option<NodeId> {
        match self.next {
            Some((_, Slot::Child(id))) => Some(*id),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn current_value(&self) -> Option<&'a V> {
        match self.next {
            Some((_, Slot::Terminal { value, .. })) => Some(value),
            _ => None,
        }
    }

    /// Write the key of the current terminal into `out`. Returns false on a child.
    pub(crate) fn write_current_key(&self, out: &mut [u64]) -> bool {
        match self.next {
            Some((pos, Slot::Terminal { postfix, .. })) => {
                self.node.write_key(pos, postfix, out);
                true
            }
            _ => false,
        }
    }

    #[inline]
    pub(crate) fn increment(&mut self, min: &[u64], max: &[u64], scratch: &mut [u64]) {
        let prev = self.current_pos();
        self.find_next(min, max, scratch);
        debug_assert!(
            matches!((prev, self.current_pos()), (Some(a), Some(b)) if b > a)
                || self.current_pos().is_none(),
            "node cursor must visit positions in ascending order"
        );
    }

    #[inline]
    fn pos_matches(&self, pos: u64) -> bool {
        (pos & self.mask_lower) == self.mask_lower && (pos & !self.mask_upper) == 0
    }

    fn accept(&self, pos: u64, slot: &Slot<V>, min: &[u64], max: &[u64], scratch: &mut [u64]) -> bool {
        match slot {
            Slot::Child(_) => true,
            Slot::Terminal { postfix, .. } => {
                self.node.write_key(pos, postfix, scratch);
                in_range(scratch, min, max)
            }
        }
    }

    fn find_next(&mut self, min: &[u64], max: &[u64], scratch: &mut [u64]) {
        self.next = None;
        let node = self.node;
        match &node.cube {
            Hypercube::Dense { slots, .. } => {
                while !self.exhausted {
                    let pos = self.cursor;
                    match inc(pos, self.mask_lower, self.mask_upper) {
                        Some(next) => self.cursor = next,
                        None => self.exhausted = true,
                    }
                    if let Some(slot) = &slots[pos as usize] {
                        if self.accept(pos, slot, min, max, scratch) {
                            self.next = Some((pos, slot));
                            return;
                        }
                    }
                }
            }
            Hypercube::Sparse(entries) => {
                while let Some((pos, slot)) = entries.get(self.cursor as usize) {
                    self.cursor += 1;
                    if self.pos_matches(*pos) && self.accept(*pos, slot, min, max, scratch) {
                        self.next = Some((*pos, slot));
                        return;
                    }
                }
                self.exhausted = true;
            }
        }
    }
}

// =============================================================================
// IteratorStack
// =============================================================================

/// Stack of node cursors mirroring the current root-to-leaf path.
///
/// Capacity is the tree depth (every level consumes at least one bit), so the
/// frame vector never reallocates after construction. Popped frames stay in
/// place and are re-initialised by the next [`prepare`](Self::prepare).
pub(crate) struct IteratorStack<'a, V> {
    frames: Vec<NodeIter<'a, V>>,
    size: usize,
}

impl<'a, V> IteratorStack<'a, V> {
    pub(crate) fn new(depth: u32) -> Self {
        Self {
            frames: Vec::with_capacity(depth as usize),
            size: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub(crate) fn clear(&mut self) {
        self.size = 0;
    }

    /// Push a cursor for `node` unless the node lies entirely outside the box.
    pub(crate) fn prepare(
        &mut self,
        node: &'a Node<V>,
        min: &[u64],
        max: &[u64],
        scratch: &mut [u64],
    ) -> bool {
        if !node.overlaps(min, max) {
            return false;
        }
        if self.size < self.frames.len() {
            self.frames[self.size].init(node, min, max, scratch);
        } else {
            self.frames.push(NodeIter::new(node, min, max, scratch));
        }
        self.size += 1;
        true
    }

    #[inline]
    pub(crate) fn peek_mut(&mut self) -> Option<&mut NodeIter<'a, V>> {
        if self.size == 0 {
            None
        } else {
            Some(&mut self.frames[self.size - 1])
        }
    }

    #[inline]
    pub(crate) fn pop(&mut self) {
        debug_assert!(self.size > 0, "pop on empty iterator stack");
        self.size -= 1;
    }
}

// =============================================================================
// Traversal driver
// =============================================================================

/// Depth-first range traversal shared by all iterator flavours.
pub(crate) struct Traversal<'a, V> {
    nodes: &'a NodeArena<V>,
    root: Option<NodeId>,
    stack: IteratorStack<'a, V>,
    min: KeyBuf,
    max: KeyBuf,
    scratch: KeyBuf,
    /// Key of the most recent result.
    key: KeyBuf,
}

impl<'a, V> Traversal<'a, V> {
    pub(crate) fn new(
        nodes: &'a NodeArena<V>,
        root: Option<NodeId>,
        depth: u32,
        min: &[u64],
        max: &[u64],
    ) -> Self {
        let dims = min.len();
        let mut t = Self {
            nodes,
            root,
            stack: IteratorStack::new(depth),
            min: KeyBuf::from_slice(min),
            max: KeyBuf::from_slice(max),
            scratch: KeyBuf::from_elem(0, dims),
            key: KeyBuf::from_elem(0, dims),
        };
        t.start();
        t
    }

    fn start(&mut self) {
        self.stack.clear();
        if let Some(root) = self.root {
            let nodes = self.nodes;
            self.stack
                .prepare(nodes.get(root), &self.min, &self.max, &mut self.scratch);
        }
    }

    /// Restart against a new box, keeping the allocated frames.
    pub(crate) fn reset(&mut self, min: &[u64], max: &[u64]) {
        self.min.copy_from_slice(min);
        self.max.copy_from_slice(max);
        self.start();
    }

    #[inline]
    pub(crate) fn key(&self) -> &[u64] {
        &self.key
    }

    /// Advance to the next matching entry. With `write_key` the key is stored
    /// in [`key`](Self::key).
    pub(crate) fn find_next(&mut self, write_key: bool) -> Option<&'a V> {
        let nodes = self.nodes;
        loop {
            let top = self.stack.peek_mut()?;
            if !top.has_next() {
                self.stack.pop();
                continue;
            }
            if top.is_next_sub() {
                let sub = top.current_sub_node();
                top.increment(&self.min, &self.max, &mut self.scratch);
                if let Some(sub) = sub {
                    self.stack
                        .prepare(nodes.get(sub), &self.min, &self.max, &mut self.scratch);
                }
                continue;
            }
            let value = top.current_value();
            if write_key {
                top.write_current_key(&mut self.key);
            }
            top.increment(&self.min, &self.max, &mut self.scratch);
            if value.is_some() {
                return value;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn stack_len(&self) -> usize {
        self.stack.len()
    }
}

// =============================================================================
// Public iterators
// =============================================================================

/// Reusable result slot for [`PhQuery::advance`] and [`PhIter::advance`].
///
/// The key buffer is overwritten in place on every call, so a single entry can
/// be used for a whole traversal without allocating.
#[derive(Debug, Clone, PartialEq)]
pub struct PhEntry<'a, V> {
    key: Vec<u64>,
    value: Option<&'a V>,
}

impl<'a, V> PhEntry<'a, V> {
    /// An empty entry.
    pub fn new() -> Self {
        Self {
            key: Vec::new(),
            value: None,
        }
    }

    /// Key of the last result; empty before the first call.
    pub fn key(&self) -> &[u64] {
        &self.key
    }

    /// Value of the last result; `None` once the traversal is finished.
    pub fn value(&self) -> Option<&'a V> {
        self.value
    }

    fn set(&mut self, key: &[u64], value: Option<&'a V>) {
        self.key.clear();
        self.key.extend_from_slice(key);
        self.value = value;
    }
}

impl<V> Default for PhEntry<'_, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot iterator over a range of the tree.
///
/// Each `next` allocates the returned key. Use [`advance`](Self::advance) to
/// reuse a single [`PhEntry`] instead.
pub struct PhIter<'a, V> {
    traversal: Traversal<'a, V>,
}

impl<'a, V> PhIter<'a, V> {
    pub(crate) fn new(traversal: Traversal<'a, V>) -> Self {
        Self { traversal }
    }

    /// Overwrite `entry` with the next result. Returns false when finished.
    pub fn advance(&mut self, entry: &mut PhEntry<'a, V>) -> bool {
        advance(&mut self.traversal, entry)
    }
}

impl<'a, V> Iterator for PhIter<'a, V> {
    type Item = (Vec<u64>, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.traversal.find_next(true)?;
        Some((self.traversal.key().to_vec(), value))
    }
}

impl<V> std::iter::FusedIterator for PhIter<'_, V> {}

/// Resettable range query.
///
/// Besides the allocating [`Iterator`] interface it offers two reuse modes:
/// [`advance`](Self::advance) fills a caller-owned [`PhEntry`], and
/// [`next_entry_reuse`](Self::next_entry_reuse) lends the key from an internal
/// buffer that is overwritten by the next call. [`reset`](Self::reset) restarts
/// the query with a new box while keeping the cursor stack.
pub struct PhQuery<'a, V> {
    traversal: Traversal<'a, V>,
    dims: usize,
}

impl<'a, V> PhQuery<'a, V> {
    pub(crate) fn new(traversal: Traversal<'a, V>, dims: usize) -> Self {
        Self { traversal, dims }
    }

    /// Restart the query with new bounds.
    pub fn reset(&mut self, min: &[u64], max: &[u64]) -> crate::Result<()> {
        crate::check_dims(self.dims, min)?;
        crate::check_dims(self.dims, max)?;
        self.traversal.reset(min, max);
        Ok(())
    }

    /// Overwrite `entry` with the next result. Returns false when finished.
    pub fn advance(&mut self, entry: &mut PhEntry<'a, V>) -> bool {
        advance(&mut self.traversal, entry)
    }

    /// Next result with its key borrowed from the query's own buffer.
    pub fn next_entry_reuse(&mut self) -> Option<(&[u64], &'a V)> {
        let value = self.traversal.find_next(true)?;
        Some((self.traversal.key(), value))
    }
}

impl<'a, V> Iterator for PhQuery<'a, V> {
    type Item = (Vec<u64>, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.traversal.find_next(true)?;
        Some((self.traversal.key().to_vec(), value))
    }
}

impl<V> std::iter::FusedIterator for PhQuery<'_, V> {}

fn advance<'a, V>(traversal: &mut Traversal<'a, V>, entry: &mut PhEntry<'a, V>) -> bool {
    match traversal.find_next(true) {
        Some(value) => {
            entry.set(traversal.key(), Some(value));
            true
        }
        None => {
            entry.set(&[], None);
            false
        }
    }
}
