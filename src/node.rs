//! Hypercube nodes and the node arena.
//!
//! A node sits at bit `post_len` of every dimension. The bits above it (its
//! prefix, of which the lowest `infix_len` bits are the compressed infix) are
//! shared by every key below the node. Bit `post_len` of each dimension selects
//! one of `2^D` hypercube slots; the `post_len` bits below are either the
//! postfix of a terminal entry or handled by a child node.

use smallvec::SmallVec;

use crate::tracing_helpers::trace_log;

/// Inline key storage; most trees have at most four dimensions.
pub(crate) type KeyBuf = SmallVec<[u64; 4]>;

// =============================================================================
// Bit utilities
// =============================================================================

/// Mask with the low `bits` bits set.
#[inline]
pub(crate) fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// `value >> shift`, yielding 0 for shifts of 64 or more.
#[inline]
pub(crate) fn shr(value: u64, shift: u32) -> u64 {
    if shift >= 64 {
        0
    } else {
        value >> shift
    }
}

/// Hypercube position of `key` at bit `post_len`. Dimension 0 is the MSB.
#[inline]
pub(crate) fn hc_pos(key: &[u64], post_len: u32) -> u64 {
    let mut pos = 0u64;
    for &k in key {
        pos = (pos << 1) | ((k >> post_len) & 1);
    }
    pos
}

/// Highest bit index at which `a` and `b` differ in any dimension.
#[inline]
pub(crate) fn highest_diff_bit(a: &[u64], b: &[u64]) -> Option<u32> {
    let diff = a.iter().zip(b).fold(0u64, |acc, (x, y)| acc | (x ^ y));
    if diff == 0 {
        None
    } else {
        Some(63 - diff.leading_zeros())
    }
}

/// Low `post_len` bits of every coordinate; empty when there are none.
#[inline]
pub(crate) fn postfix_of(key: &[u64], post_len: u32) -> KeyBuf {
    if post_len == 0 {
        return KeyBuf::new();
    }
    let mask = low_mask(post_len);
    key.iter().map(|&k| k & mask).collect()
}

/// Bits strictly above `post_len` of every coordinate.
#[inline]
pub(crate) fn prefix_of(key: &[u64], post_len: u32) -> KeyBuf {
    let mask = !low_mask(post_len + 1);
    key.iter().map(|&k| k & mask).collect()
}

#[inline]
pub(crate) fn postfix_matches(postfix: &[u64], key: &[u64], post_len: u32) -> bool {
    if post_len == 0 {
        return true;
    }
    let mask = low_mask(post_len);
    postfix.iter().zip(key).all(|(&p, &k)| p == k & mask)
}

#[inline]
pub(crate) fn in_range(key: &[u64], min: &[u64], max: &[u64]) -> bool {
    key.iter()
        .zip(min.iter().zip(max))
        .all(|(&k, (&lo, &hi))| lo <= k && k <= hi)
}

// =============================================================================
// Node handles and slots
// =============================================================================

/// Handle of a node inside a [`NodeArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Occupied hypercube slot. An empty slot is `None` wherever slots are looked up.
#[derive(Clone, Debug)]
pub(crate) enum Slot<V> {
    /// Entry whose remaining `post_len` bits are stored inline.
    Terminal { postfix: KeyBuf, value: V },
    /// Subtree rooted at a deeper node.
    Child(NodeId),
}

/// Slot storage of one node.
#[derive(Clone, Debug)]
pub(crate) enum Hypercube<V> {
    /// One entry per hypercube position.
    Dense {
        slots: Vec<Option<Slot<V>>>,
        len: usize,
    },
    /// Occupied positions only, sorted ascending.
    Sparse(Vec<(u64, Slot<V>)>),
}

// =============================================================================
// Node
// =============================================================================

#[derive(Clone, Debug)]
pub(crate) struct Node<V> {
    /// Bits below this node's hypercube bit.
    pub(crate) post_len: u32,
    /// Bits between the parent's hypercube bit and this node's.
    pub(crate) infix_len: u32,
    /// Bits above `post_len` shared by all keys in this subtree; lower bits are 0.
    pub(crate) prefix: KeyBuf,
    pub(crate) cube: Hypercube<V>,
}

impl<V> Node<V> {
    pub(crate) fn new(post_len: u32, infix_len: u32, prefix: KeyBuf) -> Self {
        Self {
            post_len,
            infix_len,
            prefix,
            cube: Hypercube::Sparse(Vec::with_capacity(2)),
        }
    }

    #[inline]
    pub(crate) fn dims(&self) -> usize {
        self.prefix.len()
    }

    #[inline]
    fn capacity(&self) -> usize {
        1usize << self.dims()
    }

    /// Number of occupied slots.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        match &self.cube {
            Hypercube::Dense { len, .. } => *len,
            Hypercube::Sparse(entries) => entries.len(),
        }
    }

    #[inline]
    pub(crate) fn is_dense(&self) -> bool {
        matches!(self.cube, Hypercube::Dense { .. })
    }

    pub(crate) fn get(&self, pos: u64) -> Option<&Slot<V>> {
        match &self.cube {
            Hypercube::Dense { slots, .. } => slots[pos as usize].as_ref(),
            Hypercube::Sparse(entries) => entries
                .binary_search_by_key(&pos, |(p, _)| *p)
                .ok()
                .map(|i| &entries[i].1),
        }
    }

    pub(crate) fn get_mut(&mut self, pos: u64) -> Option<&mut Slot<V>> {
        match &mut self.cube {
            Hypercube::Dense { slots, .. } => slots[pos as usize].as_mut(),
            Hypercube::Sparse(entries) => match entries.binary_search_by_key(&pos, |(p, _)| *p) {
                Ok(i) => Some(&mut entries[i].1),
                Err(_) => None,
            },
        }
    }

    /// Store `slot` at the empty position `pos`.
    pub(crate) fn insert(&mut self, pos: u64, slot: Slot<V>, dense_allowed: bool) {
        match &mut self.cube {
            Hypercube::Dense { slots, len } => {
                debug_assert!(slots[pos as usize].is_none(), "slot {pos} already occupied");
                slots[pos as usize] = Some(slot);
                *len += 1;
            }
            Hypercube::Sparse(entries) => match entries.binary_search_by_key(&pos, |(p, _)| *p) {
                Ok(_) => debug_assert!(false, "slot {pos} already occupied"),
                Err(i) => entries.insert(i, (pos, slot)),
            },
        }
        if dense_allowed && !self.is_dense() && self.len() * 2 > self.capacity() {
            self.to_dense();
        }
    }

    /// Swap the content of the occupied position `pos`, keeping the slot count.
    pub(crate) fn replace(&mut self, pos: u64, slot: Slot<V>) -> Slot<V> {
        match self.get_mut(pos) {
            Some(existing) => std::mem::replace(existing, slot),
            None => panic!("replace on empty slot {pos}"),
        }
    }

    /// Clear position `pos`, returning what it held.
    pub(crate) fn take(&mut self, pos: u64) -> Option<Slot<V>> {
        let taken = match &mut self.cube {
            Hypercube::Dense { slots, len } => {
                let taken = slots[pos as usize].take();
                if taken.is_some() {
                    *len -= 1;
                }
                taken
            }
            Hypercube::Sparse(entries) => entries
                .binary_search_by_key(&pos, |(p, _)| *p)
                .ok()
                .map(|i| entries.remove(i).1),
        };
        if self.is_dense() && self.len() * 4 <= self.capacity() {
            self.to_sparse();
        }
        taken
    }

    /// Remove and return the only occupied slot.
    pub(crate) fn take_single(&mut self) -> (u64, Slot<V>) {
        debug_assert_eq!(self.len(), 1);
        let pos = match self.iter().next() {
            Some((pos, _)) => pos,
            None => panic!("take_single on empty node"),
        };
        match self.take(pos) {
            Some(slot) => (pos, slot),
            None => unreachable!("occupied slot vanished"),
        }
    }

    fn to_dense(&mut self) {
        let mut slots: Vec<Option<Slot<V>>> = Vec::with_capacity(self.capacity());
        slots.resize_with(self.capacity(), || None);
        let old = std::mem::replace(&mut self.cube, Hypercube::Sparse(Vec::new()));
        let mut len = 0usize;
        if let Hypercube::Sparse(entries) = old {
            for (pos, slot) in entries {
                slots[pos as usize] = Some(slot);
                len += 1;
            }
        }
        trace_log!(post_len = self.post_len, len, "node switched to dense hypercube");
        self.cube = Hypercube::Dense { slots, len };
    }

    fn to_sparse(&mut self) {
        let old = std::mem::replace(&mut self.cube, Hypercube::Sparse(Vec::new()));
        if let Hypercube::Dense { slots, len } = old {
            let mut entries = Vec::with_capacity(len.max(2));
            for (pos, slot) in slots.into_iter().enumerate() {
                if let Some(slot) = slot {
                    entries.push((pos as u64, slot));
                }
            }
            trace_log!(post_len = self.post_len, len, "node switched to sparse hypercube");
            self.cube = Hypercube::Sparse(entries);
        }
    }

    /// Occupied slots in ascending position order.
    pub(crate) fn iter(&self) -> SlotIter<'_, V> {
        match &self.cube {
            Hypercube::Dense { slots, .. } => SlotIter::Dense(slots.iter().enumerate()),
            Hypercube::Sparse(entries) => SlotIter::Sparse(entries.iter()),
        }
    }

    /// Bit of dimension `dim` encoded in hypercube position `pos`.
    #[inline]
    fn pos_bit(&self, pos: u64, dim: usize) -> u64 {
        (pos >> (self.dims() - 1 - dim)) & 1
    }

    /// Reconstruct the full key stored at `pos` with the given postfix.
    pub(crate) fn write_key(&self, pos: u64, postfix: &[u64], out: &mut [u64]) {
        for (i, o) in out.iter_mut().enumerate() {
            let post = postfix.get(i).copied().unwrap_or(0);
            *o = self.prefix[i] | (self.pos_bit(pos, i) << self.post_len) | post;
        }
    }

    /// Whether all bits above `post_len` of `key` equal this node's prefix.
    #[inline]
    pub(crate) fn infix_matches(&self, key: &[u64]) -> bool {
        let shift = self.post_len + 1;
        self.prefix
            .iter()
            .zip(key)
            .all(|(&p, &k)| shr(p ^ k, shift) == 0)
    }

    /// Smallest and largest coordinate covered in dimension `dim`.
    #[inline]
    pub(crate) fn bounds(&self, dim: usize) -> (u64, u64) {
        let lo = self.prefix[dim];
        (lo, lo | low_mask(self.post_len + 1))
    }

    /// Whether the box covered by this node intersects `[min, max]`.
    ///
    /// Uses only the prefix, so a mismatching infix rejects the node without
    /// looking at any slot.
    #[inline]
    pub(crate) fn overlaps(&self, min: &[u64], max: &[u64]) -> bool {
        (0..self.dims()).all(|i| {
            let (lo, hi) = self.bounds(i);
            hi >= min[i] && lo <= max[i]
        })
    }

    /// Hypercube masks for `[min, max]`.
    ///
    /// A position `p` can hold matches only if `p & lower == lower` and
    /// `p & !upper == 0`. `lower` marks dimensions whose lower half is entirely
    /// below `min`, `upper` marks dimensions whose upper half reaches `max`.
    pub(crate) fn hc_masks(&self, min: &[u64], max: &[u64]) -> (u64, u64) {
        let mut lower = 0u64;
        let mut upper = 0u64;
        let half = 1u64 << self.post_len;
        let below = low_mask(self.post_len);
        for i in 0..self.dims() {
            lower <<= 1;
            upper <<= 1;
            let p = self.prefix[i];
            if min[i] > (p | below) {
                lower |= 1;
            }
            if max[i] >= (p | half) {
                upper |= 1;
            }
        }
        (lower, upper)
    }
}

pub(crate) enum SlotIter<'a, V> {
    Dense(std::iter::Enumerate<std::slice::Iter<'a, Option<Slot<V>>>>),
    Sparse(std::slice::Iter<'a, (u64, Slot<V>)>),
}

impl<'a, V> Iterator for SlotIter<'a, V> {
    type Item = (u64, &'a Slot<V>);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            SlotIter::Dense(it) => {
                for (pos, slot) in it.by_ref() {
                    if let Some(slot) = slot {
                        return Some((pos as u64, slot));
                    }
                }
                None
            }
            SlotIter::Sparse(it) => it.next().map(|(pos, slot)| (*pos, slot)),
        }
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Owner of all nodes of a tree; nodes refer to children by [`NodeId`].
#[derive(Clone, Debug)]
pub(crate) struct NodeArena<V> {
    nodes: Vec<Option<Node<V>>>,
    free: Vec<NodeId>,
    live: usize,
}

impl<V> NodeArena<V> {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub(crate) fn alloc(&mut self, node: Node<V>) -> NodeId {
        self.live += 1;
        if let Some(id) = self.free.pop() {
            self.nodes[id.index()] = Some(node);
            return id;
        }
        let id = NodeId(u32::try_from(self.nodes.len()).expect("node arena exceeds u32 handles"));
        self.nodes.push(Some(node));
        id
    }

    pub(crate) fn free(&mut self, id: NodeId) -> Node<V> {
        let node = self.nodes[id.index()]
            .take()
            .expect("freeing a node that is not live");
        self.live -= 1;
        self.free.push(id);
        node
    }

    #[inline]
    pub(crate) fn get(&self, id: NodeId) -> &Node<V> {
        self.nodes[id.index()].as_ref().expect("dangling node handle")
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut Node<V> {
        self.nodes[id.index()].as_mut().expect("dangling node handle")
    }

    /// Number of live nodes.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.live = 0;
    }

    pub(crate) fn memory_usage(&self) -> usize {
        self.nodes.capacity() * std::mem::size_of::<Option<Node<V>>>()
            + self.free.capacity() * std::mem::size_of::<NodeId>()
    }
}
