//! Nearest-neighbour search.
//!
//! Best-first traversal: a min-heap holds nodes keyed by the distance from the
//! query point to the node's bounding box, and entries keyed by their exact
//! distance. Popping in distance order yields entries nearest first; after the
//! `n`-th result every further entry at exactly the same distance is included.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{PhError, Result};
use crate::key::sortable_to_f64;
use crate::node::{KeyBuf, Node, NodeId, Slot};
use crate::PhTree;

// =============================================================================
// Distance functions
// =============================================================================

/// Distance between keys, as used by [`PhTree::nearest_neighbour_with`].
pub trait PhDistance {
    /// Distance between two keys of equal dimensionality.
    fn dist(&self, a: &[u64], b: &[u64]) -> f64;

    /// Lower bound of `dist(key, p)` for every `p` inside `[lo, hi]`.
    ///
    /// The default clamps `key` into the box, which is exact for any distance
    /// that is monotone in each coordinate difference.
    fn dist_to_box(&self, key: &[u64], lo: &[u64], hi: &[u64]) -> f64 {
        let clamped: KeyBuf = key
            .iter()
            .zip(lo.iter().zip(hi))
            .map(|(&k, (&l, &h))| k.clamp(l, h))
            .collect();
        self.dist(key, &clamped)
    }
}

/// Euclidean distance over the raw unsigned coordinates.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhDistanceL;

impl PhDistance for PhDistanceL {
    fn dist(&self, a: &[u64], b: &[u64]) -> f64 {
        a.iter()
            .zip(b)
            .map(|(&x, &y)| {
                let d = x.abs_diff(y) as f64;
                d * d
            })
            .sum::<f64>()
            .sqrt()
    }
}

/// Euclidean distance over keys encoded with [`f64_to_sortable`](crate::key::f64_to_sortable).
#[derive(Debug, Clone, Copy, Default)]
pub struct PhDistanceF;

impl PhDistance for PhDistanceF {
    fn dist(&self, a: &[u64], b: &[u64]) -> f64 {
        a.iter()
            .zip(b)
            .map(|(&x, &y)| {
                let d = sortable_to_f64(x) - sortable_to_f64(y);
                d * d
            })
            .sum::<f64>()
            .sqrt()
    }
}

/// Selects the dimensions that take part in a nearest-neighbour distance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhDimFilter {
    included: Vec<bool>,
}

impl PhDimFilter {
    /// Filter over `dims` dimensions with every dimension included.
    pub fn new(dims: usize) -> Self {
        Self {
            included: vec![true; dims],
        }
    }

    /// Exclude `dim` from distance computations. Out-of-range dimensions are
    /// ignored.
    pub fn ignore(mut self, dim: usize) -> Self {
        if let Some(flag) = self.included.get_mut(dim) {
            *flag = false;
        }
        self
    }

    /// Include `dim` in distance computations. Out-of-range dimensions are
    /// ignored.
    pub fn include(mut self, dim: usize) -> Self {
        if let Some(flag) = self.included.get_mut(dim) {
            *flag = true;
        }
        self
    }

    /// Whether `dim` takes part in distance computations.
    pub fn is_included(&self, dim: usize) -> bool {
        self.included.get(dim).copied().unwrap_or(false)
    }

    /// Number of dimensions covered by the filter.
    pub fn dims(&self) -> usize {
        self.included.len()
    }
}

// =============================================================================
// Search
// =============================================================================

enum CandidateKind {
    Node(NodeId),
    Entry(KeyBuf),
}

struct Candidate {
    dist: f64,
    kind: CandidateKind,
}

impl Candidate {
    #[inline]
    fn is_entry(&self) -> bool {
        matches!(self.kind, CandidateKind::Entry(_))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    /// Reversed so that `BinaryHeap` pops the nearest candidate first; at equal
    /// distance entries come before nodes.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| self.is_entry().cmp(&other.is_entry()))
    }
}

/// Query point and per-dimension projection used during one search.
struct Search<'d, D: ?Sized> {
    dist: &'d D,
    query: KeyBuf,
    included: Vec<bool>,
    lo: KeyBuf,
    hi: KeyBuf,
    point: KeyBuf,
}

impl<D: PhDistance + ?Sized> Search<'_, D> {
    fn node_dist<V>(&mut self, node: &Node<V>) -> f64 {
        for i in 0..self.query.len() {
            if self.included[i] {
                let (lo, hi) = node.bounds(i);
                self.lo[i] = lo;
                self.hi[i] = hi;
            } else {
                self.lo[i] = self.query[i];
                self.hi[i] = self.query[i];
            }
        }
        self.dist.dist_to_box(&self.query, &self.lo, &self.hi)
    }

    fn entry_dist(&mut self, key: &[u64]) -> f64 {
        for i in 0..self.query.len() {
            self.point[i] = if self.included[i] { key[i] } else { self.query[i] };
        }
        self.dist.dist(&self.query, &self.point)
    }
}

impl<V> PhTree<V> {
    /// The `n` keys nearest to `key` by Euclidean distance.
    ///
    /// More than `n` keys are returned when several share the distance of the
    /// `n`-th one.
    pub fn nearest_neighbour(&self, n: usize, key: &[u64]) -> Result<Vec<Vec<u64>>> {
        self.nearest_neighbour_with(n, &PhDistanceL, None, key)
    }

    /// Nearest-neighbour search with a custom distance and an optional
    /// dimension filter. Keys are returned nearest first.
    pub fn nearest_neighbour_with<D: PhDistance + ?Sized>(
        &self,
        n: usize,
        dist: &D,
        dims: Option<&PhDimFilter>,
        key: &[u64],
    ) -> Result<Vec<Vec<u64>>> {
        crate::check_dims(self.dims(), key)?;
        if let Some(filter) = dims {
            if filter.dims() != self.dims() {
                return Err(PhError::DimensionMismatch {
                    expected: self.dims(),
                    actual: filter.dims(),
                });
            }
        }
        let mut out = Vec::new();
        let Some(root) = self.root else {
            return Ok(out);
        };
        if n == 0 {
            return Ok(out);
        }

        let d = key.len();
        let mut search = Search {
            dist,
            query: KeyBuf::from_slice(key),
            included: (0..d).map(|i| dims.map_or(true, |f| f.is_included(i))).collect(),
            lo: KeyBuf::from_elem(0, d),
            hi: KeyBuf::from_elem(0, d),
            point: KeyBuf::from_elem(0, d),
        };

        let mut heap = BinaryHeap::new();
        heap.push(Candidate {
            dist: search.node_dist(self.nodes.get(root)),
            kind: CandidateKind::Node(root),
        });

        let mut bound: Option<f64> = None;
        let mut full = KeyBuf::from_elem(0, d);
        while let Some(candidate) = heap.pop() {
            if bound.is_some_and(|b| candidate.dist > b) {
                break;
            }
            match candidate.kind {
                CandidateKind::Entry(k) => {
                    out.push(k.to_vec());
                    if bound.is_none() && out.len() >= n {
                        bound = Some(candidate.dist);
                    }
                }
                CandidateKind::Node(id) => {
                    let node = self.nodes.get(id);
                    for (pos, slot) in node.iter() {
                        let next = match slot {
                            Slot::Terminal { postfix, .. } => {
                                node.write_key(pos, postfix, &mut full);
                                Candidate {
                                    dist: search.entry_dist(&full),
                                    kind: CandidateKind::Entry(full.clone()),
                                }
                            }
                            Slot::Child(child) => Candidate {
                                dist: search.node_dist(self.nodes.get(*child)),
                                kind: CandidateKind::Node(*child),
                            },
                        };
                        if bound.map_or(true, |b| next.dist <= b) {
                            heap.push(next);
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}
