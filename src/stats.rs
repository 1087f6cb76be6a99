//! Introspection: structure quality, memory estimates, dumps and the
//! consistency checker used throughout the tests.

use std::fmt::{Debug, Write};
use std::mem::size_of;

use crate::error::{PhError, Result};
use crate::node::{low_mask, shr, Hypercube, KeyBuf, Node, NodeId, Slot};
use crate::PhTree;

/// Shape of a tree, as reported by [`PhTree::quality`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhTreeQuality {
    /// Live nodes, including the root.
    pub node_count: usize,
    /// Stored entries.
    pub entry_count: usize,
    /// Slots that point to a child node.
    pub sub_node_count: usize,
    /// Nodes using the dense slot array.
    pub dense_nodes: usize,
    /// Nodes using the sorted sparse layout.
    pub sparse_nodes: usize,
    /// Mean number of nodes on the path from the root to an entry (root = 1).
    pub avg_entry_depth: f64,
    /// Mean of occupied slots over `2^dims` across all nodes.
    pub avg_fill_ratio: f64,
    /// Number of nodes per `post_len`, indexed by `post_len`.
    pub post_len_histogram: Vec<usize>,
}

/// Approximate heap usage in bytes, as reported by [`PhTree::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhTreeStats {
    /// Live nodes.
    pub node_count: usize,
    /// Stored entries.
    pub entry_count: usize,
    /// Arena vector holding the nodes themselves.
    pub node_memory: usize,
    /// Dense slot arrays and sparse entry vectors.
    pub slot_memory: usize,
    /// Prefixes and postfixes that spilled out of their inline buffers.
    pub key_memory: usize,
    /// Sum of the above.
    pub total_memory: usize,
}

#[inline]
fn key_heap_bytes(buf: &KeyBuf) -> usize {
    if buf.spilled() {
        buf.capacity() * size_of::<u64>()
    } else {
        0
    }
}

fn illegal(msg: String) -> PhError {
    PhError::IllegalState(msg)
}

impl<V> PhTree<V> {
    /// Visit every node with its level (root = 1), depth first.
    fn for_each_node(&self, mut f: impl FnMut(&Node<V>, usize)) {
        let mut stack: Vec<(NodeId, usize)> = self.root.map(|r| (r, 1)).into_iter().collect();
        while let Some((id, level)) = stack.pop() {
            let node = self.nodes.get(id);
            f(node, level);
            for (_, slot) in node.iter() {
                if let Slot::Child(child) = slot {
                    stack.push((*child, level + 1));
                }
            }
        }
    }

    /// Structural statistics of the tree.
    pub fn quality(&self) -> PhTreeQuality {
        let mut q = PhTreeQuality {
            post_len_histogram: vec![0; self.config.depth as usize],
            ..PhTreeQuality::default()
        };
        let mut depth_sum = 0usize;
        let mut fill_sum = 0f64;
        self.for_each_node(|node, level| {
            q.node_count += 1;
            if node.is_dense() {
                q.dense_nodes += 1;
            } else {
                q.sparse_nodes += 1;
            }
            q.post_len_histogram[node.post_len as usize] += 1;
            fill_sum += node.len() as f64 / (1u64 << node.dims()) as f64;
            for (_, slot) in node.iter() {
                match slot {
                    Slot::Child(_) => q.sub_node_count += 1,
                    Slot::Terminal { .. } => {
                        q.entry_count += 1;
                        depth_sum += level;
                    }
                }
            }
        });
        if q.entry_count > 0 {
            q.avg_entry_depth = depth_sum as f64 / q.entry_count as f64;
        }
        if q.node_count > 0 {
            q.avg_fill_ratio = fill_sum / q.node_count as f64;
        }
        q
    }

    /// Approximate memory usage.
    pub fn stats(&self) -> PhTreeStats {
        let mut s = PhTreeStats {
            node_count: self.nodes.len(),
            entry_count: self.size,
            node_memory: self.nodes.memory_usage(),
            ..PhTreeStats::default()
        };
        self.for_each_node(|node, _| {
            s.key_memory += key_heap_bytes(&node.prefix);
            s.slot_memory += match &node.cube {
                Hypercube::Dense { slots, .. } => slots.capacity() * size_of::<Option<Slot<V>>>(),
                Hypercube::Sparse(entries) => entries.capacity() * size_of::<(u64, Slot<V>)>(),
            };
            for (_, slot) in node.iter() {
                if let Slot::Terminal { postfix, .. } = slot {
                    s.key_memory += key_heap_bytes(postfix);
                }
            }
        });
        s.total_memory = s.node_memory + s.slot_memory + s.key_memory;
        s
    }

    /// Validate every structural invariant of the tree.
    ///
    /// Returns [`PhError::IllegalState`] describing the first violation found.
    pub fn check_consistency(&self) -> Result<()> {
        let Some(root) = self.root else {
            if self.size != 0 || self.nodes.len() != 0 {
                return Err(illegal(format!(
                    "empty root with size {} and {} live nodes",
                    self.size,
                    self.nodes.len()
                )));
            }
            return Ok(());
        };

        let root_node = self.nodes.get(root);
        if root_node.post_len != self.config.depth - 1 || root_node.infix_len != 0 {
            return Err(illegal(format!(
                "root at post_len {} with infix {}",
                root_node.post_len, root_node.infix_len
            )));
        }
        if root_node.prefix.iter().any(|&p| p != 0) {
            return Err(illegal("root prefix is not zero".to_string()));
        }
        if root_node.len() == 0 {
            return Err(illegal("root node is empty".to_string()));
        }

        let dims = self.config.dims;
        let capacity = 1usize << dims;
        let mut entries = 0usize;
        let mut visited = 0usize;
        let mut stack: Vec<(NodeId, Option<(NodeId, u64)>)> = vec![(root, None)];
        while let Some((id, parent)) = stack.pop() {
            visited += 1;
            let node = self.nodes.get(id);
            if node.dims() != dims {
                return Err(illegal(format!("node {id:?} has {} dimensions", node.dims())));
            }
            if node.prefix.iter().any(|&p| p & low_mask(node.post_len + 1) != 0) {
                return Err(illegal(format!("node {id:?} has bits below its prefix")));
            }

            if let Some((parent_id, pos)) = parent {
                let p = self.nodes.get(parent_id);
                if node.len() < 2 {
                    return Err(illegal(format!("inner node {id:?} holds {} slots", node.len())));
                }
                if node.post_len + node.infix_len + 1 != p.post_len {
                    return Err(illegal(format!(
                        "node {id:?}: post_len {} + infix {} + 1 != parent post_len {}",
                        node.post_len, node.infix_len, p.post_len
                    )));
                }
                for i in 0..dims {
                    if shr(node.prefix[i] ^ p.prefix[i], p.post_len + 1) != 0 {
                        return Err(illegal(format!("node {id:?} prefix disagrees with parent in dim {i}")));
                    }
                    let bit = (node.prefix[i] >> p.post_len) & 1;
                    if bit != (pos >> (dims - 1 - i)) & 1 {
                        return Err(illegal(format!("node {id:?} sits at the wrong position {pos}")));
                    }
                }
            }

            match &node.cube {
                Hypercube::Dense { slots, len } => {
                    if !self.config.dense_allowed() {
                        return Err(illegal(format!("dense node {id:?} with {dims} dimensions")));
                    }
                    if slots.len() != capacity {
                        return Err(illegal(format!("dense node {id:?} has {} slots", slots.len())));
                    }
                    let occupied = slots.iter().filter(|s| s.is_some()).count();
                    if occupied != *len {
                        return Err(illegal(format!(
                            "dense node {id:?} counts {len} slots but holds {occupied}"
                        )));
                    }
                }
                Hypercube::Sparse(sparse) => {
                    if sparse.windows(2).any(|w| w[0].0 >= w[1].0) {
                        return Err(illegal(format!("sparse node {id:?} is not sorted")));
                    }
                    if sparse.last().is_some_and(|(pos, _)| *pos as usize >= capacity) {
                        return Err(illegal(format!("sparse node {id:?} position out of range")));
                    }
                }
            }

            for (pos, slot) in node.iter() {
                match slot {
                    Slot::Terminal { postfix, .. } => {
                        entries += 1;
                        let expected = if node.post_len == 0 { 0 } else { dims };
                        if postfix.len() != expected {
                            return Err(illegal(format!(
                                "terminal in node {id:?} has {} postfix words",
                                postfix.len()
                            )));
                        }
                        if postfix.iter().any(|&w| w & !low_mask(node.post_len) != 0) {
                            return Err(illegal(format!("terminal in node {id:?} has a wide postfix")));
                        }
                    }
                    Slot::Child(child) => stack.push((*child, Some((id, pos)))),
                }
            }
        }

        if entries != self.size {
            return Err(illegal(format!("{entries} reachable entries, size is {}", self.size)));
        }
        if visited != self.nodes.len() {
            return Err(illegal(format!(
                "{visited} reachable nodes, arena holds {}",
                self.nodes.len()
            )));
        }
        Ok(())
    }
}

impl<V: Debug> PhTree<V> {
    /// One line per entry, in traversal order.
    pub fn to_string_plain(&self) -> String {
        let mut out = String::new();
        for (key, value) in self.query_extent() {
            let _ = writeln!(out, "{key:?} => {value:?}");
        }
        out
    }

    /// Indented dump of the node structure.
    pub fn to_string_tree(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "PhTree(dims={}, depth={}, size={})", self.dims(), self.depth(), self.size);
        match self.root {
            Some(root) => self.dump_node(root, 1, &mut out),
            None => out.push_str("  (empty)\n"),
        }
        out
    }

    fn dump_node(&self, id: NodeId, indent: usize, out: &mut String) {
        let node = self.nodes.get(id);
        let pad = "  ".repeat(indent);
        let _ = writeln!(
            out,
            "{pad}node post_len={} infix_len={} prefix={:?} {} ({} slots)",
            node.post_len,
            node.infix_len,
            node.prefix.as_slice(),
            if node.is_dense() { "dense" } else { "sparse" },
            node.len()
        );
        let mut key = KeyBuf::from_elem(0, node.dims());
        for (pos, slot) in node.iter() {
            match slot {
                Slot::Terminal { postfix, value } => {
                    node.write_key(pos, postfix, &mut key);
                    let _ = writeln!(out, "{pad}  [{pos}] {:?} => {value:?}", key.as_slice());
                }
                Slot::Child(child) => {
                    let _ = writeln!(out, "{pad}  [{pos}] ->");
                    self.dump_node(*child, indent + 2, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{PhError, PhTree, PhTreeConfig};

    fn sample() -> PhTree<u32> {
        let mut t = PhTree::with_config(PhTreeConfig::new(2).with_depth(8)).unwrap();
        t.put(&[1, 1], 1).unwrap();
        t.put(&[5, 5], 2).unwrap();
        t.put(&[1, 5], 3).unwrap();
        t
    }

    #[test]
    fn test_quality() {
        let t = sample();
        let q = t.quality();
        assert_eq!(q.entry_count, 3);
        assert_eq!(q.node_count, t.node_count());
        assert_eq!(q.dense_nodes + q.sparse_nodes, q.node_count);
        assert_eq!(q.sub_node_count + 1, q.node_count);
        assert_eq!(q.post_len_histogram[7], 1, "one root");
        assert!(q.avg_entry_depth > 1.0);
        assert!(q.avg_fill_ratio > 0.0 && q.avg_fill_ratio <= 1.0);

        let empty: PhTree<u32> = PhTree::new(3).unwrap();
        assert_eq!(empty.quality().node_count, 0);
        assert_eq!(empty.quality().avg_entry_depth, 0.0);
    }

    #[test]
    fn test_stats() {
        let t = sample();
        let s = t.stats();
        assert_eq!(s.entry_count, 3);
        assert_eq!(s.node_count, t.node_count());
        assert!(s.node_memory > 0);
        assert_eq!(s.total_memory, s.node_memory + s.slot_memory + s.key_memory);
    }

    #[test]
    fn test_dumps() {
        let t = sample();
        assert_eq!(t.to_string_plain(), "[1, 1] => 1\n[1, 5] => 3\n[5, 5] => 2\n");
        let tree = t.to_string_tree();
        assert!(tree.starts_with("PhTree(dims=2, depth=8, size=3)\n"));
        assert!(tree.contains("[1, 5] => 3"));
        assert!(tree.contains("post_len=7"));

        let empty: PhTree<u32> = PhTree::new(2).unwrap();
        assert!(empty.to_string_tree().contains("(empty)"));
        assert_eq!(empty.to_string_plain(), "");
    }

    #[test]
    fn test_consistency_detects_corruption() {
        let mut t = sample();
        t.check_consistency().unwrap();
        t.size += 1;
        assert!(matches!(t.check_consistency(), Err(PhError::IllegalState(_))));
        t.size -= 1;

        let root = t.root.unwrap();
        t.nodes.get_mut(root).infix_len = 3;
        assert!(matches!(t.check_consistency(), Err(PhError::IllegalState(_))));
    }
}
