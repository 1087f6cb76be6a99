use super::*;

use proptest::prelude::*;
use std::collections::BTreeMap;

const DEPTH: u32 = 8;

fn validate_tree<V>(t: &PhTree<V>) {
    if let Err(e) = t.check_consistency() {
        panic!("{e}");
    }
    let q = t.quality();
    assert_eq!(q.entry_count, t.len(), "reachable entries must match PhTree::len");
    assert_eq!(q.node_count, t.node_count(), "reachable nodes must match the arena");
}

fn tree(dims: usize) -> PhTree<u64> {
    PhTree::with_config(PhTreeConfig::new(dims).with_depth(DEPTH)).unwrap()
}

#[derive(Clone, Debug)]
enum Op {
    Put(Vec<u64>, u64),
    Remove(Vec<u64>),
    Get(Vec<u64>),
    Update(Vec<u64>, Vec<u64>),
    Query(Vec<u64>, Vec<u64>),
    Clear,
}

fn key_strategy(dims: usize) -> impl Strategy<Value = Vec<u64>> + Clone {
    // Mostly small coordinates so keys collide and share prefixes.
    let coord = prop_oneof![
        3 => 0u64..16,
        1 => 0u64..(1 << DEPTH),
    ];
    prop::collection::vec(coord, dims)
}

fn ops_strategy(dims: usize) -> impl Strategy<Value = Vec<Op>> {
    let key = key_strategy(dims);
    let op = prop_oneof![
        45 => (key.clone(), any::<u64>()).prop_map(|(k, v)| Op::Put(k, v)),
        20 => key.clone().prop_map(Op::Remove),
        15 => key.clone().prop_map(Op::Get),
        10 => (key.clone(), key.clone()).prop_map(|(a, b)| Op::Update(a, b)),
        9 => (key.clone(), key.clone()).prop_map(|(a, b)| Op::Query(a, b)),
        1 => Just(Op::Clear),
    ];
    prop::collection::vec(op, 0..=1000)
}

fn model_query(m: &BTreeMap<Vec<u64>, u64>, min: &[u64], max: &[u64]) -> Vec<(Vec<u64>, u64)> {
    m.iter()
        .filter(|(k, _)| k.iter().zip(min.iter().zip(max)).all(|(x, (lo, hi))| lo <= x && x <= hi))
        .map(|(k, v)| (k.clone(), *v))
        .collect()
}

fn run_ops(dims: usize, ops: Vec<Op>) -> std::result::Result<(), TestCaseError> {
    let mut t = tree(dims);
    let mut m: BTreeMap<Vec<u64>, u64> = BTreeMap::new();

    for op in ops {
        match op {
            Op::Put(key, value) => {
                let old_t = t.put(&key, value).unwrap();
                let old_m = m.insert(key, value);
                prop_assert_eq!(old_t, old_m);
            }
            Op::Remove(key) => {
                let old_t = t.remove(&key).unwrap();
                let old_m = m.remove(&key);
                prop_assert_eq!(old_t, old_m);
            }
            Op::Get(key) => {
                let got_t = t.get(&key).unwrap().copied();
                let got_m = m.get(&key).copied();
                prop_assert_eq!(got_t, got_m);
            }
            Op::Update(from, to) => {
                let got_t = t.update(&from, &to).unwrap().copied();
                let got_m = if m.contains_key(&from) && !m.contains_key(&to) {
                    let v = m.remove(&from).unwrap();
                    m.insert(to, v);
                    Some(v)
                } else {
                    None
                };
                prop_assert_eq!(got_t, got_m);
            }
            Op::Query(a, b) => {
                let min: Vec<u64> = a.iter().zip(&b).map(|(x, y)| *x.min(y)).collect();
                let max: Vec<u64> = a.iter().zip(&b).map(|(x, y)| *x.max(y)).collect();
                let mut got: Vec<(Vec<u64>, u64)> =
                    t.query(&min, &max).unwrap().map(|(k, v)| (k, *v)).collect();
                got.sort();
                let expected = model_query(&m, &min, &max);
                prop_assert_eq!(t.is_range_empty(&min, &max).unwrap(), expected.is_empty());
                prop_assert_eq!(got, expected);
            }
            Op::Clear => {
                t.clear();
                m.clear();
            }
        }

        prop_assert_eq!(t.len(), m.len());
    }

    validate_tree(&t);
    let mut got: Vec<(Vec<u64>, u64)> = t.query_extent().map(|(k, v)| (k, *v)).collect();
    got.sort();
    let expected: Vec<(Vec<u64>, u64)> = m.into_iter().collect();
    prop_assert_eq!(got, expected);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence_2d(ops in ops_strategy(2)) {
        run_ops(2, ops)?;
    }

    #[test]
    fn prop_equivalence_3d(ops in ops_strategy(3)) {
        run_ops(3, ops)?;
    }

    #[test]
    fn prop_equivalence_1d(ops in ops_strategy(1)) {
        run_ops(1, ops)?;
    }

    #[test]
    fn prop_sparse_only_matches_dense(keys in prop::collection::vec(key_strategy(3), 0..300)) {
        let mut dense = tree(3);
        let mut sparse: PhTree<u64> = PhTree::with_config(
            PhTreeConfig::new(3).with_depth(DEPTH).with_max_dense_dims(0),
        ).unwrap();
        for (i, k) in keys.iter().enumerate() {
            prop_assert_eq!(dense.put(k, i as u64).unwrap(), sparse.put(k, i as u64).unwrap());
        }
        prop_assert_eq!(sparse.quality().dense_nodes, 0);
        let a: Vec<_> = dense.query_extent().collect();
        let b: Vec<_> = sparse.query_extent().collect();
        prop_assert_eq!(a, b);
        validate_tree(&sparse);
    }

    #[test]
    fn prop_knn_matches_brute_force(
        keys in prop::collection::vec(key_strategy(2), 1..200),
        q in key_strategy(2),
        n in 1usize..8,
    ) {
        let mut t = tree(2);
        for k in &keys {
            t.put(k, 0).unwrap();
        }
        let mut dists: Vec<f64> = t
            .query_extent()
            .map(|(k, _)| PhDistanceL.dist(&k, &q))
            .collect();
        dists.sort_by(f64::total_cmp);
        let got = t.nearest_neighbour(n, &q).unwrap();
        let cutoff = dists[n.min(dists.len()) - 1];
        let expected_len = dists.iter().filter(|&&d| d <= cutoff).count();
        prop_assert_eq!(got.len(), expected_len);
        prop_assert!(got.iter().all(|k| PhDistanceL.dist(k, &q) <= cutoff));
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

fn small_key_set() -> Vec<Vec<u64>> {
    // Shared prefixes, an infix split, a dense node and one far outlier.
    vec![
        vec![0, 0],
        vec![0, 1],
        vec![1, 1],
        vec![1, 0],
        vec![8, 9],
        vec![12, 9],
        vec![255, 128],
    ]
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys = small_key_set();
    let mut reference: Option<String> = None;

    for_each_permutation(&keys, |perm| {
        let mut t = tree(2);
        let mut m: BTreeMap<Vec<u64>, u64> = BTreeMap::new();

        for k in perm {
            let v = k[0] * 1000 + k[1];
            assert_eq!(t.put(&k, v).unwrap(), m.insert(k, v));
        }

        validate_tree(&t);
        let mut got: Vec<(Vec<u64>, u64)> = t.query_extent().map(|(k, v)| (k, *v)).collect();
        got.sort();
        let expected: Vec<(Vec<u64>, u64)> = m.into_iter().collect();
        assert_eq!(got, expected);

        // The node structure does not depend on insertion order.
        let shape = t.to_string_tree();
        match &reference {
            Some(r) => assert_eq!(&shape, r),
            None => reference = Some(shape),
        }
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    let keys = small_key_set();

    // Insert in a fixed order, then remove in all permutations.
    let mut base_tree = tree(2);
    let mut base_map: BTreeMap<Vec<u64>, u64> = BTreeMap::new();
    for (i, k) in keys.iter().enumerate() {
        let v = i as u64;
        assert_eq!(base_tree.put(k, v).unwrap(), base_map.insert(k.clone(), v));
    }

    for_each_permutation(&keys, |perm| {
        let mut t = base_tree.clone();
        let mut m = base_map.clone();

        for k in perm {
            assert_eq!(t.remove(&k).unwrap(), m.remove(&k));
            assert_eq!(t.len(), m.len());
            validate_tree(&t);
        }
        assert_eq!(t.len(), 0);
        assert!(t.root.is_none());
        assert_eq!(t.node_count(), 0);
    });
}
