//! Ready-made result mappers for [`PhTree::query_all_with`](crate::PhTree::query_all_with).

use crate::key::sortable_to_f64;

/// Keep only the key.
pub fn keys<V>() -> impl FnMut(&[u64], &V) -> Vec<u64> {
    |key, _| key.to_vec()
}

/// Keep only the value.
pub fn values<'a, V>() -> impl FnMut(&[u64], &'a V) -> &'a V {
    |_, value| value
}

/// Keep key and value, like [`PhTree::query_all`](crate::PhTree::query_all).
pub fn entries<'a, V>() -> impl FnMut(&[u64], &'a V) -> (Vec<u64>, &'a V) {
    |key, value| (key.to_vec(), value)
}

/// Decode keys stored with [`f64_to_sortable`](crate::key::f64_to_sortable).
pub fn f64_keys<V>() -> impl FnMut(&[u64], &V) -> Vec<f64> {
    |key, _| key.iter().map(|&k| sortable_to_f64(k)).collect()
}
