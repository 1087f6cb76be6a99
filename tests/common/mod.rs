//! Shared helpers for integration tests.
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn my_test() {
//!     common::init_tracing();
//! }
//! ```
//!
//! Set `RUST_LOG` (e.g. `phtree=trace`) and enable the `tracing` feature to
//! see structural events such as node splits and merges.

#![allow(dead_code)]

use std::sync::Once;

use phtree::{PhTree, PhTreeConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install a console subscriber once per test binary.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_test_writer()
            .try_init();
    });
}

/// Tree with `dims` dimensions and `depth` bits per dimension.
pub fn tree<V>(dims: usize, depth: u32) -> PhTree<V> {
    PhTree::with_config(PhTreeConfig::new(dims).with_depth(depth)).unwrap()
}

/// `count` random keys below `2^depth`, generated from `seed`.
pub fn random_keys(seed: u64, count: usize, dims: usize, depth: u32) -> Vec<Vec<u64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let bound = if depth == 64 { u64::MAX } else { (1u64 << depth) - 1 };
    (0..count)
        .map(|_| (0..dims).map(|_| rng.gen_range(0..=bound)).collect())
        .collect()
}

/// Entries of `keys` inside `[min, max]`, sorted.
pub fn brute_force_range(keys: &[Vec<u64>], min: &[u64], max: &[u64]) -> Vec<Vec<u64>> {
    let mut out: Vec<Vec<u64>> = keys
        .iter()
        .filter(|k| (0..k.len()).all(|i| min[i] <= k[i] && k[i] <= max[i]))
        .cloned()
        .collect();
    out.sort();
    out.dedup();
    out
}
