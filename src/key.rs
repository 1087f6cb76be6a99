//! Key codec: raw coordinates to canonical trie words and back.
//!
//! The tree itself stores one `u64` per dimension and interleaves the bits of
//! all dimensions implicitly while descending. Signed and floating point
//! coordinates are first mapped through order-preserving bijections so that
//! unsigned bit order matches numeric order.

use crate::error::{PhError, Result};

const SIGN_BIT: u64 = 1u64 << 63;

// =============================================================================
// Scalar transcoding
// =============================================================================

/// Map an `i64` to a `u64` with the same ordering.
#[inline]
pub fn i64_to_sortable(value: i64) -> u64 {
    (value as u64) ^ SIGN_BIT
}

/// Inverse of [`i64_to_sortable`].
#[inline]
pub fn sortable_to_i64(bits: u64) -> i64 {
    (bits ^ SIGN_BIT) as i64
}

/// Map an `f64` to a `u64` with the same ordering.
///
/// Negative values sort before positive ones and `-0.0` sorts directly before
/// `0.0`. The position of NaN is unspecified.
#[inline]
pub fn f64_to_sortable(value: f64) -> u64 {
    let bits = value.to_bits();
    if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits | SIGN_BIT
    }
}

/// Inverse of [`f64_to_sortable`].
#[inline]
pub fn sortable_to_f64(bits: u64) -> f64 {
    if bits & SIGN_BIT != 0 {
        f64::from_bits(bits & !SIGN_BIT)
    } else {
        f64::from_bits(!bits)
    }
}

// =============================================================================
// Key vectors
// =============================================================================

/// A raw key vector that can be encoded into trie words.
pub trait BitKey {
    /// Number of coordinates.
    fn dims(&self) -> usize;

    /// Write the encoded coordinates into `out`; `out.len() == self.dims()`.
    fn write_bits(&self, out: &mut [u64]);
}

impl BitKey for [u64] {
    fn dims(&self) -> usize {
        self.len()
    }

    fn write_bits(&self, out: &mut [u64]) {
        out.copy_from_slice(self);
    }
}

impl BitKey for [i64] {
    fn dims(&self) -> usize {
        self.len()
    }

    fn write_bits(&self, out: &mut [u64]) {
        for (o, &v) in out.iter_mut().zip(self) {
            *o = i64_to_sortable(v);
        }
    }
}

impl BitKey for [f64] {
    fn dims(&self) -> usize {
        self.len()
    }

    fn write_bits(&self, out: &mut [u64]) {
        for (o, &v) in out.iter_mut().zip(self) {
            *o = f64_to_sortable(v);
        }
    }
}

impl<T, const N: usize> BitKey for [T; N]
where
    [T]: BitKey,
{
    fn dims(&self) -> usize {
        N
    }

    fn write_bits(&self, out: &mut [u64]) {
        self.as_slice().write_bits(out);
    }
}

/// Encode `key` into `out`, failing if the lengths differ.
pub fn key_bits_into<K: BitKey + ?Sized>(key: &K, out: &mut [u64]) -> Result<()> {
    if key.dims() != out.len() {
        return Err(PhError::DimensionMismatch {
            expected: out.len(),
            actual: key.dims(),
        });
    }
    key.write_bits(out);
    Ok(())
}

/// Encode `key` for a tree with `dims` dimensions.
pub fn key_bits<K: BitKey + ?Sized>(key: &K, dims: usize) -> Result<Vec<u64>> {
    let mut out = vec![0u64; dims];
    key_bits_into(key, &mut out)?;
    Ok(out)
}

/// Decode trie words produced from `u64` coordinates. These are stored as-is.
pub fn bits_to_u64(bits: &[u64]) -> Vec<u64> {
    bits.to_vec()
}

/// Decode trie words produced from `i64` coordinates.
pub fn bits_to_i64(bits: &[u64]) -> Vec<i64> {
    bits.iter().map(|&b| sortable_to_i64(b)).collect()
}

/// Decode trie words produced from `f64` coordinates.
pub fn bits_to_f64(bits: &[u64]) -> Vec<f64> {
    bits.iter().map(|&b| sortable_to_f64(b)).collect()
}

// =============================================================================
// Explicit interleaving
// =============================================================================

/// Interleave the low `depth` bits of every coordinate, MSB first.
///
/// Within one bit level dimension 0 comes first. The result is packed into
/// 64-bit words, most significant bit of word 0 first; trailing bits of the
/// last word are zero. Comparing two results lexicographically gives the
/// order in which the tree visits keys.
pub fn interleave(key: &[u64], depth: u32) -> Vec<u64> {
    let total = key.len() * depth as usize;
    let mut out = vec![0u64; total.div_ceil(64)];
    let mut idx = 0usize;
    for bit in (0..depth).rev() {
        for &k in key {
            if (k >> bit) & 1 != 0 {
                out[idx / 64] |= 1u64 << (63 - idx % 64);
            }
            idx += 1;
        }
    }
    out
}

/// Inverse of [`interleave`].
pub fn deinterleave(bits: &[u64], dims: usize, depth: u32) -> Result<Vec<u64>> {
    let needed = (dims * depth as usize).div_ceil(64);
    if bits.len() != needed {
        return Err(PhError::DimensionMismatch {
            expected: needed,
            actual: bits.len(),
        });
    }
    let mut key = vec![0u64; dims];
    let mut idx = 0usize;
    for bit in (0..depth).rev() {
        for k in key.iter_mut() {
            if (bits[idx / 64] >> (63 - idx % 64)) & 1 != 0 {
                *k |= 1u64 << bit;
            }
            idx += 1;
        }
    }
    Ok(key)
}
