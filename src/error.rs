//! Error types for PH-tree operations.

use thiserror::Error;

/// Errors reported by [`PhTree`](crate::PhTree) and the key codec.
///
/// A missing key is not an error: lookups report absence as `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhError {
    /// A key or query box has the wrong number of dimensions.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensionality of the tree.
        expected: usize,
        /// Length of the offending key.
        actual: usize,
    },

    /// A dimension index is not below the tree's dimensionality.
    #[error("dimension {dim} out of range for a {dims}-dimensional tree")]
    DimensionOutOfRange {
        /// Requested dimension.
        dim: usize,
        /// Dimensionality of the tree.
        dims: usize,
    },

    /// A key coordinate does not fit into the configured bit depth.
    #[error("key value {value:#x} in dimension {dim} exceeds {depth} bits")]
    KeyOutOfRange {
        /// Offending dimension.
        dim: usize,
        /// Offending coordinate.
        value: u64,
        /// Bits per dimension of the tree.
        depth: u32,
    },

    /// The tree configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An internal structural invariant does not hold.
    #[error("illegal state: {0}")]
    IllegalState(String),
}

/// Result type for PH-tree operations.
pub type Result<T> = std::result::Result<T, PhError>;
