//! Tree configuration.

use crate::error::{PhError, Result};

/// Largest supported dimensionality. Hypercube positions are kept in a `u64`.
pub const MAX_DIMS: usize = 62;

/// Largest supported bit depth per dimension.
pub const MAX_DEPTH: u32 = 64;

/// Dense hypercubes are never used above this many dimensions by default
/// (`2^8` slots per node).
pub const DEFAULT_MAX_DENSE_DIMS: usize = 8;

/// Configuration for a [`PhTree`](crate::PhTree).
///
/// `dims` and `depth` are fixed for the lifetime of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhTreeConfig {
    /// Number of dimensions per key.
    pub dims: usize,
    /// Number of significant bits per dimension.
    pub depth: u32,
    /// Nodes switch to a dense `2^dims` slot array only if `dims` is at most this.
    pub max_dense_dims: usize,
}

impl PhTreeConfig {
    /// Configuration for `dims` dimensions with 64-bit coordinates.
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            depth: MAX_DEPTH,
            max_dense_dims: DEFAULT_MAX_DENSE_DIMS,
        }
    }

    /// Set the number of bits per dimension.
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Set the dimensionality limit for dense hypercube nodes. `0` disables them.
    pub fn with_max_dense_dims(mut self, max_dense_dims: usize) -> Self {
        self.max_dense_dims = max_dense_dims;
        self
    }

    /// Check that the configuration describes a tree that can be built.
    pub fn validate(&self) -> Result<()> {
        if self.dims == 0 || self.dims > MAX_DIMS {
            return Err(PhError::InvalidConfig(format!(
                "dims must be in 1..={MAX_DIMS}, got {}",
                self.dims
            )));
        }
        if self.depth == 0 || self.depth > MAX_DEPTH {
            return Err(PhError::InvalidConfig(format!(
                "depth must be in 1..={MAX_DEPTH}, got {}",
                self.depth
            )));
        }
        Ok(())
    }

    /// Whether nodes of this tree may use the dense hypercube layout.
    #[inline]
    pub(crate) fn dense_allowed(&self) -> bool {
        self.dims <= self.max_dense_dims
    }
}
