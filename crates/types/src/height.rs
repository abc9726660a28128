//! Block height type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Block height in the blockchain.
///
/// Heights start at 0 (genesis) and increment sequentially. DKG phase
/// scheduling works in modular arithmetic over heights, so the type carries
/// the small set of operations that math needs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Height(u64);

impl Height {
    /// Create a new Height.
    pub const fn new(value: u64) -> Self {
        Height(value)
    }

    /// Get the height value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Get the next height.
    pub fn next(&self) -> Self {
        Height(self.0 + 1)
    }

    /// Height lowered by `blocks`, saturating at genesis.
    pub fn saturating_sub(&self, blocks: u64) -> Self {
        Height(self.0.saturating_sub(blocks))
    }

    /// Remainder of the height within a cycle of `interval` blocks.
    pub fn cycle_offset(&self, interval: u64) -> u64 {
        self.0 % interval
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Height {
    fn from(value: u64) -> Self {
        Height(value)
    }
}
