//! Member bitset.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-length set of booleans indexed by quorum member position.
///
/// Valid-member and signer sets in commitments are exchanged in this form;
/// equality is positional, so two nodes agree on a commitment only if their
/// bitsets are identical.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BitSet(Vec<bool>);

impl BitSet {
    /// All-false bitset of the given length.
    pub fn with_len(len: usize) -> Self {
        Self(vec![false; len])
    }

    /// Construct from an explicit vector.
    pub fn from_vec(bits: Vec<bool>) -> Self {
        Self(bits)
    }

    /// Number of positions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set has no positions.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value at `index`, or `false` when out of range.
    pub fn get(&self, index: usize) -> bool {
        self.0.get(index).copied().unwrap_or(false)
    }

    /// Set the value at `index`. Out-of-range writes are ignored.
    pub fn set(&mut self, index: usize, value: bool) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = value;
        }
    }

    /// Count of positions set to `true`.
    pub fn count_set(&self) -> usize {
        self.0.iter().filter(|b| **b).count()
    }

    /// Whether no position is set.
    pub fn none_set(&self) -> bool {
        self.count_set() == 0
    }

    /// Iterate over the indexes of set positions.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.then_some(i))
    }

    /// Borrow the underlying slice.
    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits: String = self.0.iter().map(|b| if *b { '1' } else { '0' }).collect();
        write!(f, "BitSet({bits})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_count() {
        let mut bs = BitSet::with_len(5);
        bs.set(0, true);
        bs.set(3, true);
        assert_eq!(bs.count_set(), 2);
        assert!(bs.get(0));
        assert!(!bs.get(1));
        assert_eq!(bs.iter_set().collect::<Vec<_>>(), vec![0, 3]);
    }

    #[test]
    fn test_out_of_range_is_inert() {
        let mut bs = BitSet::with_len(2);
        bs.set(7, true);
        assert!(!bs.get(7));
        assert_eq!(bs.count_set(), 0);
    }
}
