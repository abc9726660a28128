//! Masternode identity type.

use crate::hash::Hash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider-registration transaction hash identifying a masternode.
///
/// This is the stable identity of a masternode for the lifetime of its
/// registration; quorum membership, connection planning and misbehavior
/// accounting are all keyed by it.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ProTxHash(Hash);

impl ProTxHash {
    /// All-zero identity, used as a placeholder for "no local masternode".
    pub const ZERO: Self = Self(Hash::ZERO);

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Hash::from_bytes(bytes))
    }

    /// The underlying hash.
    pub fn as_hash(&self) -> &Hash {
        &self.0
    }

    /// Raw byte view.
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    /// Whether this is the zero placeholder.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Debug for ProTxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProTxHash({})", hex::encode(&self.0 .0[..8]))
    }
}

impl fmt::Display for ProTxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Hash> for ProTxHash {
    fn from(hash: Hash) -> Self {
        Self(hash)
    }
}
