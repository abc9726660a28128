//! SHA-256 hash type for quorumnet.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 hash (32 bytes)
///
/// Serde passes the raw byte array through, which bincode encodes as
/// exactly 32 bytes with no length prefix; message routing relies on that
/// fixed layout. Hex only appears in `Display`/`Debug` output, the DKG
/// wire format has no human-readable form.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Zero hash constant
    pub const ZERO: Self = Self([0u8; 32]);

    /// Compute SHA-256 hash of data
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }

    /// Compute a single SHA-256 over the concatenation of several parts.
    ///
    /// Used for protocol hashes of the form `H(a ‖ b ‖ c)` without an
    /// intermediate allocation.
    pub fn compute_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        let result = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to byte slice
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Interpret the leading 8 bytes as a little-endian integer.
    ///
    /// Matches how deterministic index selection folds a hash down to a
    /// ring position.
    pub fn low_u64(&self) -> u64 {
        let mut le = [0u8; 8];
        le.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(le)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_compute() {
        let data = b"hello world";
        let hash = Hash::compute(data);
        assert_ne!(hash, Hash::ZERO);
    }

    #[test]
    fn test_hash_deterministic() {
        let data = b"test data";
        let hash1 = Hash::compute(data);
        let hash2 = Hash::compute(data);
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_compute_parts_matches_concatenation() {
        let joined = Hash::compute(b"abcdef");
        let parts = Hash::compute_parts(&[b"ab", b"cd", b"ef"]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn test_wire_encoding_is_exactly_32_bytes() {
        // Message routing peeks at fixed offsets, so the encoding must be
        // the bare array with no length prefix.
        let hash = Hash::compute(b"wire");
        let encoded = bincode::serialize(&hash).expect("serialize");
        assert_eq!(encoded.len(), 32);
        assert_eq!(encoded, hash.as_slice());

        let decoded: Hash = bincode::deserialize(&encoded).expect("deserialize");
        assert_eq!(decoded, hash);
    }

    #[test]
    fn test_hash_display() {
        let hash = Hash::compute(b"test");
        let s = hash.to_string();
        assert_eq!(s.len(), 64); // 32 bytes * 2 hex chars
    }
}
