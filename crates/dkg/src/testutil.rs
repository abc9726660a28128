//! Shared helpers for unit tests.

use crate::registry::{MasternodeEntry, MasternodeRegistry};
use quorumnet_crypto::{BlsKeyPair, BlsSecretKey};
use quorumnet_types::{BlockIndex, Hash, Height, ProTxHash};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

/// Deterministic operator key pair for masternode `id`.
pub fn test_keypair(id: u8) -> BlsKeyPair {
    BlsKeyPair::from_secret_key(BlsSecretKey::from_seed(&[id; 32]))
}

/// Synthetic registry entry for masternode `id`.
pub fn test_entry(id: u8) -> MasternodeEntry {
    let pro_tx_hash = ProTxHash::from_bytes([id; 32]);
    MasternodeEntry {
        pro_tx_hash,
        confirmed_hash_with_pro_tx_hash: Hash::compute_parts(&[
            pro_tx_hash.as_slice(),
            b"confirmed",
        ]),
        operator_pubkey: test_keypair(id).public_key,
        address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000 + id as u16),
    }
}

/// Registry that always returns the same entries.
pub struct FixedRegistry {
    pub entries: Vec<MasternodeEntry>,
}

impl FixedRegistry {
    pub fn with_ids(ids: &[u8]) -> Self {
        Self {
            entries: ids.iter().map(|id| test_entry(*id)).collect(),
        }
    }
}

impl MasternodeRegistry for FixedRegistry {
    fn members_at(&self, _base_block: &Arc<BlockIndex>) -> Vec<MasternodeEntry> {
        self.entries.clone()
    }
}

/// A straight chain of `len` blocks starting at genesis height 0.
pub fn test_chain(len: u64) -> Vec<Arc<BlockIndex>> {
    let mut blocks = vec![BlockIndex::genesis(Hash::compute(b"genesis"))];
    for i in 1..len {
        let hash = Hash::compute_parts(&[b"block", &i.to_le_bytes()]);
        let child = BlockIndex::new_child(&blocks[(i - 1) as usize], hash);
        blocks.push(child);
    }
    blocks
}

/// The block at `height` in a freshly built test chain.
pub fn block_at(chain: &[Arc<BlockIndex>], height: u64) -> Arc<BlockIndex> {
    let block = &chain[height as usize];
    debug_assert_eq!(block.height(), Height::new(height));
    Arc::clone(block)
}
