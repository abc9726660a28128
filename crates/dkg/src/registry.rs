//! Collaborator interfaces
//!
//! The DKG core never owns chain state, the masternode list, sockets or
//! peer scoring; it consumes them through the traits defined here. All of
//! them are snapshot-style in-memory lookups on the node side, so they are
//! synchronous; anything that actually performs I/O lives behind the async
//! traits in [`crate::handler`] and [`crate::connections`].

use crate::messages::FinalCommitment;
use quorumnet_crypto::BlsPublicKey;
use quorumnet_types::{BlockIndex, Hash, PeerId, ProTxHash};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// One masternode as seen by the deterministic registry at some block.
#[derive(Clone, Debug)]
pub struct MasternodeEntry {
    /// Stable masternode identity.
    pub pro_tx_hash: ProTxHash,
    /// Precomputed `H(pro_tx_hash ‖ confirmed_hash)`, maintained by the
    /// registry so quorum scoring needs only one more hash per candidate.
    pub confirmed_hash_with_pro_tx_hash: Hash,
    /// BLS operator key: signs DKG messages, receives encrypted shares.
    pub operator_pubkey: BlsPublicKey,
    /// Last known network address.
    pub address: SocketAddr,
}

/// Deterministic masternode list provider.
///
/// Every node must produce the identical list for the same block, in the
/// same order; quorum membership is derived from it.
pub trait MasternodeRegistry: Send + Sync {
    /// Snapshot of eligible (registered, confirmed, non-banned) masternodes
    /// at `base_block`.
    fn members_at(&self, base_block: &Arc<BlockIndex>) -> Vec<MasternodeEntry>;
}

/// Per-masternode connection metadata, used for PoSe probe planning.
pub trait MasternodeMetaStore: Send + Sync {
    /// How long ago the last successful outbound connection to this
    /// masternode completed. `None` if never connected.
    fn time_since_last_outbound_success(&self, pro_tx_hash: &ProTxHash) -> Option<Duration>;
}

/// Peer misbehavior reporting (PoSe scoring input).
pub trait PeerScoring: Send + Sync {
    /// Report `peer` for misbehavior worth `score` points.
    fn punish(&self, peer: PeerId, score: i32, reason: &str);
}

/// Receiver of finalized quorum commitments.
///
/// On a masternode this feeds the block producer, which carries the
/// commitment in a transaction within the mining window.
pub trait CommitmentSink: Send + Sync {
    /// Hand over a final commitment for mining.
    fn submit_commitment(&self, commitment: FinalCommitment);
}

/// No-op scoring, for observers and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPeerScoring;

impl PeerScoring for NullPeerScoring {
    fn punish(&self, _peer: PeerId, _score: i32, _reason: &str) {}
}
