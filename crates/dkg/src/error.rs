//! DKG error types

use quorumnet_types::{Hash, PeerId, QuorumType};
use thiserror::Error;

// ============================================================================
// Security Constants - Bounds for deserialization to prevent OOM attacks
// ============================================================================

/// Maximum size of any DKG wire message in bytes (4 MB).
///
/// The largest legitimate message is a contribution of a 400-member quorum:
/// a ~240-entry verification vector plus 400 encrypted shares, well under
/// this bound.
pub const MAX_MESSAGE_SIZE: u64 = 4 * 1024 * 1024;

/// Default misbehavior score for cryptographically invalid content.
pub const MISBEHAVIOR_SCORE_INVALID: i32 = 100;

// ============================================================================
// Error Types
// ============================================================================

/// DKG pipeline errors, grouped by how the caller must react.
#[derive(Debug, Error, Clone)]
pub enum DkgError {
    /// Message rejected at admission (over quota, duplicate, oversize).
    /// Dropped silently; the sender may be punished by the caller.
    #[error("message from {peer} rejected: {reason}")]
    InputReject {
        /// Sending peer.
        peer: PeerId,
        /// Human-readable rejection reason.
        reason: &'static str,
    },

    /// Cryptographically invalid content from a peer.
    #[error("peer {peer} misbehaved: {reason}")]
    PeerMisbehavior {
        /// Sending peer.
        peer: PeerId,
        /// What failed.
        reason: &'static str,
    },

    /// Work is still in flight; retry on the next drain iteration.
    #[error("transient: {0}")]
    Transient(&'static str),

    /// The current round must be abandoned (reorg, quorum hash moved,
    /// insufficient members).
    #[error("round aborted for quorum {quorum_hash}: {reason}")]
    AbortRound {
        /// Base block hash of the abandoned quorum.
        quorum_hash: Hash,
        /// Why the round ended.
        reason: &'static str,
    },

    /// Unrecoverable invariant violation; terminates the scheduler for this
    /// quorum type but never the process.
    #[error("fatal invariant violation in quorum type {quorum_type}: {reason}")]
    Fatal {
        /// Affected quorum type.
        quorum_type: QuorumType,
        /// Violated invariant.
        reason: &'static str,
    },

    /// Message failed to deserialize; treated as peer misbehavior.
    #[error("failed to decode {kind} message from {peer}")]
    Decode {
        /// Sending peer.
        peer: PeerId,
        /// Message kind tag.
        kind: &'static str,
    },
}

impl DkgError {
    /// Whether this error must unwind the scheduler to wait-for-new-quorum.
    pub fn is_round_abort(&self) -> bool {
        matches!(self, DkgError::AbortRound { .. })
    }

    /// Whether the sending peer should be reported to PoSe scoring.
    pub fn is_peer_fault(&self) -> bool {
        matches!(
            self,
            DkgError::PeerMisbehavior { .. } | DkgError::Decode { .. }
        )
    }

    /// Whether the operation can simply be retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, DkgError::Transient(_))
    }
}
