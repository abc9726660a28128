//! Quorum type identifiers and per-type DKG parameters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Small-integer identifier of a quorum type.
///
/// Each configured quorum type runs its own independent DKG schedule.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct QuorumType(pub u8);

impl QuorumType {
    /// Raw identifier byte, used as the leading byte of every DKG wire
    /// message.
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for QuorumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable per-quorum-type parameters.
///
/// These mirror chain consensus parameters: every node must agree on them
/// for membership and phase scheduling to be deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumParams {
    /// Quorum type identifier.
    pub quorum_type: QuorumType,
    /// Human-readable name used in logs.
    pub name: &'static str,
    /// Target member count.
    pub size: usize,
    /// Minimum member count for a viable quorum.
    pub min_size: usize,
    /// Number of members required to produce a quorum signature.
    pub threshold: usize,
    /// Blocks between the start of consecutive DKG rounds.
    pub dkg_interval: u64,
    /// Blocks per DKG phase.
    pub dkg_phase_blocks: u64,
    /// Offset (in blocks from the base block) at which the final commitment
    /// becomes mineable.
    pub dkg_mining_window_start: u64,
    /// Offset at which the mining window closes.
    pub dkg_mining_window_end: u64,
    /// Number of complaints against a member before it is marked bad.
    pub dkg_bad_votes_threshold: usize,
    /// How many recent quorums of this type stay active for signing.
    pub signing_active_quorum_count: usize,
    /// How many old quorum connection sets to keep alive.
    pub keep_old_connections: usize,
    /// Members asked to create a recovered signature per signing attempt.
    pub recovery_members: usize,
}

impl QuorumParams {
    /// Small 3-of-2 quorum used on test networks: one DKG per 24 blocks,
    /// two blocks per phase, mining window 10..18.
    pub const TEST_3_2: QuorumParams = QuorumParams {
        quorum_type: QuorumType(100),
        name: "quorum_test",
        size: 3,
        min_size: 2,
        threshold: 2,
        dkg_interval: 24,
        dkg_phase_blocks: 2,
        dkg_mining_window_start: 10,
        dkg_mining_window_end: 18,
        dkg_bad_votes_threshold: 2,
        signing_active_quorum_count: 4,
        keep_old_connections: 5,
        recovery_members: 3,
    };

    /// 50-member quorum with a 60% threshold, hourly interval.
    pub const TYPE_50_60: QuorumParams = QuorumParams {
        quorum_type: QuorumType(1),
        name: "quorum_50_60",
        size: 50,
        min_size: 40,
        threshold: 30,
        dkg_interval: 24,
        dkg_phase_blocks: 2,
        dkg_mining_window_start: 10,
        dkg_mining_window_end: 18,
        dkg_bad_votes_threshold: 40,
        signing_active_quorum_count: 24,
        keep_old_connections: 25,
        recovery_members: 25,
    };

    /// 400-member quorum with a 60% threshold, daily interval.
    pub const TYPE_400_60: QuorumParams = QuorumParams {
        quorum_type: QuorumType(2),
        name: "quorum_400_60",
        size: 400,
        min_size: 300,
        threshold: 240,
        dkg_interval: 576,
        dkg_phase_blocks: 4,
        dkg_mining_window_start: 20,
        dkg_mining_window_end: 28,
        dkg_bad_votes_threshold: 300,
        signing_active_quorum_count: 4,
        keep_old_connections: 5,
        recovery_members: 100,
    };

    /// Check internal consistency of the parameters.
    pub fn validate(&self) -> Result<(), QuorumParamsError> {
        if self.size == 0 || self.min_size == 0 || self.min_size > self.size {
            return Err(QuorumParamsError::Sizes);
        }
        if self.threshold == 0 || self.threshold > self.size {
            return Err(QuorumParamsError::Threshold);
        }
        if self.dkg_phase_blocks == 0 {
            return Err(QuorumParamsError::PhaseBlocks);
        }
        // Six phases (Initialized..Finalize) must fit into one interval,
        // followed by the mining window.
        if self.dkg_interval < self.dkg_phase_blocks * 6 {
            return Err(QuorumParamsError::Interval);
        }
        if self.dkg_mining_window_start < self.dkg_phase_blocks * 5
            || self.dkg_mining_window_end <= self.dkg_mining_window_start
            || self.dkg_mining_window_end >= self.dkg_interval
        {
            return Err(QuorumParamsError::MiningWindow);
        }
        Ok(())
    }
}

/// Parameter validation failure.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QuorumParamsError {
    /// `size`/`min_size` are inconsistent.
    #[error("quorum size parameters are inconsistent")]
    Sizes,
    /// `threshold` is out of range.
    #[error("quorum threshold out of range")]
    Threshold,
    /// `dkg_phase_blocks` must be non-zero.
    #[error("dkg_phase_blocks must be non-zero")]
    PhaseBlocks,
    /// Phases do not fit into the DKG interval.
    #[error("dkg_interval too small for six phases")]
    Interval,
    /// Mining window is not inside the interval after the phases.
    #[error("dkg mining window out of range")]
    MiningWindow,
}
