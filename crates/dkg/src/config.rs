//! DKG runtime configuration

use std::time::Duration;

/// Node-local knobs for the DKG pipeline.
///
/// Everything here is local tuning; nothing in this struct may influence
/// protocol outcomes, which are fully determined by
/// [`quorumnet_types::QuorumParams`] and chain state.
#[derive(Clone, Debug)]
pub struct DkgConfig {
    /// Watch quorums this node is not a member of (default: off).
    pub watch_quorums: bool,
    /// Per-peer admission cap for each pending message buffer (default: 5).
    pub max_messages_per_peer: usize,
    /// Fraction of the phase window used for the pre-phase jitter sleep
    /// (default: 0.5).
    pub phase_sleep_factor: f64,
    /// Messages popped from a pending buffer per drain iteration
    /// (default: 16).
    pub drain_batch_size: usize,
    /// Expected block spacing of the underlying chain, used to translate
    /// phase windows into sleep times (default: 150s).
    pub block_target_spacing: Duration,
}

impl Default for DkgConfig {
    fn default() -> Self {
        Self {
            watch_quorums: false,
            max_messages_per_peer: 5,
            phase_sleep_factor: 0.5,
            drain_batch_size: 16,
            block_target_spacing: Duration::from_secs(150),
        }
    }
}

impl DkgConfig {
    /// Enable or disable watch mode.
    pub fn with_watch_quorums(mut self, watch: bool) -> Self {
        self.watch_quorums = watch;
        self
    }

    /// Set the per-peer buffer admission cap.
    pub fn with_max_messages_per_peer(mut self, max: usize) -> Self {
        self.max_messages_per_peer = max;
        self
    }

    /// Set the pre-phase jitter factor.
    pub fn with_phase_sleep_factor(mut self, factor: f64) -> Self {
        self.phase_sleep_factor = factor;
        self
    }

    /// Set the drain batch size.
    pub fn with_drain_batch_size(mut self, size: usize) -> Self {
        self.drain_batch_size = size;
        self
    }

    /// Set the expected block spacing.
    pub fn with_block_target_spacing(mut self, spacing: Duration) -> Self {
        self.block_target_spacing = spacing;
        self
    }
}
