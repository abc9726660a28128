//! Network feature flags (sporks)
//!
//! Sporks are network-wide switches distributed out-of-band; the DKG core
//! only ever evaluates them as predicates. The value semantics follow the
//! original deployment practice: `0` enables a feature everywhere, `1`
//! enables it everywhere except the large quorum types, anything else
//! disables it. The mapping from value to policy is configuration, not
//! protocol.

use quorumnet_types::QuorumType;

/// How a spork value applies across quorum types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SporkPolicy {
    /// Active for every quorum type.
    Enabled,
    /// Active except for the listed quorum types (typically the large ones,
    /// where the feature would be too expensive).
    EnabledExcept(&'static [QuorumType]),
    /// Inactive everywhere.
    Disabled,
}

impl SporkPolicy {
    fn applies_to(&self, quorum_type: QuorumType) -> bool {
        match self {
            SporkPolicy::Enabled => true,
            SporkPolicy::EnabledExcept(excluded) => !excluded.contains(&quorum_type),
            SporkPolicy::Disabled => false,
        }
    }
}

/// The set of spork-controlled switches the DKG core consults.
#[derive(Debug, Clone)]
pub struct SporkFlags {
    /// Whether DKG sessions run at all.
    pub dkg_enabled: bool,
    /// Full-mesh connectivity instead of ring relays.
    pub all_members_connected: SporkPolicy,
    /// Short-lived probe connections feeding PoSe scoring.
    pub quorum_pose: SporkPolicy,
}

impl SporkFlags {
    /// Whether every pair of members of this quorum type should be
    /// directly connected.
    pub fn is_all_members_connected(&self, quorum_type: QuorumType) -> bool {
        self.all_members_connected.applies_to(quorum_type)
    }

    /// Whether PoSe probing is active for this quorum type.
    pub fn is_quorum_pose_enabled(&self, quorum_type: QuorumType) -> bool {
        self.quorum_pose.applies_to(quorum_type)
    }
}

impl Default for SporkFlags {
    fn default() -> Self {
        Self {
            dkg_enabled: true,
            all_members_connected: SporkPolicy::Enabled,
            quorum_pose: SporkPolicy::Disabled,
        }
    }
}
