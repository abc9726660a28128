//! Quorum connection planning
//!
//! The DKG core never opens sockets; it derives *which* masternodes must be
//! connected and declares those sets to the external connection manager.
//! Three shapes exist:
//!
//! - the ring relay graph, `O(log n)` neighbors per member at indexes
//!   `(i + 2^k) mod n`, giving gossip diameter `O(log n)`;
//! - the full mesh, when the `all_members_connected` spork is active, with
//!   a pairwise-deterministic choice of which side initiates;
//! - the watch walk, a single seeded deterministic connection for nodes
//!   observing quorums they are not part of.

use crate::registry::{MasternodeEntry, MasternodeMetaStore};
use crate::spork::SporkFlags;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use quorumnet_types::{Hash, ProTxHash, QuorumParams, QuorumType};
use rand::RngCore;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

/// Re-probe a member when the last successful outbound connection is older
/// than this; keeps the DKG's "good connection" view fresh.
pub const PROBE_STALENESS: Duration = Duration::from_secs(10 * 60);

/// Declarative socket management interface.
///
/// Implementations resolve `ProTxHash`es to addresses through the
/// registry, open/close connections to satisfy the declared sets, and keep
/// them for `keep_old_connections` quorums.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Declare the full set of masternodes this node must connect to for a
    /// quorum, replacing any previous declaration for the same key.
    async fn set_quorum_nodes(
        &self,
        quorum_type: QuorumType,
        quorum_hash: Hash,
        nodes: BTreeSet<ProTxHash>,
    );

    /// Whether a declaration for this quorum already exists.
    async fn has_quorum_nodes(&self, quorum_type: QuorumType, quorum_hash: Hash) -> bool;

    /// Declare which quorum members messages should be relayed to.
    async fn set_relay_members(
        &self,
        quorum_type: QuorumType,
        quorum_hash: Hash,
        members: BTreeSet<ProTxHash>,
    );

    /// Schedule short-lived probe connections used for PoSe scoring.
    async fn add_probe_connections(&self, nodes: BTreeSet<ProTxHash>);
}

/// The outcome of connection planning for one quorum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPlan {
    /// Masternodes to hold open connections to.
    pub connections: BTreeSet<ProTxHash>,
    /// Members to relay DKG messages to.
    pub relay_members: BTreeSet<ProTxHash>,
    /// Whether the plan is for a member (true) or a watcher (false).
    pub is_member: bool,
}

/// Decide which of two members initiates their mutual connection.
///
/// Plain `min(a, b)` would bias towards numerically low identities, so the
/// initiator is the peer whose salted hash is smaller.
pub fn deterministic_outbound_connection(a: &ProTxHash, b: &ProTxHash) -> ProTxHash {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    let h_a = Hash::compute_parts(&[lo.as_slice(), hi.as_slice(), a.as_slice()]);
    let h_b = Hash::compute_parts(&[lo.as_slice(), hi.as_slice(), b.as_slice()]);
    if h_a < h_b {
        *a
    } else {
        *b
    }
}

/// The ring relay neighbors of the member at `index`: members at
/// `(index + 2^k) mod n` for `k = 0..max(1, ⌊log2(n-1)⌋ - 1)`, skipping
/// wrap-arounds onto the member itself.
fn ring_outbound(members: &[MasternodeEntry], index: usize) -> BTreeSet<ProTxHash> {
    let n = members.len();
    let own = members[index].pro_tx_hash;
    let mut result = BTreeSet::new();
    if n < 2 {
        return result;
    }

    let mut gap: usize = 1;
    let mut gap_max: usize = n - 1;
    let mut k: usize = 0;
    loop {
        gap_max >>= 1;
        if gap_max == 0 && k > 1 {
            break;
        }
        let neighbor = &members[(index + gap) % n];
        if neighbor.pro_tx_hash != own {
            result.insert(neighbor.pro_tx_hash);
        }
        gap <<= 1;
        k += 1;
    }
    result
}

/// The relay member set of `for_member` within the quorum ring.
///
/// With `only_outbound`, just the member's own ring neighbors; otherwise
/// also every member whose ring includes `for_member` (the inbound side).
pub fn quorum_relay_members(
    members: &[MasternodeEntry],
    for_member: &ProTxHash,
    only_outbound: bool,
) -> BTreeSet<ProTxHash> {
    let mut result = BTreeSet::new();
    for (i, member) in members.iter().enumerate() {
        if member.pro_tx_hash == *for_member {
            result.extend(ring_outbound(members, i));
        } else if !only_outbound && ring_outbound(members, i).contains(for_member) {
            result.insert(member.pro_tx_hash);
        }
    }
    result
}

/// The connection set of `for_member`: the full mesh when the
/// all-connected spork covers this quorum type, the ring otherwise.
pub fn quorum_connections(
    sporks: &SporkFlags,
    params: &QuorumParams,
    members: &[MasternodeEntry],
    for_member: &ProTxHash,
    only_outbound: bool,
) -> BTreeSet<ProTxHash> {
    if sporks.is_all_members_connected(params.quorum_type) {
        let mut result = BTreeSet::new();
        for member in members {
            if member.pro_tx_hash == *for_member {
                continue;
            }
            let initiator =
                deterministic_outbound_connection(for_member, &member.pro_tx_hash);
            // With only_outbound we keep just the pairs where the *other*
            // side is the salted-hash loser, i.e. we initiate.
            if !only_outbound || initiator == member.pro_tx_hash {
                result.insert(member.pro_tx_hash);
            }
        }
        result
    } else {
        quorum_relay_members(members, for_member, only_outbound)
    }
}

static WATCH_CONNECTION_SEED: Lazy<Hash> = Lazy::new(|| {
    let mut seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    seed.into()
});

/// Seeded deterministic walk selecting watcher connections.
///
/// Iterates `r_{k+1} = H(r_k ‖ type ‖ base_hash)` and picks member indexes
/// `r_k mod n`: different quorums give different picks, but the same
/// `(seed, type, base_block)` always gives the same ones.
pub fn watch_connections_with_seed(
    seed: &Hash,
    quorum_type: QuorumType,
    quorum_hash: &Hash,
    member_count: usize,
    connection_count: usize,
) -> BTreeSet<usize> {
    let mut result = BTreeSet::new();
    if member_count == 0 {
        return result;
    }
    let mut rnd = *seed;
    for _ in 0..connection_count {
        rnd = Hash::compute_parts(&[
            rnd.as_slice(),
            &[quorum_type.as_u8()],
            quorum_hash.as_slice(),
        ]);
        result.insert((rnd.low_u64() % member_count as u64) as usize);
    }
    result
}

/// Watcher connections using the process-wide seed.
///
/// The seed is generated once per process start; whether it should persist
/// across restarts is an integration decision, not one this crate makes.
pub fn deterministic_watch_connections(
    quorum_type: QuorumType,
    quorum_hash: &Hash,
    member_count: usize,
    connection_count: usize,
) -> BTreeSet<usize> {
    watch_connections_with_seed(
        &WATCH_CONNECTION_SEED,
        quorum_type,
        quorum_hash,
        member_count,
        connection_count,
    )
}

/// Plan connections for this node: ring/mesh sets for members, the seeded
/// single connection for watchers, nothing for uninvolved nodes.
pub fn build_connection_plan(
    sporks: &SporkFlags,
    params: &QuorumParams,
    quorum_hash: &Hash,
    members: &[MasternodeEntry],
    my_pro_tx_hash: &ProTxHash,
    watch_quorums: bool,
) -> Option<ConnectionPlan> {
    let is_member = members.iter().any(|m| m.pro_tx_hash == *my_pro_tx_hash);

    if is_member {
        Some(ConnectionPlan {
            connections: quorum_connections(sporks, params, members, my_pro_tx_hash, true),
            relay_members: quorum_relay_members(members, my_pro_tx_hash, true),
            is_member: true,
        })
    } else if watch_quorums {
        let picks = deterministic_watch_connections(
            params.quorum_type,
            quorum_hash,
            members.len(),
            1,
        );
        let connections: BTreeSet<ProTxHash> = picks
            .into_iter()
            .map(|idx| members[idx].pro_tx_hash)
            .collect();
        Some(ConnectionPlan {
            relay_members: connections.clone(),
            connections,
            is_member: false,
        })
    } else {
        None
    }
}

/// Declare the connection plan for a quorum to the connection manager.
///
/// Returns whether this node has any stake in the quorum (member or
/// watcher).
pub async fn ensure_quorum_connections(
    connection_manager: &dyn ConnectionManager,
    sporks: &SporkFlags,
    params: &QuorumParams,
    quorum_hash: &Hash,
    members: &[MasternodeEntry],
    my_pro_tx_hash: &ProTxHash,
    watch_quorums: bool,
) -> bool {
    let Some(plan) = build_connection_plan(
        sporks,
        params,
        quorum_hash,
        members,
        my_pro_tx_hash,
        watch_quorums,
    ) else {
        return false;
    };

    if !plan.connections.is_empty() {
        if !connection_manager
            .has_quorum_nodes(params.quorum_type, *quorum_hash)
            .await
        {
            info!(
                quorum_type = %params.quorum_type,
                quorum_hash = %quorum_hash,
                connections = plan.connections.len(),
                is_member = plan.is_member,
                "declaring quorum connections"
            );
        }
        connection_manager
            .set_quorum_nodes(params.quorum_type, *quorum_hash, plan.connections)
            .await;
    }
    if !plan.relay_members.is_empty() {
        connection_manager
            .set_relay_members(params.quorum_type, *quorum_hash, plan.relay_members)
            .await;
    }
    true
}

/// Schedule PoSe probe connections to members not recently reached.
pub async fn add_quorum_probe_connections(
    connection_manager: &dyn ConnectionManager,
    meta_store: &dyn MasternodeMetaStore,
    sporks: &SporkFlags,
    params: &QuorumParams,
    quorum_hash: &Hash,
    members: &[MasternodeEntry],
    my_pro_tx_hash: &ProTxHash,
) {
    if !sporks.is_quorum_pose_enabled(params.quorum_type) {
        return;
    }

    let mut probes = BTreeSet::new();
    for member in members {
        if member.pro_tx_hash == *my_pro_tx_hash {
            continue;
        }
        let stale = meta_store
            .time_since_last_outbound_success(&member.pro_tx_hash)
            .map(|age| age > PROBE_STALENESS)
            .unwrap_or(true);
        if stale {
            probes.insert(member.pro_tx_hash);
        }
    }

    if !probes.is_empty() {
        debug!(
            quorum_type = %params.quorum_type,
            quorum_hash = %quorum_hash,
            probes = probes.len(),
            "scheduling quorum probe connections"
        );
        connection_manager.add_probe_connections(probes).await;
    }
}
