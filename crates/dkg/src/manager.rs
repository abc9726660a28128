//! DKG lifecycle coordinator
//!
//! The `DkgManager` owns one [`DkgSessionHandler`] per configured quorum
//! type. It fans chain tip notifications out to every handler, dispatches
//! incoming network messages by command tag and leading quorum-type byte,
//! answers INV-style "already have" queries across all pending buffers,
//! and owns the process-wide verified-contributions cache.

use crate::config::DkgConfig;
use crate::error::MISBEHAVIOR_SCORE_INVALID;
use crate::handler::{DkgServices, DkgSessionHandler, QuorumPhase};
use crate::messages::{
    Complaint, Contribution, Justification, MessageKind, PrematureCommitment,
};
use parking_lot::Mutex;
use quorumnet_crypto::{SecretShare, VerificationVector};
use quorumnet_types::{BlockIndex, Hash, PeerId, ProTxHash, QuorumParams, QuorumType};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Verified contributions are kept this long after their last write; the
/// quorum manager reads them right after finalization, so a minute is
/// plenty.
const MAX_CONTRIBUTION_CACHE_AGE: Duration = Duration::from_secs(60);

#[derive(Clone, PartialEq, Eq, Hash)]
struct ContributionKey {
    quorum_type: QuorumType,
    quorum_hash: Hash,
    pro_tx_hash: ProTxHash,
}

struct ContributionEntry {
    written_at: Instant,
    vvec: VerificationVector,
    share: SecretShare,
}

/// Process-wide store of verified DKG contributions.
///
/// Owned by the lifecycle coordinator, written by the phase handlers when
/// a round finalizes, read by the external quorum manager to build signing
/// shares. Entries expire after [`MAX_CONTRIBUTION_CACHE_AGE`]; nothing is
/// persisted across restarts.
#[derive(Default)]
pub struct VerifiedContributionsCache {
    entries: Mutex<HashMap<ContributionKey, ContributionEntry>>,
}

impl VerifiedContributionsCache {
    /// Record a valid member's verification vector and the share it dealt
    /// to this node.
    pub fn insert(
        &self,
        quorum_type: QuorumType,
        quorum_hash: Hash,
        pro_tx_hash: ProTxHash,
        vvec: VerificationVector,
        share: SecretShare,
    ) {
        self.entries.lock().insert(
            ContributionKey {
                quorum_type,
                quorum_hash,
                pro_tx_hash,
            },
            ContributionEntry {
                written_at: Instant::now(),
                vvec,
                share,
            },
        );
    }

    /// Fetch a member's verified contribution, if still cached.
    pub fn get(
        &self,
        quorum_type: QuorumType,
        quorum_hash: &Hash,
        pro_tx_hash: &ProTxHash,
    ) -> Option<(VerificationVector, SecretShare)> {
        let entries = self.entries.lock();
        let entry = entries.get(&ContributionKey {
            quorum_type,
            quorum_hash: *quorum_hash,
            pro_tx_hash: *pro_tx_hash,
        })?;
        Some((entry.vvec.clone(), entry.share.clone()))
    }

    /// Drop entries older than the cache age.
    pub fn cleanup(&self) {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.written_at.elapsed() <= MAX_CONTRIBUTION_CACHE_AGE);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Owns and coordinates the per-quorum-type DKG session handlers.
pub struct DkgManager {
    services: Arc<DkgServices>,
    handlers: HashMap<QuorumType, DkgSessionHandler>,
    watchers: Mutex<HashSet<PeerId>>,
}

impl DkgManager {
    /// Build a manager with one handler per configured quorum type.
    ///
    /// Invalid parameter sets are skipped with a warning rather than
    /// aborting node startup.
    pub fn new(
        quorum_params: Vec<QuorumParams>,
        config: DkgConfig,
        services: Arc<DkgServices>,
    ) -> Self {
        let mut handlers = HashMap::new();
        for params in quorum_params {
            if let Err(err) = params.validate() {
                warn!(
                    quorum_type = %params.quorum_type,
                    %err,
                    "skipping quorum type with invalid parameters"
                );
                continue;
            }
            let quorum_type = params.quorum_type;
            handlers.insert(
                quorum_type,
                DkgSessionHandler::new(params, config.clone(), Arc::clone(&services)),
            );
        }
        info!(quorum_types = handlers.len(), "DKG manager created");
        Self {
            services,
            handlers,
            watchers: Mutex::new(HashSet::new()),
        }
    }

    /// The shared collaborator bundle (exposed for the node wiring).
    pub fn services(&self) -> &Arc<DkgServices> {
        &self.services
    }

    /// Start every phase handler worker.
    pub fn start(&self) {
        for handler in self.handlers.values() {
            handler.start();
        }
    }

    /// Stop every phase handler and wait for their workers to exit.
    ///
    /// Buffers live inside the handlers, so they are only dropped after
    /// their consumer has stopped.
    pub async fn stop(&self) {
        for handler in self.handlers.values() {
            handler.stop().await;
        }
        info!("DKG manager stopped");
    }

    /// Chain tip notification.
    ///
    /// Skipped wholesale during initial block download and while the DKG
    /// spork is off; neither state should spin up sessions.
    pub fn updated_block_tip(&self, tip: &Arc<BlockIndex>, initial_download: bool) {
        self.services.contributions.cleanup();

        if initial_download {
            return;
        }
        if !self.services.sporks.dkg_enabled {
            return;
        }
        for handler in self.handlers.values() {
            handler.updated_block_tip(tip);
        }
    }

    /// Route an incoming network message.
    ///
    /// The first byte of every payload-carrying DKG message is its quorum
    /// type; routing peeks at it without a full decode.
    pub fn process_message(&self, peer: PeerId, command: &str, bytes: Vec<u8>) {
        if !self.services.sporks.dkg_enabled {
            return;
        }
        let Some(kind) = MessageKind::from_command(command) else {
            return;
        };

        if kind == MessageKind::Watch {
            debug!(%peer, "peer subscribed to quorum watching");
            self.watchers.lock().insert(peer);
            return;
        }

        if bytes.is_empty() {
            self.services.peer_scoring.punish(
                peer,
                MISBEHAVIOR_SCORE_INVALID,
                "empty DKG message",
            );
            return;
        }

        let quorum_type = QuorumType(bytes[0]);
        let Some(handler) = self.handlers.get(&quorum_type) else {
            self.services.peer_scoring.punish(
                peer,
                MISBEHAVIOR_SCORE_INVALID,
                "DKG message for unknown quorum type",
            );
            return;
        };
        handler.process_message(peer, kind, bytes);
    }

    /// Whether `peer` asked to watch quorum traffic.
    pub fn is_watcher(&self, peer: &PeerId) -> bool {
        self.watchers.lock().contains(peer)
    }

    /// Forget a disconnected peer's watch subscription.
    pub fn peer_disconnected(&self, peer: &PeerId) {
        self.watchers.lock().remove(peer);
    }

    /// Whether any handler's buffers admitted a message with this digest.
    /// Used to answer INV queries without decoding.
    pub fn already_have(&self, digest: &Hash) -> bool {
        self.handlers
            .values()
            .any(|handler| handler.already_have(digest))
    }

    /// Current `(phase, quorum_hash)` of one quorum type, for diagnostics.
    pub fn phase_and_quorum(&self, quorum_type: QuorumType) -> Option<(QuorumPhase, Hash)> {
        self.handlers
            .get(&quorum_type)
            .map(|handler| handler.phase_and_quorum())
    }

    /// Serve a stored contribution to a requesting peer.
    pub async fn get_contribution(&self, hash: &Hash) -> Option<Contribution> {
        for handler in self.handlers.values() {
            if let Some(msg) = handler.get_contribution(hash).await {
                return Some(msg);
            }
        }
        None
    }

    /// Serve a stored complaint to a requesting peer.
    pub async fn get_complaint(&self, hash: &Hash) -> Option<Complaint> {
        for handler in self.handlers.values() {
            if let Some(msg) = handler.get_complaint(hash).await {
                return Some(msg);
            }
        }
        None
    }

    /// Serve a stored justification to a requesting peer.
    pub async fn get_justification(&self, hash: &Hash) -> Option<Justification> {
        for handler in self.handlers.values() {
            if let Some(msg) = handler.get_justification(hash).await {
                return Some(msg);
            }
        }
        None
    }

    /// Serve a stored premature commitment to a requesting peer.
    pub async fn get_premature_commitment(&self, hash: &Hash) -> Option<PrematureCommitment> {
        for handler in self.handlers.values() {
            if let Some(msg) = handler.get_premature_commitment(hash).await {
                return Some(msg);
            }
        }
        None
    }
}
