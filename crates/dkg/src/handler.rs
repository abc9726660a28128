//! Per-quorum-type DKG phase scheduler
//!
//! One `DkgSessionHandler` exists per configured quorum type. It owns the
//! four pending message buffers and a dedicated worker task that walks the
//! phase state machine in lock-step with chain height:
//!
//! ```text
//! Idle -> Initialized -> Contribute -> Complain -> Justify -> Commit -> Finalize -> Idle
//! ```
//!
//! Phase transitions are driven exclusively by [`DkgSessionHandler::updated_block_tip`];
//! the worker only ever *waits* for the observed phase to change, polling at
//! 100 ms so shutdown and reorgs are always serviced. A quorum-hash change
//! while a round is live aborts the session, clears the buffers and returns
//! the worker to waiting for the next quorum.

use crate::config::DkgConfig;
use crate::connections::{
    add_quorum_probe_connections, ensure_quorum_connections, ConnectionManager,
};
use crate::error::{DkgError, MISBEHAVIOR_SCORE_INVALID};
use crate::membership::{MemberList, MembershipCalculator};
use crate::messages::{
    self, Complaint, Contribution, Justification, MessageKind, PrematureCommitment,
};
use crate::pending::PendingMessages;
use crate::registry::{CommitmentSink, MasternodeMetaStore, PeerScoring};
use crate::session::{DkgSession, MisbehaviorReport};
use crate::spork::SporkFlags;
use async_trait::async_trait;
use parking_lot::Mutex;
use quorumnet_crypto::{BlsKeyPair, BlsWorker, SigCheckJob, DST_DKG_MESSAGE};
use quorumnet_metrics::dkg::{
    DKG_CURRENT_PHASE, DKG_PEERS_PUNISHED, DKG_PHASE_DURATION, DKG_SESSIONS_ABORTED,
    DKG_SESSIONS_STARTED,
};
use quorumnet_types::{BlockIndex, Hash, Height, PeerId, ProTxHash, QuorumParams};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Poll interval of every blocking wait in the worker; bounds shutdown and
/// reorg reaction time.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Peer id used when the handler loops its own broadcasts back through the
/// pending buffers, so local messages follow the same validation path.
pub const LOCAL_PEER: PeerId = PeerId(u64::MAX);

/// DKG phase, aligned to block-height windows within the DKG interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum QuorumPhase {
    /// First `dkg_phase_blocks` of a round: session setup.
    Initialized = 1,
    /// Members broadcast contributions.
    Contribute = 2,
    /// Members broadcast complaints.
    Complain = 3,
    /// Accused members broadcast justifications.
    Justify = 4,
    /// Members broadcast premature commitments.
    Commit = 5,
    /// Shares are aggregated into the final commitment.
    Finalize = 6,
    /// No DKG activity until the next interval.
    Idle = 7,
}

impl QuorumPhase {
    /// The phase starting at `offset` blocks into the DKG interval, if a
    /// phase boundary lies exactly there.
    fn from_interval_offset(offset: u64, phase_blocks: u64) -> Option<QuorumPhase> {
        if offset % phase_blocks != 0 {
            return None;
        }
        match offset / phase_blocks + 1 {
            1 => Some(QuorumPhase::Initialized),
            2 => Some(QuorumPhase::Contribute),
            3 => Some(QuorumPhase::Complain),
            4 => Some(QuorumPhase::Justify),
            5 => Some(QuorumPhase::Commit),
            6 => Some(QuorumPhase::Finalize),
            7 => Some(QuorumPhase::Idle),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            QuorumPhase::Initialized => "initialized",
            QuorumPhase::Contribute => "contribute",
            QuorumPhase::Complain => "complain",
            QuorumPhase::Justify => "justify",
            QuorumPhase::Commit => "commit",
            QuorumPhase::Finalize => "finalize",
            QuorumPhase::Idle => "idle",
        }
    }
}

impl std::fmt::Display for QuorumPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outgoing DKG message transport.
///
/// Implementations relay to the declared quorum relay members; the handler
/// does not care how.
#[async_trait]
pub trait DkgNetwork: Send + Sync {
    /// Broadcast an encoded DKG message to the quorum.
    async fn broadcast_dkg_message(&self, kind: MessageKind, bytes: Vec<u8>);
}

/// The local node's masternode identity, if any.
#[derive(Clone)]
pub struct LocalIdentity {
    /// Our ProRegTx hash; [`ProTxHash::ZERO`] on non-masternodes.
    pub pro_tx_hash: ProTxHash,
    /// Our operator key pair; `None` on non-masternodes.
    pub keypair: Option<BlsKeyPair>,
}

impl LocalIdentity {
    /// Identity of a node that is not a masternode.
    pub fn none() -> Self {
        Self {
            pro_tx_hash: ProTxHash::ZERO,
            keypair: None,
        }
    }
}

/// Shared collaborator bundle handed to every handler.
pub struct DkgServices {
    /// Membership calculator (shared cache).
    pub membership: Arc<MembershipCalculator>,
    /// Connection manager for declaring quorum connection sets.
    pub connections: Arc<dyn ConnectionManager>,
    /// Masternode connection metadata for probe planning.
    pub masternode_meta: Arc<dyn MasternodeMetaStore>,
    /// PoSe misbehavior reporting.
    pub peer_scoring: Arc<dyn PeerScoring>,
    /// Destination for finalized commitments.
    pub commitment_sink: Arc<dyn CommitmentSink>,
    /// Outgoing message transport.
    pub network: Arc<dyn DkgNetwork>,
    /// Network feature flags.
    pub sporks: SporkFlags,
    /// Shared BLS worker pool.
    pub bls_worker: BlsWorker,
    /// This node's masternode identity.
    pub local: LocalIdentity,
    /// Coordinator-owned store of verified contributions.
    pub contributions: Arc<crate::manager::VerifiedContributionsCache>,
}

#[derive(Clone)]
struct PhaseSnapshot {
    phase: QuorumPhase,
    height: Height,
    quorum_hash: Hash,
    base_block: Option<Arc<BlockIndex>>,
}

struct HandlerShared {
    params: QuorumParams,
    config: DkgConfig,
    services: Arc<DkgServices>,
    phase_state: Mutex<PhaseSnapshot>,
    stop_requested: AtomicBool,
    tip_notify: Notify,
    session: tokio::sync::Mutex<Option<DkgSession>>,
    pending_contributions: PendingMessages,
    pending_complaints: PendingMessages,
    pending_justifications: PendingMessages,
    pending_premature_commitments: PendingMessages,
}

impl HandlerShared {
    fn phase_and_quorum(&self) -> (QuorumPhase, Hash) {
        let state = self.phase_state.lock();
        (state.phase, state.quorum_hash)
    }

    fn snapshot(&self) -> PhaseSnapshot {
        self.phase_state.lock().clone()
    }

    fn buffer_for(&self, kind: MessageKind) -> Option<&PendingMessages> {
        match kind {
            MessageKind::Contribution => Some(&self.pending_contributions),
            MessageKind::Complaint => Some(&self.pending_complaints),
            MessageKind::Justification => Some(&self.pending_justifications),
            MessageKind::PrematureCommitment => Some(&self.pending_premature_commitments),
            MessageKind::Watch => None,
        }
    }

    fn clear_buffers(&self) {
        self.pending_contributions.clear();
        self.pending_complaints.clear();
        self.pending_justifications.clear();
        self.pending_premature_commitments.clear();
    }

    fn stopping(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn punish(&self, peer: PeerId, reason: &str) {
        if peer == LOCAL_PEER {
            return;
        }
        DKG_PEERS_PUNISHED
            .with_label_values(&[&self.params.quorum_type.to_string()])
            .inc();
        self.services
            .peer_scoring
            .punish(peer, MISBEHAVIOR_SCORE_INVALID, reason);
    }
}

/// Handles sequential DKG sessions of one quorum type.
pub struct DkgSessionHandler {
    shared: Arc<HandlerShared>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl DkgSessionHandler {
    /// Create a handler; [`DkgSessionHandler::start`] spawns its worker.
    pub fn new(params: QuorumParams, config: DkgConfig, services: Arc<DkgServices>) -> Self {
        let quorum_type = params.quorum_type;
        let max_per_peer = config.max_messages_per_peer;
        let shared = Arc::new(HandlerShared {
            phase_state: Mutex::new(PhaseSnapshot {
                phase: QuorumPhase::Idle,
                height: Height::new(0),
                quorum_hash: Hash::ZERO,
                base_block: None,
            }),
            stop_requested: AtomicBool::new(false),
            tip_notify: Notify::new(),
            session: tokio::sync::Mutex::new(None),
            pending_contributions: PendingMessages::new(
                quorum_type,
                MessageKind::Contribution,
                max_per_peer,
            ),
            pending_complaints: PendingMessages::new(
                quorum_type,
                MessageKind::Complaint,
                max_per_peer,
            ),
            pending_justifications: PendingMessages::new(
                quorum_type,
                MessageKind::Justification,
                max_per_peer,
            ),
            pending_premature_commitments: PendingMessages::new(
                quorum_type,
                MessageKind::PrematureCommitment,
                max_per_peer,
            ),
            params,
            config,
            services,
        });
        Self {
            shared,
            worker: Mutex::new(None),
        }
    }

    /// Spawn the phase handler worker.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            warn!(
                quorum_type = %self.shared.params.quorum_type,
                "phase handler already started"
            );
            return;
        }
        let shared = Arc::clone(&self.shared);
        *worker = Some(tokio::spawn(async move {
            phase_handler_loop(shared).await;
        }));
    }

    /// Request shutdown and wait for the worker to exit.
    pub async fn stop(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        self.shared.tip_notify.notify_waiters();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    /// Chain tip moved: recompute the phase alignment.
    ///
    /// Non-blocking; called from the chain notifier.
    pub fn updated_block_tip(&self, tip: &Arc<BlockIndex>) {
        let params = &self.shared.params;
        let offset = tip.height().cycle_offset(params.dkg_interval);
        let base_height = tip.height().saturating_sub(offset);
        let Some(base_block) = tip.ancestor(base_height) else {
            // The notifier handed us a detached header; nothing to align to.
            warn!(
                quorum_type = %params.quorum_type,
                height = %tip.height(),
                "tip has no ancestor at quorum base height"
            );
            return;
        };

        let mut state = self.shared.phase_state.lock();
        let old_phase = state.phase;
        state.height = tip.height();
        state.quorum_hash = base_block.hash();
        state.base_block = Some(base_block);
        if let Some(phase) = QuorumPhase::from_interval_offset(offset, params.dkg_phase_blocks) {
            state.phase = phase;
        }
        debug!(
            quorum_type = %params.quorum_type,
            height = %state.height,
            quorum_hash = %state.quorum_hash,
            old_phase = %old_phase,
            new_phase = %state.phase,
            "updated block tip"
        );
        DKG_CURRENT_PHASE
            .with_label_values(&[&params.quorum_type.to_string()])
            .set(if state.phase == QuorumPhase::Idle {
                0
            } else {
                state.phase as i64
            });
        drop(state);
        self.shared.tip_notify.notify_waiters();
    }

    /// Route a raw network message into the right pending buffer.
    ///
    /// Returns whether the message was admitted; rejections are flood
    /// control, not misbehavior.
    pub fn process_message(&self, peer: PeerId, kind: MessageKind, bytes: Vec<u8>) -> bool {
        match self.shared.buffer_for(kind) {
            Some(buffer) => buffer.push(peer, bytes).is_ok(),
            None => false,
        }
    }

    /// Current `(phase, quorum_hash)` for diagnostics.
    pub fn phase_and_quorum(&self) -> (QuorumPhase, Hash) {
        self.shared.phase_and_quorum()
    }

    /// Whether any buffer has admitted a message with this digest.
    pub fn already_have(&self, digest: &Hash) -> bool {
        self.shared.pending_contributions.has_seen(digest)
            || self.shared.pending_complaints.has_seen(digest)
            || self.shared.pending_justifications.has_seen(digest)
            || self.shared.pending_premature_commitments.has_seen(digest)
    }

    /// Look up a stored contribution while the Contribute window is open.
    pub async fn get_contribution(&self, hash: &Hash) -> Option<Contribution> {
        let (phase, _) = self.phase_and_quorum();
        if !(QuorumPhase::Initialized..=QuorumPhase::Contribute).contains(&phase) {
            return None;
        }
        let session = self.shared.session.lock().await;
        session.as_ref()?.get_contribution(hash).cloned()
    }

    /// Look up a stored complaint while the Complain window is open.
    pub async fn get_complaint(&self, hash: &Hash) -> Option<Complaint> {
        let (phase, _) = self.phase_and_quorum();
        if !(QuorumPhase::Contribute..=QuorumPhase::Complain).contains(&phase) {
            return None;
        }
        let session = self.shared.session.lock().await;
        session.as_ref()?.get_complaint(hash).cloned()
    }

    /// Look up a stored justification while the Justify window is open.
    pub async fn get_justification(&self, hash: &Hash) -> Option<Justification> {
        let (phase, _) = self.phase_and_quorum();
        if !(QuorumPhase::Complain..=QuorumPhase::Justify).contains(&phase) {
            return None;
        }
        let session = self.shared.session.lock().await;
        session.as_ref()?.get_justification(hash).cloned()
    }

    /// Look up a view-validated premature commitment while the Commit
    /// window is open.
    pub async fn get_premature_commitment(&self, hash: &Hash) -> Option<PrematureCommitment> {
        let (phase, _) = self.phase_and_quorum();
        if !(QuorumPhase::Justify..=QuorumPhase::Commit).contains(&phase) {
            return None;
        }
        let session = self.shared.session.lock().await;
        session.as_ref()?.get_premature_commitment(hash).cloned()
    }
}

// ======================================================================
// Worker internals
// ======================================================================

/// Wire-message plumbing shared by the four phase drains.
#[async_trait]
trait WireMessage: DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: MessageKind;

    fn pro_tx_hash(&self) -> &ProTxHash;
    fn sign_hash(&self) -> Hash;
    fn signature(&self) -> &quorumnet_crypto::BlsSignature;

    /// The phase-start step producing this node's own broadcast.
    fn start_step(session: &mut DkgSession) -> Result<Option<Self>, DkgError>;

    /// Feed one validated message into the session.
    async fn receive(
        session: &mut DkgSession,
        peer: PeerId,
        msg: Self,
    ) -> Result<Vec<MisbehaviorReport>, DkgError>;
}

#[async_trait]
impl WireMessage for Contribution {
    const KIND: MessageKind = MessageKind::Contribution;

    fn pro_tx_hash(&self) -> &ProTxHash {
        &self.pro_tx_hash
    }
    fn sign_hash(&self) -> Hash {
        Contribution::sign_hash(self)
    }
    fn signature(&self) -> &quorumnet_crypto::BlsSignature {
        &self.sig
    }
    fn start_step(session: &mut DkgSession) -> Result<Option<Self>, DkgError> {
        session.contribute()
    }
    async fn receive(
        session: &mut DkgSession,
        peer: PeerId,
        msg: Self,
    ) -> Result<Vec<MisbehaviorReport>, DkgError> {
        session.receive_contribution(peer, msg).await
    }
}

#[async_trait]
impl WireMessage for Complaint {
    const KIND: MessageKind = MessageKind::Complaint;

    fn pro_tx_hash(&self) -> &ProTxHash {
        &self.pro_tx_hash
    }
    fn sign_hash(&self) -> Hash {
        Complaint::sign_hash(self)
    }
    fn signature(&self) -> &quorumnet_crypto::BlsSignature {
        &self.sig
    }
    fn start_step(session: &mut DkgSession) -> Result<Option<Self>, DkgError> {
        session.verify_and_complain()
    }
    async fn receive(
        session: &mut DkgSession,
        peer: PeerId,
        msg: Self,
    ) -> Result<Vec<MisbehaviorReport>, DkgError> {
        session.receive_complaint(peer, msg)
    }
}

#[async_trait]
impl WireMessage for Justification {
    const KIND: MessageKind = MessageKind::Justification;

    fn pro_tx_hash(&self) -> &ProTxHash {
        &self.pro_tx_hash
    }
    fn sign_hash(&self) -> Hash {
        Justification::sign_hash(self)
    }
    fn signature(&self) -> &quorumnet_crypto::BlsSignature {
        &self.sig
    }
    fn start_step(session: &mut DkgSession) -> Result<Option<Self>, DkgError> {
        session.verify_and_justify()
    }
    async fn receive(
        session: &mut DkgSession,
        peer: PeerId,
        msg: Self,
    ) -> Result<Vec<MisbehaviorReport>, DkgError> {
        session.receive_justification(peer, msg).await
    }
}

#[async_trait]
impl WireMessage for PrematureCommitment {
    const KIND: MessageKind = MessageKind::PrematureCommitment;

    fn pro_tx_hash(&self) -> &ProTxHash {
        &self.pro_tx_hash
    }
    fn sign_hash(&self) -> Hash {
        PrematureCommitment::sign_hash(self)
    }
    fn signature(&self) -> &quorumnet_crypto::BlsSignature {
        &self.sig
    }
    fn start_step(session: &mut DkgSession) -> Result<Option<Self>, DkgError> {
        session.verify_and_commit()
    }
    async fn receive(
        session: &mut DkgSession,
        peer: PeerId,
        msg: Self,
    ) -> Result<Vec<MisbehaviorReport>, DkgError> {
        session.receive_commitment(peer, msg).await
    }
}

async fn phase_handler_loop(shared: Arc<HandlerShared>) {
    info!(
        quorum_type = %shared.params.quorum_type,
        name = shared.params.name,
        "phase handler worker started"
    );
    while !shared.stopping() {
        match handle_dkg_round(&shared).await {
            Ok(()) => {}
            Err(err) if err.is_round_abort() => {
                DKG_SESSIONS_ABORTED
                    .with_label_values(&[&shared.params.quorum_type.to_string()])
                    .inc();
                info!(
                    quorum_type = %shared.params.quorum_type,
                    %err,
                    "aborted current DKG round"
                );
                shared.clear_buffers();
                *shared.session.lock().await = None;
            }
            Err(err @ DkgError::Fatal { .. }) => {
                // The rest of the node keeps running; only this quorum
                // type's scheduler dies.
                error!(
                    quorum_type = %shared.params.quorum_type,
                    %err,
                    "fatal error, stopping phase handler"
                );
                break;
            }
            Err(err) => {
                warn!(
                    quorum_type = %shared.params.quorum_type,
                    %err,
                    "unexpected round error"
                );
            }
        }
    }
    info!(
        quorum_type = %shared.params.quorum_type,
        "phase handler worker exiting"
    );
}

fn abort(quorum_hash: Hash, reason: &'static str) -> DkgError {
    DkgError::AbortRound {
        quorum_hash,
        reason,
    }
}

/// Sleep ~100 ms or until a tip update arrives.
async fn poll_wait(shared: &HandlerShared) {
    let _ = tokio::time::timeout(WAIT_POLL_INTERVAL, shared.tip_notify.notified()).await;
}

/// Block until the observed phase equals `next` under the expected quorum.
///
/// `expected_quorum_hash` of `None` disables the reorg check (used while
/// waiting for a round to begin).
async fn wait_for_phase(
    shared: &HandlerShared,
    current: Option<QuorumPhase>,
    next: QuorumPhase,
    expected_quorum_hash: Option<Hash>,
) -> Result<(), DkgError> {
    loop {
        if shared.stopping() {
            return Err(abort(expected_quorum_hash.unwrap_or(Hash::ZERO), "shutdown"));
        }
        let (phase, quorum_hash) = shared.phase_and_quorum();
        if let Some(expected) = expected_quorum_hash {
            if quorum_hash != expected {
                return Err(abort(expected, "quorum hash changed"));
            }
        }
        if phase == next {
            return Ok(());
        }
        if let Some(current) = current {
            if phase != current {
                return Err(abort(
                    expected_quorum_hash.unwrap_or(quorum_hash),
                    "unexpected phase change",
                ));
            }
        }
        poll_wait(shared).await;
    }
}

/// Block until the quorum hash moves off `old_quorum_hash`.
async fn wait_for_new_quorum(shared: &HandlerShared, old_quorum_hash: Hash) -> Result<(), DkgError> {
    loop {
        if shared.stopping() {
            return Err(abort(old_quorum_hash, "shutdown"));
        }
        let (_, quorum_hash) = shared.phase_and_quorum();
        if quorum_hash != old_quorum_hash {
            return Ok(());
        }
        poll_wait(shared).await;
    }
}

/// Deterministic pre-phase jitter: a member-specific fraction of the phase
/// window, seeded by `(quorum_hash, member_index)` so the spread is
/// auditable and identical across restarts.
fn phase_sleep_duration(
    shared: &HandlerShared,
    quorum_hash: &Hash,
    member_index: usize,
) -> Duration {
    let params = &shared.params;
    let config = &shared.config;
    // Blocks can arrive early; never count the last block of the window.
    let window = config
        .block_target_spacing
        .saturating_mul(params.dkg_phase_blocks.saturating_sub(1) as u32);
    let seed = Hash::compute_parts(&[
        quorum_hash.as_slice(),
        &(member_index as u64).to_le_bytes(),
    ]);
    let fraction = (seed.low_u64() % 1000) as f64 / 1000.0;
    window.mul_f64(config.phase_sleep_factor.clamp(0.0, 1.0) * fraction)
}

/// Sleep the jittered pre-phase delay, waking every poll interval to honor
/// shutdown, reorgs and faster-than-expected block progress.
async fn sleep_before_phase(
    shared: &HandlerShared,
    current: QuorumPhase,
    expected_quorum_hash: Hash,
    member_index: usize,
) -> Result<(), DkgError> {
    let sleep_total = phase_sleep_duration(shared, &expected_quorum_hash, member_index);
    if sleep_total.is_zero() {
        return Ok(());
    }
    let start = Instant::now();
    let start_height = shared.snapshot().height;
    debug!(
        quorum_type = %shared.params.quorum_type,
        phase = %current,
        sleep_ms = sleep_total.as_millis() as u64,
        "sleeping before phase"
    );

    while start.elapsed() < sleep_total {
        if shared.stopping() {
            return Err(abort(expected_quorum_hash, "shutdown"));
        }
        let state = shared.snapshot();
        if state.phase != current || state.quorum_hash != expected_quorum_hash {
            return Err(abort(
                expected_quorum_hash,
                "phase moved during pre-phase sleep",
            ));
        }
        if state.height > start_height {
            // Blocks are outpacing the planned sleep; start working now.
            let blocks = state.height.value() - start_height.value();
            let expected = shared
                .config
                .block_target_spacing
                .saturating_mul(blocks as u32);
            if expected > sleep_total {
                break;
            }
        }
        poll_wait(shared).await;
    }
    Ok(())
}

/// Decode, signature-check and validate one popped batch, returning the
/// messages that survived.
async fn validate_batch<T: WireMessage>(
    shared: &HandlerShared,
    session: &DkgSession,
    raw: Vec<(PeerId, Vec<u8>)>,
) -> Vec<(PeerId, T)> {
    let mut decoded: Vec<(PeerId, T)> = Vec::with_capacity(raw.len());
    for (peer, bytes) in raw {
        match messages::decode::<T>(&bytes) {
            Ok(msg) => decoded.push((peer, msg)),
            Err(_) => {
                let err = DkgError::Decode {
                    peer,
                    kind: T::KIND.command_tag(),
                };
                debug!(%err, "dropping undecodable message");
                shared.punish(peer, "failed to deserialize DKG message");
            }
        }
    }
    if decoded.is_empty() {
        return decoded;
    }

    // Operator signature check for the whole batch on the BLS worker.
    let mut jobs = Vec::with_capacity(decoded.len());
    let mut checked: Vec<(PeerId, T)> = Vec::with_capacity(decoded.len());
    for (peer, msg) in decoded {
        let Some(index) = session.member_index(msg.pro_tx_hash()) else {
            debug!(%peer, kind = %T::KIND, "message from non-member");
            shared.punish(peer, "DKG message from non-member");
            continue;
        };
        jobs.push(SigCheckJob {
            public_key: session.members()[index].operator_pubkey.clone(),
            msg: msg.sign_hash().as_slice().to_vec(),
            dst: DST_DKG_MESSAGE,
            signature: msg.signature().clone(),
        });
        checked.push((peer, msg));
    }

    let results = match shared.services.bls_worker.verify_message_sigs(jobs).await {
        Ok(results) => results,
        Err(_) => return Vec::new(),
    };
    checked
        .into_iter()
        .zip(results)
        .filter_map(|((peer, msg), ok)| {
            if ok {
                Some((peer, msg))
            } else {
                debug!(%peer, kind = %T::KIND, "invalid operator signature");
                shared.punish(peer, "invalid DKG message signature");
                None
            }
        })
        .collect()
}

/// Pop and process one batch from the phase's buffer.
/// Returns whether any message was handled.
async fn process_pending_batch<T: WireMessage>(
    shared: &HandlerShared,
    session: &mut DkgSession,
) -> Result<bool, DkgError> {
    let buffer = shared
        .buffer_for(T::KIND)
        .expect("payload kinds always have a buffer");
    let raw = buffer.pop(shared.config.drain_batch_size);
    if raw.is_empty() {
        return Ok(false);
    }

    let valid = validate_batch::<T>(shared, session, raw).await;
    for (peer, msg) in valid {
        match T::receive(session, peer, msg).await {
            Ok(reports) => {
                for MisbehaviorReport { peer, reason, .. } in reports {
                    shared.punish(peer, reason);
                }
            }
            Err(err) if err.is_peer_fault() => {
                shared.punish(peer, "rejected DKG message");
                debug!(%peer, %err, "message rejected by session");
            }
            Err(err) if err.is_round_abort() => return Err(err),
            Err(err) => {
                debug!(%peer, %err, "transient failure while processing message");
            }
        }
    }
    Ok(true)
}

/// Run one full phase: jittered sleep, phase-start broadcast, then drain
/// the buffer until the chain moves the handler into `next`.
async fn handle_phase<T: WireMessage + serde::Serialize>(
    shared: &HandlerShared,
    current: QuorumPhase,
    next: QuorumPhase,
    expected_quorum_hash: Hash,
) -> Result<(), DkgError> {
    let started = Instant::now();
    let member_index = {
        let session = shared.session.lock().await;
        session
            .as_ref()
            .map(|s| s.my_member_index())
            .unwrap_or_default()
    };

    sleep_before_phase(shared, current, expected_quorum_hash, member_index).await?;

    // Phase-start output: broadcast and loop back through our own buffer so
    // the local message takes the identical validation path.
    {
        let mut session_slot = shared.session.lock().await;
        let session = session_slot.as_mut().ok_or(DkgError::Fatal {
            quorum_type: shared.params.quorum_type,
            reason: "phase entered without a session",
        })?;
        if let Some(msg) = T::start_step(session)? {
            let bytes = messages::encode(&msg).map_err(|_| DkgError::Fatal {
                quorum_type: shared.params.quorum_type,
                reason: "failed to encode own DKG message",
            })?;
            if let Some(buffer) = shared.buffer_for(T::KIND) {
                let _ = buffer.push(LOCAL_PEER, bytes.clone());
            }
            shared
                .services
                .network
                .broadcast_dkg_message(T::KIND, bytes)
                .await;
        }
    }

    // Drain until the next phase window opens.
    loop {
        if shared.stopping() {
            return Err(abort(expected_quorum_hash, "shutdown"));
        }
        let (phase, quorum_hash) = shared.phase_and_quorum();
        if quorum_hash != expected_quorum_hash {
            return Err(abort(expected_quorum_hash, "quorum hash changed"));
        }
        if phase == next {
            break;
        }
        if phase != current {
            return Err(abort(expected_quorum_hash, "unexpected phase change"));
        }

        let processed = {
            let mut session_slot = shared.session.lock().await;
            match session_slot.as_mut() {
                Some(session) => process_pending_batch::<T>(shared, session).await?,
                None => false,
            }
        };
        if !processed {
            poll_wait(shared).await;
        }
    }

    DKG_PHASE_DURATION
        .with_label_values(&[
            &shared.params.quorum_type.to_string(),
            current.as_str(),
        ])
        .observe(started.elapsed().as_secs_f64());
    Ok(())
}

/// One complete DKG round, from waiting for the interval boundary to
/// emitting the final commitment.
async fn handle_dkg_round(shared: &HandlerShared) -> Result<(), DkgError> {
    wait_for_phase(shared, None, QuorumPhase::Initialized, None).await?;

    shared.clear_buffers();
    let snapshot = shared.snapshot();
    let quorum_hash = snapshot.quorum_hash;
    let base_block = snapshot.base_block.clone().ok_or(DkgError::Fatal {
        quorum_type: shared.params.quorum_type,
        reason: "initialized phase without a base block",
    })?;

    let members: MemberList = shared
        .services
        .membership
        .members_for(&shared.params, &base_block);

    let local = &shared.services.local;
    let is_member = members
        .iter()
        .any(|m| m.pro_tx_hash == local.pro_tx_hash)
        && local.keypair.is_some();

    let involved = ensure_quorum_connections(
        shared.services.connections.as_ref(),
        &shared.services.sporks,
        &shared.params,
        &quorum_hash,
        &members,
        &local.pro_tx_hash,
        shared.config.watch_quorums,
    )
    .await;

    if members.len() < shared.params.min_size || !is_member {
        if involved {
            debug!(
                quorum_type = %shared.params.quorum_type,
                quorum_hash = %quorum_hash,
                "watching quorum without participating"
            );
        }
        // Not our quorum (or not viable): sit the round out without a
        // session and come back at the next interval.
        wait_for_new_quorum(shared, quorum_hash).await?;
        return Ok(());
    }

    add_quorum_probe_connections(
        shared.services.connections.as_ref(),
        shared.services.masternode_meta.as_ref(),
        &shared.services.sporks,
        &shared.params,
        &quorum_hash,
        &members,
        &local.pro_tx_hash,
    )
    .await;

    let keypair = local.keypair.clone().ok_or(DkgError::Fatal {
        quorum_type: shared.params.quorum_type,
        reason: "member without operator keys",
    })?;
    let session = DkgSession::new(
        shared.params.clone(),
        quorum_hash,
        members,
        local.pro_tx_hash,
        keypair,
        shared.services.bls_worker.clone(),
    )?;
    *shared.session.lock().await = Some(session);
    DKG_SESSIONS_STARTED
        .with_label_values(&[&shared.params.quorum_type.to_string()])
        .inc();

    wait_for_phase(
        shared,
        Some(QuorumPhase::Initialized),
        QuorumPhase::Contribute,
        Some(quorum_hash),
    )
    .await?;

    handle_phase::<Contribution>(
        shared,
        QuorumPhase::Contribute,
        QuorumPhase::Complain,
        quorum_hash,
    )
    .await?;
    handle_phase::<Complaint>(
        shared,
        QuorumPhase::Complain,
        QuorumPhase::Justify,
        quorum_hash,
    )
    .await?;
    handle_phase::<Justification>(
        shared,
        QuorumPhase::Justify,
        QuorumPhase::Commit,
        quorum_hash,
    )
    .await?;
    handle_phase::<PrematureCommitment>(
        shared,
        QuorumPhase::Commit,
        QuorumPhase::Finalize,
        quorum_hash,
    )
    .await?;

    // Finalize: aggregate matching premature commitments.
    let finals = {
        let mut session_slot = shared.session.lock().await;
        match session_slot.as_mut() {
            Some(session) => {
                let finals = session.finalize_commitments()?;
                if !finals.is_empty() {
                    for (pro_tx_hash, vvec, share) in session.export_verified_contributions() {
                        shared.services.contributions.insert(
                            shared.params.quorum_type,
                            quorum_hash,
                            pro_tx_hash,
                            vvec,
                            share,
                        );
                    }
                }
                finals
            }
            None => Vec::new(),
        }
    };
    for commitment in finals {
        quorumnet_metrics::dkg::DKG_COMMITMENTS_FINALIZED
            .with_label_values(&[&shared.params.quorum_type.to_string()])
            .inc();
        shared.services.commitment_sink.submit_commitment(commitment);
    }

    // Round done; tear down and go idle until the next interval boundary.
    shared.clear_buffers();
    *shared.session.lock().await = None;
    wait_for_new_quorum(shared, quorum_hash).await?;
    Ok(())
}
