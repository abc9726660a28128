//! End-to-end DKG round tests
//!
//! Three in-process nodes share a loopback message bus and a synthetic
//! chain. Tips are fed to every node's manager in lock-step, which drives
//! the phase handlers through complete rounds: happy path, a defecting
//! member, a mid-round reorg and watch mode.

use async_trait::async_trait;
use parking_lot::Mutex;
use quorumnet_crypto::{BlsKeyPair, BlsSecretKey, BlsWorker};
use quorumnet_dkg::registry::NullPeerScoring;
use quorumnet_dkg::{
    CommitmentSink, ConnectionManager, DkgConfig, DkgManager, DkgNetwork, DkgServices,
    FinalCommitment, LocalIdentity, MasternodeEntry, MasternodeMetaStore, MasternodeRegistry,
    MembershipCalculator, MessageKind, QuorumPhase, SporkFlags, VerifiedContributionsCache,
};
use quorumnet_types::{BlockIndex, Hash, PeerId, ProTxHash, QuorumParams, QuorumType};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

// ======================================================================
// Harness
// ======================================================================

fn keypair(id: u8) -> BlsKeyPair {
    BlsKeyPair::from_secret_key(BlsSecretKey::from_seed(&[id; 32]))
}

fn entry(id: u8) -> MasternodeEntry {
    let pro_tx_hash = ProTxHash::from_bytes([id; 32]);
    MasternodeEntry {
        pro_tx_hash,
        confirmed_hash_with_pro_tx_hash: Hash::compute_parts(&[
            pro_tx_hash.as_slice(),
            b"confirmed",
        ]),
        operator_pubkey: keypair(id).public_key,
        address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000 + id as u16),
    }
}

struct TestRegistry {
    ids: Vec<u8>,
}

impl MasternodeRegistry for TestRegistry {
    fn members_at(&self, _base_block: &Arc<BlockIndex>) -> Vec<MasternodeEntry> {
        self.ids.iter().map(|id| entry(*id)).collect()
    }
}

struct TestMeta;
impl MasternodeMetaStore for TestMeta {
    fn time_since_last_outbound_success(&self, _pro_tx_hash: &ProTxHash) -> Option<Duration> {
        None
    }
}

#[derive(Default)]
struct RecordingSink {
    commitments: Mutex<Vec<FinalCommitment>>,
}

impl CommitmentSink for RecordingSink {
    fn submit_commitment(&self, commitment: FinalCommitment) {
        self.commitments.lock().push(commitment);
    }
}

#[derive(Default)]
struct RecordingConnections {
    quorum_nodes: Mutex<Vec<(QuorumType, Hash, BTreeSet<ProTxHash>)>>,
}

#[async_trait]
impl ConnectionManager for RecordingConnections {
    async fn set_quorum_nodes(
        &self,
        quorum_type: QuorumType,
        quorum_hash: Hash,
        nodes: BTreeSet<ProTxHash>,
    ) {
        self.quorum_nodes.lock().push((quorum_type, quorum_hash, nodes));
    }
    async fn has_quorum_nodes(&self, _quorum_type: QuorumType, _quorum_hash: Hash) -> bool {
        false
    }
    async fn set_relay_members(
        &self,
        _quorum_type: QuorumType,
        _quorum_hash: Hash,
        _members: BTreeSet<ProTxHash>,
    ) {
    }
    async fn add_probe_connections(&self, _nodes: BTreeSet<ProTxHash>) {}
}

/// Loopback bus: every broadcast is delivered to all other registered
/// managers as a network message from the sender's peer id.
#[derive(Default)]
struct Bus {
    targets: Mutex<Vec<(PeerId, Arc<DkgManager>)>>,
    sent: Mutex<Vec<(PeerId, MessageKind, Vec<u8>)>>,
}

impl Bus {
    fn register(&self, peer: PeerId, manager: Arc<DkgManager>) {
        self.targets.lock().push((peer, manager));
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

struct BusNetwork {
    self_peer: PeerId,
    bus: Arc<Bus>,
}

#[async_trait]
impl DkgNetwork for BusNetwork {
    async fn broadcast_dkg_message(&self, kind: MessageKind, bytes: Vec<u8>) {
        self.bus
            .sent
            .lock()
            .push((self.self_peer, kind, bytes.clone()));
        let targets: Vec<_> = self.bus.targets.lock().clone();
        for (peer, manager) in targets {
            if peer != self.self_peer {
                manager.process_message(self.self_peer, kind.command_tag(), bytes.clone());
            }
        }
    }
}

struct TestNode {
    manager: Arc<DkgManager>,
    sink: Arc<RecordingSink>,
    connections: Arc<RecordingConnections>,
}

fn test_config() -> DkgConfig {
    DkgConfig::default()
        .with_block_target_spacing(Duration::from_millis(40))
        .with_phase_sleep_factor(0.5)
}

fn make_node(
    id: u8,
    member_ids: &[u8],
    bus: &Arc<Bus>,
    local: LocalIdentity,
    watch: bool,
) -> TestNode {
    let sink = Arc::new(RecordingSink::default());
    let connections = Arc::new(RecordingConnections::default());
    let services = Arc::new(DkgServices {
        membership: Arc::new(MembershipCalculator::new(Arc::new(TestRegistry {
            ids: member_ids.to_vec(),
        }))),
        connections: connections.clone(),
        masternode_meta: Arc::new(TestMeta),
        peer_scoring: Arc::new(NullPeerScoring),
        commitment_sink: sink.clone(),
        network: Arc::new(BusNetwork {
            self_peer: PeerId(id as u64),
            bus: Arc::clone(bus),
        }),
        sporks: SporkFlags::default(),
        bls_worker: BlsWorker::new(4),
        local,
        contributions: Arc::new(VerifiedContributionsCache::default()),
    });
    let manager = Arc::new(DkgManager::new(
        vec![QuorumParams::TEST_3_2],
        test_config().with_watch_quorums(watch),
        services,
    ));
    bus.register(PeerId(id as u64), Arc::clone(&manager));
    TestNode {
        manager,
        sink,
        connections,
    }
}

fn member_node(id: u8, member_ids: &[u8], bus: &Arc<Bus>) -> TestNode {
    make_node(
        id,
        member_ids,
        bus,
        LocalIdentity {
            pro_tx_hash: ProTxHash::from_bytes([id; 32]),
            keypair: Some(keypair(id)),
        },
        false,
    )
}

fn build_chain(len: u64) -> Vec<Arc<BlockIndex>> {
    let mut blocks = vec![BlockIndex::genesis(Hash::compute(b"genesis"))];
    for i in 1..=len {
        let hash = Hash::compute_parts(&[b"block", &i.to_le_bytes()]);
        blocks.push(BlockIndex::new_child(&blocks[(i - 1) as usize], hash));
    }
    blocks
}

async fn advance_to(nodes: &[&TestNode], chain: &[Arc<BlockIndex>], height: u64) {
    for node in nodes {
        node.manager
            .updated_block_tip(&chain[height as usize], false);
    }
    // Give the 100 ms pollers time to observe the phase and drain buffers.
    tokio::time::sleep(Duration::from_millis(260)).await;
}

async fn run_heights(
    nodes: &[&TestNode],
    chain: &[Arc<BlockIndex>],
    range: std::ops::RangeInclusive<u64>,
) {
    for height in range {
        advance_to(nodes, chain, height).await;
    }
}

async fn wait_for_commitments(sink: &RecordingSink, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if !sink.commitments.lock().is_empty() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

// ======================================================================
// Scenarios
// ======================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn happy_path_three_member_quorum() {
    let bus = Arc::new(Bus::default());
    let nodes: Vec<TestNode> = [1u8, 2, 3]
        .iter()
        .map(|id| member_node(*id, &[1, 2, 3], &bus))
        .collect();
    let refs: Vec<&TestNode> = nodes.iter().collect();
    for node in &refs {
        node.manager.start();
    }

    let chain = build_chain(40);
    // Straight into the interval boundary, then one block at a time
    // through all six phases.
    run_heights(&refs, &chain, 24..=36).await;

    for node in &refs {
        assert!(
            wait_for_commitments(&node.sink, Duration::from_secs(10)).await,
            "node produced no final commitment"
        );
    }

    let expected_quorum_hash = chain[24].hash();
    let mut quorum_keys = Vec::new();
    for node in &refs {
        let commitments = node.sink.commitments.lock();
        let fc = &commitments[0];
        assert_eq!(fc.quorum_hash, expected_quorum_hash);
        assert_eq!(fc.count_valid_members(), 3);
        assert_eq!(fc.count_signers(), 3);
        assert!(fc.verify_sizes(&QuorumParams::TEST_3_2));
        quorum_keys.push(fc.quorum_public_key.clone());
    }
    // All nodes agree on the aggregated quorum key.
    assert_eq!(quorum_keys[0], quorum_keys[1]);
    assert_eq!(quorum_keys[1], quorum_keys[2]);

    for node in &refs {
        node.manager.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn offline_member_is_excluded() {
    let bus = Arc::new(Bus::default());
    // Only A and C run; B (id 2) is a configured member but never starts,
    // so its contribution is missing everywhere.
    let node_a = member_node(1, &[1, 2, 3], &bus);
    let node_c = member_node(3, &[1, 2, 3], &bus);
    let refs = [&node_a, &node_c];
    for node in &refs {
        node.manager.start();
    }

    let chain = build_chain(40);
    run_heights(&refs, &chain, 24..=36).await;

    for node in &refs {
        assert!(
            wait_for_commitments(&node.sink, Duration::from_secs(10)).await,
            "two-of-three quorum should still finalize"
        );
        let commitments = node.sink.commitments.lock();
        let fc = &commitments[0];
        // B's bit is cleared; A and C carry the quorum.
        assert_eq!(fc.count_valid_members(), 2);
        assert_eq!(fc.count_signers(), 2);
        assert!(fc.verify_sizes(&QuorumParams::TEST_3_2));
    }

    for node in &refs {
        node.manager.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mid_round_reorg_aborts_session() {
    let bus = Arc::new(Bus::default());
    let nodes: Vec<TestNode> = [1u8, 2, 3]
        .iter()
        .map(|id| member_node(*id, &[1, 2, 3], &bus))
        .collect();
    let refs: Vec<&TestNode> = nodes.iter().collect();
    for node in &refs {
        node.manager.start();
    }

    let chain = build_chain(40);
    // Run into the Complain window (offset 4..5).
    run_heights(&refs, &chain, 24..=28).await;

    for node in &refs {
        let (phase, quorum_hash) = node
            .manager
            .phase_and_quorum(QuorumType(100))
            .expect("handler exists");
        assert_eq!(phase, QuorumPhase::Complain);
        assert_eq!(quorum_hash, chain[24].hash());
    }

    // Reorg: a competing branch forks below the quorum base block, so the
    // base block hash at height 24 changes mid-round.
    let mut fork = vec![chain[23].clone()];
    for i in 0..6u64 {
        let hash = Hash::compute_parts(&[b"fork", &i.to_le_bytes()]);
        fork.push(BlockIndex::new_child(&fork[i as usize], hash));
    }
    let sent_before = bus.sent_count();
    for node in &refs {
        node.manager.updated_block_tip(&fork[5], false);
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    for node in &refs {
        let (_, quorum_hash) = node
            .manager
            .phase_and_quorum(QuorumType(100))
            .expect("handler exists");
        // The handler follows the fork's base block now.
        assert_eq!(quorum_hash, fork[1].hash());
        // The abandoned round never produced a commitment.
        assert!(node.sink.commitments.lock().is_empty());
    }
    // No outgoing message was emitted for the abandoned quorum after the
    // reorg was observed.
    assert_eq!(bus.sent_count(), sent_before);

    for node in &refs {
        node.manager.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn watch_mode_declares_single_connection_and_no_session() {
    let bus = Arc::new(Bus::default());
    // Node 9 is not a member; it only watches.
    let watcher = make_node(9, &[1, 2, 3], &bus, LocalIdentity::none(), true);
    watcher.manager.start();

    let chain = build_chain(40);
    let refs = [&watcher];
    run_heights(&refs, &chain, 24..=26).await;

    let declared = watcher.connections.quorum_nodes.lock().clone();
    assert_eq!(declared.len(), 1, "exactly one declaration for the quorum");
    let (quorum_type, quorum_hash, nodes) = &declared[0];
    assert_eq!(*quorum_type, QuorumType(100));
    assert_eq!(*quorum_hash, chain[24].hash());
    assert_eq!(nodes.len(), 1, "watcher connects to exactly one member");

    // Watchers never send DKG messages.
    assert_eq!(bus.sent_count(), 0);
    assert!(watcher.sink.commitments.lock().is_empty());

    watcher.manager.stop().await;
}

#[tokio::test]
async fn flood_control_admits_at_most_quota_per_peer() {
    let bus = Arc::new(Bus::default());
    let node = member_node(1, &[1, 2, 3], &bus);

    // Distinct payloads from one peer; default quota is 5.
    let mut digests = Vec::new();
    for i in 0..6u8 {
        let bytes = vec![100u8, i, i, i];
        digests.push(Hash::compute(&bytes));
        node.manager.process_message(PeerId(7), "qcontrib", bytes);
    }

    for digest in &digests[..5] {
        assert!(node.manager.already_have(digest));
    }
    assert!(!node.manager.already_have(&digests[5]));
}

#[tokio::test]
async fn duplicate_messages_are_suppressed() {
    use quorumnet_dkg::PendingMessages;

    let buffer = PendingMessages::new(QuorumType(100), MessageKind::Contribution, 5);
    let bytes = vec![100u8, 1, 2, 3];
    let digest = Hash::compute(&bytes);

    assert!(buffer.push(PeerId(1), bytes.clone()).is_ok());
    assert!(buffer.has_seen(&digest));
    assert!(buffer.push(PeerId(1), bytes.clone()).is_err());
    assert!(buffer.push(PeerId(2), bytes).is_err());
    assert_eq!(buffer.len(), 1);
}
