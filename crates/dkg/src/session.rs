//! The one-shot DKG session
//!
//! A `DkgSession` exists for exactly one quorum instantiation on a node
//! that is a member of it. The phase handler owns it exclusively, feeds it
//! decoded and signature-checked messages, and calls the `*_phase` step
//! methods at phase boundaries. Step methods are idempotent: re-entering a
//! phase with no new input produces no output.
//!
//! All pairing math is dispatched to the [`BlsWorker`]; the session itself
//! only does bookkeeping.

use crate::error::DkgError;
use crate::membership::MemberList;
use crate::messages::{
    build_commitment_hash, Complaint, Contribution, FinalCommitment, Justification,
    PrematureCommitment, FINAL_COMMITMENT_VERSION,
};
use quorumnet_crypto::{
    aggregate_shares, aggregate_vvecs, BlsKeyPair, BlsSignatureShare, BlsWorker,
    ContributionPolynomial, EncryptedShares, SecretShare, VerificationVector, DST_COMMITMENT,
    DST_DKG_MESSAGE,
};
use quorumnet_types::{BitSet, Hash, PeerId, ProTxHash, QuorumParams};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// A report that a member misbehaved at the protocol level.
///
/// The handler resolves the member to the sending peer (or ignores it for
/// relayed messages) and feeds PoSe scoring.
#[derive(Debug, Clone)]
pub struct MisbehaviorReport {
    /// The misbehaving member.
    pub pro_tx_hash: ProTxHash,
    /// The peer that delivered the offending message.
    pub peer: PeerId,
    /// What went wrong.
    pub reason: &'static str,
}

/// Per-quorum-instantiation DKG protocol engine.
pub struct DkgSession {
    params: QuorumParams,
    quorum_hash: Hash,
    members: MemberList,
    my_index: usize,
    keypair: BlsKeyPair,
    bls_worker: BlsWorker,

    // Dealing state
    contribution_poly: Option<ContributionPolynomial>,

    // Received protocol state, indexed by member position
    received_vvecs: HashMap<usize, VerificationVector>,
    my_shares: HashMap<usize, SecretShare>,
    complaint_accusers: Vec<HashSet<usize>>,
    complaints_against_me: HashSet<usize>,
    justified_members: HashSet<usize>,
    bad_members: BitSet,
    my_complaints: BitSet,

    // Message stores for INV serving, keyed by message hash
    contributions: HashMap<Hash, Contribution>,
    complaints: HashMap<Hash, Complaint>,
    justifications: HashMap<Hash, Justification>,
    premature_commitments: HashMap<Hash, PrematureCommitment>,
    valid_commitments: HashSet<Hash>,

    // Commitment collection: commitment hash -> signature shares by member
    commitment_shares: HashMap<Hash, HashMap<usize, BlsSignatureShare>>,

    // Outcome
    quorum_vvec: Option<VerificationVector>,
    my_commitment: Option<PrematureCommitment>,
    finalized: bool,

    // Phase idempotence latches
    contributed: bool,
    complained: bool,
    justified: bool,
    committed: bool,
}

impl DkgSession {
    /// Initialize a session for a quorum this node is a member of.
    pub fn new(
        params: QuorumParams,
        quorum_hash: Hash,
        members: MemberList,
        my_pro_tx_hash: ProTxHash,
        keypair: BlsKeyPair,
        bls_worker: BlsWorker,
    ) -> Result<Self, DkgError> {
        let my_index = members
            .iter()
            .position(|m| m.pro_tx_hash == my_pro_tx_hash)
            .ok_or(DkgError::Fatal {
                quorum_type: params.quorum_type,
                reason: "local masternode not in member list",
            })?;
        let n = members.len();
        info!(
            quorum_type = %params.quorum_type,
            quorum_hash = %quorum_hash,
            members = n,
            my_index,
            "initialized DKG session"
        );
        Ok(Self {
            params,
            quorum_hash,
            members,
            my_index,
            keypair,
            bls_worker,
            contribution_poly: None,
            received_vvecs: HashMap::new(),
            my_shares: HashMap::new(),
            complaint_accusers: vec![HashSet::new(); n],
            complaints_against_me: HashSet::new(),
            justified_members: HashSet::new(),
            bad_members: BitSet::with_len(n),
            my_complaints: BitSet::with_len(n),
            contributions: HashMap::new(),
            complaints: HashMap::new(),
            justifications: HashMap::new(),
            premature_commitments: HashMap::new(),
            valid_commitments: HashSet::new(),
            commitment_shares: HashMap::new(),
            quorum_vvec: None,
            my_commitment: None,
            finalized: false,
            contributed: false,
            complained: false,
            justified: false,
            committed: false,
        })
    }

    /// The quorum this session builds.
    pub fn quorum_hash(&self) -> Hash {
        self.quorum_hash
    }

    /// The member list of this quorum.
    pub fn members(&self) -> &MemberList {
        &self.members
    }

    /// This node's position in the member list.
    pub fn my_member_index(&self) -> usize {
        self.my_index
    }

    /// Whether the session produced a final commitment.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Position of a member by identity.
    pub fn member_index(&self, pro_tx_hash: &ProTxHash) -> Option<usize> {
        self.members
            .iter()
            .position(|m| m.pro_tx_hash == *pro_tx_hash)
    }

    /// Look up a stored contribution by message hash (INV serving).
    pub fn get_contribution(&self, hash: &Hash) -> Option<&Contribution> {
        self.contributions.get(hash)
    }

    /// Look up a stored complaint by message hash.
    pub fn get_complaint(&self, hash: &Hash) -> Option<&Complaint> {
        self.complaints.get(hash)
    }

    /// Look up a stored justification by message hash.
    pub fn get_justification(&self, hash: &Hash) -> Option<&Justification> {
        self.justifications.get(hash)
    }

    /// Look up a stored, view-validated premature commitment.
    pub fn get_premature_commitment(&self, hash: &Hash) -> Option<&PrematureCommitment> {
        self.valid_commitments
            .contains(hash)
            .then(|| self.premature_commitments.get(hash))
            .flatten()
    }

    // ------------------------------------------------------------------
    // Contribute phase
    // ------------------------------------------------------------------

    /// Start the Contribute phase: deal a polynomial and build this node's
    /// contribution broadcast.
    pub fn contribute(&mut self) -> Result<Option<Contribution>, DkgError> {
        if self.contributed {
            return Ok(None);
        }
        self.contributed = true;

        let poly = ContributionPolynomial::generate(self.params.threshold, &mut rand::thread_rng());
        let verification_vector = poly.verification_vector();
        let recipient_keys: Vec<_> = self
            .members
            .iter()
            .map(|m| m.operator_pubkey.clone())
            .collect();
        let encrypted_shares = EncryptedShares::encrypt(&poly, &recipient_keys)
            .map_err(|_| DkgError::Fatal {
                quorum_type: self.params.quorum_type,
                reason: "failed to encrypt own contribution shares",
            })?;
        self.contribution_poly = Some(poly);

        let pro_tx_hash = self.members[self.my_index].pro_tx_hash;
        let sign_hash = Contribution::sign_hash_parts(
            self.params.quorum_type,
            &self.quorum_hash,
            &pro_tx_hash,
            &verification_vector,
            &encrypted_shares,
        );
        let msg = Contribution {
            quorum_type: self.params.quorum_type,
            quorum_hash: self.quorum_hash,
            pro_tx_hash,
            verification_vector,
            encrypted_shares,
            sig: self
                .keypair
                .secret_key
                .sign(sign_hash.as_slice(), DST_DKG_MESSAGE),
        };

        debug!(
            quorum_hash = %self.quorum_hash,
            my_index = self.my_index,
            "built own contribution"
        );
        Ok(Some(msg))
    }

    /// Integrate a contribution whose operator signature was already
    /// checked. Returns misbehavior reports for the handler to act on.
    pub async fn receive_contribution(
        &mut self,
        peer: PeerId,
        msg: Contribution,
    ) -> Result<Vec<MisbehaviorReport>, DkgError> {
        let index = self.expect_member(&msg.quorum_hash, &msg.pro_tx_hash, peer)?;

        if msg.verification_vector.degree() + 1 != self.params.threshold
            || msg.encrypted_shares.len() != self.members.len()
        {
            return Err(DkgError::PeerMisbehavior {
                peer,
                reason: "malformed contribution",
            });
        }
        if self.received_vvecs.contains_key(&index) {
            // The pending buffer already suppressed identical bytes, so a
            // second contribution means conflicting content.
            self.bad_members.set(index, true);
            return Err(DkgError::PeerMisbehavior {
                peer,
                reason: "conflicting double contribution",
            });
        }

        self.received_vvecs
            .insert(index, msg.verification_vector.clone());

        let mut reports = Vec::new();
        let encrypted = msg.encrypted_shares.get(self.my_index).cloned();
        match encrypted {
            Ok(ct) => {
                match self
                    .bls_worker
                    .decrypt_and_verify_share(
                        self.keypair.secret_key.clone(),
                        ct,
                        msg.verification_vector.clone(),
                        self.my_index,
                    )
                    .await
                {
                    Ok(share) => {
                        self.my_shares.insert(index, share);
                    }
                    Err(_) => {
                        debug!(
                            dealer = %msg.pro_tx_hash,
                            "contribution share failed verification, will complain"
                        );
                        self.my_complaints.set(index, true);
                    }
                }
            }
            Err(_) => {
                self.my_complaints.set(index, true);
                reports.push(MisbehaviorReport {
                    pro_tx_hash: msg.pro_tx_hash,
                    peer,
                    reason: "contribution missing recipient slot",
                });
            }
        }

        self.contributions.insert(self.msg_store_hash(&msg), msg);
        Ok(reports)
    }

    // ------------------------------------------------------------------
    // Complain phase
    // ------------------------------------------------------------------

    /// Start the Complain phase: finish pending share verification and
    /// broadcast complaints about missing or invalid contributions.
    pub fn verify_and_complain(&mut self) -> Result<Option<Complaint>, DkgError> {
        if self.complained {
            return Ok(None);
        }
        self.complained = true;

        for index in 0..self.members.len() {
            if index != self.my_index && !self.received_vvecs.contains_key(&index) {
                self.my_complaints.set(index, true);
            }
        }
        // Complaints against us are everyone else's business; never accuse
        // ourselves.
        self.my_complaints.set(self.my_index, false);

        if self.my_complaints.none_set() && self.bad_members.none_set() {
            debug!(quorum_hash = %self.quorum_hash, "nothing to complain about");
            return Ok(None);
        }

        let pro_tx_hash = self.members[self.my_index].pro_tx_hash;
        let sign_hash = Complaint::sign_hash_parts(
            self.params.quorum_type,
            &self.quorum_hash,
            &pro_tx_hash,
            &self.bad_members,
            &self.my_complaints,
        );
        let msg = Complaint {
            quorum_type: self.params.quorum_type,
            quorum_hash: self.quorum_hash,
            pro_tx_hash,
            bad_members: self.bad_members.clone(),
            complain_for_members: self.my_complaints.clone(),
            sig: self
                .keypair
                .secret_key
                .sign(sign_hash.as_slice(), DST_DKG_MESSAGE),
        };

        info!(
            quorum_hash = %self.quorum_hash,
            complaints = self.my_complaints.count_set(),
            "broadcasting complaint"
        );
        Ok(Some(msg))
    }

    /// Integrate a complaint. Accusations are tallied per accuser; a member
    /// collecting `dkg_bad_votes_threshold` distinct accusers is bad.
    pub fn receive_complaint(
        &mut self,
        peer: PeerId,
        msg: Complaint,
    ) -> Result<Vec<MisbehaviorReport>, DkgError> {
        let accuser = self.expect_member(&msg.quorum_hash, &msg.pro_tx_hash, peer)?;

        if msg.complain_for_members.len() != self.members.len()
            || msg.bad_members.len() != self.members.len()
        {
            return Err(DkgError::PeerMisbehavior {
                peer,
                reason: "complaint bitset length mismatch",
            });
        }

        for accused in msg.complain_for_members.iter_set() {
            if accused == accuser {
                continue;
            }
            self.complaint_accusers[accused].insert(accuser);
            if self.complaint_accusers[accused].len() >= self.params.dkg_bad_votes_threshold {
                if !self.bad_members.get(accused) {
                    warn!(
                        member = %self.members[accused].pro_tx_hash,
                        accusers = self.complaint_accusers[accused].len(),
                        "member exceeded bad-vote threshold"
                    );
                }
                self.bad_members.set(accused, true);
            }
            if accused == self.my_index {
                self.complaints_against_me.insert(accuser);
            }
        }

        self.complaints.insert(self.msg_store_hash(&msg), msg);
        Ok(Vec::new())
    }

    // ------------------------------------------------------------------
    // Justify phase
    // ------------------------------------------------------------------

    /// Start the Justify phase: if anyone complained about this node,
    /// reveal the plaintext shares so every member can re-verify them.
    pub fn verify_and_justify(&mut self) -> Result<Option<Justification>, DkgError> {
        if self.justified {
            return Ok(None);
        }
        self.justified = true;

        if self.complaints_against_me.is_empty() {
            return Ok(None);
        }
        let poly = self.contribution_poly.as_ref().ok_or(DkgError::Fatal {
            quorum_type: self.params.quorum_type,
            reason: "justification requested before contribution",
        })?;

        let mut accusers: Vec<_> = self.complaints_against_me.iter().copied().collect();
        accusers.sort_unstable();
        let shares: Vec<(u16, SecretShare)> = accusers
            .iter()
            .map(|accuser| (*accuser as u16, poly.share_for(*accuser)))
            .collect();

        let pro_tx_hash = self.members[self.my_index].pro_tx_hash;
        let sign_hash = Justification::sign_hash_parts(
            self.params.quorum_type,
            &self.quorum_hash,
            &pro_tx_hash,
            &shares,
        );
        let msg = Justification {
            quorum_type: self.params.quorum_type,
            quorum_hash: self.quorum_hash,
            pro_tx_hash,
            shares,
            sig: self
                .keypair
                .secret_key
                .sign(sign_hash.as_slice(), DST_DKG_MESSAGE),
        };

        info!(
            quorum_hash = %self.quorum_hash,
            accusers = accusers.len(),
            "broadcasting justification"
        );
        Ok(Some(msg))
    }

    /// Integrate a justification: publicly re-verify each revealed share
    /// against the accused dealer's verification vector.
    pub async fn receive_justification(
        &mut self,
        peer: PeerId,
        msg: Justification,
    ) -> Result<Vec<MisbehaviorReport>, DkgError> {
        let accused = self.expect_member(&msg.quorum_hash, &msg.pro_tx_hash, peer)?;

        let Some(vvec) = self.received_vvecs.get(&accused).cloned() else {
            // A member that never contributed has nothing to justify.
            return Err(DkgError::PeerMisbehavior {
                peer,
                reason: "justification without contribution",
            });
        };
        if msg.shares.is_empty() || msg.shares.len() > self.members.len() {
            return Err(DkgError::PeerMisbehavior {
                peer,
                reason: "malformed justification",
            });
        }

        let mut reports = Vec::new();
        let mut all_valid = true;
        for (accuser_index, share) in &msg.shares {
            let accuser_index = *accuser_index as usize;
            if accuser_index >= self.members.len() {
                all_valid = false;
                break;
            }
            let valid = self
                .bls_worker
                .verify_share(share.clone(), vvec.clone(), accuser_index)
                .await
                .unwrap_or(false);
            if !valid {
                all_valid = false;
                break;
            }
            if accuser_index == self.my_index {
                // The justified share replaces the one that failed (or
                // never decrypted) during Contribute.
                self.my_shares.insert(accused, share.clone());
            }
        }

        if all_valid {
            self.justified_members.insert(accused);
            self.my_complaints.set(accused, false);
            debug!(member = %msg.pro_tx_hash, "justification accepted");
        } else {
            // A failed justification leaves the member accused; that is
            // protocol misbehavior, not mere silence.
            self.bad_members.set(accused, true);
            reports.push(MisbehaviorReport {
                pro_tx_hash: msg.pro_tx_hash,
                peer,
                reason: "invalid justification share",
            });
        }

        self.justifications.insert(self.msg_store_hash(&msg), msg);
        Ok(reports)
    }

    // ------------------------------------------------------------------
    // Commit phase
    // ------------------------------------------------------------------

    /// This node's current valid-member view.
    fn compute_valid_members(&self) -> BitSet {
        let mut valid = BitSet::with_len(self.members.len());
        for index in 0..self.members.len() {
            let contributed =
                self.received_vvecs.contains_key(&index) || index == self.my_index;
            let unresolved_complaint =
                self.my_complaints.get(index) && !self.justified_members.contains(&index);
            valid.set(
                index,
                contributed && !self.bad_members.get(index) && !unresolved_complaint,
            );
        }
        valid
    }

    /// Start the Commit phase: fix the valid-member view, aggregate the
    /// quorum key material, and broadcast a premature commitment.
    pub fn verify_and_commit(&mut self) -> Result<Option<PrematureCommitment>, DkgError> {
        if self.committed {
            return Ok(None);
        }
        self.committed = true;

        // Our own contribution enters the aggregate exactly like everyone
        // else's.
        let my_index = self.my_index;
        if let Some(poly) = &self.contribution_poly {
            self.received_vvecs
                .entry(my_index)
                .or_insert_with(|| poly.verification_vector());
            self.my_shares
                .entry(my_index)
                .or_insert_with(|| poly.share_for(my_index));
        }

        let valid_members = self.compute_valid_members();
        let valid_count = valid_members.count_set();
        if valid_count < self.params.min_size || valid_count < self.params.threshold {
            return Err(DkgError::AbortRound {
                quorum_hash: self.quorum_hash,
                reason: "not enough valid members to commit",
            });
        }

        let mut vvecs = Vec::with_capacity(valid_count);
        let mut shares = Vec::with_capacity(valid_count);
        for index in valid_members.iter_set() {
            let vvec = self.received_vvecs.get(&index);
            let share = self.my_shares.get(&index);
            match (vvec, share) {
                (Some(vvec), Some(share)) => {
                    vvecs.push(vvec.clone());
                    shares.push(share.clone());
                }
                _ => {
                    // A valid member we hold no verified share from means
                    // our own state is incomplete; we cannot commit.
                    return Err(DkgError::AbortRound {
                        quorum_hash: self.quorum_hash,
                        reason: "missing share from valid member",
                    });
                }
            }
        }

        let quorum_vvec = aggregate_vvecs(vvecs.iter()).map_err(|_| DkgError::AbortRound {
            quorum_hash: self.quorum_hash,
            reason: "verification vector aggregation failed",
        })?;
        let key_share = aggregate_shares(shares.iter()).map_err(|_| DkgError::AbortRound {
            quorum_hash: self.quorum_hash,
            reason: "share aggregation failed",
        })?;

        let quorum_public_key = quorum_vvec.public_key();
        let quorum_vvec_hash = quorum_vvec.hash();
        let commitment_hash = build_commitment_hash(
            self.params.quorum_type,
            &self.quorum_hash,
            &valid_members,
            &quorum_public_key,
            &quorum_vvec_hash,
        );
        let quorum_sig_share = key_share.sign(commitment_hash.as_slice(), DST_COMMITMENT);

        let pro_tx_hash = self.members[self.my_index].pro_tx_hash;
        let sign_hash = PrematureCommitment::sign_hash_parts(
            self.params.quorum_type,
            &self.quorum_hash,
            &pro_tx_hash,
            &valid_members,
            &quorum_public_key,
            &quorum_vvec_hash,
            &quorum_sig_share,
        );
        let msg = PrematureCommitment {
            quorum_type: self.params.quorum_type,
            quorum_hash: self.quorum_hash,
            pro_tx_hash,
            valid_members,
            quorum_public_key,
            quorum_vvec_hash,
            quorum_sig_share,
            sig: self
                .keypair
                .secret_key
                .sign(sign_hash.as_slice(), DST_DKG_MESSAGE),
        };

        self.quorum_vvec = Some(quorum_vvec);
        self.my_commitment = Some(msg.clone());

        info!(
            quorum_hash = %self.quorum_hash,
            valid_members = valid_count,
            "built premature commitment"
        );
        Ok(Some(msg))
    }

    /// Integrate a premature commitment: check the sender's view and its
    /// threshold signature share, and collect matching shares for
    /// finalization.
    pub async fn receive_commitment(
        &mut self,
        peer: PeerId,
        msg: PrematureCommitment,
    ) -> Result<Vec<MisbehaviorReport>, DkgError> {
        let sender = self.expect_member(&msg.quorum_hash, &msg.pro_tx_hash, peer)?;

        if msg.valid_members.len() != self.members.len() {
            return Err(DkgError::PeerMisbehavior {
                peer,
                reason: "commitment bitset length mismatch",
            });
        }
        if msg.valid_members.count_set() < self.params.threshold {
            return Err(DkgError::PeerMisbehavior {
                peer,
                reason: "commitment below threshold",
            });
        }
        if !msg.valid_members.get(sender) {
            return Err(DkgError::PeerMisbehavior {
                peer,
                reason: "committer not in own valid set",
            });
        }

        let store_hash = self.msg_store_hash(&msg);
        let commitment_hash = msg.commitment_hash();

        // The signature share can only be checked under a quorum view we
        // share; foreign views are stored but never counted.
        let matches_our_view = self
            .quorum_vvec
            .as_ref()
            .map(|vvec| {
                vvec.hash() == msg.quorum_vvec_hash
                    && vvec.public_key() == msg.quorum_public_key
            })
            .unwrap_or(false);

        if matches_our_view {
            let pk_share = self
                .quorum_vvec
                .as_ref()
                .map(|vvec| vvec.public_key_share(sender))
                .ok_or(DkgError::Transient("quorum view not yet computed"))?;
            let share_ok = self
                .bls_worker
                .verify_signature_share(
                    pk_share,
                    commitment_hash.as_slice().to_vec(),
                    DST_COMMITMENT,
                    msg.quorum_sig_share.clone(),
                )
                .await
                .unwrap_or(false);
            if !share_ok {
                self.premature_commitments.insert(store_hash, msg);
                return Err(DkgError::PeerMisbehavior {
                    peer,
                    reason: "invalid commitment signature share",
                });
            }
            self.valid_commitments.insert(store_hash);
            self.commitment_shares
                .entry(commitment_hash)
                .or_default()
                .insert(sender, msg.quorum_sig_share.clone());
            debug!(
                member = %msg.pro_tx_hash,
                shares = self.commitment_shares[&commitment_hash].len(),
                "collected commitment signature share"
            );
        } else {
            debug!(
                member = %msg.pro_tx_hash,
                "premature commitment for a different quorum view"
            );
        }

        self.premature_commitments.insert(store_hash, msg);
        Ok(Vec::new())
    }

    // ------------------------------------------------------------------
    // Finalize
    // ------------------------------------------------------------------

    /// Aggregate collected commitment shares into final commitments.
    ///
    /// Empty result means the round failed quietly (not enough matching
    /// views); the protocol self-heals at the next interval.
    pub fn finalize_commitments(&mut self) -> Result<Vec<FinalCommitment>, DkgError> {
        let Some(my_commitment) = self.my_commitment.clone() else {
            return Ok(Vec::new());
        };
        let Some(quorum_vvec) = self.quorum_vvec.clone() else {
            return Ok(Vec::new());
        };

        let commitment_hash = my_commitment.commitment_hash();
        let Some(shares) = self.commitment_shares.get(&commitment_hash) else {
            return Ok(Vec::new());
        };
        if shares.len() < self.params.threshold {
            info!(
                quorum_hash = %self.quorum_hash,
                got = shares.len(),
                need = self.params.threshold,
                "not enough matching premature commitments, no final commitment"
            );
            return Ok(Vec::new());
        }

        let mut signers = BitSet::with_len(self.members.len());
        let mut share_vec: Vec<(usize, BlsSignatureShare)> = Vec::with_capacity(shares.len());
        for (index, share) in shares {
            signers.set(*index, true);
            share_vec.push((*index, share.clone()));
        }

        let quorum_sig =
            quorum_vvec
                .recover_signature(&share_vec)
                .map_err(|_| DkgError::AbortRound {
                    quorum_hash: self.quorum_hash,
                    reason: "threshold signature recovery failed",
                })?;

        // Sanity: the recovered signature must verify under the quorum key.
        if !my_commitment.quorum_public_key.verify(
            commitment_hash.as_slice(),
            DST_COMMITMENT,
            &quorum_sig,
        ) {
            return Err(DkgError::Fatal {
                quorum_type: self.params.quorum_type,
                reason: "recovered quorum signature does not verify",
            });
        }

        self.finalized = true;
        info!(
            quorum_hash = %self.quorum_hash,
            signers = signers.count_set(),
            valid_members = my_commitment.valid_members.count_set(),
            "finalized quorum commitment"
        );
        Ok(vec![FinalCommitment {
            version: FINAL_COMMITMENT_VERSION,
            quorum_type: self.params.quorum_type,
            quorum_hash: self.quorum_hash,
            signers,
            valid_members: my_commitment.valid_members,
            quorum_public_key: my_commitment.quorum_public_key,
            quorum_vvec_hash: my_commitment.quorum_vvec_hash,
            quorum_sig,
        }])
    }

    /// Verified contribution data of the committed quorum view: each valid
    /// member's verification vector and the share it dealt to this node.
    ///
    /// The quorum manager consumes this after finalization to assemble the
    /// node's signing share for the new quorum.
    pub fn export_verified_contributions(
        &self,
    ) -> Vec<(ProTxHash, VerificationVector, SecretShare)> {
        let Some(commitment) = &self.my_commitment else {
            return Vec::new();
        };
        commitment
            .valid_members
            .iter_set()
            .filter_map(|index| {
                let vvec = self.received_vvecs.get(&index)?;
                let share = self.my_shares.get(&index)?;
                Some((
                    self.members[index].pro_tx_hash,
                    vvec.clone(),
                    share.clone(),
                ))
            })
            .collect()
    }

    // ------------------------------------------------------------------

    fn expect_member(
        &self,
        quorum_hash: &Hash,
        pro_tx_hash: &ProTxHash,
        peer: PeerId,
    ) -> Result<usize, DkgError> {
        if *quorum_hash != self.quorum_hash {
            return Err(DkgError::PeerMisbehavior {
                peer,
                reason: "message for wrong quorum",
            });
        }
        self.member_index(pro_tx_hash)
            .ok_or(DkgError::PeerMisbehavior {
                peer,
                reason: "sender not a quorum member",
            })
    }

    fn msg_store_hash<T: serde::Serialize>(&self, msg: &T) -> Hash {
        let bytes = crate::messages::encode(msg).unwrap_or_default();
        Hash::compute(&bytes)
    }
}

impl std::fmt::Debug for DkgSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DkgSession")
            .field("quorum_hash", &self.quorum_hash)
            .field("members", &self.members.len())
            .field("my_index", &self.my_index)
            .field("finalized", &self.finalized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_entry, test_keypair};
    use std::sync::Arc;

    const LOCAL: PeerId = PeerId(u64::MAX);

    fn make_sessions(ids: &[u8]) -> Vec<DkgSession> {
        let members: MemberList = Arc::new(ids.iter().map(|id| test_entry(*id)).collect());
        ids.iter()
            .map(|id| {
                DkgSession::new(
                    quorumnet_types::QuorumParams::TEST_3_2,
                    Hash::compute(b"base"),
                    Arc::clone(&members),
                    quorumnet_types::ProTxHash::from_bytes([*id; 32]),
                    test_keypair(*id),
                    BlsWorker::new(2),
                )
                .expect("session init")
            })
            .collect()
    }

    async fn deliver_contributions(
        sessions: &mut [DkgSession],
        contributions: &[Contribution],
    ) {
        for session in sessions.iter_mut() {
            for msg in contributions {
                session
                    .receive_contribution(LOCAL, msg.clone())
                    .await
                    .expect("contribution accepted");
            }
        }
    }

    #[tokio::test]
    async fn test_happy_path_three_members() {
        let mut sessions = make_sessions(&[1, 2, 3]);

        // Contribute
        let contributions: Vec<_> = sessions
            .iter_mut()
            .map(|s| s.contribute().unwrap().expect("contribution"))
            .collect();
        deliver_contributions(&mut sessions, &contributions).await;

        // Complain: nobody has anything to complain about
        for session in sessions.iter_mut() {
            assert!(session.verify_and_complain().unwrap().is_none());
        }

        // Justify: no complaints, no justifications
        for session in sessions.iter_mut() {
            assert!(session.verify_and_justify().unwrap().is_none());
        }

        // Commit
        let commitments: Vec<_> = sessions
            .iter_mut()
            .map(|s| s.verify_and_commit().unwrap().expect("commitment"))
            .collect();
        for session in sessions.iter_mut() {
            for msg in &commitments {
                session
                    .receive_commitment(LOCAL, msg.clone())
                    .await
                    .expect("commitment accepted");
            }
        }

        // Finalize: all views agree, everyone recovers the same commitment
        let mut finals = Vec::new();
        for session in sessions.iter_mut() {
            let mut out = session.finalize_commitments().unwrap();
            assert_eq!(out.len(), 1);
            assert!(session.is_finalized());
            finals.push(out.pop().unwrap());
        }
        let first = &finals[0];
        assert_eq!(first.count_valid_members(), 3);
        assert_eq!(first.count_signers(), 3);
        assert!(first.verify_sizes(&quorumnet_types::QuorumParams::TEST_3_2));
        for other in &finals[1..] {
            assert_eq!(other.quorum_public_key, first.quorum_public_key);
            assert_eq!(other.quorum_sig, first.quorum_sig);
        }
    }

    #[tokio::test]
    async fn test_defector_is_excluded_and_quorum_still_finalizes() {
        let mut sessions = make_sessions(&[1, 2, 3]);

        // Members 0 and 2 contribute honestly.
        let good_a = sessions[0].contribute().unwrap().unwrap();
        let good_c = sessions[2].contribute().unwrap().unwrap();

        // Member 1 (B) publishes a verification vector that does not match
        // its encrypted shares.
        let bad = {
            let mut rng = rand::thread_rng();
            let honest = ContributionPolynomial::generate(2, &mut rng);
            let lying = ContributionPolynomial::generate(2, &mut rng);
            let members = sessions[1].members().clone();
            let recipient_keys: Vec<_> =
                members.iter().map(|m| m.operator_pubkey.clone()).collect();
            let keypair = test_keypair(2);
            let mut msg = Contribution {
                quorum_type: quorumnet_types::QuorumType(100),
                quorum_hash: Hash::compute(b"base"),
                pro_tx_hash: quorumnet_types::ProTxHash::from_bytes([2u8; 32]),
                verification_vector: honest.verification_vector(),
                encrypted_shares: EncryptedShares::encrypt(&lying, &recipient_keys).unwrap(),
                sig: keypair.sign_dkg_message(&[]),
            };
            msg.sig = keypair
                .secret_key
                .sign(msg.sign_hash().as_slice(), DST_DKG_MESSAGE);
            msg
        };

        let contributions = vec![good_a, bad, good_c];
        deliver_contributions(&mut sessions, &contributions).await;

        // A and C complain about B; B has nothing to complain about except
        // itself (which it never does).
        let complaint_a = sessions[0].verify_and_complain().unwrap().expect("complaint");
        let complaint_c = sessions[2].verify_and_complain().unwrap().expect("complaint");
        assert!(complaint_a.complain_for_members.get(1));
        assert!(complaint_c.complain_for_members.get(1));

        for session in sessions.iter_mut() {
            session.receive_complaint(LOCAL, complaint_a.clone()).unwrap();
            session.receive_complaint(LOCAL, complaint_c.clone()).unwrap();
        }

        // Two accusers reach the bad-vote threshold of the test params.
        for session in sessions.iter_mut() {
            assert!(session.bad_members.get(1));
        }

        // B stays silent in Justify.
        for session in sessions.iter_mut() {
            session.verify_and_justify().unwrap();
        }

        // A and C can still commit over {A, C}.
        let commitment_a = sessions[0].verify_and_commit().unwrap().expect("commit");
        let commitment_c = sessions[2].verify_and_commit().unwrap().expect("commit");
        assert_eq!(commitment_a.valid_members.count_set(), 2);
        assert!(!commitment_a.valid_members.get(1));

        sessions[0]
            .receive_commitment(LOCAL, commitment_a.clone())
            .await
            .unwrap();
        sessions[0]
            .receive_commitment(LOCAL, commitment_c.clone())
            .await
            .unwrap();

        let finals = sessions[0].finalize_commitments().unwrap();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].count_valid_members(), 2);
        assert_eq!(finals[0].count_signers(), 2);
    }

    #[tokio::test]
    async fn test_justification_restores_member() {
        use quorumnet_crypto::EncryptedShare;

        let mut sessions = make_sessions(&[1, 2, 3]);

        let good_a = sessions[0].contribute().unwrap().unwrap();
        let good_c = sessions[2].contribute().unwrap().unwrap();

        // B's verification vector and shares are honest, but the slot
        // addressed to A carries a share from a different polynomial, so
        // only A's verification fails.
        let (bad_for_a, honest_poly_b) = {
            let mut rng = rand::thread_rng();
            let honest = ContributionPolynomial::generate(2, &mut rng);
            let lying = ContributionPolynomial::generate(2, &mut rng);
            let members = sessions[1].members().clone();
            let slots = vec![
                EncryptedShare::seal(&members[0].operator_pubkey, &lying.share_for(0)).unwrap(),
                EncryptedShare::seal(&members[1].operator_pubkey, &honest.share_for(1)).unwrap(),
                EncryptedShare::seal(&members[2].operator_pubkey, &honest.share_for(2)).unwrap(),
            ];
            let verification_vector = honest.verification_vector();
            let encrypted_shares = EncryptedShares::from_slots(slots);
            let keypair = test_keypair(2);
            let pro_tx_hash = quorumnet_types::ProTxHash::from_bytes([2u8; 32]);
            let sign_hash = Contribution::sign_hash_parts(
                quorumnet_types::QuorumType(100),
                &Hash::compute(b"base"),
                &pro_tx_hash,
                &verification_vector,
                &encrypted_shares,
            );
            let msg = Contribution {
                quorum_type: quorumnet_types::QuorumType(100),
                quorum_hash: Hash::compute(b"base"),
                pro_tx_hash,
                verification_vector,
                encrypted_shares,
                sig: keypair
                    .secret_key
                    .sign(sign_hash.as_slice(), DST_DKG_MESSAGE),
            };
            (msg, honest)
        };

        let contributions = vec![good_a, bad_for_a, good_c];
        deliver_contributions(&mut sessions, &contributions).await;

        // Only A complains; one accusation stays below the bad-vote
        // threshold of two.
        let complaint_a = sessions[0].verify_and_complain().unwrap().expect("complaint");
        assert!(complaint_a.complain_for_members.get(1));
        assert!(sessions[2].verify_and_complain().unwrap().is_none());
        for session in sessions.iter_mut() {
            session.receive_complaint(LOCAL, complaint_a.clone()).unwrap();
        }
        assert!(!sessions[0].bad_members.get(1));

        // B answers with the real share for A. The session under test has
        // no dealing state for the handcrafted contribution, so the
        // justification is built from the same honest polynomial directly.
        let justification = {
            let keypair = test_keypair(2);
            let pro_tx_hash = quorumnet_types::ProTxHash::from_bytes([2u8; 32]);
            let shares = vec![(0u16, honest_poly_b.share_for(0))];
            let sign_hash = Justification::sign_hash_parts(
                quorumnet_types::QuorumType(100),
                &Hash::compute(b"base"),
                &pro_tx_hash,
                &shares,
            );
            Justification {
                quorum_type: quorumnet_types::QuorumType(100),
                quorum_hash: Hash::compute(b"base"),
                pro_tx_hash,
                shares,
                sig: keypair
                    .secret_key
                    .sign(sign_hash.as_slice(), DST_DKG_MESSAGE),
            }
        };
        for session in sessions.iter_mut() {
            session
                .receive_justification(LOCAL, justification.clone())
                .await
                .unwrap();
        }

        // The justification clears A's complaint; all three remain valid
        // in A's commit view.
        let commitment = sessions[0].verify_and_commit().unwrap().expect("commit");
        assert_eq!(commitment.valid_members.count_set(), 3);
    }

    #[tokio::test]
    async fn test_phase_steps_are_idempotent() {
        let mut sessions = make_sessions(&[1, 2, 3]);

        let first = sessions[0].contribute().unwrap();
        assert!(first.is_some());
        assert!(sessions[0].contribute().unwrap().is_none());

        assert!(sessions[0].verify_and_complain().unwrap().is_none());
        assert!(sessions[0].verify_and_complain().unwrap().is_none());

        assert!(sessions[0].verify_and_justify().unwrap().is_none());
        assert!(sessions[0].verify_and_justify().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insufficient_members_aborts_commit() {
        let mut sessions = make_sessions(&[1, 2, 3]);

        // Nobody receives any foreign contribution: only the own one exists.
        sessions[0].contribute().unwrap();
        sessions[0].verify_and_complain().unwrap();
        sessions[0].verify_and_justify().unwrap();

        let err = sessions[0].verify_and_commit().unwrap_err();
        assert!(err.is_round_abort());
    }

    #[tokio::test]
    async fn test_wrong_quorum_message_rejected() {
        let mut sessions = make_sessions(&[1, 2, 3]);
        let mut msg = sessions[1].contribute().unwrap().unwrap();
        msg.quorum_hash = Hash::compute(b"other-quorum");

        let err = sessions[0]
            .receive_contribution(PeerId(9), msg)
            .await
            .unwrap_err();
        assert!(err.is_peer_fault());
    }
}
