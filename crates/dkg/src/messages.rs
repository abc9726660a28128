//! DKG wire message types
//!
//! Four protocol messages cross the wire during a DKG round, one per phase,
//! plus the final commitment assembled at the end. All wire encoding is
//! bincode with a hard size limit; the leading byte of every encoded
//! message is the quorum type, which the lifecycle coordinator peeks at to
//! route without a full decode.
//!
//! Sign-hashes are built from the canonical byte encodings of the fields
//! (signature excluded), so they are stable across serde representations.

use crate::error::MAX_MESSAGE_SIZE;
use bincode::Options;
use quorumnet_crypto::{
    BlsPublicKey, BlsSignature, BlsSignatureShare, EncryptedShares, SecretShare,
    VerificationVector,
};
use quorumnet_types::{BitSet, Hash, ProTxHash, QuorumType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Current final commitment wire version.
pub const FINAL_COMMITMENT_VERSION: u16 = 1;

/// The kind of a DKG wire message, used as the network command tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Contribution broadcast (verification vector + encrypted shares).
    Contribution,
    /// Complaint bitsets against misbehaving contributors.
    Complaint,
    /// Revealed plaintext shares answering complaints.
    Justification,
    /// Premature commitment over the valid-member view.
    PrematureCommitment,
    /// Watch subscription marker (no payload).
    Watch,
}

impl MessageKind {
    /// All message kinds that carry a payload, in phase order.
    pub const PAYLOAD_KINDS: [MessageKind; 4] = [
        MessageKind::Contribution,
        MessageKind::Complaint,
        MessageKind::Justification,
        MessageKind::PrematureCommitment,
    ];

    /// The network command tag for this kind.
    pub fn command_tag(&self) -> &'static str {
        match self {
            MessageKind::Contribution => "qcontrib",
            MessageKind::Complaint => "qcomplaint",
            MessageKind::Justification => "qjustify",
            MessageKind::PrematureCommitment => "qpcommit",
            MessageKind::Watch => "qwatch",
        }
    }

    /// Parse a network command tag.
    pub fn from_command(command: &str) -> Option<Self> {
        match command {
            "qcontrib" => Some(MessageKind::Contribution),
            "qcomplaint" => Some(MessageKind::Complaint),
            "qjustify" => Some(MessageKind::Justification),
            "qpcommit" => Some(MessageKind::PrematureCommitment),
            "qwatch" => Some(MessageKind::Watch),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.command_tag())
    }
}

/// Bincode options shared by all DKG wire codecs.
///
/// The size limit prevents OOM from hostile length claims; fixint keeps the
/// leading quorum-type byte at offset zero.
fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_MESSAGE_SIZE)
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

/// Encode a wire message.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode_options().serialize(msg)
}

/// Decode a wire message with bounds enforcement.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, bincode::Error> {
    bincode_options().deserialize(bytes)
}

fn bitset_bytes(bits: &BitSet) -> Vec<u8> {
    bits.as_slice().iter().map(|b| u8::from(*b)).collect()
}

/// First-phase broadcast: the dealer's verification vector plus one
/// encrypted share per member.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contribution {
    /// Quorum type; MUST stay the first field (wire routing byte).
    pub quorum_type: QuorumType,
    /// Base block hash of the quorum being built.
    pub quorum_hash: Hash,
    /// Dealer identity.
    pub pro_tx_hash: ProTxHash,
    /// Public commitment to the dealer's contribution polynomial.
    pub verification_vector: VerificationVector,
    /// Encrypted secret shares, one slot per member in member order.
    pub encrypted_shares: EncryptedShares,
    /// Operator signature over [`Contribution::sign_hash`].
    pub sig: BlsSignature,
}

impl Contribution {
    /// The hash a dealer signs over these fields, computable before the
    /// message is assembled.
    pub fn sign_hash_parts(
        quorum_type: QuorumType,
        quorum_hash: &Hash,
        pro_tx_hash: &ProTxHash,
        verification_vector: &VerificationVector,
        encrypted_shares: &EncryptedShares,
    ) -> Hash {
        let mut share_digest = Vec::with_capacity(encrypted_shares.len() * 32);
        for i in 0..encrypted_shares.len() {
            if let Ok(ct) = encrypted_shares.get(i) {
                share_digest.extend_from_slice(Hash::compute(&ct.to_bytes()).as_slice());
            }
        }
        Hash::compute_parts(&[
            MessageKind::Contribution.command_tag().as_bytes(),
            &[quorum_type.as_u8()],
            quorum_hash.as_slice(),
            pro_tx_hash.as_slice(),
            verification_vector.hash().as_slice(),
            &share_digest,
        ])
    }

    /// Hash signed by the dealer's operator key.
    pub fn sign_hash(&self) -> Hash {
        Self::sign_hash_parts(
            self.quorum_type,
            &self.quorum_hash,
            &self.pro_tx_hash,
            &self.verification_vector,
            &self.encrypted_shares,
        )
    }
}

/// Second-phase broadcast: which contributors this member accuses.
///
/// `bad_members` marks members this node already considers bad (e.g. two
/// conflicting contributions); `complain_for_members` marks members whose
/// share failed verification or never arrived.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Complaint {
    /// Quorum type; MUST stay the first field (wire routing byte).
    pub quorum_type: QuorumType,
    /// Base block hash of the quorum being built.
    pub quorum_hash: Hash,
    /// Complaining member.
    pub pro_tx_hash: ProTxHash,
    /// Members considered outright bad.
    pub bad_members: BitSet,
    /// Members complained against for this round.
    pub complain_for_members: BitSet,
    /// Operator signature over [`Complaint::sign_hash`].
    pub sig: BlsSignature,
}

impl Complaint {
    /// The hash a complainer signs over these fields.
    pub fn sign_hash_parts(
        quorum_type: QuorumType,
        quorum_hash: &Hash,
        pro_tx_hash: &ProTxHash,
        bad_members: &BitSet,
        complain_for_members: &BitSet,
    ) -> Hash {
        Hash::compute_parts(&[
            MessageKind::Complaint.command_tag().as_bytes(),
            &[quorum_type.as_u8()],
            quorum_hash.as_slice(),
            pro_tx_hash.as_slice(),
            &bitset_bytes(bad_members),
            &bitset_bytes(complain_for_members),
        ])
    }

    /// Hash signed by the complaining member's operator key.
    pub fn sign_hash(&self) -> Hash {
        Self::sign_hash_parts(
            self.quorum_type,
            &self.quorum_hash,
            &self.pro_tx_hash,
            &self.bad_members,
            &self.complain_for_members,
        )
    }
}

/// Third-phase broadcast: plaintext shares revealed in answer to
/// complaints, so every member can re-verify them publicly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Justification {
    /// Quorum type; MUST stay the first field (wire routing byte).
    pub quorum_type: QuorumType,
    /// Base block hash of the quorum being built.
    pub quorum_hash: Hash,
    /// Accused member revealing its shares.
    pub pro_tx_hash: ProTxHash,
    /// `(member_index, share)` pairs for each complaining member.
    pub shares: Vec<(u16, SecretShare)>,
    /// Operator signature over [`Justification::sign_hash`].
    pub sig: BlsSignature,
}

impl Justification {
    /// The hash an accused member signs over these fields.
    pub fn sign_hash_parts(
        quorum_type: QuorumType,
        quorum_hash: &Hash,
        pro_tx_hash: &ProTxHash,
        shares: &[(u16, SecretShare)],
    ) -> Hash {
        let mut share_digest = Vec::with_capacity(shares.len() * 34);
        for (index, share) in shares {
            share_digest.extend_from_slice(&index.to_le_bytes());
            let bytes = bincode_options().serialize(share).unwrap_or_default();
            share_digest.extend_from_slice(Hash::compute(&bytes).as_slice());
        }
        Hash::compute_parts(&[
            MessageKind::Justification.command_tag().as_bytes(),
            &[quorum_type.as_u8()],
            quorum_hash.as_slice(),
            pro_tx_hash.as_slice(),
            &share_digest,
        ])
    }

    /// Hash signed by the justifying member's operator key.
    pub fn sign_hash(&self) -> Hash {
        Self::sign_hash_parts(
            self.quorum_type,
            &self.quorum_hash,
            &self.pro_tx_hash,
            &self.shares,
        )
    }
}

/// Fourth-phase broadcast: a member's view of the finished quorum, with a
/// threshold signature share proving it holds a working key share.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrematureCommitment {
    /// Quorum type; MUST stay the first field (wire routing byte).
    pub quorum_type: QuorumType,
    /// Base block hash of the quorum being built.
    pub quorum_hash: Hash,
    /// Committing member.
    pub pro_tx_hash: ProTxHash,
    /// The member's valid-member bitset view.
    pub valid_members: BitSet,
    /// Aggregated quorum public key under that view.
    pub quorum_public_key: BlsPublicKey,
    /// Hash of the aggregated verification vector.
    pub quorum_vvec_hash: Hash,
    /// Threshold signature share over the commitment hash.
    pub quorum_sig_share: BlsSignatureShare,
    /// Operator signature over [`PrematureCommitment::sign_hash`].
    pub sig: BlsSignature,
}

impl PrematureCommitment {
    /// The commitment hash this member's threshold share signs.
    pub fn commitment_hash(&self) -> Hash {
        build_commitment_hash(
            self.quorum_type,
            &self.quorum_hash,
            &self.valid_members,
            &self.quorum_public_key,
            &self.quorum_vvec_hash,
        )
    }

    /// The hash a committing member signs over these fields.
    #[allow(clippy::too_many_arguments)]
    pub fn sign_hash_parts(
        quorum_type: QuorumType,
        quorum_hash: &Hash,
        pro_tx_hash: &ProTxHash,
        valid_members: &BitSet,
        quorum_public_key: &BlsPublicKey,
        quorum_vvec_hash: &Hash,
        quorum_sig_share: &BlsSignatureShare,
    ) -> Hash {
        Hash::compute_parts(&[
            MessageKind::PrematureCommitment.command_tag().as_bytes(),
            &[quorum_type.as_u8()],
            quorum_hash.as_slice(),
            pro_tx_hash.as_slice(),
            &bitset_bytes(valid_members),
            &quorum_public_key.to_bytes(),
            quorum_vvec_hash.as_slice(),
            &quorum_sig_share.to_bytes(),
        ])
    }

    /// Hash signed by the committing member's operator key.
    pub fn sign_hash(&self) -> Hash {
        Self::sign_hash_parts(
            self.quorum_type,
            &self.quorum_hash,
            &self.pro_tx_hash,
            &self.valid_members,
            &self.quorum_public_key,
            &self.quorum_vvec_hash,
            &self.quorum_sig_share,
        )
    }
}

/// Hash over a quorum's identity and outcome, signed by member threshold
/// shares and recovered into the final quorum signature.
pub fn build_commitment_hash(
    quorum_type: QuorumType,
    quorum_hash: &Hash,
    valid_members: &BitSet,
    quorum_public_key: &BlsPublicKey,
    quorum_vvec_hash: &Hash,
) -> Hash {
    Hash::compute_parts(&[
        &[quorum_type.as_u8()],
        quorum_hash.as_slice(),
        &bitset_bytes(valid_members),
        &quorum_public_key.to_bytes(),
        quorum_vvec_hash.as_slice(),
    ])
}

/// The aggregated outcome of a successful DKG round.
///
/// Only valid if at least `threshold` premature commitments with an
/// identical quorum view were collected; carried out-of-band by the mining
/// subsystem inside the commitment transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinalCommitment {
    /// Wire version.
    pub version: u16,
    /// Quorum type.
    pub quorum_type: QuorumType,
    /// Base block hash of the finished quorum.
    pub quorum_hash: Hash,
    /// Members whose signature shares went into `quorum_sig`.
    pub signers: BitSet,
    /// Members that survived the DKG.
    pub valid_members: BitSet,
    /// The new quorum's aggregated public key.
    pub quorum_public_key: BlsPublicKey,
    /// Hash of the aggregated verification vector.
    pub quorum_vvec_hash: Hash,
    /// Recovered threshold signature over the commitment hash.
    pub quorum_sig: BlsSignature,
}

impl FinalCommitment {
    /// Number of contributing signers.
    pub fn count_signers(&self) -> usize {
        self.signers.count_set()
    }

    /// Number of valid members.
    pub fn count_valid_members(&self) -> usize {
        self.valid_members.count_set()
    }

    /// The commitment hash `quorum_sig` covers.
    pub fn commitment_hash(&self) -> Hash {
        build_commitment_hash(
            self.quorum_type,
            &self.quorum_hash,
            &self.valid_members,
            &self.quorum_public_key,
            &self.quorum_vvec_hash,
        )
    }

    /// Structural validity against quorum parameters: bitset lengths match
    /// the quorum size and both counts reach the threshold.
    pub fn verify_sizes(&self, params: &quorumnet_types::QuorumParams) -> bool {
        self.signers.len() == self.valid_members.len()
            && self.signers.len() <= params.size
            && self.count_signers() >= params.threshold
            && self.count_valid_members() >= params.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complaint() -> Complaint {
        let sig = test_sig();
        Complaint {
            quorum_type: QuorumType(100),
            quorum_hash: Hash::compute(b"base"),
            pro_tx_hash: ProTxHash::from_bytes([7u8; 32]),
            bad_members: BitSet::with_len(3),
            complain_for_members: BitSet::from_vec(vec![false, true, false]),
            sig,
        }
    }

    fn test_sig() -> BlsSignature {
        use quorumnet_crypto::BlsSecretKey;
        BlsSecretKey::from_seed(&[1u8; 32]).sign(b"x", b"TEST")
    }

    #[test]
    fn test_command_tags_roundtrip() {
        for kind in MessageKind::PAYLOAD_KINDS {
            assert_eq!(MessageKind::from_command(kind.command_tag()), Some(kind));
        }
        assert_eq!(
            MessageKind::from_command("qwatch"),
            Some(MessageKind::Watch)
        );
        assert_eq!(MessageKind::from_command("qnope"), None);
    }

    #[test]
    fn test_quorum_type_is_leading_byte() {
        let msg = complaint();
        let bytes = encode(&msg).unwrap();
        assert_eq!(bytes[0], 100);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode::<Complaint>(&[0xff; 3]).is_err());
    }

    #[test]
    fn test_complaint_roundtrip() {
        let msg = complaint();
        let bytes = encode(&msg).unwrap();
        let back: Complaint = decode(&bytes).unwrap();
        assert_eq!(back.sign_hash(), msg.sign_hash());
        assert_eq!(back.complain_for_members.get(1), true);
    }

    #[test]
    fn test_sign_hash_excludes_signature() {
        let a = complaint();
        let mut b = a.clone();
        b.sig = {
            use quorumnet_crypto::BlsSecretKey;
            BlsSecretKey::from_seed(&[2u8; 32]).sign(b"y", b"TEST")
        };
        assert_eq!(a.sign_hash(), b.sign_hash());
    }

    #[test]
    fn test_sign_hash_covers_content() {
        let a = complaint();
        let mut b = a.clone();
        b.complain_for_members = BitSet::with_len(3);
        assert_ne!(a.sign_hash(), b.sign_hash());
    }

    #[test]
    fn test_final_commitment_sizes() {
        let params = quorumnet_types::QuorumParams::TEST_3_2;
        let fc = FinalCommitment {
            version: FINAL_COMMITMENT_VERSION,
            quorum_type: params.quorum_type,
            quorum_hash: Hash::compute(b"base"),
            signers: BitSet::from_vec(vec![true, true, false]),
            valid_members: BitSet::from_vec(vec![true, true, true]),
            quorum_public_key: quorumnet_crypto::BlsSecretKey::from_seed(&[3u8; 32]).public_key(),
            quorum_vvec_hash: Hash::compute(b"vvec"),
            quorum_sig: test_sig(),
        };
        assert!(fc.verify_sizes(&params));
        assert_eq!(fc.count_signers(), 2);
        assert_eq!(fc.count_valid_members(), 3);

        let mut short = fc.clone();
        short.signers = BitSet::from_vec(vec![true, false, false]);
        assert!(!short.verify_sizes(&params));
    }
}
