//! Secret-share polynomials and verification vectors
//!
//! The DKG contribution of a member is a random polynomial of degree
//! `threshold - 1`. The polynomial commitment (verification vector) is
//! broadcast in the clear; the evaluation at every other member's index is
//! delivered encrypted to that member. Members verify received shares
//! against the dealer's verification vector, sum all valid shares into
//! their final key share, and sum the verification vectors into the quorum
//! public key set used for threshold signature recovery.
//!
//! Share indexes follow the convention of [`blsttc`]'s key sets: member `i`
//! holds the evaluation at `i + 1`, so index `0` never collides with the
//! secret at the origin.

use crate::error::BlsError;
use crate::keys::{serde_fixed, BlsPublicKey, BlsSecretKey};
use blsttc::poly::{Commitment, Poly};
use blsttc::SIG_SIZE;
use quorumnet_types::Hash;
use rand::Rng;
use serde::{Deserialize, Serialize};

fn share_x(member_index: usize) -> u64 {
    member_index as u64 + 1
}

/// A dealer's secret contribution polynomial.
pub struct ContributionPolynomial {
    poly: Poly,
}

impl ContributionPolynomial {
    /// Generate a fresh random polynomial for the given signing threshold.
    ///
    /// `threshold` is the number of members needed to produce a quorum
    /// signature, so the polynomial degree is `threshold - 1`.
    pub fn generate<R: Rng>(threshold: usize, rng: &mut R) -> Self {
        debug_assert!(threshold >= 1);
        Self {
            poly: Poly::random(threshold.saturating_sub(1), rng),
        }
    }

    /// The public commitment to this polynomial.
    pub fn verification_vector(&self) -> VerificationVector {
        VerificationVector {
            commitment: self.poly.commitment(),
        }
    }

    /// The secret share destined for `member_index`.
    pub fn share_for(&self, member_index: usize) -> SecretShare {
        let eval = self.poly.evaluate(share_x(member_index));
        SecretShare {
            poly: Poly::constant(eval),
        }
    }
}

impl std::fmt::Debug for ContributionPolynomial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContributionPolynomial")
            .field("degree", &self.poly.degree())
            .field("coefficients", &"[REDACTED]")
            .finish()
    }
}

/// A single secret share: one polynomial evaluation, kept as a degree-zero
/// polynomial so shares can be summed and committed without exposing raw
/// scalar types.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretShare {
    poly: Poly,
}

impl SecretShare {
    /// Verify this share against a dealer's verification vector.
    ///
    /// Checks that the share times the generator equals the commitment
    /// evaluated at the receiving member's index.
    pub fn verify(&self, vvec: &VerificationVector, member_index: usize) -> bool {
        let expected = vvec.commitment.evaluate(share_x(member_index));
        let actual = self.poly.commitment().evaluate(0u64);
        expected == actual
    }

    /// Convert this single share into a key share (used when only one valid
    /// contribution exists, e.g. in minimal test quorums).
    pub fn to_key_share(&self) -> BlsSecretKeyShare {
        let mut eval = self.poly.evaluate(0u64);
        BlsSecretKeyShare {
            inner: blsttc::SecretKeyShare::from_mut(&mut eval),
        }
    }
}

impl std::fmt::Debug for SecretShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretShare")
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Sum verified shares from all dealers into the member's final key share.
pub fn aggregate_shares<'a, I>(shares: I) -> Result<BlsSecretKeyShare, BlsError>
where
    I: IntoIterator<Item = &'a SecretShare>,
{
    let mut iter = shares.into_iter();
    let first = iter.next().ok_or(BlsError::EmptyAggregation)?;
    let mut acc = first.poly.clone();
    for share in iter {
        acc += &share.poly;
    }
    let mut eval = acc.evaluate(0u64);
    Ok(BlsSecretKeyShare {
        inner: blsttc::SecretKeyShare::from_mut(&mut eval),
    })
}

/// Sum the verification vectors of all valid dealers into the quorum
/// verification vector.
pub fn aggregate_vvecs<'a, I>(vvecs: I) -> Result<VerificationVector, BlsError>
where
    I: IntoIterator<Item = &'a VerificationVector>,
{
    let mut iter = vvecs.into_iter();
    let first = iter.next().ok_or(BlsError::EmptyAggregation)?;
    let mut acc = first.commitment.clone();
    for vvec in iter {
        if vvec.commitment.degree() != acc.degree() {
            return Err(BlsError::DegreeMismatch);
        }
        acc += &vvec.commitment;
    }
    Ok(VerificationVector { commitment: acc })
}

/// Public polynomial commitment (verification vector).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationVector {
    commitment: Commitment,
}

impl VerificationVector {
    /// Polynomial degree; the signing threshold is `degree + 1`.
    pub fn degree(&self) -> usize {
        self.commitment.degree()
    }

    /// Stable hash of the verification vector, used in commitment hashes.
    pub fn hash(&self) -> Hash {
        // bincode of the commitment is canonical for a fixed degree
        let bytes = bincode::serialize(&self.commitment).unwrap_or_default();
        Hash::compute(&bytes)
    }

    /// The quorum public key (commitment evaluated at the origin).
    pub fn public_key(&self) -> BlsPublicKey {
        BlsPublicKey::from_inner(self.key_set().public_key())
    }

    /// The public key share of `member_index` under this vector.
    pub fn public_key_share(&self, member_index: usize) -> BlsPublicKeyShare {
        BlsPublicKeyShare(self.key_set().public_key_share(member_index))
    }

    /// Recover the quorum threshold signature from member signature shares.
    ///
    /// `shares` maps member index to that member's signature share over the
    /// same message. Requires at least `degree + 1` shares.
    pub fn recover_signature(
        &self,
        shares: &[(usize, BlsSignatureShare)],
    ) -> Result<crate::keys::BlsSignature, BlsError> {
        let need = self.degree() + 1;
        if shares.len() < need {
            return Err(BlsError::ThresholdNotMet {
                got: shares.len(),
                need,
            });
        }
        let sig = self
            .key_set()
            .combine_signatures(shares.iter().map(|(i, s)| (*i, &s.0)))
            .map_err(|_| BlsError::RecoveryFailed)?;
        Ok(crate::keys::BlsSignature::from_inner(sig))
    }

    fn key_set(&self) -> blsttc::PublicKeySet {
        blsttc::PublicKeySet::from(self.commitment.clone())
    }
}

impl std::fmt::Debug for VerificationVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "VerificationVector(degree={}, hash={})",
            self.degree(),
            self.hash()
        )
    }
}

/// A member's aggregated secret key share.
#[derive(Clone)]
pub struct BlsSecretKeyShare {
    inner: blsttc::SecretKeyShare,
}

impl BlsSecretKeyShare {
    /// Sign a message with domain separation, producing a signature share.
    pub fn sign(&self, msg: &[u8], dst: &[u8]) -> BlsSignatureShare {
        BlsSignatureShare(self.inner.sign(crate::keys::tagged(msg, dst)))
    }

    /// The matching public key share.
    pub fn public_key_share(&self) -> BlsPublicKeyShare {
        BlsPublicKeyShare(self.inner.public_key_share())
    }
}

impl std::fmt::Debug for BlsSecretKeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlsSecretKeyShare")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A public key share of one quorum member.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BlsPublicKeyShare(blsttc::PublicKeyShare);

impl BlsPublicKeyShare {
    /// Verify a signature share over a domain-separated message.
    pub fn verify(&self, msg: &[u8], dst: &[u8], sig: &BlsSignatureShare) -> bool {
        self.0.verify(&sig.0, crate::keys::tagged(msg, dst))
    }
}

/// One member's signature share over a commitment hash.
#[derive(Clone, PartialEq, Eq)]
pub struct BlsSignatureShare(blsttc::SignatureShare);

impl BlsSignatureShare {
    /// Load from bytes (96 bytes)
    pub fn from_bytes(bytes: [u8; SIG_SIZE]) -> Result<Self, BlsError> {
        blsttc::SignatureShare::from_bytes(bytes)
            .map(Self)
            .map_err(|_| BlsError::InvalidSignature)
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> [u8; SIG_SIZE] {
        self.0.to_bytes()
    }
}

impl std::fmt::Debug for BlsSignatureShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.to_bytes();
        write!(f, "BlsSignatureShare({})", hex::encode(&bytes[..8]))
    }
}

impl Serialize for BlsSignatureShare {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serde_fixed::serialize(&self.to_bytes(), serializer)
    }
}

impl<'de> Deserialize<'de> for BlsSignatureShare {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let arr: [u8; SIG_SIZE] = serde_fixed::deserialize(deserializer)?;
        Self::from_bytes(arr).map_err(serde::de::Error::custom)
    }
}

/// An encrypted secret share addressed to a single member.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedShare(blsttc::Ciphertext);

impl EncryptedShare {
    /// Encrypt a single share for one recipient.
    pub fn seal(recipient: &BlsPublicKey, share: &SecretShare) -> Result<Self, BlsError> {
        let plain = bincode::serialize(share).map_err(|_| BlsError::InvalidShare)?;
        Ok(Self(recipient.inner().encrypt(plain)))
    }

    /// Decrypt with the recipient's operator secret key.
    pub fn decrypt(&self, secret_key: &BlsSecretKey) -> Result<SecretShare, BlsError> {
        if !self.0.verify() {
            return Err(BlsError::InvalidCiphertext);
        }
        let plain = secret_key
            .inner()
            .decrypt(&self.0)
            .ok_or(BlsError::DecryptionFailed)?;
        bincode::deserialize(&plain).map_err(|_| BlsError::InvalidShare)
    }

    /// Canonical serialized form (used for message digests).
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(&self.0).unwrap_or_default()
    }

    /// Parse from serialized form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlsError> {
        bincode::deserialize(bytes)
            .map(Self)
            .map_err(|_| BlsError::InvalidCiphertext)
    }
}

impl std::fmt::Debug for EncryptedShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptedShare({} bytes)", self.to_bytes().len())
    }
}

impl Serialize for EncryptedShare {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.to_bytes()))
        } else {
            serializer.serialize_bytes(&self.to_bytes())
        }
    }
}

impl<'de> Deserialize<'de> for EncryptedShare {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
            Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
        } else {
            let bytes: Vec<u8> = serde::Deserialize::deserialize(deserializer)?;
            Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
        }
    }
}

/// The full set of encrypted shares a dealer broadcasts, one slot per
/// quorum member in member order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedShares {
    ciphertexts: Vec<EncryptedShare>,
}

impl EncryptedShares {
    /// Encrypt one share per recipient, in member order.
    pub fn encrypt(
        polynomial: &ContributionPolynomial,
        recipients: &[BlsPublicKey],
    ) -> Result<Self, BlsError> {
        let mut ciphertexts = Vec::with_capacity(recipients.len());
        for (index, recipient) in recipients.iter().enumerate() {
            ciphertexts.push(EncryptedShare::seal(recipient, &polynomial.share_for(index))?);
        }
        Ok(Self { ciphertexts })
    }

    /// Assemble from pre-sealed per-recipient slots.
    pub fn from_slots(ciphertexts: Vec<EncryptedShare>) -> Self {
        Self { ciphertexts }
    }

    /// The encrypted share for `member_index`.
    pub fn get(&self, member_index: usize) -> Result<&EncryptedShare, BlsError> {
        self.ciphertexts
            .get(member_index)
            .ok_or(BlsError::MissingRecipient(member_index))
    }

    /// Number of recipient slots.
    pub fn len(&self) -> usize {
        self.ciphertexts.len()
    }

    /// Whether there are no recipient slots.
    pub fn is_empty(&self) -> bool {
        self.ciphertexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{BlsKeyPair, DST_COMMITMENT};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const THRESHOLD: usize = 2;
    const MEMBERS: usize = 3;

    fn member_keys(rng: &mut StdRng) -> Vec<BlsKeyPair> {
        (0..MEMBERS).map(|_| BlsKeyPair::generate(rng)).collect()
    }

    #[test]
    fn test_share_verifies_against_vvec() {
        let mut rng = StdRng::seed_from_u64(1);
        let poly = ContributionPolynomial::generate(THRESHOLD, &mut rng);
        let vvec = poly.verification_vector();

        for i in 0..MEMBERS {
            assert!(poly.share_for(i).verify(&vvec, i));
        }
    }

    #[test]
    fn test_wrong_index_fails_verification() {
        let mut rng = StdRng::seed_from_u64(2);
        let poly = ContributionPolynomial::generate(THRESHOLD, &mut rng);
        let vvec = poly.verification_vector();

        let share = poly.share_for(0);
        assert!(!share.verify(&vvec, 1));
    }

    #[test]
    fn test_encrypted_share_roundtrip() {
        let mut rng = StdRng::seed_from_u64(3);
        let keys = member_keys(&mut rng);
        let pubkeys: Vec<_> = keys.iter().map(|k| k.public_key.clone()).collect();

        let poly = ContributionPolynomial::generate(THRESHOLD, &mut rng);
        let vvec = poly.verification_vector();
        let encrypted = EncryptedShares::encrypt(&poly, &pubkeys).unwrap();
        assert_eq!(encrypted.len(), MEMBERS);

        for (i, key) in keys.iter().enumerate() {
            let share = encrypted.get(i).unwrap().decrypt(&key.secret_key).unwrap();
            assert!(share.verify(&vvec, i));
        }
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let mut rng = StdRng::seed_from_u64(4);
        let keys = member_keys(&mut rng);
        let pubkeys: Vec<_> = keys.iter().map(|k| k.public_key.clone()).collect();

        let poly = ContributionPolynomial::generate(THRESHOLD, &mut rng);
        let encrypted = EncryptedShares::encrypt(&poly, &pubkeys).unwrap();

        // Member 1's ciphertext cannot be opened by member 0's key.
        assert!(encrypted
            .get(1)
            .unwrap()
            .decrypt(&keys[0].secret_key)
            .is_err());
    }

    #[test]
    fn test_full_dkg_and_threshold_signature() {
        let mut rng = StdRng::seed_from_u64(5);

        // Every member deals a contribution.
        let polys: Vec<_> = (0..MEMBERS)
            .map(|_| ContributionPolynomial::generate(THRESHOLD, &mut rng))
            .collect();
        let vvecs: Vec<_> = polys.iter().map(|p| p.verification_vector()).collect();

        let quorum_vvec = aggregate_vvecs(vvecs.iter()).unwrap();
        let quorum_pubkey = quorum_vvec.public_key();

        // Every member aggregates its received shares.
        let key_shares: Vec<_> = (0..MEMBERS)
            .map(|i| {
                let received: Vec<_> = polys.iter().map(|p| p.share_for(i)).collect();
                aggregate_shares(received.iter()).unwrap()
            })
            .collect();

        // Key shares must match the aggregated verification vector.
        for (i, ks) in key_shares.iter().enumerate() {
            assert_eq!(ks.public_key_share(), quorum_vvec.public_key_share(i));
        }

        // threshold members sign; the recovered signature verifies under the
        // quorum public key.
        let msg = b"commitment hash";
        let sig_shares: Vec<_> = key_shares
            .iter()
            .enumerate()
            .take(THRESHOLD)
            .map(|(i, ks)| (i, ks.sign(msg, DST_COMMITMENT)))
            .collect();

        let quorum_sig = quorum_vvec.recover_signature(&sig_shares).unwrap();
        assert!(quorum_pubkey.verify(msg, DST_COMMITMENT, &quorum_sig));
    }

    #[test]
    fn test_recovery_below_threshold_fails() {
        let mut rng = StdRng::seed_from_u64(6);
        let poly = ContributionPolynomial::generate(THRESHOLD, &mut rng);
        let vvec = poly.verification_vector();

        let share = poly.share_for(0).to_key_share();
        let sig = share.sign(b"msg", DST_COMMITMENT);

        let err = vvec.recover_signature(&[(0, sig)]).unwrap_err();
        assert!(matches!(err, BlsError::ThresholdNotMet { got: 1, need: 2 }));
    }

    #[test]
    fn test_aggregate_empty_fails() {
        assert!(matches!(
            aggregate_vvecs(std::iter::empty()),
            Err(BlsError::EmptyAggregation)
        ));
        assert!(matches!(
            aggregate_shares(std::iter::empty()),
            Err(BlsError::EmptyAggregation)
        ));
    }
}
