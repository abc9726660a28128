//! BLS12-381 operator keys
//!
//! Every masternode carries an operator key pair. DKG protocol messages are
//! signed with it, and encrypted secret shares are addressed to it. Domain
//! separation is done by prefixing a tag to the signed payload before
//! hashing, so a DKG message signature can never double as a commitment
//! signature share.

use crate::error::BlsError;
use blsttc::{PK_SIZE, SIG_SIZE, SK_SIZE};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Domain separation tag for DKG protocol message signing
pub const DST_DKG_MESSAGE: &[u8] = b"QUORUMNET_DKG_MSG_V1";

/// Domain separation tag for commitment signing (threshold signature
/// shares and the recovered quorum signature)
pub const DST_COMMITMENT: &[u8] = b"QUORUMNET_COMMITMENT_V1";

pub(crate) fn tagged(msg: &[u8], dst: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(dst);
    hasher.update(msg);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// BLS12-381 operator secret key (32 bytes)
#[derive(Clone)]
pub struct BlsSecretKey(blsttc::SecretKey);

impl BlsSecretKey {
    /// Generate a new random secret key
    pub fn generate<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        let mut ikm = [0u8; 32];
        rng.fill_bytes(&mut ikm);
        Self::from_seed(&ikm)
    }

    /// Derive deterministically from seed bytes.
    ///
    /// The seed is hashed until the digest is a canonical scalar, so any
    /// 32 bytes yield a valid key.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let mut candidate = *seed;
        loop {
            if let Ok(sk) = blsttc::SecretKey::from_bytes(candidate) {
                return Self(sk);
            }
            candidate = rehash(&candidate);
        }
    }

    /// Load from raw bytes (32-byte scalar)
    pub fn from_bytes(bytes: [u8; SK_SIZE]) -> Result<Self, BlsError> {
        blsttc::SecretKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| BlsError::InvalidSecretKey)
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> [u8; SK_SIZE] {
        self.0.to_bytes()
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> BlsPublicKey {
        BlsPublicKey(self.0.public_key())
    }

    /// Sign a message with domain separation
    pub fn sign(&self, msg: &[u8], dst: &[u8]) -> BlsSignature {
        BlsSignature(self.0.sign(tagged(msg, dst)))
    }

    pub(crate) fn inner(&self) -> &blsttc::SecretKey {
        &self.0
    }
}

fn rehash(bytes: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"QUORUMNET_KEYGEN_V1");
    hasher.update(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

impl std::fmt::Debug for BlsSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlsSecretKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// BLS12-381 operator public key (48 bytes compressed)
#[derive(Clone, PartialEq, Eq)]
pub struct BlsPublicKey(blsttc::PublicKey);

impl BlsPublicKey {
    /// Load from bytes (48 bytes compressed)
    pub fn from_bytes(bytes: [u8; PK_SIZE]) -> Result<Self, BlsError> {
        blsttc::PublicKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| BlsError::InvalidPublicKey)
    }

    /// Serialize to bytes (48 bytes compressed)
    pub fn to_bytes(&self) -> [u8; PK_SIZE] {
        self.0.to_bytes()
    }

    /// Verify a signature
    pub fn verify(&self, msg: &[u8], dst: &[u8], sig: &BlsSignature) -> bool {
        self.0.verify(&sig.0, tagged(msg, dst))
    }

    /// Get a hash of this public key
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.to_bytes());
        let result = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        bytes
    }

    pub(crate) fn inner(&self) -> &blsttc::PublicKey {
        &self.0
    }

    pub(crate) fn from_inner(pk: blsttc::PublicKey) -> Self {
        Self(pk)
    }
}

impl std::fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.to_bytes();
        write!(f, "BlsPublicKey({})", hex::encode(&bytes[..8]))
    }
}

impl Serialize for BlsPublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        crate::keys::serde_fixed::serialize(&self.to_bytes(), serializer)
    }
}

impl<'de> Deserialize<'de> for BlsPublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let arr: [u8; PK_SIZE] = crate::keys::serde_fixed::deserialize(deserializer)?;
        Self::from_bytes(arr).map_err(serde::de::Error::custom)
    }
}

/// BLS12-381 signature (96 bytes)
#[derive(Clone, PartialEq, Eq)]
pub struct BlsSignature(pub(crate) blsttc::Signature);

impl BlsSignature {
    /// Load from bytes (96 bytes)
    pub fn from_bytes(bytes: [u8; SIG_SIZE]) -> Result<Self, BlsError> {
        blsttc::Signature::from_bytes(bytes)
            .map(Self)
            .map_err(|_| BlsError::InvalidSignature)
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> [u8; SIG_SIZE] {
        self.0.to_bytes()
    }

    pub(crate) fn from_inner(sig: blsttc::Signature) -> Self {
        Self(sig)
    }
}

impl std::fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.to_bytes();
        write!(f, "BlsSignature({})", hex::encode(&bytes[..8]))
    }
}

impl Serialize for BlsSignature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        crate::keys::serde_fixed::serialize(&self.to_bytes(), serializer)
    }
}

impl<'de> Deserialize<'de> for BlsSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let arr: [u8; SIG_SIZE] = crate::keys::serde_fixed::deserialize(deserializer)?;
        Self::from_bytes(arr).map_err(serde::de::Error::custom)
    }
}

/// BLS key pair (convenience wrapper)
#[derive(Clone)]
pub struct BlsKeyPair {
    /// Operator secret key
    pub secret_key: BlsSecretKey,
    /// Operator public key
    pub public_key: BlsPublicKey,
}

impl BlsKeyPair {
    /// Generate a new random key pair
    pub fn generate<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        let secret_key = BlsSecretKey::generate(rng);
        let public_key = secret_key.public_key();
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create from secret key
    pub fn from_secret_key(secret_key: BlsSecretKey) -> Self {
        let public_key = secret_key.public_key();
        Self {
            secret_key,
            public_key,
        }
    }

    /// Sign a DKG protocol message hash
    pub fn sign_dkg_message(&self, msg: &[u8]) -> BlsSignature {
        self.secret_key.sign(msg, DST_DKG_MESSAGE)
    }
}

impl std::fmt::Debug for BlsKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlsKeyPair")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Serde helpers for fixed-size byte arrays: hex string when human readable,
/// length-prefix-free tuple otherwise.
pub(crate) mod serde_fixed {
    use serde::de::{SeqAccess, Visitor};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeTuple;

        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            let mut tuple = serializer.serialize_tuple(N)?;
            for byte in bytes {
                tuple.serialize_element(byte)?;
            }
            tuple.end()
        }
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
            bytes
                .try_into()
                .map_err(|_| serde::de::Error::custom("invalid byte length"))
        } else {
            struct ArrayVisitor<const N: usize>;

            impl<'de, const N: usize> Visitor<'de> for ArrayVisitor<N> {
                type Value = [u8; N];

                fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                    write!(formatter, "{N} bytes")
                }

                fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
                where
                    A: SeqAccess<'de>,
                {
                    let mut arr = [0u8; N];
                    for (i, byte) in arr.iter_mut().enumerate() {
                        *byte = seq
                            .next_element()?
                            .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                    }
                    Ok(arr)
                }
            }

            deserializer.deserialize_tuple(N, ArrayVisitor::<N>)
        }
    }
}
