//! Cryptographic primitives for quorumnet
//!
//! This crate provides:
//! - BLS12-381 operator keys for signing and verifying DKG protocol messages
//! - Secret-share polynomials, verification vectors and encrypted share
//!   transport for the distributed key generation itself
//! - Threshold signature shares and quorum signature recovery
//! - An async worker pool that keeps pairing math off the scheduler tasks

pub mod error;
pub mod keys;
pub mod shares;
pub mod worker;

// Operator key exports
pub use keys::{
    BlsKeyPair, BlsPublicKey, BlsSecretKey, BlsSignature, DST_COMMITMENT, DST_DKG_MESSAGE,
};

// DKG share exports
pub use shares::{
    aggregate_shares, aggregate_vvecs, BlsPublicKeyShare, BlsSecretKeyShare, BlsSignatureShare,
    ContributionPolynomial, EncryptedShare, EncryptedShares, SecretShare, VerificationVector,
};

// Worker exports
pub use worker::{BlsWorker, SigCheckJob};

// Error exports
pub use error::BlsError;
