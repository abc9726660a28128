//! Cryptographic error types

use thiserror::Error;

/// BLS12-381 cryptographic errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlsError {
    /// Invalid secret key bytes
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    /// Invalid public key bytes
    #[error("invalid public key bytes")]
    InvalidPublicKey,

    /// Invalid signature bytes
    #[error("invalid signature bytes")]
    InvalidSignature,

    /// Invalid secret share encoding
    #[error("invalid secret share encoding")]
    InvalidShare,

    /// Invalid ciphertext encoding
    #[error("invalid ciphertext encoding")]
    InvalidCiphertext,

    /// Share decryption failed
    #[error("share decryption failed")]
    DecryptionFailed,

    /// No recipient slot for the requested member index
    #[error("no encrypted share for member index {0}")]
    MissingRecipient(usize),

    /// Empty input for aggregation
    #[error("cannot aggregate an empty set")]
    EmptyAggregation,

    /// Mismatched polynomial degrees in aggregation
    #[error("mismatched verification vector degrees")]
    DegreeMismatch,

    /// Not enough signature shares to recover a quorum signature
    #[error("not enough signature shares: got {got}, need {need}")]
    ThresholdNotMet {
        /// Shares supplied
        got: usize,
        /// Shares required
        need: usize,
    },

    /// Threshold signature recovery failed
    #[error("threshold signature recovery failed")]
    RecoveryFailed,

    /// The BLS worker pool was shut down mid-operation
    #[error("bls worker unavailable")]
    WorkerUnavailable,
}
