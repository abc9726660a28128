//! Async BLS worker pool
//!
//! Pairing operations are far too slow for scheduler or network tasks, so
//! all verification and decryption is funneled through this pool. Work runs
//! on the blocking thread pool, bounded by a semaphore so a flood of
//! verification jobs cannot occupy every blocking thread.

use crate::error::BlsError;
use crate::keys::{BlsPublicKey, BlsSecretKey, BlsSignature};
use crate::shares::{
    BlsPublicKeyShare, BlsSignatureShare, EncryptedShare, SecretShare, VerificationVector,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::trace;

/// One message-signature verification job.
#[derive(Debug, Clone)]
pub struct SigCheckJob {
    /// Claimed signer.
    pub public_key: BlsPublicKey,
    /// Signed payload (usually a sign-hash).
    pub msg: Vec<u8>,
    /// Domain separation tag.
    pub dst: &'static [u8],
    /// Signature to check.
    pub signature: BlsSignature,
}

/// Bounded pool for BLS verification and share decryption.
#[derive(Clone)]
pub struct BlsWorker {
    permits: Arc<Semaphore>,
}

impl Default for BlsWorker {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::new(parallelism)
    }
}

impl BlsWorker {
    /// Create a pool running at most `max_parallel` jobs at once.
    pub fn new(max_parallel: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_parallel.max(1))),
        }
    }

    async fn run_blocking<F, T>(&self, f: F) -> Result<T, BlsError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BlsError::WorkerUnavailable)?;
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|_| BlsError::WorkerUnavailable)
    }

    /// Verify a batch of message signatures.
    ///
    /// Returns one bool per job, in order. The whole batch runs as a single
    /// blocking job; callers batch per drain iteration, which keeps the
    /// per-job overhead negligible.
    pub async fn verify_message_sigs(
        &self,
        jobs: Vec<SigCheckJob>,
    ) -> Result<Vec<bool>, BlsError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let count = jobs.len();
        let results = self
            .run_blocking(move || {
                jobs.iter()
                    .map(|job| job.public_key.verify(&job.msg, job.dst, &job.signature))
                    .collect::<Vec<bool>>()
            })
            .await?;
        trace!(jobs = count, "verified message signature batch");
        Ok(results)
    }

    /// Verify one secret share against a dealer's verification vector.
    pub async fn verify_share(
        &self,
        share: SecretShare,
        vvec: VerificationVector,
        member_index: usize,
    ) -> Result<bool, BlsError> {
        self.run_blocking(move || share.verify(&vvec, member_index))
            .await
    }

    /// Verify one threshold signature share against a public key share.
    pub async fn verify_signature_share(
        &self,
        public_key_share: BlsPublicKeyShare,
        msg: Vec<u8>,
        dst: &'static [u8],
        share: BlsSignatureShare,
    ) -> Result<bool, BlsError> {
        self.run_blocking(move || public_key_share.verify(&msg, dst, &share))
            .await
    }

    /// Decrypt an encrypted share and verify it against the dealer's
    /// verification vector in one job.
    pub async fn decrypt_and_verify_share(
        &self,
        secret_key: BlsSecretKey,
        encrypted: EncryptedShare,
        vvec: VerificationVector,
        member_index: usize,
    ) -> Result<SecretShare, BlsError> {
        self.run_blocking(move || {
            let share = encrypted.decrypt(&secret_key)?;
            if !share.verify(&vvec, member_index) {
                return Err(BlsError::InvalidShare);
            }
            Ok(share)
        })
        .await?
    }
}

impl std::fmt::Debug for BlsWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlsWorker")
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{BlsKeyPair, DST_DKG_MESSAGE};
    use crate::shares::{ContributionPolynomial, EncryptedShares};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[tokio::test]
    async fn test_verify_message_sig_batch() {
        let mut rng = StdRng::seed_from_u64(11);
        let worker = BlsWorker::new(2);

        let good = BlsKeyPair::generate(&mut rng);
        let impostor = BlsKeyPair::generate(&mut rng);

        let jobs = vec![
            SigCheckJob {
                public_key: good.public_key.clone(),
                msg: b"hello".to_vec(),
                dst: DST_DKG_MESSAGE,
                signature: good.sign_dkg_message(b"hello"),
            },
            SigCheckJob {
                public_key: good.public_key.clone(),
                msg: b"hello".to_vec(),
                dst: DST_DKG_MESSAGE,
                signature: impostor.sign_dkg_message(b"hello"),
            },
        ];

        let results = worker.verify_message_sigs(jobs).await.unwrap();
        assert_eq!(results, vec![true, false]);
    }

    #[tokio::test]
    async fn test_decrypt_and_verify_share() {
        let mut rng = StdRng::seed_from_u64(12);
        let worker = BlsWorker::new(2);

        let keys: Vec<_> = (0..3).map(|_| BlsKeyPair::generate(&mut rng)).collect();
        let pubkeys: Vec<_> = keys.iter().map(|k| k.public_key.clone()).collect();

        let poly = ContributionPolynomial::generate(2, &mut rng);
        let vvec = poly.verification_vector();
        let encrypted = EncryptedShares::encrypt(&poly, &pubkeys).unwrap();

        let share = worker
            .decrypt_and_verify_share(
                keys[1].secret_key.clone(),
                encrypted.get(1).unwrap().clone(),
                vvec.clone(),
                1,
            )
            .await
            .unwrap();
        assert!(share.verify(&vvec, 1));

        // Wrong recipient key cannot produce a valid share.
        let err = worker
            .decrypt_and_verify_share(
                keys[0].secret_key.clone(),
                encrypted.get(1).unwrap().clone(),
                vvec,
                1,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BlsError::DecryptionFailed | BlsError::InvalidShare
        ));
    }
}
