//! Attestation proof verification
//!
//! A reading's proof is an Ed25519 signature over the BLAKE3 digest of the
//! reading's canonical bytes. Verification is deterministic and performs no
//! I/O, so callers can treat it as a bounded, non-blocking operation.
//!
//! The [`ProofVerifier`] trait keeps the scheme pluggable: the settlement core
//! only ever sees the trait. A deployment that requires post-quantum
//! signatures implements the trait over its own keyring without touching the
//! core.

use crate::keys::SourceKeyring;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Domain separation prefix for reading digests
const READING_DOMAIN: &[u8] = b"ELXR-READING-V1";

/// Errors that can occur during proof verification
#[derive(Debug, Error)]
pub enum ProofError {
    #[error("Unknown source: {source_id}")]
    UnknownSource { source_id: String },

    #[error("Malformed proof: {reason}")]
    MalformedProof { reason: String },

    #[error("Signature verification failed for source '{source_id}'")]
    VerificationFailed { source_id: String },
}

pub type Result<T> = std::result::Result<T, ProofError>;

/// Proof attached to a sensor/oracle reading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingProof {
    /// Ed25519 signature (64 bytes) over the reading digest
    pub signature: Vec<u8>,
}

impl ReadingProof {
    /// Sign a reading digest, producing a proof
    pub fn sign(signing_key: &SigningKey, digest: &[u8; 32]) -> Self {
        let signature = signing_key.sign(digest);
        Self {
            signature: signature.to_bytes().to_vec(),
        }
    }
}

/// Compute the BLAKE3 digest of a reading's canonical bytes
pub fn reading_digest(canonical_bytes: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(READING_DOMAIN);
    hasher.update(canonical_bytes);
    *hasher.finalize().as_bytes()
}

/// Verification capability consumed by the settlement core
pub trait ProofVerifier: Send + Sync {
    /// Verify that `proof` is a valid signature by `source_id` over `digest`
    fn verify(&self, source_id: &str, digest: &[u8; 32], proof: &ReadingProof) -> Result<()>;
}

impl<T: ProofVerifier + ?Sized> ProofVerifier for std::sync::Arc<T> {
    fn verify(&self, source_id: &str, digest: &[u8; 32], proof: &ReadingProof) -> Result<()> {
        (**self).verify(source_id, digest, proof)
    }
}

/// Default Ed25519 implementation backed by a [`SourceKeyring`]
pub struct Ed25519ProofVerifier {
    keyring: SourceKeyring,
}

impl Ed25519ProofVerifier {
    /// Create a verifier over the given keyring
    pub fn new(keyring: SourceKeyring) -> Self {
        Self { keyring }
    }

    /// Access the underlying keyring
    pub fn keyring(&self) -> &SourceKeyring {
        &self.keyring
    }

    /// Mutable access, for registering sources at runtime
    pub fn keyring_mut(&mut self) -> &mut SourceKeyring {
        &mut self.keyring
    }
}

impl ProofVerifier for Ed25519ProofVerifier {
    fn verify(&self, source_id: &str, digest: &[u8; 32], proof: &ReadingProof) -> Result<()> {
        let verifying_key =
            self.keyring
                .verifying_key(source_id)
                .map_err(|_| ProofError::UnknownSource {
                    source_id: source_id.to_string(),
                })?;

        if proof.signature.len() != 64 {
            return Err(ProofError::MalformedProof {
                reason: format!(
                    "signature length {} (expected 64)",
                    proof.signature.len()
                ),
            });
        }

        let sig_bytes: [u8; 64] =
            proof
                .signature
                .as_slice()
                .try_into()
                .map_err(|_| ProofError::MalformedProof {
                    reason: "invalid signature format".to_string(),
                })?;
        let signature = Signature::from_bytes(&sig_bytes);

        verifying_key
            .verify(digest, &signature)
            .map_err(|_| ProofError::VerificationFailed {
                source_id: source_id.to_string(),
            })
    }
}
