//! Cryptographic verification layer for the ELXR settlement core.
//!
//! This crate provides proof verification for sensor/oracle attestations and
//! management of the public keys of registered reading sources. All hashing
//! uses BLAKE3; the default signature scheme is Ed25519.
//!
//! # Security Model
//!
//! - Every reading submitted to the core must carry a proof from a registered
//!   source; unknown sources are rejected before any state is touched
//! - Verification is exposed behind the [`ProofVerifier`] trait so that
//!   alternative schemes (including post-quantum signatures) can be plugged in
//!   without changing the core
//! - Never roll custom cryptographic primitives
//! - Secrets must never be logged or hardcoded

pub mod keys;
pub mod proof;

pub use keys::{KeyError, SourceKeyring};
pub use proof::{reading_digest, Ed25519ProofVerifier, ProofError, ProofVerifier, ReadingProof};
