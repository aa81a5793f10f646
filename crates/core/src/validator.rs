//! Attestation validator
//!
//! Classifies a single incoming sensor/oracle reading before it is admitted
//! to a unit's history. Checks are structural (parameter tracked by the
//! product, declared unit of measure matches the schema), physical (value
//! inside the sanity envelope), temporal (timestamp not behind the last
//! accepted attestation) and cryptographic (proof verifies against the
//! source's registered key).
//!
//! Values outside the optimal range but inside the sanity envelope are
//! accepted with the `OutOfOptimalRange` flag; the flag is carried into
//! quality scoring. The validator has no side effects; persistence is the
//! batch ledger's job.

use crate::types::{Attestation, AttestationFlag, ProductKind, Reading};
use elxr_crypto::{ProofError, ProofVerifier};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

/// Permanent rejection reasons for a reading
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Parameter '{parameter}' is not tracked for product '{product}'")]
    UnknownParameter { product: String, parameter: String },

    #[error("Unit mismatch for '{parameter}': declared '{declared}', expected '{expected}'")]
    UnitMismatch {
        parameter: String,
        declared: String,
        expected: String,
    },

    #[error(
        "Value {value} for '{parameter}' outside physical range [{min}, {max}]"
    )]
    OutOfPhysicalRange {
        parameter: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Timestamp {timestamp} precedes last accepted attestation at {last}")]
    OutOfOrderTimestamp { timestamp: u64, last: u64 },

    #[error("Invalid proof: {0}")]
    InvalidProof(#[from] ProofError),

    #[error("Value {value} for '{parameter}' is not a finite number")]
    NonFiniteValue { parameter: String, value: f64 },
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Validation metrics
#[derive(Debug, Default)]
pub struct ValidatorMetrics {
    pub readings_accepted_total: AtomicU64,
    pub readings_flagged_total: AtomicU64,
    pub readings_rejected_total: AtomicU64,
}

/// Stateless reading validator; proof verification is injected
pub struct AttestationValidator<V: ProofVerifier> {
    verifier: V,
    metrics: ValidatorMetrics,
}

impl<V: ProofVerifier> AttestationValidator<V> {
    pub fn new(verifier: V) -> Self {
        Self {
            verifier,
            metrics: ValidatorMetrics::default(),
        }
    }

    /// Validate a reading and produce an attestation.
    ///
    /// `last_accepted_ts` is the timestamp of the most recent attestation
    /// accepted for the unit's open batch (None for a fresh batch). The
    /// ledger re-checks ordering under the unit lock; this check rejects
    /// obviously stale submissions early.
    pub fn validate(
        &self,
        product: ProductKind,
        reading: &Reading,
        last_accepted_ts: Option<u64>,
    ) -> Result<Attestation> {
        let result = self.classify(product, reading, last_accepted_ts, true);
        self.record(&result);
        result
    }

    /// Validate a consensus reading produced by the oracle aggregator.
    ///
    /// Aggregated values carry no single-source signature (each contributing
    /// submission was proof-checked at submission time), so the proof check
    /// is skipped; all structural, range and ordering checks still apply.
    pub fn validate_consensus(
        &self,
        product: ProductKind,
        reading: &Reading,
        last_accepted_ts: Option<u64>,
    ) -> Result<Attestation> {
        let result = self.classify(product, reading, last_accepted_ts, false);
        self.record(&result);
        result
    }

    fn classify(
        &self,
        product: ProductKind,
        reading: &Reading,
        last_accepted_ts: Option<u64>,
        check_proof: bool,
    ) -> Result<Attestation> {
        let spec = product
            .parameter_spec(reading.parameter)
            .ok_or_else(|| ValidationError::UnknownParameter {
                product: product.as_str().to_string(),
                parameter: reading.parameter.as_str().to_string(),
            })?;

        if reading.unit_of_measure != spec.unit_of_measure {
            return Err(ValidationError::UnitMismatch {
                parameter: reading.parameter.as_str().to_string(),
                declared: reading.unit_of_measure.as_str().to_string(),
                expected: spec.unit_of_measure.as_str().to_string(),
            });
        }

        if !reading.value.is_finite() {
            return Err(ValidationError::NonFiniteValue {
                parameter: reading.parameter.as_str().to_string(),
                value: reading.value,
            });
        }

        if reading.value < spec.sanity_min || reading.value > spec.sanity_max {
            return Err(ValidationError::OutOfPhysicalRange {
                parameter: reading.parameter.as_str().to_string(),
                value: reading.value,
                min: spec.sanity_min,
                max: spec.sanity_max,
            });
        }

        if let Some(last) = last_accepted_ts {
            if reading.timestamp_ms < last {
                return Err(ValidationError::OutOfOrderTimestamp {
                    timestamp: reading.timestamp_ms,
                    last,
                });
            }
        }

        if check_proof {
            self.verifier
                .verify(&reading.source_id, &reading.digest(), &reading.proof)?;
        }

        let mut flags = Vec::new();
        if reading.value < spec.optimal_min || reading.value > spec.optimal_max {
            flags.push(AttestationFlag::OutOfOptimalRange);
            debug!(
                unit_id = %reading.unit_id,
                parameter = reading.parameter.as_str(),
                value = reading.value,
                "Reading outside optimal range, accepted with flag"
            );
        }

        let digest = reading.digest();
        Ok(Attestation {
            attestation_id: hex::encode(&digest[..8]),
            unit_id: reading.unit_id.clone(),
            parameter: reading.parameter,
            value: reading.value,
            unit_of_measure: reading.unit_of_measure,
            timestamp_ms: reading.timestamp_ms,
            source_id: reading.source_id.clone(),
            flags,
            phase_at_append: None,
            att_hash: Vec::new(),
            prev_hash: Vec::new(),
        })
    }

    fn record(&self, result: &Result<Attestation>) {
        match result {
            Ok(att) => {
                self.metrics
                    .readings_accepted_total
                    .fetch_add(1, Ordering::Relaxed);
                if att.is_flagged() {
                    self.metrics
                        .readings_flagged_total
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(_) => {
                self.metrics
                    .readings_rejected_total
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn metrics(&self) -> &ValidatorMetrics {
        &self.metrics
    }
}
