//! Quality scoring over a harvested batch's attestation history
//!
//! Scoring is a pure function of the batch record and the product's quality
//! bands: the same batch always yields the same score, so settlements are
//! replayable and auditable.
//!
//! Per contributing parameter, the mean of its accepted values is mapped
//! through a piecewise-linear band (0 at `acceptable`, 100 at `premium`,
//! clipped to [0, 100]; descending bands are supported for parameters where
//! lower is better, like kombucha pH). The sub-scores combine as a weighted
//! average and a flag penalty is applied multiplicatively.

use crate::config::QualityConfig;
use crate::ledger::BatchRecord;
use crate::types::{ParameterKind, QualityBand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum QualityError {
    #[error("Batch {batch_id} has no readings for any scored parameter")]
    NoScorableReadings { batch_id: String },
}

pub type Result<T> = std::result::Result<T, QualityError>;

/// One parameter's contribution to the overall score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubScore {
    pub parameter: ParameterKind,
    /// Mean of the parameter's accepted values in the batch
    pub mean_value: f64,
    /// Band-mapped score before weighting, in [0, 100]
    pub score: f64,
    pub weight: f64,
}

/// Deterministic quality assessment of a harvested batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityScore {
    pub batch_id: String,
    /// Final score in [0, 100], penalty applied
    pub overall: f64,
    pub breakdown: Vec<SubScore>,
    /// Multiplier applied for out-of-optimal flags, in [floor, 1.0]
    pub penalty_multiplier: f64,
    pub flagged_attestations: usize,
}

/// Maps batch histories to quality scores
pub struct QualityScoringEngine {
    config: QualityConfig,
}

impl QualityScoringEngine {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Score a batch. Deterministic: no clock, no randomness, no external
    /// state beyond the engine's configuration.
    pub fn score(&self, batch: &BatchRecord) -> Result<QualityScore> {
        // Means per parameter, in stable parameter order
        let mut sums: BTreeMap<ParameterKind, (f64, u64)> = BTreeMap::new();
        for att in &batch.attestations {
            let entry = sums.entry(att.parameter).or_insert((0.0, 0));
            entry.0 += att.value;
            entry.1 += 1;
        }

        let mut breakdown = Vec::new();
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;

        for spec in batch.product.parameter_specs() {
            let band = match spec.quality {
                Some(band) => band,
                None => continue,
            };
            let (sum, count) = match sums.get(&spec.parameter) {
                Some(&(sum, count)) if count > 0 => (sum, count),
                _ => continue,
            };
            let mean = sum / count as f64;
            let score = band_score(band, mean);
            let weight = self.config.weight_for(spec.parameter);

            weighted_sum += score * weight;
            weight_total += weight;
            breakdown.push(SubScore {
                parameter: spec.parameter,
                mean_value: mean,
                score,
                weight,
            });
        }

        if weight_total == 0.0 {
            return Err(QualityError::NoScorableReadings {
                batch_id: batch.batch_id.clone(),
            });
        }

        let base = weighted_sum / weight_total;
        let flagged = batch.flagged_count();
        let penalty_multiplier = self
            .config
            .flag_penalty
            .powi(flagged as i32)
            .max(self.config.penalty_floor);
        let overall = (base * penalty_multiplier).clamp(0.0, 100.0);

        debug!(
            batch_id = %batch.batch_id,
            base,
            flagged,
            overall,
            "Batch scored"
        );

        Ok(QualityScore {
            batch_id: batch.batch_id.clone(),
            overall,
            breakdown,
            penalty_multiplier,
            flagged_attestations: flagged,
        })
    }
}

/// Piecewise-linear band mapping, clipped to [0, 100].
///
/// `acceptable` maps to 0 and `premium` to 100; when `premium < acceptable`
/// the band is descending and lower values score higher.
fn band_score(band: QualityBand, value: f64) -> f64 {
    let span = band.premium - band.acceptable;
    if span == 0.0 {
        // Degenerate band: at-or-beyond premium is full marks
        return if value == band.premium { 100.0 } else { 0.0 };
    }
    (100.0 * (value - band.acceptable) / span).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attestation, AttestationFlag, BatchPhase, ProductKind, UnitOfMeasure};
    use std::collections::HashMap;

    fn test_batch(product: ProductKind, readings: &[(ParameterKind, f64, bool)]) -> BatchRecord {
        let attestations = readings
            .iter()
            .enumerate()
            .map(|(i, &(parameter, value, flagged))| Attestation {
                attestation_id: format!("att-{}", i),
                unit_id: "u-1".to_string(),
                parameter,
                value,
                unit_of_measure: UnitOfMeasure::Percent,
                timestamp_ms: (i as u64 + 1) * 1000,
                source_id: "sensor-1".to_string(),
                flags: if flagged {
                    vec![AttestationFlag::OutOfOptimalRange]
                } else {
                    vec![]
                },
                phase_at_append: Some(BatchPhase::Growing),
                att_hash: vec![],
                prev_hash: vec![],
            })
            .collect();
        BatchRecord {
            batch_id: "u-1-b1".to_string(),
            unit_id: "u-1".to_string(),
            product,
            phase: BatchPhase::Harvested,
            opened_at_ms: 0,
            attestations,
            harvest: None,
            latest: HashMap::new(),
        }
    }

    fn engine() -> QualityScoringEngine {
        QualityScoringEngine::new(QualityConfig::default())
    }

    #[test]
    fn test_band_score_ascending() {
        let band = QualityBand {
            acceptable: 0.8,
            premium: 1.5,
        };
        assert_eq!(band_score(band, 0.8), 0.0);
        assert_eq!(band_score(band, 1.5), 100.0);
        assert_eq!(band_score(band, 2.0), 100.0);
        assert_eq!(band_score(band, 0.5), 0.0);
        let mid = band_score(band, 1.15);
        assert!((mid - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_band_score_descending() {
        // Kombucha pH: acceptable 3.5, premium 2.8; lower is better
        let band = QualityBand {
            acceptable: 3.5,
            premium: 2.8,
        };
        assert_eq!(band_score(band, 3.5), 0.0);
        assert_eq!(band_score(band, 2.8), 100.0);
        assert_eq!(band_score(band, 2.0), 100.0);
        assert_eq!(band_score(band, 4.0), 0.0);
    }

    #[test]
    fn test_premium_spirulina_scores_full_marks() {
        let batch = test_batch(
            ProductKind::Spirulina,
            &[
                (ParameterKind::Density, 1.5, false),
                (ParameterKind::Protein, 65.0, false),
                (ParameterKind::Phycocyanin, 18.0, false),
                // pH contributes no quality band
                (ParameterKind::Ph, 10.0, false),
            ],
        );
        let score = engine().score(&batch).unwrap();
        assert!((score.overall - 100.0).abs() < 1e-9);
        assert_eq!(score.breakdown.len(), 3);
        assert_eq!(score.penalty_multiplier, 1.0);
    }

    #[test]
    fn test_means_are_taken_per_parameter() {
        // Density readings 1.0 and 1.5 average to 1.25, halfway up the
        // 0.8..1.5 band is ~64.3
        let batch = test_batch(
            ProductKind::Spirulina,
            &[
                (ParameterKind::Density, 1.0, false),
                (ParameterKind::Density, 1.5, false),
            ],
        );
        let score = engine().score(&batch).unwrap();
        let density = &score.breakdown[0];
        assert!((density.mean_value - 1.25).abs() < 1e-9);
        assert!((density.score - 100.0 * 0.45 / 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_flag_penalty_is_multiplicative() {
        let clean = test_batch(
            ProductKind::Spirulina,
            &[(ParameterKind::Density, 1.5, false)],
        );
        let flagged = test_batch(
            ProductKind::Spirulina,
            &[
                (ParameterKind::Density, 1.5, false),
                (ParameterKind::Temperature, 45.0, true),
                (ParameterKind::Temperature, 46.0, true),
            ],
        );
        let eng = engine();
        let clean_score = eng.score(&clean).unwrap();
        let flagged_score = eng.score(&flagged).unwrap();
        assert!((clean_score.overall - 100.0).abs() < 1e-9);
        assert!((flagged_score.penalty_multiplier - 0.95 * 0.95).abs() < 1e-9);
        assert!((flagged_score.overall - 100.0 * 0.95 * 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_penalty_floor() {
        let readings: Vec<(ParameterKind, f64, bool)> = (0..40)
            .map(|_| (ParameterKind::Temperature, 45.0, true))
            .chain(std::iter::once((ParameterKind::Density, 1.5, false)))
            .collect();
        let batch = test_batch(ProductKind::Spirulina, &readings);
        let score = engine().score(&batch).unwrap();
        assert_eq!(score.penalty_multiplier, 0.5);
        assert!((score.overall - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let batch = test_batch(
            ProductKind::Kombucha,
            &[
                (ParameterKind::Ph, 3.0, false),
                (ParameterKind::Brix, 8.0, false),
                (ParameterKind::Acidity, 0.9, false),
                (ParameterKind::Alcohol, 0.4, false),
            ],
        );
        let eng = engine();
        let a = eng.score(&batch).unwrap();
        let b = eng.score(&batch).unwrap();
        assert_eq!(a.overall, b.overall);
        assert_eq!(a.breakdown.len(), b.breakdown.len());
    }

    #[test]
    fn test_no_scorable_readings_is_an_error() {
        let batch = test_batch(
            ProductKind::Spirulina,
            &[(ParameterKind::Ph, 10.0, false)],
        );
        assert!(matches!(
            engine().score(&batch),
            Err(QualityError::NoScorableReadings { .. })
        ));
    }
}
