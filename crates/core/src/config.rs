//! Core configuration
//!
//! Loaded from a TOML file; every field has a production-sensible default so
//! an empty file (or no file) yields a working configuration.

use crate::types::ParameterKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {field} must be greater than zero")]
    InvalidValue { field: &'static str },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration for the verification-and-settlement core
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CoreConfig {
    pub storage: StorageConfig,
    pub quality: QualityConfig,
    pub settlement: SettlementConfig,
    pub oracle: OracleConfig,
}

impl CoreConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        info!(path = %path.as_ref().display(), "Loaded configuration");
        Ok(config)
    }

    /// Reject values that would make the engines divide by zero
    pub fn validate(&self) -> Result<()> {
        if self.oracle.window_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "oracle.window_ms",
            });
        }
        if self.settlement.epoch_length_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "settlement.epoch_length_ms",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "elxr-ledger.db".to_string(),
        }
    }
}

/// Quality scoring knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Multiplier applied once per out-of-optimal-range attestation
    pub flag_penalty: f64,
    /// Lower bound on the combined penalty multiplier
    pub penalty_floor: f64,
    /// Per-parameter weight overrides, keyed by parameter name.
    /// Per product the scored weights sum to 1.
    pub weights: HashMap<String, f64>,
}

impl QualityConfig {
    pub fn weight_for(&self, parameter: ParameterKind) -> f64 {
        self.weights.get(parameter.as_str()).copied().unwrap_or(1.0)
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        let mut weights = HashMap::new();
        // Spirulina: density 0.4, protein 0.3, phycocyanin 0.3
        weights.insert("density".to_string(), 0.4);
        weights.insert("protein".to_string(), 0.3);
        weights.insert("phycocyanin".to_string(), 0.3);
        // Kombucha: pH 0.3, brix 0.2, acidity 0.3, alcohol 0.2
        weights.insert("ph".to_string(), 0.3);
        weights.insert("brix".to_string(), 0.2);
        weights.insert("acidity".to_string(), 0.3);
        weights.insert("alcohol".to_string(), 0.2);
        Self {
            flag_penalty: 0.95,
            penalty_floor: 0.5,
            weights,
        }
    }
}

/// Settlement engine knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Token units issued per gram at a perfect quality score
    pub base_rate_per_gram: f64,
    /// Minimum spacing between settled harvests per unit (ms).
    /// Defaults to the minimum culture age: more than one harvest per
    /// culture cycle signals manipulation.
    pub min_harvest_interval_ms: u64,
    /// Epoch length for the per-unit issuance cap (ms)
    pub epoch_length_ms: u64,
    /// Maximum token units issued per unit per epoch
    pub epoch_issuance_cap: f64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            base_rate_per_gram: 0.1,
            min_harvest_interval_ms: 7 * 24 * 3_600_000,
            epoch_length_ms: 30 * 24 * 3_600_000,
            epoch_issuance_cap: 10_000.0,
        }
    }
}

/// Oracle consensus knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Minimum number of agreeing sources
    pub quorum: usize,
    /// Relative tolerance around the window median
    pub tolerance: f64,
    /// Submissions older than this are discarded before aggregation (ms)
    pub freshness_ms: u64,
    /// Width of an aggregation time-window (ms)
    pub window_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            quorum: 2,
            tolerance: 0.05,
            freshness_ms: 3_600_000,
            window_ms: 600_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = CoreConfig::default();
        assert_eq!(config.quality.flag_penalty, 0.95);
        assert_eq!(config.quality.penalty_floor, 0.5);
        assert_eq!(config.oracle.quorum, 2);
        assert_eq!(config.settlement.min_harvest_interval_ms, 604_800_000);
    }

    #[test]
    fn test_product_weights_sum_to_one() {
        let config = QualityConfig::default();
        let spirulina: f64 = ["density", "protein", "phycocyanin"]
            .iter()
            .map(|p| config.weights[*p])
            .sum();
        let kombucha: f64 = ["ph", "brix", "acidity", "alcohol"]
            .iter()
            .map(|p| config.weights[*p])
            .sum();
        assert!((spirulina - 1.0).abs() < 1e-9);
        assert!((kombucha - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_toml_overlays_defaults() {
        let toml_str = r#"
            [settlement]
            base_rate_per_gram = 0.25

            [oracle]
            quorum = 3
        "#;
        let config: CoreConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.settlement.base_rate_per_gram, 0.25);
        assert_eq!(config.oracle.quorum, 3);
        // Untouched sections keep their defaults
        assert_eq!(config.quality.flag_penalty, 0.95);
        assert_eq!(config.settlement.epoch_issuance_cap, 10_000.0);
    }

    #[test]
    fn test_zero_interval_fields_rejected() {
        let mut config = CoreConfig::default();
        config.oracle.window_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "oracle.window_ms"
            })
        ));

        let mut config = CoreConfig::default();
        config.settlement.epoch_length_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "settlement.epoch_length_ms"
            })
        ));

        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(matches!(
            CoreConfig::from_file("/nonexistent/elxr.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
