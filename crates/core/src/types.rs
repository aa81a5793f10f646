//! Shared domain types for the ELXR verification core.
//!
//! Sensor values are modeled as tagged readings (numeric magnitude plus an
//! enumerated unit and parameter kind) validated against a per-parameter
//! schema, never as free-form data. Each product kind fixes the set of
//! parameters it tracks and the sanity/optimal envelopes for each.

use elxr_crypto::{reading_digest, ReadingProof};
use serde::{Deserialize, Serialize};

/// Product kind grown in a production unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductKind {
    /// Spirulina grown in open raceway or IBC tote
    Spirulina,
    /// Kombucha fermented in a vessel
    Kombucha,
}

impl ProductKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductKind::Spirulina => "spirulina",
            ProductKind::Kombucha => "kombucha",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "spirulina" => Some(ProductKind::Spirulina),
            "kombucha" => Some(ProductKind::Kombucha),
            _ => None,
        }
    }
}

/// Measured parameter kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Culture density in g/L
    Density,
    /// pH value
    Ph,
    /// Temperature in °C
    Temperature,
    /// Daily light exposure in hours
    LightHours,
    /// Dissolved sugar in degrees Brix
    Brix,
    /// Titratable acidity in percent
    Acidity,
    /// Alcohol by volume in percent
    Alcohol,
    /// Protein content in percent of dry weight
    Protein,
    /// Phycocyanin content in percent of dry weight
    Phycocyanin,
}

impl ParameterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterKind::Density => "density",
            ParameterKind::Ph => "ph",
            ParameterKind::Temperature => "temperature",
            ParameterKind::LightHours => "light_hours",
            ParameterKind::Brix => "brix",
            ParameterKind::Acidity => "acidity",
            ParameterKind::Alcohol => "alcohol",
            ParameterKind::Protein => "protein",
            ParameterKind::Phycocyanin => "phycocyanin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "density" => Some(ParameterKind::Density),
            "ph" => Some(ParameterKind::Ph),
            "temperature" => Some(ParameterKind::Temperature),
            "light_hours" => Some(ParameterKind::LightHours),
            "brix" => Some(ParameterKind::Brix),
            "acidity" => Some(ParameterKind::Acidity),
            "alcohol" => Some(ParameterKind::Alcohol),
            "protein" => Some(ParameterKind::Protein),
            "phycocyanin" => Some(ParameterKind::Phycocyanin),
            _ => None,
        }
    }
}

/// Unit of measure for a reading magnitude
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitOfMeasure {
    GramsPerLiter,
    PhUnits,
    Celsius,
    Hours,
    DegreesBrix,
    Percent,
    Grams,
    Liters,
}

impl UnitOfMeasure {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitOfMeasure::GramsPerLiter => "g_per_l",
            UnitOfMeasure::PhUnits => "ph",
            UnitOfMeasure::Celsius => "celsius",
            UnitOfMeasure::Hours => "hours",
            UnitOfMeasure::DegreesBrix => "brix",
            UnitOfMeasure::Percent => "percent",
            UnitOfMeasure::Grams => "grams",
            UnitOfMeasure::Liters => "liters",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "g_per_l" => Some(UnitOfMeasure::GramsPerLiter),
            "ph" => Some(UnitOfMeasure::PhUnits),
            "celsius" => Some(UnitOfMeasure::Celsius),
            "hours" => Some(UnitOfMeasure::Hours),
            "brix" => Some(UnitOfMeasure::DegreesBrix),
            "percent" => Some(UnitOfMeasure::Percent),
            "grams" => Some(UnitOfMeasure::Grams),
            "liters" => Some(UnitOfMeasure::Liters),
            _ => None,
        }
    }
}

/// Quality band for score interpolation: the sub-score runs linearly from 0
/// at `acceptable` to 100 at `premium`. `premium < acceptable` encodes a
/// parameter where lower is better (e.g. residual sugar).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityBand {
    pub acceptable: f64,
    pub premium: f64,
}

/// Validation schema for one parameter of one product kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub parameter: ParameterKind,
    pub unit_of_measure: UnitOfMeasure,
    /// Absolute physical sanity envelope; readings outside are rejected
    pub sanity_min: f64,
    pub sanity_max: f64,
    /// Optimal process range; readings outside are accepted but flagged
    pub optimal_min: f64,
    pub optimal_max: f64,
    /// Band used for quality scoring, if this parameter contributes
    pub quality: Option<QualityBand>,
}

const SPIRULINA_SPECS: &[ParameterSpec] = &[
    ParameterSpec {
        parameter: ParameterKind::Density,
        unit_of_measure: UnitOfMeasure::GramsPerLiter,
        sanity_min: 0.0,
        sanity_max: 5.0,
        optimal_min: 0.8,
        optimal_max: 1.5,
        quality: Some(QualityBand {
            acceptable: 0.8,
            premium: 1.5,
        }),
    },
    ParameterSpec {
        parameter: ParameterKind::Ph,
        unit_of_measure: UnitOfMeasure::PhUnits,
        sanity_min: 0.0,
        sanity_max: 14.0,
        optimal_min: 9.5,
        optimal_max: 10.8,
        quality: None,
    },
    ParameterSpec {
        parameter: ParameterKind::Temperature,
        unit_of_measure: UnitOfMeasure::Celsius,
        sanity_min: -10.0,
        sanity_max: 100.0,
        optimal_min: 30.0,
        optimal_max: 38.0,
        quality: None,
    },
    ParameterSpec {
        parameter: ParameterKind::LightHours,
        unit_of_measure: UnitOfMeasure::Hours,
        sanity_min: 0.0,
        sanity_max: 24.0,
        optimal_min: 12.0,
        optimal_max: 16.0,
        quality: None,
    },
    ParameterSpec {
        parameter: ParameterKind::Protein,
        unit_of_measure: UnitOfMeasure::Percent,
        sanity_min: 0.0,
        sanity_max: 100.0,
        optimal_min: 50.0,
        optimal_max: 100.0,
        quality: Some(QualityBand {
            acceptable: 50.0,
            premium: 65.0,
        }),
    },
    ParameterSpec {
        parameter: ParameterKind::Phycocyanin,
        unit_of_measure: UnitOfMeasure::Percent,
        sanity_min: 0.0,
        sanity_max: 100.0,
        optimal_min: 10.0,
        optimal_max: 100.0,
        quality: Some(QualityBand {
            acceptable: 10.0,
            premium: 18.0,
        }),
    },
];

const KOMBUCHA_SPECS: &[ParameterSpec] = &[
    ParameterSpec {
        parameter: ParameterKind::Ph,
        unit_of_measure: UnitOfMeasure::PhUnits,
        sanity_min: 0.0,
        sanity_max: 14.0,
        optimal_min: 2.5,
        optimal_max: 3.5,
        quality: Some(QualityBand {
            acceptable: 3.5,
            premium: 2.8,
        }),
    },
    ParameterSpec {
        parameter: ParameterKind::Brix,
        unit_of_measure: UnitOfMeasure::DegreesBrix,
        sanity_min: 0.0,
        sanity_max: 32.0,
        optimal_min: 6.0,
        optimal_max: 12.0,
        quality: Some(QualityBand {
            acceptable: 12.0,
            premium: 6.0,
        }),
    },
    ParameterSpec {
        parameter: ParameterKind::Acidity,
        unit_of_measure: UnitOfMeasure::Percent,
        sanity_min: 0.0,
        sanity_max: 10.0,
        optimal_min: 0.5,
        optimal_max: 1.2,
        quality: Some(QualityBand {
            acceptable: 0.5,
            premium: 1.2,
        }),
    },
    ParameterSpec {
        parameter: ParameterKind::Alcohol,
        unit_of_measure: UnitOfMeasure::Percent,
        sanity_min: 0.0,
        sanity_max: 20.0,
        optimal_min: 0.0,
        optimal_max: 1.2,
        quality: Some(QualityBand {
            acceptable: 1.2,
            premium: 0.3,
        }),
    },
    ParameterSpec {
        parameter: ParameterKind::Temperature,
        unit_of_measure: UnitOfMeasure::Celsius,
        sanity_min: -10.0,
        sanity_max: 100.0,
        optimal_min: 20.0,
        optimal_max: 29.0,
        quality: None,
    },
];

impl ProductKind {
    /// Validation schema for every parameter this product tracks
    pub fn parameter_specs(&self) -> &'static [ParameterSpec] {
        match self {
            ProductKind::Spirulina => SPIRULINA_SPECS,
            ProductKind::Kombucha => KOMBUCHA_SPECS,
        }
    }

    /// Schema for one parameter, if tracked by this product
    pub fn parameter_spec(&self, parameter: ParameterKind) -> Option<&'static ParameterSpec> {
        self.parameter_specs()
            .iter()
            .find(|s| s.parameter == parameter)
    }
}

/// A raw sensor/oracle reading as submitted, before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    /// Production unit this reading is about
    pub unit_id: String,
    /// Measured parameter
    pub parameter: ParameterKind,
    /// Numeric magnitude
    pub value: f64,
    /// Declared unit of measure
    pub unit_of_measure: UnitOfMeasure,
    /// Measurement time (Unix milliseconds)
    pub timestamp_ms: u64,
    /// Submitting source identity
    pub source_id: String,
    /// Signature proof over the canonical reading bytes
    pub proof: ReadingProof,
}

impl Reading {
    /// Canonical byte encoding signed by the source.
    ///
    /// Field order is fixed; any change here is a wire format break.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(self.unit_id.as_bytes());
        bytes.push(b'|');
        bytes.extend_from_slice(self.parameter.as_str().as_bytes());
        bytes.push(b'|');
        bytes.extend_from_slice(&self.value.to_le_bytes());
        bytes.push(b'|');
        bytes.extend_from_slice(self.unit_of_measure.as_str().as_bytes());
        bytes.push(b'|');
        bytes.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        bytes.push(b'|');
        bytes.extend_from_slice(self.source_id.as_bytes());
        bytes
    }

    /// BLAKE3 digest the proof is expected to sign
    pub fn digest(&self) -> [u8; 32] {
        reading_digest(&self.canonical_bytes())
    }
}

/// Non-fatal flags attached to an accepted attestation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttestationFlag {
    /// Value is inside the sanity envelope but outside the optimal range;
    /// carried into quality scoring as a penalty
    OutOfOptimalRange,
}

/// Lifecycle phase of a batch record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchPhase {
    /// Culture is growing; attestations accumulate
    Growing,
    /// Harvest-readiness predicate has been satisfied
    ReadyToHarvest,
    /// A harvest event closed the batch for appends
    Harvested,
    /// Batch was archived by a replenishment
    Replenished,
}

impl BatchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchPhase::Growing => "growing",
            BatchPhase::ReadyToHarvest => "ready_to_harvest",
            BatchPhase::Harvested => "harvested",
            BatchPhase::Replenished => "replenished",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "growing" => Some(BatchPhase::Growing),
            "ready_to_harvest" => Some(BatchPhase::ReadyToHarvest),
            "harvested" => Some(BatchPhase::Harvested),
            "replenished" => Some(BatchPhase::Replenished),
            _ => None,
        }
    }
}

/// A validated, accepted sensor/oracle reading. Immutable once chained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    /// Unique attestation identifier (hex prefix of the reading digest)
    pub attestation_id: String,
    pub unit_id: String,
    pub parameter: ParameterKind,
    pub value: f64,
    pub unit_of_measure: UnitOfMeasure,
    pub timestamp_ms: u64,
    pub source_id: String,
    /// Non-fatal validation flags
    pub flags: Vec<AttestationFlag>,
    /// Batch phase at append time, filled by the ledger (audit)
    pub phase_at_append: Option<BatchPhase>,
    /// BLAKE3 hash of this attestation, filled when chained
    pub att_hash: Vec<u8>,
    /// Hash of the previous attestation in the unit chain
    pub prev_hash: Vec<u8>,
}

impl Attestation {
    /// Whether this attestation carries the out-of-optimal flag
    pub fn is_flagged(&self) -> bool {
        self.flags.contains(&AttestationFlag::OutOfOptimalRange)
    }

    /// Compute the chain hash of this attestation given the previous hash
    pub fn compute_hash(&self, prev_hash: &[u8]) -> Vec<u8> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"ELXR-ATT-V1");
        hasher.update(prev_hash);
        hasher.update(self.unit_id.as_bytes());
        hasher.update(self.parameter.as_str().as_bytes());
        hasher.update(&self.value.to_le_bytes());
        hasher.update(&self.timestamp_ms.to_le_bytes());
        hasher.update(self.source_id.as_bytes());
        hasher.finalize().as_bytes().to_vec()
    }
}

/// A registered physical production unit (IBC tote or fermentation vessel)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionUnit {
    pub unit_id: String,
    pub product: ProductKind,
    /// Operator account that owns this unit
    pub operator_id: String,
    /// Optional certification metadata recorded at registration
    pub certification: Option<String>,
    /// Units are never deleted, only deactivated
    pub active: bool,
    pub registered_at_ms: u64,
}

/// Nutrient/water replenishment applied after harvest ("makeup mix")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakeupMix {
    /// Component name to quantity (grams for nutrients, liters for water)
    pub components: Vec<(String, f64)>,
    pub timestamp_ms: u64,
}
