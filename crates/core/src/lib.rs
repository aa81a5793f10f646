//! Verification-and-settlement core for attested fermentation batches.
//!
//! This crate takes signed sensor and oracle readings for spirulina and
//! kombucha production units, validates them against per-product schemas,
//! tracks each unit's batch lifecycle on a hash-chained ledger, scores
//! harvested batches and turns harvests into token issuance instructions.

pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod oracle;
pub mod quality;
pub mod service;
pub mod settlement;
pub mod store;
pub mod types;
pub mod validator;

pub use config::{ConfigError, CoreConfig, OracleConfig, QualityConfig, SettlementConfig};
pub use error::{CoreError, Result};
pub use ledger::{
    AppendOutcome, BatchLedger, BatchRecord, BatchSnapshot, BatchStatus, HarvestEvent,
    HarvestParams, LedgerError, LedgerMetrics, ReplenishOutcome, UnitSnapshot,
};
pub use oracle::{ConsensusReading, OracleAggregator, OracleError, SourceReliability};
pub use quality::{QualityError, QualityScore, QualityScoringEngine, SubScore};
pub use service::{
    HarvestOutcome, IssuanceSink, LoggingIssuanceSink, ProcessingService, SettlementOutcome,
};
pub use settlement::{
    IssuanceInstruction, SettlementEngine, SettlementError, ThrottleReason,
};
pub use store::{AttestationStore, StoreError};
pub use types::{
    Attestation, AttestationFlag, BatchPhase, MakeupMix, ParameterKind, ParameterSpec,
    ProductKind, ProductionUnit, QualityBand, Reading, UnitOfMeasure,
};
pub use validator::{AttestationValidator, ValidationError, ValidatorMetrics};
