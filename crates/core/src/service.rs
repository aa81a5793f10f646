//! Processing service - the crate's operational surface
//!
//! Wires the validator, batch ledger, durable store, quality scorer,
//! settlement engine and oracle aggregator into one `Send + Sync` facade
//! that transports (HTTP ingest, embedded callers) share behind an `Arc`.
//!
//! Write operations follow a validate -> commit -> persist shape: the
//! in-memory ledger commits first under the unit's lock, then the durable
//! store is written; a failed durable write unwinds the in-memory commit so
//! the two views cannot diverge.

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::ledger::{
    AppendOutcome, BatchLedger, BatchStatus, HarvestParams, ReplenishOutcome,
};
use crate::oracle::OracleAggregator;
use crate::quality::{QualityScore, QualityScoringEngine};
use crate::settlement::{
    IssuanceInstruction, SettlementEngine, SettlementError, ThrottleReason,
};
use crate::store::AttestationStore;
use crate::types::{BatchPhase, MakeupMix, ParameterKind, ProductionUnit, Reading};
use crate::validator::AttestationValidator;
use elxr_crypto::ProofVerifier;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// External token-ledger collaborator. The settlement engine decides
/// amounts; this seam carries them out.
pub trait IssuanceSink: Send + Sync {
    fn issue(&self, instruction: &IssuanceInstruction) -> anyhow::Result<()>;
}

/// Sink that only logs instructions; the default when no token ledger is
/// attached
pub struct LoggingIssuanceSink;

impl IssuanceSink for LoggingIssuanceSink {
    fn issue(&self, instruction: &IssuanceInstruction) -> anyhow::Result<()> {
        info!(
            harvest_id = %instruction.harvest_id,
            recipient = %instruction.recipient_id,
            amount = instruction.amount,
            "Issuance instruction emitted"
        );
        Ok(())
    }
}

/// How a harvest's settlement was decided
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    Issued { instruction: IssuanceInstruction },
    Rejected { reason: ThrottleReason },
}

/// Result of recording a harvest: the score and the settlement decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestOutcome {
    pub harvest_id: String,
    pub batch_id: String,
    pub quality: QualityScore,
    pub settlement: SettlementOutcome,
}

type SharedVerifier = Arc<dyn ProofVerifier>;

/// The verification-and-settlement core behind one handle
pub struct ProcessingService {
    validator: AttestationValidator<SharedVerifier>,
    oracle: OracleAggregator<SharedVerifier>,
    ledger: BatchLedger,
    store: AttestationStore,
    quality: QualityScoringEngine,
    settlement: SettlementEngine,
    sink: Box<dyn IssuanceSink>,
}

impl ProcessingService {
    /// Build the service over an opened store, rebuilding the in-memory
    /// ledger from the store's durable history.
    pub fn new(
        config: &CoreConfig,
        verifier: SharedVerifier,
        store: AttestationStore,
        sink: Box<dyn IssuanceSink>,
    ) -> Result<Self> {
        config.validate()?;

        let ledger = BatchLedger::new();
        let snapshots = store.load_snapshots()?;
        let restored = snapshots.len();
        for snapshot in snapshots {
            ledger.restore_unit(snapshot)?;
        }
        if restored > 0 {
            info!(units = restored, "Ledger rebuilt from durable state");
        }

        Ok(Self {
            validator: AttestationValidator::new(Arc::clone(&verifier)),
            oracle: OracleAggregator::new(verifier, &config.oracle),
            ledger,
            store,
            quality: QualityScoringEngine::new(config.quality.clone()),
            settlement: SettlementEngine::new(config.settlement.clone()),
            sink,
        })
    }

    /// Register a production unit and open its first batch
    pub fn register_unit(&self, mut unit: ProductionUnit) -> Result<String> {
        unit.active = true;
        let batch_id = self.ledger.register_unit(unit.clone())?;
        self.store.record_unit(&unit)?;
        self.store
            .record_batch_opened(&batch_id, &unit.unit_id, unit.registered_at_ms)?;
        Ok(batch_id)
    }

    /// Deactivate a unit; history is kept, new operations are refused
    pub fn deactivate_unit(&self, unit_id: &str) -> Result<()> {
        self.ledger.deactivate_unit(unit_id)?;
        self.store.set_unit_active(unit_id, false)?;
        Ok(())
    }

    /// Validate a signed reading and append it to the unit's open batch
    pub fn submit_attestation(&self, reading: Reading) -> Result<AppendOutcome> {
        let ctx = self.ledger.unit_context(&reading.unit_id)?;
        let attestation = self
            .validator
            .validate(ctx.product, &reading, ctx.last_accepted_ts)?;
        self.append_durably(&reading.unit_id, attestation)
    }

    /// Accept one oracle source's submission for its window
    pub fn submit_oracle_reading(&self, reading: Reading) -> Result<u64> {
        // The unit must exist and be active before a window opens for it
        self.ledger.unit_context(&reading.unit_id)?;
        Ok(self.oracle.submit(reading)?)
    }

    /// Aggregate an oracle window and, on consensus, append the result to
    /// the ledger like any other attestation
    pub fn aggregate_oracle_window(
        &self,
        unit_id: &str,
        parameter: ParameterKind,
        window_start_ms: u64,
        now_ms: u64,
    ) -> Result<AppendOutcome> {
        let consensus = self
            .oracle
            .aggregate(unit_id, parameter, window_start_ms, now_ms)?;
        let ctx = self.ledger.unit_context(unit_id)?;
        let reading = consensus.into_reading();
        // Contributing submissions were proof-checked on entry; the
        // consensus value itself carries no signature
        let attestation = self
            .validator
            .validate_consensus(ctx.product, &reading, ctx.last_accepted_ts)?;
        self.append_durably(unit_id, attestation)
    }

    /// Record a harvest, score the closed batch and decide settlement.
    ///
    /// A throttled settlement is a recorded outcome, not an error: the
    /// harvest itself stands.
    pub fn record_harvest(&self, unit_id: &str, params: HarvestParams) -> Result<HarvestOutcome> {
        let (closed, event) = self.ledger.harvest(unit_id, params)?;

        let scored = self.quality.score(&closed);
        let persisted = self
            .store
            .record_batch_harvested(&event, scored.as_ref().ok().map(|q| q.overall));
        if let Err(e) = persisted {
            error!(
                unit_id = %unit_id,
                harvest_id = %event.harvest_id,
                error = %e,
                "Durable harvest write failed, reverting in-memory harvest"
            );
            self.ledger.revert_harvest(unit_id, &event.harvest_id)?;
            return Err(e.into());
        }
        // An unscoreable harvest is durable and stands; only issuance is off
        // the table
        let quality = scored?;

        let settlement = match self.settlement.settle(&event, &quality) {
            Ok(instruction) => {
                self.store.record_settlement(
                    &event.harvest_id,
                    &instruction.recipient_id,
                    instruction.amount,
                    "issued",
                    None,
                    event.timestamp_ms,
                )?;
                self.sink.issue(&instruction).map_err(CoreError::Issuance)?;
                SettlementOutcome::Issued { instruction }
            }
            Err(SettlementError::ThrottleRejected { reason, .. }) => {
                self.store.record_settlement(
                    &event.harvest_id,
                    &event.operator_id,
                    0.0,
                    "rejected",
                    Some(&reason.to_string()),
                    event.timestamp_ms,
                )?;
                SettlementOutcome::Rejected { reason }
            }
            Err(e) => return Err(e.into()),
        };

        Ok(HarvestOutcome {
            harvest_id: event.harvest_id,
            batch_id: closed.batch_id,
            quality,
            settlement,
        })
    }

    /// Apply a makeup mix, opening the unit's next batch
    pub fn record_replenishment(&self, unit_id: &str, mix: MakeupMix) -> Result<ReplenishOutcome> {
        let outcome = self.ledger.replenish(unit_id, mix)?;
        let persisted = self.store.record_batch_replenished(
            &outcome.closed_batch_id,
            &outcome.new_batch_id,
            unit_id,
            outcome.opened_at_ms,
        );
        if let Err(e) = persisted {
            error!(
                unit_id = %unit_id,
                batch_id = %outcome.closed_batch_id,
                error = %e,
                "Durable replenish write failed, reverting in-memory replenishment"
            );
            self.ledger.revert_replenishment(unit_id)?;
            return Err(e.into());
        }
        Ok(outcome)
    }

    /// Current phase and attestation count for a unit's open batch
    pub fn batch_status(&self, unit_id: &str) -> Result<BatchStatus> {
        Ok(self.ledger.batch_status(unit_id)?)
    }

    /// Replay the quality score of a settled harvest from its batch history
    pub fn harvest_score(&self, harvest_id: &str) -> Result<QualityScore> {
        let batch = self.ledger.harvested_batch(harvest_id)?;
        Ok(self.quality.score(&batch)?)
    }

    pub fn validator(&self) -> &AttestationValidator<SharedVerifier> {
        &self.validator
    }

    pub fn ledger(&self) -> &BatchLedger {
        &self.ledger
    }

    pub fn settlement(&self) -> &SettlementEngine {
        &self.settlement
    }

    pub fn oracle(&self) -> &OracleAggregator<SharedVerifier> {
        &self.oracle
    }

    fn append_durably(&self, unit_id: &str, attestation: crate::types::Attestation) -> Result<AppendOutcome> {
        let outcome = self.ledger.append(unit_id, attestation)?;
        if let Err(e) = self.store.append_attestation(
            outcome.seq,
            &outcome.batch_id,
            &outcome.attestation,
        ) {
            error!(
                unit_id = %unit_id,
                seq = outcome.seq,
                error = %e,
                "Durable append failed, reverting in-memory attestation"
            );
            self.ledger.revert_last_attestation(unit_id)?;
            return Err(e.into());
        }
        if outcome.became_ready {
            self.store
                .record_batch_phase(&outcome.batch_id, BatchPhase::ReadyToHarvest)?;
        }
        Ok(outcome)
    }
}
