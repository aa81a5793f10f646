//! Batch Ledger - per-unit lifecycle state and append-only attestation history
//!
//! Each production unit owns exactly one open batch record at any time; the
//! record accumulates validated attestations and moves through the phase
//! machine `Growing -> ReadyToHarvest -> Harvested -> (replenish) -> Growing`.
//! Accepted attestations are hash-chained per unit with BLAKE3 so the history
//! is tamper-evident.
//!
//! # Concurrency
//!
//! Units are the unit of isolation: every unit sits behind its own mutex, so
//! appends to different units proceed in parallel while appends, harvests and
//! replenishments on the same unit are serialized. No operation ever takes
//! two unit locks, which keeps the ledger shardable by unit identifier.
//!
//! # Guarantees
//!
//! - Exactly one current batch per registered unit
//! - Attestation timestamps are non-decreasing within a batch
//! - `harvest` is only legal from `ReadyToHarvest`; `replenish` only from
//!   `Harvested`, and atomically archives the old batch and opens a new one
//! - Every attestation records the batch phase it was appended under

use crate::types::{
    Attestation, BatchPhase, MakeupMix, ParameterKind, ProductKind, ProductionUnit,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Minimum culture age before a batch can become harvest-ready (days)
const MIN_CULTURE_AGE_DAYS: f64 = 7.0;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Genesis hash for a unit's attestation chain
const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// Errors raised by ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Unit already registered: {unit_id}")]
    UnitAlreadyRegistered { unit_id: String },

    #[error("Unknown unit: {unit_id}")]
    UnknownUnit { unit_id: String },

    #[error("Unit is deactivated: {unit_id}")]
    UnitDeactivated { unit_id: String },

    #[error("No open batch accepts attestations for unit {unit_id} (phase {phase})")]
    NoOpenBatch { unit_id: String, phase: String },

    #[error("Invalid phase transition for unit {unit_id}: {operation} from {from}")]
    InvalidPhaseTransition {
        unit_id: String,
        from: String,
        operation: String,
    },

    #[error("Attestation timestamp {timestamp} precedes batch head at {last}")]
    OutOfOrderTimestamp { timestamp: u64, last: u64 },

    #[error("Duplicate harvest id: {harvest_id}")]
    DuplicateHarvestId { harvest_id: String },

    #[error("Harvest yield must be a positive finite mass, got {yield_grams}")]
    InvalidYield { yield_grams: f64 },

    #[error("Unknown harvest: {harvest_id}")]
    UnknownHarvest { harvest_id: String },

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Harvest event recorded at batch closure. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestEvent {
    pub harvest_id: String,
    pub batch_id: String,
    pub unit_id: String,
    /// Harvested mass in grams
    pub yield_grams: f64,
    pub operator_id: String,
    /// Equipment sanitization proof (opaque attestation bytes)
    pub sanitization_proof: Vec<u8>,
    pub timestamp_ms: u64,
}

/// Parameters supplied by the operator when recording a harvest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestParams {
    pub yield_grams: f64,
    pub operator_id: String,
    pub sanitization_proof: Vec<u8>,
    pub timestamp_ms: u64,
}

/// The open (or archived) fermentation/growth cycle of one unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_id: String,
    pub unit_id: String,
    pub product: ProductKind,
    pub phase: BatchPhase,
    pub opened_at_ms: u64,
    /// Time-ordered, append-only attestation history
    pub attestations: Vec<Attestation>,
    /// Set when a harvest closes the batch
    pub harvest: Option<HarvestEvent>,
    /// Most recent value per parameter, for the readiness predicate
    #[serde(default)]
    pub(crate) latest: HashMap<ParameterKind, f64>,
}

impl BatchRecord {
    fn new(batch_id: String, unit_id: String, product: ProductKind, opened_at_ms: u64) -> Self {
        Self {
            batch_id,
            unit_id,
            product,
            phase: BatchPhase::Growing,
            opened_at_ms,
            attestations: Vec::new(),
            harvest: None,
            latest: HashMap::new(),
        }
    }

    /// Timestamp of the most recent attestation, if any
    pub fn last_timestamp(&self) -> Option<u64> {
        self.attestations.last().map(|a| a.timestamp_ms)
    }

    /// Most recent value recorded for a parameter in this batch
    pub fn latest_value(&self, parameter: ParameterKind) -> Option<f64> {
        self.latest.get(&parameter).copied()
    }

    /// Culture age at `at_ms`, in days
    pub fn culture_age_days(&self, at_ms: u64) -> f64 {
        at_ms.saturating_sub(self.opened_at_ms) as f64 / MS_PER_DAY
    }

    /// Number of attestations carrying the out-of-optimal flag
    pub fn flagged_count(&self) -> usize {
        self.attestations.iter().filter(|a| a.is_flagged()).count()
    }

    /// Harvest-readiness predicate over the batch's latest values
    fn harvest_ready(&self, at_ms: u64) -> bool {
        if self.culture_age_days(at_ms) < MIN_CULTURE_AGE_DAYS {
            return false;
        }
        match self.product {
            ProductKind::Spirulina => {
                let density = self.latest_value(ParameterKind::Density);
                let ph = self.latest_value(ParameterKind::Ph);
                matches!((density, ph), (Some(d), Some(p)) if d >= 0.8 && (9.5..=10.8).contains(&p))
            }
            ProductKind::Kombucha => {
                matches!(self.latest_value(ParameterKind::Ph), Some(p) if p <= 3.5)
            }
        }
    }
}

/// Result of a successful append
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    /// Batch the attestation landed in
    pub batch_id: String,
    /// Per-unit chain sequence number of the attestation
    pub seq: u64,
    /// Batch phase after the append
    pub phase: BatchPhase,
    /// Whether this append triggered the `Growing -> ReadyToHarvest` transition
    pub became_ready: bool,
    /// The chained attestation (hashes and phase filled in)
    pub attestation: Attestation,
}

/// Result of a successful replenishment
#[derive(Debug, Clone)]
pub struct ReplenishOutcome {
    /// Batch archived as `Replenished`
    pub closed_batch_id: String,
    /// Newly opened `Growing` batch
    pub new_batch_id: String,
    pub opened_at_ms: u64,
}

/// Snapshot answering the batch status query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatus {
    pub unit_id: String,
    pub batch_id: String,
    pub phase: BatchPhase,
    pub open_since_ms: u64,
    pub attestation_count: usize,
}

/// Durable image of one unit's full history, used to rebuild ledger state
/// when the store is reopened
#[derive(Debug, Clone)]
pub struct UnitSnapshot {
    pub unit: ProductionUnit,
    /// Batches in open order; the last one is the unit's current batch
    pub batches: Vec<BatchSnapshot>,
}

/// One stored batch with its attestations, in chain order
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
    pub batch_id: String,
    pub opened_at_ms: u64,
    pub phase: BatchPhase,
    pub attestations: Vec<Attestation>,
    pub harvest: Option<HarvestEvent>,
}

/// Context the validator needs before a reading is admitted
#[derive(Debug, Clone)]
pub struct UnitContext {
    pub product: ProductKind,
    pub last_accepted_ts: Option<u64>,
    pub phase: BatchPhase,
}

/// Per-unit ledger state, always accessed under the unit's mutex
#[derive(Debug)]
struct UnitLedger {
    unit: ProductionUnit,
    current: BatchRecord,
    archived: Vec<BatchRecord>,
    /// Head of the unit's attestation hash chain
    head_hash: Vec<u8>,
    batch_seq: u64,
    next_att_seq: u64,
}

impl UnitLedger {
    fn new(unit: ProductionUnit) -> Self {
        let batch_id = format!("{}-b1", unit.unit_id);
        let current = BatchRecord::new(
            batch_id,
            unit.unit_id.clone(),
            unit.product,
            unit.registered_at_ms,
        );
        Self {
            unit,
            current,
            archived: Vec::new(),
            head_hash: GENESIS_HASH.to_vec(),
            batch_seq: 1,
            next_att_seq: 1,
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.unit.active {
            return Err(LedgerError::UnitDeactivated {
                unit_id: self.unit.unit_id.clone(),
            });
        }
        Ok(())
    }

    fn append(&mut self, mut attestation: Attestation) -> Result<AppendOutcome> {
        self.ensure_active()?;

        match self.current.phase {
            BatchPhase::Growing | BatchPhase::ReadyToHarvest => {}
            phase => {
                return Err(LedgerError::NoOpenBatch {
                    unit_id: self.unit.unit_id.clone(),
                    phase: phase.as_str().to_string(),
                })
            }
        }

        // Authoritative ordering check; the validator's pre-check may have
        // raced with another writer.
        if let Some(last) = self.current.last_timestamp() {
            if attestation.timestamp_ms < last {
                return Err(LedgerError::OutOfOrderTimestamp {
                    timestamp: attestation.timestamp_ms,
                    last,
                });
            }
        }

        attestation.phase_at_append = Some(self.current.phase);
        attestation.prev_hash = self.head_hash.clone();
        attestation.att_hash = attestation.compute_hash(&self.head_hash);
        self.head_hash = attestation.att_hash.clone();

        let seq = self.next_att_seq;
        self.next_att_seq += 1;

        self.current
            .latest
            .insert(attestation.parameter, attestation.value);
        let timestamp_ms = attestation.timestamp_ms;
        self.current.attestations.push(attestation.clone());

        let mut became_ready = false;
        if self.current.phase == BatchPhase::Growing && self.current.harvest_ready(timestamp_ms) {
            self.current.phase = BatchPhase::ReadyToHarvest;
            became_ready = true;
            info!(
                unit_id = %self.unit.unit_id,
                batch_id = %self.current.batch_id,
                "Batch is ready to harvest"
            );
        }

        Ok(AppendOutcome {
            batch_id: self.current.batch_id.clone(),
            seq,
            phase: self.current.phase,
            became_ready,
            attestation,
        })
    }

    /// Undo the most recent append. Only used to unwind a failed durable
    /// write so that memory and storage cannot diverge.
    fn revert_last(&mut self) {
        if let Some(reverted) = self.current.attestations.pop() {
            self.head_hash = reverted.prev_hash.clone();
            self.next_att_seq -= 1;
            // Restore the previous latest value for the parameter
            let prior = self
                .current
                .attestations
                .iter()
                .rev()
                .find(|a| a.parameter == reverted.parameter)
                .map(|a| a.value);
            match prior {
                Some(v) => {
                    self.current.latest.insert(reverted.parameter, v);
                }
                None => {
                    self.current.latest.remove(&reverted.parameter);
                }
            }
            warn!(
                unit_id = %self.unit.unit_id,
                attestation_id = %reverted.attestation_id,
                "Reverted attestation after failed durable append"
            );
        }
    }

    fn harvest(
        &mut self,
        harvest_id: String,
        params: HarvestParams,
    ) -> Result<(BatchRecord, HarvestEvent)> {
        self.ensure_active()?;

        if self.current.phase != BatchPhase::ReadyToHarvest {
            return Err(LedgerError::InvalidPhaseTransition {
                unit_id: self.unit.unit_id.clone(),
                from: self.current.phase.as_str().to_string(),
                operation: "harvest".to_string(),
            });
        }

        let event = HarvestEvent {
            harvest_id,
            batch_id: self.current.batch_id.clone(),
            unit_id: self.unit.unit_id.clone(),
            yield_grams: params.yield_grams,
            operator_id: params.operator_id,
            sanitization_proof: params.sanitization_proof,
            timestamp_ms: params.timestamp_ms,
        };

        self.current.harvest = Some(event.clone());
        self.current.phase = BatchPhase::Harvested;

        info!(
            unit_id = %self.unit.unit_id,
            batch_id = %self.current.batch_id,
            "Batch harvested"
        );

        Ok((self.current.clone(), event))
    }

    fn replenish(&mut self, mix: MakeupMix) -> Result<ReplenishOutcome> {
        self.ensure_active()?;

        if self.current.phase != BatchPhase::Harvested {
            return Err(LedgerError::InvalidPhaseTransition {
                unit_id: self.unit.unit_id.clone(),
                from: self.current.phase.as_str().to_string(),
                operation: "replenish".to_string(),
            });
        }

        self.batch_seq += 1;
        let new_batch_id = format!("{}-b{}", self.unit.unit_id, self.batch_seq);
        let new_batch = BatchRecord::new(
            new_batch_id.clone(),
            self.unit.unit_id.clone(),
            self.unit.product,
            mix.timestamp_ms,
        );

        // Atomic close-and-open: the archived batch keeps its history, the
        // unit is never left without a current batch.
        let mut closed = std::mem::replace(&mut self.current, new_batch);
        closed.phase = BatchPhase::Replenished;
        let closed_batch_id = closed.batch_id.clone();
        self.archived.push(closed);

        info!(
            unit_id = %self.unit.unit_id,
            batch_id = %new_batch_id,
            components = mix.components.len(),
            "Unit replenished, new batch opened"
        );

        Ok(ReplenishOutcome {
            closed_batch_id,
            new_batch_id,
            opened_at_ms: mix.timestamp_ms,
        })
    }

    fn find_harvested_batch(&self, harvest_id: &str) -> Option<&BatchRecord> {
        self.archived
            .iter()
            .chain(std::iter::once(&self.current))
            .find(|b| {
                b.harvest
                    .as_ref()
                    .map(|h| h.harvest_id == harvest_id)
                    .unwrap_or(false)
            })
    }
}

/// Ledger counters
#[derive(Debug, Default)]
pub struct LedgerMetrics {
    pub attestations_appended_total: AtomicU64,
    pub harvests_recorded_total: AtomicU64,
    pub replenishments_total: AtomicU64,
}

/// Append-only batch ledger over all registered production units
pub struct BatchLedger {
    units: RwLock<HashMap<String, Arc<Mutex<UnitLedger>>>>,
    /// Global harvest id index for duplicate detection
    harvest_index: RwLock<HashMap<String, String>>,
    metrics: LedgerMetrics,
}

impl BatchLedger {
    pub fn new() -> Self {
        Self {
            units: RwLock::new(HashMap::new()),
            harvest_index: RwLock::new(HashMap::new()),
            metrics: LedgerMetrics::default(),
        }
    }

    fn unit_handle(&self, unit_id: &str) -> Result<Arc<Mutex<UnitLedger>>> {
        let units = self
            .units
            .read()
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        units
            .get(unit_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownUnit {
                unit_id: unit_id.to_string(),
            })
    }

    fn lock_unit<'a>(
        handle: &'a Arc<Mutex<UnitLedger>>,
    ) -> Result<std::sync::MutexGuard<'a, UnitLedger>> {
        handle
            .lock()
            .map_err(|e| LedgerError::Unavailable(e.to_string()))
    }

    /// Register a production unit and open its first batch.
    ///
    /// Returns the id of the opened batch. After registration the unit is
    /// never batch-less.
    pub fn register_unit(&self, unit: ProductionUnit) -> Result<String> {
        let mut units = self
            .units
            .write()
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        if units.contains_key(&unit.unit_id) {
            return Err(LedgerError::UnitAlreadyRegistered {
                unit_id: unit.unit_id.clone(),
            });
        }

        let unit_id = unit.unit_id.clone();
        let ledger = UnitLedger::new(unit);
        let batch_id = ledger.current.batch_id.clone();
        units.insert(unit_id.clone(), Arc::new(Mutex::new(ledger)));

        info!(unit_id = %unit_id, batch_id = %batch_id, "Production unit registered");
        Ok(batch_id)
    }

    /// Rebuild one unit's state from its durable history.
    ///
    /// Restores the batch sequence, chain head, harvest index entries and
    /// the current batch's latest-value map, so appends and harvests
    /// continue exactly where the previous process stopped.
    pub fn restore_unit(&self, snapshot: UnitSnapshot) -> Result<()> {
        let unit_id = snapshot.unit.unit_id.clone();

        let mut units = self
            .units
            .write()
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        if units.contains_key(&unit_id) {
            return Err(LedgerError::UnitAlreadyRegistered { unit_id });
        }

        let mut head_hash = GENESIS_HASH.to_vec();
        let mut next_att_seq = 1u64;
        let mut records = Vec::with_capacity(snapshot.batches.len());
        for batch in snapshot.batches {
            let mut record = BatchRecord::new(
                batch.batch_id,
                unit_id.clone(),
                snapshot.unit.product,
                batch.opened_at_ms,
            );
            record.phase = batch.phase;
            for attestation in batch.attestations {
                record.latest.insert(attestation.parameter, attestation.value);
                head_hash = attestation.att_hash.clone();
                next_att_seq += 1;
                record.attestations.push(attestation);
            }
            record.harvest = batch.harvest;
            records.push(record);
        }

        let batch_seq = records.len() as u64;
        let current = records.pop().ok_or_else(|| {
            LedgerError::Unavailable(format!("no stored batches for unit {}", unit_id))
        })?;

        {
            let mut index = self
                .harvest_index
                .write()
                .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
            for record in records.iter().chain(std::iter::once(&current)) {
                if let Some(harvest) = &record.harvest {
                    index.insert(harvest.harvest_id.clone(), unit_id.clone());
                }
            }
        }

        let restored = UnitLedger {
            unit: snapshot.unit,
            current,
            archived: records,
            head_hash,
            batch_seq,
            next_att_seq,
        };
        units.insert(unit_id.clone(), Arc::new(Mutex::new(restored)));

        info!(
            unit_id = %unit_id,
            batches = batch_seq,
            attestations = next_att_seq - 1,
            "Production unit restored from durable state"
        );
        Ok(())
    }

    /// Deactivate a unit. Its history is retained; further appends,
    /// harvests and replenishments are rejected.
    pub fn deactivate_unit(&self, unit_id: &str) -> Result<()> {
        let handle = self.unit_handle(unit_id)?;
        let mut unit = Self::lock_unit(&handle)?;
        unit.unit.active = false;
        info!(unit_id = %unit_id, "Production unit deactivated");
        Ok(())
    }

    /// Product kind, last accepted timestamp and phase for a unit; the
    /// validator consults this before admitting a reading.
    pub fn unit_context(&self, unit_id: &str) -> Result<UnitContext> {
        let handle = self.unit_handle(unit_id)?;
        let unit = Self::lock_unit(&handle)?;
        unit.ensure_active()?;
        Ok(UnitContext {
            product: unit.unit.product,
            last_accepted_ts: unit.current.last_timestamp(),
            phase: unit.current.phase,
        })
    }

    /// Append a validated attestation to the unit's open batch
    pub fn append(&self, unit_id: &str, attestation: Attestation) -> Result<AppendOutcome> {
        let handle = self.unit_handle(unit_id)?;
        let mut unit = Self::lock_unit(&handle)?;
        let outcome = unit.append(attestation)?;
        self.metrics
            .attestations_appended_total
            .fetch_add(1, Ordering::Relaxed);
        debug!(
            unit_id = %unit_id,
            seq = outcome.seq,
            attestation_id = %outcome.attestation.attestation_id,
            "Attestation appended"
        );
        Ok(outcome)
    }

    /// Undo the most recent append on a unit (failed durable write unwind)
    pub fn revert_last_attestation(&self, unit_id: &str) -> Result<()> {
        let handle = self.unit_handle(unit_id)?;
        let mut unit = Self::lock_unit(&handle)?;
        unit.revert_last();
        Ok(())
    }

    /// Record a harvest event, closing the unit's current batch for appends.
    ///
    /// Returns a snapshot of the closed batch for scoring, together with
    /// the recorded harvest event.
    pub fn harvest(
        &self,
        unit_id: &str,
        params: HarvestParams,
    ) -> Result<(BatchRecord, HarvestEvent)> {
        // A negative or NaN yield would flow straight into an issuance
        // amount, so it is rejected before anything is recorded
        if !params.yield_grams.is_finite() || params.yield_grams <= 0.0 {
            return Err(LedgerError::InvalidYield {
                yield_grams: params.yield_grams,
            });
        }

        let handle = self.unit_handle(unit_id)?;
        let mut unit = Self::lock_unit(&handle)?;

        // Phase gate before the id reservation, so an already-harvested
        // batch reports the transition error rather than a duplicate id
        unit.ensure_active()?;
        if unit.current.phase != BatchPhase::ReadyToHarvest {
            return Err(LedgerError::InvalidPhaseTransition {
                unit_id: unit_id.to_string(),
                from: unit.current.phase.as_str().to_string(),
                operation: "harvest".to_string(),
            });
        }

        let harvest_id = format!("{}-h{}", unit_id, unit.batch_seq);
        {
            let mut index = self
                .harvest_index
                .write()
                .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
            if index.contains_key(&harvest_id) {
                return Err(LedgerError::DuplicateHarvestId { harvest_id });
            }
            index.insert(harvest_id.clone(), unit_id.to_string());
        }

        let (closed, event) = match unit.harvest(harvest_id.clone(), params) {
            Ok(result) => result,
            Err(e) => {
                // Release the reserved id so a later legal harvest can use it
                if let Ok(mut index) = self.harvest_index.write() {
                    index.remove(&harvest_id);
                }
                return Err(e);
            }
        };
        self.metrics
            .harvests_recorded_total
            .fetch_add(1, Ordering::Relaxed);
        Ok((closed, event))
    }

    /// Undo a recorded harvest (failed durable write unwind). The batch
    /// returns to `ReadyToHarvest` and the harvest id is released.
    pub fn revert_harvest(&self, unit_id: &str, harvest_id: &str) -> Result<()> {
        let handle = self.unit_handle(unit_id)?;
        let mut unit = Self::lock_unit(&handle)?;
        let matches_current = unit
            .current
            .harvest
            .as_ref()
            .map(|h| h.harvest_id == harvest_id)
            .unwrap_or(false);
        if matches_current {
            unit.current.harvest = None;
            unit.current.phase = BatchPhase::ReadyToHarvest;
            if let Ok(mut index) = self.harvest_index.write() {
                index.remove(harvest_id);
            }
            self.metrics
                .harvests_recorded_total
                .fetch_sub(1, Ordering::Relaxed);
            warn!(
                unit_id = %unit_id,
                harvest_id = %harvest_id,
                "Reverted harvest after failed durable write"
            );
        }
        Ok(())
    }

    /// Undo a replenishment (failed durable write unwind). The archived
    /// batch becomes current again, in `Harvested` phase.
    pub fn revert_replenishment(&self, unit_id: &str) -> Result<()> {
        let handle = self.unit_handle(unit_id)?;
        let mut unit = Self::lock_unit(&handle)?;
        if unit.current.phase == BatchPhase::Growing && unit.current.attestations.is_empty() {
            if let Some(mut prior) = unit.archived.pop() {
                prior.phase = BatchPhase::Harvested;
                let reverted_batch_id = unit.current.batch_id.clone();
                unit.current = prior;
                unit.batch_seq -= 1;
                self.metrics
                    .replenishments_total
                    .fetch_sub(1, Ordering::Relaxed);
                warn!(
                    unit_id = %unit_id,
                    batch_id = %reverted_batch_id,
                    "Reverted replenishment after failed durable write"
                );
            }
        }
        Ok(())
    }

    /// Apply a makeup mix, archiving the harvested batch and opening a new one
    pub fn replenish(&self, unit_id: &str, mix: MakeupMix) -> Result<ReplenishOutcome> {
        let handle = self.unit_handle(unit_id)?;
        let mut unit = Self::lock_unit(&handle)?;
        let outcome = unit.replenish(mix)?;
        self.metrics
            .replenishments_total
            .fetch_add(1, Ordering::Relaxed);
        Ok(outcome)
    }

    /// Current batch status for a unit
    pub fn batch_status(&self, unit_id: &str) -> Result<BatchStatus> {
        let handle = self.unit_handle(unit_id)?;
        let unit = Self::lock_unit(&handle)?;
        Ok(BatchStatus {
            unit_id: unit_id.to_string(),
            batch_id: unit.current.batch_id.clone(),
            phase: unit.current.phase,
            open_since_ms: unit.current.opened_at_ms,
            attestation_count: unit.current.attestations.len(),
        })
    }

    /// Snapshot of the harvested batch a harvest id refers to, for score
    /// replay and audit
    pub fn harvested_batch(&self, harvest_id: &str) -> Result<BatchRecord> {
        let unit_id = {
            let index = self
                .harvest_index
                .read()
                .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
            index
                .get(harvest_id)
                .cloned()
                .ok_or_else(|| LedgerError::UnknownHarvest {
                    harvest_id: harvest_id.to_string(),
                })?
        };
        let handle = self.unit_handle(&unit_id)?;
        let unit = Self::lock_unit(&handle)?;
        unit.find_harvested_batch(harvest_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownHarvest {
                harvest_id: harvest_id.to_string(),
            })
    }

    pub fn metrics(&self) -> &LedgerMetrics {
        &self.metrics
    }
}

impl Default for BatchLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UnitOfMeasure;

    const DAY_MS: u64 = 86_400_000;

    fn test_unit(unit_id: &str, product: ProductKind) -> ProductionUnit {
        ProductionUnit {
            unit_id: unit_id.to_string(),
            product,
            operator_id: "op-1".to_string(),
            certification: None,
            active: true,
            registered_at_ms: 0,
        }
    }

    fn test_attestation(
        unit_id: &str,
        parameter: ParameterKind,
        value: f64,
        timestamp_ms: u64,
    ) -> Attestation {
        Attestation {
            attestation_id: format!("att-{}-{}", parameter.as_str(), timestamp_ms),
            unit_id: unit_id.to_string(),
            parameter,
            value,
            unit_of_measure: UnitOfMeasure::PhUnits,
            timestamp_ms,
            source_id: "sensor-1".to_string(),
            flags: vec![],
            phase_at_append: None,
            att_hash: vec![],
            prev_hash: vec![],
        }
    }

    fn harvest_params(timestamp_ms: u64) -> HarvestParams {
        HarvestParams {
            yield_grams: 5000.0,
            operator_id: "op-1".to_string(),
            sanitization_proof: vec![0xAB; 16],
            timestamp_ms,
        }
    }

    /// Drive a spirulina unit to ReadyToHarvest
    fn make_ready(ledger: &BatchLedger, unit_id: &str) {
        ledger
            .append(unit_id, test_attestation(unit_id, ParameterKind::Density, 1.0, DAY_MS))
            .unwrap();
        let outcome = ledger
            .append(unit_id, test_attestation(unit_id, ParameterKind::Ph, 10.2, 10 * DAY_MS))
            .unwrap();
        assert_eq!(outcome.phase, BatchPhase::ReadyToHarvest);
    }

    #[test]
    fn test_register_opens_first_batch() {
        let ledger = BatchLedger::new();
        let batch_id = ledger
            .register_unit(test_unit("vat-1", ProductKind::Spirulina))
            .unwrap();

        assert_eq!(batch_id, "vat-1-b1");
        let status = ledger.batch_status("vat-1").unwrap();
        assert_eq!(status.phase, BatchPhase::Growing);
        assert_eq!(status.attestation_count, 0);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let ledger = BatchLedger::new();
        ledger
            .register_unit(test_unit("vat-1", ProductKind::Spirulina))
            .unwrap();
        assert!(matches!(
            ledger.register_unit(test_unit("vat-1", ProductKind::Spirulina)),
            Err(LedgerError::UnitAlreadyRegistered { .. })
        ));
    }

    #[test]
    fn test_append_chains_attestations() {
        let ledger = BatchLedger::new();
        ledger
            .register_unit(test_unit("vat-1", ProductKind::Spirulina))
            .unwrap();

        let o1 = ledger
            .append("vat-1", test_attestation("vat-1", ParameterKind::Ph, 10.0, 1000))
            .unwrap();
        let o2 = ledger
            .append("vat-1", test_attestation("vat-1", ParameterKind::Ph, 10.1, 2000))
            .unwrap();

        assert_eq!(o1.seq, 1);
        assert_eq!(o2.seq, 2);
        assert_eq!(o1.attestation.prev_hash, GENESIS_HASH.to_vec());
        assert_eq!(o2.attestation.prev_hash, o1.attestation.att_hash);
        assert_eq!(o1.attestation.phase_at_append, Some(BatchPhase::Growing));
    }

    #[test]
    fn test_append_rejects_out_of_order_timestamp() {
        let ledger = BatchLedger::new();
        ledger
            .register_unit(test_unit("vat-1", ProductKind::Spirulina))
            .unwrap();
        ledger
            .append("vat-1", test_attestation("vat-1", ParameterKind::Ph, 10.0, 2000))
            .unwrap();

        let result = ledger.append("vat-1", test_attestation("vat-1", ParameterKind::Ph, 10.0, 1000));
        assert!(matches!(
            result,
            Err(LedgerError::OutOfOrderTimestamp {
                timestamp: 1000,
                last: 2000
            })
        ));
    }

    #[test]
    fn test_spirulina_readiness_predicate() {
        let ledger = BatchLedger::new();
        ledger
            .register_unit(test_unit("vat-1", ProductKind::Spirulina))
            .unwrap();

        // Density and pH in range but culture too young: not ready
        ledger
            .append("vat-1", test_attestation("vat-1", ParameterKind::Density, 1.0, DAY_MS))
            .unwrap();
        let o = ledger
            .append("vat-1", test_attestation("vat-1", ParameterKind::Ph, 10.2, 2 * DAY_MS))
            .unwrap();
        assert_eq!(o.phase, BatchPhase::Growing);

        // Age >= 7 days with both conditions satisfied: ready
        let o = ledger
            .append("vat-1", test_attestation("vat-1", ParameterKind::Ph, 10.2, 10 * DAY_MS))
            .unwrap();
        assert!(o.became_ready);
        assert_eq!(o.phase, BatchPhase::ReadyToHarvest);
    }

    #[test]
    fn test_kombucha_readiness_predicate() {
        let ledger = BatchLedger::new();
        ledger
            .register_unit(test_unit("brew-1", ProductKind::Kombucha))
            .unwrap();

        let o = ledger
            .append("brew-1", test_attestation("brew-1", ParameterKind::Ph, 3.2, 8 * DAY_MS))
            .unwrap();
        assert_eq!(o.phase, BatchPhase::ReadyToHarvest);
    }

    #[test]
    fn test_harvest_from_growing_is_rejected() {
        let ledger = BatchLedger::new();
        ledger
            .register_unit(test_unit("vat-1", ProductKind::Spirulina))
            .unwrap();

        let result = ledger.harvest("vat-1", harvest_params(1000));
        assert!(matches!(
            result,
            Err(LedgerError::InvalidPhaseTransition { .. })
        ));
    }

    #[test]
    fn test_harvest_closes_batch_for_appends() {
        let ledger = BatchLedger::new();
        ledger
            .register_unit(test_unit("vat-1", ProductKind::Spirulina))
            .unwrap();
        make_ready(&ledger, "vat-1");

        let (closed, event) = ledger.harvest("vat-1", harvest_params(11 * DAY_MS)).unwrap();
        assert_eq!(closed.phase, BatchPhase::Harvested);
        assert_eq!(event.harvest_id, "vat-1-h1");

        let result = ledger.append("vat-1", test_attestation("vat-1", ParameterKind::Ph, 10.0, 12 * DAY_MS));
        assert!(matches!(result, Err(LedgerError::NoOpenBatch { .. })));
    }

    #[test]
    fn test_harvest_rejects_nonpositive_or_nan_yield() {
        let ledger = BatchLedger::new();
        ledger
            .register_unit(test_unit("vat-1", ProductKind::Spirulina))
            .unwrap();
        make_ready(&ledger, "vat-1");

        for bad_yield in [-5000.0, 0.0, f64::NAN, f64::INFINITY] {
            let mut params = harvest_params(11 * DAY_MS);
            params.yield_grams = bad_yield;
            assert!(matches!(
                ledger.harvest("vat-1", params),
                Err(LedgerError::InvalidYield { .. })
            ));
        }

        // Nothing was recorded; a legal harvest still gets the first id
        let (_, event) = ledger.harvest("vat-1", harvest_params(11 * DAY_MS)).unwrap();
        assert_eq!(event.harvest_id, "vat-1-h1");
    }

    #[test]
    fn test_revert_harvest_reopens_batch() {
        let ledger = BatchLedger::new();
        ledger
            .register_unit(test_unit("vat-1", ProductKind::Spirulina))
            .unwrap();
        make_ready(&ledger, "vat-1");
        let (_, event) = ledger.harvest("vat-1", harvest_params(11 * DAY_MS)).unwrap();

        ledger.revert_harvest("vat-1", &event.harvest_id).unwrap();

        let status = ledger.batch_status("vat-1").unwrap();
        assert_eq!(status.phase, BatchPhase::ReadyToHarvest);
        assert!(matches!(
            ledger.harvested_batch(&event.harvest_id),
            Err(LedgerError::UnknownHarvest { .. })
        ));

        // The released id is reused by the next legal harvest
        let (_, again) = ledger.harvest("vat-1", harvest_params(12 * DAY_MS)).unwrap();
        assert_eq!(again.harvest_id, event.harvest_id);
    }

    #[test]
    fn test_revert_replenishment_restores_harvested_batch() {
        let ledger = BatchLedger::new();
        ledger
            .register_unit(test_unit("vat-1", ProductKind::Spirulina))
            .unwrap();
        make_ready(&ledger, "vat-1");
        ledger.harvest("vat-1", harvest_params(11 * DAY_MS)).unwrap();
        ledger
            .replenish(
                "vat-1",
                MakeupMix {
                    components: vec![],
                    timestamp_ms: 11 * DAY_MS,
                },
            )
            .unwrap();

        ledger.revert_replenishment("vat-1").unwrap();

        let status = ledger.batch_status("vat-1").unwrap();
        assert_eq!(status.batch_id, "vat-1-b1");
        assert_eq!(status.phase, BatchPhase::Harvested);

        // Replenishing again opens b2 once more, not b3
        let outcome = ledger
            .replenish(
                "vat-1",
                MakeupMix {
                    components: vec![],
                    timestamp_ms: 12 * DAY_MS,
                },
            )
            .unwrap();
        assert_eq!(outcome.new_batch_id, "vat-1-b2");
    }

    #[test]
    fn test_restore_unit_resumes_chain_and_harvest_index() {
        fn chained(unit_id: &str, value: f64, timestamp_ms: u64, prev: &[u8]) -> Attestation {
            let mut a = test_attestation(unit_id, ParameterKind::Ph, value, timestamp_ms);
            a.prev_hash = prev.to_vec();
            a.phase_at_append = Some(BatchPhase::Growing);
            a.att_hash = a.compute_hash(prev);
            a
        }

        let a1 = chained("vat-1", 10.0, 1000, &GENESIS_HASH);
        let a2 = chained("vat-1", 10.2, 2000, &a1.att_hash);
        let snapshot = UnitSnapshot {
            unit: test_unit("vat-1", ProductKind::Spirulina),
            batches: vec![
                BatchSnapshot {
                    batch_id: "vat-1-b1".to_string(),
                    opened_at_ms: 0,
                    phase: BatchPhase::Replenished,
                    attestations: vec![a1, a2.clone()],
                    harvest: Some(HarvestEvent {
                        harvest_id: "vat-1-h1".to_string(),
                        batch_id: "vat-1-b1".to_string(),
                        unit_id: "vat-1".to_string(),
                        yield_grams: 5000.0,
                        operator_id: "op-1".to_string(),
                        sanitization_proof: vec![],
                        timestamp_ms: 3000,
                    }),
                },
                BatchSnapshot {
                    batch_id: "vat-1-b2".to_string(),
                    opened_at_ms: 4000,
                    phase: BatchPhase::Growing,
                    attestations: vec![],
                    harvest: None,
                },
            ],
        };

        let ledger = BatchLedger::new();
        ledger.restore_unit(snapshot.clone()).unwrap();

        let status = ledger.batch_status("vat-1").unwrap();
        assert_eq!(status.batch_id, "vat-1-b2");
        assert_eq!(status.phase, BatchPhase::Growing);

        // The harvest index knows the archived harvest
        assert!(ledger.harvested_batch("vat-1-h1").is_ok());

        // The chain head and sequence continue from the stored history
        let o = ledger
            .append("vat-1", test_attestation("vat-1", ParameterKind::Ph, 10.1, 5000))
            .unwrap();
        assert_eq!(o.seq, 3);
        assert_eq!(o.attestation.prev_hash, a2.att_hash);

        // A restored unit counts as registered
        assert!(matches!(
            ledger.restore_unit(snapshot),
            Err(LedgerError::UnitAlreadyRegistered { .. })
        ));
    }

    #[test]
    fn test_replenish_requires_harvested_phase() {
        let ledger = BatchLedger::new();
        ledger
            .register_unit(test_unit("vat-1", ProductKind::Spirulina))
            .unwrap();

        let mix = MakeupMix {
            components: vec![("water".to_string(), 200.0)],
            timestamp_ms: 1000,
        };
        assert!(matches!(
            ledger.replenish("vat-1", mix),
            Err(LedgerError::InvalidPhaseTransition { .. })
        ));
    }

    #[test]
    fn test_replenish_opens_new_batch_atomically() {
        let ledger = BatchLedger::new();
        ledger
            .register_unit(test_unit("vat-1", ProductKind::Spirulina))
            .unwrap();
        make_ready(&ledger, "vat-1");
        ledger.harvest("vat-1", harvest_params(11 * DAY_MS)).unwrap();

        let mix = MakeupMix {
            components: vec![("water".to_string(), 200.0), ("nutrient-mix".to_string(), 500.0)],
            timestamp_ms: 11 * DAY_MS,
        };
        let outcome = ledger.replenish("vat-1", mix).unwrap();

        assert_eq!(outcome.closed_batch_id, "vat-1-b1");
        assert_eq!(outcome.new_batch_id, "vat-1-b2");
        let status = ledger.batch_status("vat-1").unwrap();
        assert_eq!(status.batch_id, "vat-1-b2");
        assert_eq!(status.phase, BatchPhase::Growing);
        assert_eq!(status.attestation_count, 0);
    }

    #[test]
    fn test_chain_continues_across_batches() {
        let ledger = BatchLedger::new();
        ledger
            .register_unit(test_unit("vat-1", ProductKind::Spirulina))
            .unwrap();
        make_ready(&ledger, "vat-1");
        let (closed, _) = ledger.harvest("vat-1", harvest_params(11 * DAY_MS)).unwrap();
        let last_hash = closed.attestations.last().unwrap().att_hash.clone();

        let mix = MakeupMix {
            components: vec![],
            timestamp_ms: 11 * DAY_MS,
        };
        ledger.replenish("vat-1", mix).unwrap();

        let o = ledger
            .append("vat-1", test_attestation("vat-1", ParameterKind::Ph, 9.8, 12 * DAY_MS))
            .unwrap();
        assert_eq!(o.attestation.prev_hash, last_hash);
    }

    #[test]
    fn test_harvested_batch_lookup() {
        let ledger = BatchLedger::new();
        ledger
            .register_unit(test_unit("vat-1", ProductKind::Spirulina))
            .unwrap();
        make_ready(&ledger, "vat-1");
        let (closed, event) = ledger.harvest("vat-1", harvest_params(11 * DAY_MS)).unwrap();

        let snapshot = ledger.harvested_batch(&event.harvest_id).unwrap();

        assert_eq!(snapshot.batch_id, closed.batch_id);

        assert!(matches!(
            ledger.harvested_batch("vat-1-h99"),
            Err(LedgerError::UnknownHarvest { .. })
        ));
    }

    #[test]
    fn test_deactivated_unit_rejects_operations() {
        let ledger = BatchLedger::new();
        ledger
            .register_unit(test_unit("vat-1", ProductKind::Spirulina))
            .unwrap();
        ledger.deactivate_unit("vat-1").unwrap();

        assert!(matches!(
            ledger.append("vat-1", test_attestation("vat-1", ParameterKind::Ph, 10.0, 1000)),
            Err(LedgerError::UnitDeactivated { .. })
        ));
        assert!(matches!(
            ledger.unit_context("vat-1"),
            Err(LedgerError::UnitDeactivated { .. })
        ));
    }

    #[test]
    fn test_revert_last_restores_chain_head() {
        let ledger = BatchLedger::new();
        ledger
            .register_unit(test_unit("vat-1", ProductKind::Spirulina))
            .unwrap();

        let o1 = ledger
            .append("vat-1", test_attestation("vat-1", ParameterKind::Ph, 10.0, 1000))
            .unwrap();
        ledger
            .append("vat-1", test_attestation("vat-1", ParameterKind::Ph, 10.5, 2000))
            .unwrap();
        ledger.revert_last_attestation("vat-1").unwrap();

        let o3 = ledger
            .append("vat-1", test_attestation("vat-1", ParameterKind::Ph, 10.3, 3000))
            .unwrap();
        assert_eq!(o3.seq, 2);
        assert_eq!(o3.attestation.prev_hash, o1.attestation.att_hash);
        let status = ledger.batch_status("vat-1").unwrap();
        assert_eq!(status.attestation_count, 2);
    }

    #[test]
    fn test_concurrent_appends_to_different_units() {
        use std::sync::Arc;
        let ledger = Arc::new(BatchLedger::new());
        for i in 0..4 {
            ledger
                .register_unit(test_unit(&format!("vat-{}", i), ProductKind::Spirulina))
                .unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..4 {
            let ledger = Arc::clone(&ledger);
            handles.push(std::thread::spawn(move || {
                let unit_id = format!("vat-{}", i);
                for t in 0..50u64 {
                    ledger
                        .append(&unit_id, test_attestation(&unit_id, ParameterKind::Ph, 10.0, 1000 + t))
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        for i in 0..4 {
            let status = ledger.batch_status(&format!("vat-{}", i)).unwrap();
            assert_eq!(status.attestation_count, 50);
        }
    }
}
