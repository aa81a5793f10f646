//! Settlement engine - turns harvests and quality scores into issuance
//! instructions
//!
//! The engine decides issuance; it never mutates balances. Instructions are
//! handed to an external token-ledger collaborator through the
//! [`IssuanceSink`](crate::service::IssuanceSink) seam.
//!
//! Two anti-fraud throttles gate issuance: a minimum spacing between settled
//! harvests per unit (rapid harvests signal fabricated yields) and a
//! per-unit issuance cap per epoch. Settlement is at-most-once per harvest:
//! once a harvest id has been decided, either way, retries are rejected as
//! duplicates.

use crate::config::SettlementConfig;
use crate::ledger::HarvestEvent;
use crate::quality::QualityScore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{info, warn};

/// Why a settlement was throttled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThrottleReason {
    /// Another harvest for this unit settled inside the minimum interval
    HarvestTooFrequent,
    /// Issuing would push the unit past its per-epoch cap
    EpochCapExceeded,
}

impl fmt::Display for ThrottleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThrottleReason::HarvestTooFrequent => write!(f, "harvest_too_frequent"),
            ThrottleReason::EpochCapExceeded => write!(f, "epoch_cap_exceeded"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Settlement throttled for harvest {harvest_id}: {reason}")]
    ThrottleRejected {
        harvest_id: String,
        reason: ThrottleReason,
    },

    #[error("Harvest already settled: {harvest_id}")]
    DuplicateSettlement { harvest_id: String },

    #[error("Harvest {harvest_id} carries an invalid yield: {yield_grams}")]
    InvalidYield {
        harvest_id: String,
        yield_grams: f64,
    },

    #[error("Settlement engine unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, SettlementError>;

/// Instruction for the external token ledger. The engine's only output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuanceInstruction {
    pub harvest_id: String,
    pub unit_id: String,
    /// Operator credited with the issuance
    pub recipient_id: String,
    /// Token units to issue
    pub amount: f64,
    /// Quality score the amount was derived from (0..=100)
    pub quality_score: f64,
    pub timestamp_ms: u64,
}

#[derive(Debug, Default)]
struct UnitSettlementState {
    /// Timestamp of the unit's last issued harvest
    last_issued_ms: Option<u64>,
    /// Epoch bucket the running total belongs to
    epoch_bucket: u64,
    /// Tokens issued to the unit in the current epoch
    epoch_issued: f64,
}

#[derive(Debug, Default)]
struct SettlementState {
    /// Harvest ids with a recorded decision (issued or rejected)
    decided: HashSet<String>,
    units: HashMap<String, UnitSettlementState>,
}

/// Settlement counters
#[derive(Debug, Default)]
pub struct SettlementMetrics {
    pub settlements_issued_total: AtomicU64,
    pub settlements_throttled_total: AtomicU64,
    pub duplicate_settlements_total: AtomicU64,
}

pub struct SettlementEngine {
    config: SettlementConfig,
    state: Mutex<SettlementState>,
    metrics: SettlementMetrics,
}

impl SettlementEngine {
    pub fn new(config: SettlementConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SettlementState::default()),
            metrics: SettlementMetrics::default(),
        }
    }

    /// Decide issuance for a harvest. At most one decision per harvest id.
    pub fn settle(
        &self,
        event: &HarvestEvent,
        score: &QualityScore,
    ) -> Result<IssuanceInstruction> {
        // The ledger rejects these at harvest; a second gate here keeps a
        // negative or NaN amount out of any issuance instruction
        if !event.yield_grams.is_finite() || event.yield_grams <= 0.0 {
            return Err(SettlementError::InvalidYield {
                harvest_id: event.harvest_id.clone(),
                yield_grams: event.yield_grams,
            });
        }

        let mut guard = self
            .state
            .lock()
            .map_err(|e| SettlementError::Unavailable(e.to_string()))?;
        let state = &mut *guard;

        if state.decided.contains(&event.harvest_id) {
            self.metrics
                .duplicate_settlements_total
                .fetch_add(1, Ordering::Relaxed);
            return Err(SettlementError::DuplicateSettlement {
                harvest_id: event.harvest_id.clone(),
            });
        }

        let unit = state.units.entry(event.unit_id.clone()).or_default();

        // Throttle 1: harvest spacing
        if let Some(last) = unit.last_issued_ms {
            if event.timestamp_ms.saturating_sub(last) < self.config.min_harvest_interval_ms {
                state.decided.insert(event.harvest_id.clone());
                self.metrics
                    .settlements_throttled_total
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    harvest_id = %event.harvest_id,
                    unit_id = %event.unit_id,
                    "Settlement throttled: harvest too frequent"
                );
                return Err(SettlementError::ThrottleRejected {
                    harvest_id: event.harvest_id.clone(),
                    reason: ThrottleReason::HarvestTooFrequent,
                });
            }
        }

        let amount = event.yield_grams * (score.overall / 100.0) * self.config.base_rate_per_gram;

        // Throttle 2: per-epoch issuance cap
        let bucket = event.timestamp_ms / self.config.epoch_length_ms;
        if bucket != unit.epoch_bucket {
            unit.epoch_bucket = bucket;
            unit.epoch_issued = 0.0;
        }
        if unit.epoch_issued + amount > self.config.epoch_issuance_cap {
            state.decided.insert(event.harvest_id.clone());
            self.metrics
                .settlements_throttled_total
                .fetch_add(1, Ordering::Relaxed);
            warn!(
                harvest_id = %event.harvest_id,
                unit_id = %event.unit_id,
                amount,
                "Settlement throttled: epoch cap exceeded"
            );
            return Err(SettlementError::ThrottleRejected {
                harvest_id: event.harvest_id.clone(),
                reason: ThrottleReason::EpochCapExceeded,
            });
        }

        unit.epoch_issued += amount;
        unit.last_issued_ms = Some(event.timestamp_ms);
        state.decided.insert(event.harvest_id.clone());
        self.metrics
            .settlements_issued_total
            .fetch_add(1, Ordering::Relaxed);

        info!(
            harvest_id = %event.harvest_id,
            unit_id = %event.unit_id,
            recipient = %event.operator_id,
            amount,
            "Issuance instruction created"
        );

        Ok(IssuanceInstruction {
            harvest_id: event.harvest_id.clone(),
            unit_id: event.unit_id.clone(),
            recipient_id: event.operator_id.clone(),
            amount,
            quality_score: score.overall,
            timestamp_ms: event.timestamp_ms,
        })
    }

    pub fn metrics(&self) -> &SettlementMetrics {
        &self.metrics
    }
}
