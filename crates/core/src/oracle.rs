//! Oracle consensus aggregation
//!
//! Independent oracle sources submit readings for the same
//! (unit, parameter, time-window). The aggregator discards stale
//! submissions, takes the median of what remains, keeps the sources whose
//! values sit within a relative tolerance of that median, and accepts the
//! median of the agreeing set once a quorum of sources agrees. Anything
//! short of quorum yields `NoConsensus` and nothing reaches the ledger for
//! that window.
//!
//! Every submission's signature proof is verified on entry, so a consensus
//! reading is backed by the proofs of all its contributing sources rather
//! than by a single signature of its own.

use crate::types::{ParameterKind, Reading, UnitOfMeasure};
use elxr_crypto::{ProofError, ProofVerifier, ReadingProof};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Invalid submission proof: {0}")]
    InvalidProof(#[from] ProofError),

    #[error("Source {source_id} already submitted for this window")]
    DuplicateSource { source_id: String },

    #[error("No fresh submissions for window")]
    EmptyWindow,

    #[error("No consensus: {agreeing} of {quorum} required sources agree")]
    NoConsensus { agreeing: usize, quorum: usize },

    #[error("Aggregator unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, OracleError>;

/// Identifies one aggregation window
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    unit_id: String,
    parameter: ParameterKind,
    window_start_ms: u64,
}

/// A reading accepted by consensus across oracle sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusReading {
    pub unit_id: String,
    pub parameter: ParameterKind,
    /// Median of the agreeing submissions
    pub value: f64,
    pub unit_of_measure: UnitOfMeasure,
    /// Latest timestamp among the agreeing submissions
    pub timestamp_ms: u64,
    pub window_start_ms: u64,
    /// Sources whose submissions agreed
    pub contributing_sources: Vec<String>,
}

impl ConsensusReading {
    /// Synthetic source id carried by ledger attestations born from consensus
    pub const SOURCE_ID: &'static str = "oracle-consensus";

    /// Shape the consensus as a reading for validation and append. The
    /// proof is empty: authenticity was established per submission.
    pub fn into_reading(self) -> Reading {
        Reading {
            unit_id: self.unit_id,
            parameter: self.parameter,
            value: self.value,
            unit_of_measure: self.unit_of_measure,
            timestamp_ms: self.timestamp_ms,
            source_id: Self::SOURCE_ID.to_string(),
            proof: ReadingProof { signature: vec![] },
        }
    }
}

/// Long-run agreement record per source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceReliability {
    /// Windows where this source's value made the agreeing set
    pub agreed_total: u64,
    /// Windows where this source submitted but fell outside tolerance
    pub excluded_total: u64,
}

#[derive(Debug, Default)]
pub struct OracleMetrics {
    pub submissions_total: AtomicU64,
    pub consensus_reached_total: AtomicU64,
    pub no_consensus_total: AtomicU64,
}

#[derive(Default)]
struct AggregatorState {
    windows: HashMap<WindowKey, Vec<Reading>>,
    reliability: HashMap<String, SourceReliability>,
}

/// Collects per-window oracle submissions and aggregates them by
/// median-with-tolerance quorum
pub struct OracleAggregator<V: ProofVerifier> {
    verifier: V,
    quorum: usize,
    tolerance: f64,
    freshness_ms: u64,
    window_ms: u64,
    state: Mutex<AggregatorState>,
    metrics: OracleMetrics,
}

impl<V: ProofVerifier> OracleAggregator<V> {
    pub fn new(verifier: V, config: &crate::config::OracleConfig) -> Self {
        Self {
            verifier,
            quorum: config.quorum,
            tolerance: config.tolerance,
            freshness_ms: config.freshness_ms,
            window_ms: config.window_ms,
            state: Mutex::new(AggregatorState::default()),
            metrics: OracleMetrics::default(),
        }
    }

    /// Start of the aggregation window a timestamp falls in
    pub fn window_start(&self, timestamp_ms: u64) -> u64 {
        timestamp_ms - (timestamp_ms % self.window_ms)
    }

    /// Accept one source's submission for its window.
    ///
    /// The proof is verified here; a source submits at most once per window.
    pub fn submit(&self, reading: Reading) -> Result<u64> {
        self.verifier
            .verify(&reading.source_id, &reading.digest(), &reading.proof)?;

        let window_start_ms = self.window_start(reading.timestamp_ms);
        let key = WindowKey {
            unit_id: reading.unit_id.clone(),
            parameter: reading.parameter,
            window_start_ms,
        };

        let mut state = self
            .state
            .lock()
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;
        let window = state.windows.entry(key).or_default();
        if window.iter().any(|r| r.source_id == reading.source_id) {
            return Err(OracleError::DuplicateSource {
                source_id: reading.source_id,
            });
        }

        debug!(
            unit_id = %reading.unit_id,
            parameter = %reading.parameter.as_str(),
            source_id = %reading.source_id,
            window_start_ms,
            "Oracle submission accepted"
        );
        window.push(reading);
        self.metrics
            .submissions_total
            .fetch_add(1, Ordering::Relaxed);
        Ok(window_start_ms)
    }

    /// Aggregate a window's submissions into a consensus reading.
    ///
    /// Consumes the window on success; on `NoConsensus` the window is also
    /// consumed so a failed window cannot be retried into acceptance.
    pub fn aggregate(
        &self,
        unit_id: &str,
        parameter: ParameterKind,
        window_start_ms: u64,
        now_ms: u64,
    ) -> Result<ConsensusReading> {
        let key = WindowKey {
            unit_id: unit_id.to_string(),
            parameter,
            window_start_ms,
        };

        let mut guard = self
            .state
            .lock()
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;
        let state = &mut *guard;

        let submissions = state.windows.remove(&key).unwrap_or_default();

        // Staleness filter runs before any quorum counting
        let fresh: Vec<Reading> = submissions
            .into_iter()
            .filter(|r| now_ms.saturating_sub(r.timestamp_ms) <= self.freshness_ms)
            .collect();
        if fresh.is_empty() {
            return Err(OracleError::EmptyWindow);
        }

        let pivot = median(fresh.iter().map(|r| r.value));
        let (agreeing, excluded): (Vec<&Reading>, Vec<&Reading>) = fresh
            .iter()
            .partition(|r| within_tolerance(r.value, pivot, self.tolerance));

        if agreeing.len() < self.quorum {
            self.metrics
                .no_consensus_total
                .fetch_add(1, Ordering::Relaxed);
            warn!(
                unit_id = %unit_id,
                parameter = %parameter.as_str(),
                window_start_ms,
                agreeing = agreeing.len(),
                quorum = self.quorum,
                "Oracle window failed to reach consensus"
            );
            return Err(OracleError::NoConsensus {
                agreeing: agreeing.len(),
                quorum: self.quorum,
            });
        }

        for r in &agreeing {
            state
                .reliability
                .entry(r.source_id.clone())
                .or_default()
                .agreed_total += 1;
        }
        for r in &excluded {
            state
                .reliability
                .entry(r.source_id.clone())
                .or_default()
                .excluded_total += 1;
        }

        let value = median(agreeing.iter().map(|r| r.value));
        let timestamp_ms = agreeing.iter().map(|r| r.timestamp_ms).max().unwrap_or(0);
        let unit_of_measure = agreeing[0].unit_of_measure;
        let mut contributing_sources: Vec<String> =
            agreeing.iter().map(|r| r.source_id.clone()).collect();
        contributing_sources.sort();

        self.metrics
            .consensus_reached_total
            .fetch_add(1, Ordering::Relaxed);
        info!(
            unit_id = %unit_id,
            parameter = %parameter.as_str(),
            window_start_ms,
            value,
            sources = contributing_sources.len(),
            "Oracle consensus reached"
        );

        Ok(ConsensusReading {
            unit_id: unit_id.to_string(),
            parameter,
            value,
            unit_of_measure,
            timestamp_ms,
            window_start_ms,
            contributing_sources,
        })
    }

    /// Agreement history for a source, if it has ever been aggregated
    pub fn source_reliability(&self, source_id: &str) -> Option<SourceReliability> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.reliability.get(source_id).cloned())
    }

    pub fn metrics(&self) -> &OracleMetrics {
        &self.metrics
    }
}

fn median(values: impl Iterator<Item = f64>) -> f64 {
    let mut sorted: Vec<f64> = values.collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn within_tolerance(value: f64, pivot: f64, tolerance: f64) -> bool {
    if pivot == 0.0 {
        return value == 0.0;
    }
    ((value - pivot) / pivot).abs() <= tolerance
}
