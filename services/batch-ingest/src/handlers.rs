use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use elxr_core::{
    CoreError, HarvestParams, LedgerError, MakeupMix, OracleError, ParameterKind, ProductKind,
    ProductionUnit, Reading, SettlementError, SettlementOutcome, StoreError, UnitOfMeasure,
};
use elxr_crypto::ReadingProof;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::state::AppState;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn reject(status: StatusCode, message: impl ToString) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.to_string() })))
}

fn core_error(e: CoreError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        CoreError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::Ledger(le) => match le {
            LedgerError::UnknownUnit { .. } | LedgerError::UnknownHarvest { .. } => {
                StatusCode::NOT_FOUND
            }
            LedgerError::InvalidYield { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::CONFLICT,
        },
        CoreError::Store(se) => match se {
            StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        CoreError::Quality(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::Settlement(se) => match se {
            SettlementError::DuplicateSettlement { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        CoreError::Oracle(oe) => match oe {
            OracleError::DuplicateSource { .. } => StatusCode::CONFLICT,
            OracleError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        },
        CoreError::Config(_) | CoreError::Issuance(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(error = %e, "Request failed");
    }
    reject(status, e)
}

fn parse_product(s: &str) -> Result<ProductKind, (StatusCode, Json<Value>)> {
    ProductKind::from_str(s)
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, format!("unknown product '{}'", s)))
}

fn parse_parameter(s: &str) -> Result<ParameterKind, (StatusCode, Json<Value>)> {
    ParameterKind::from_str(s)
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, format!("unknown parameter '{}'", s)))
}

fn parse_unit_of_measure(s: &str) -> Result<UnitOfMeasure, (StatusCode, Json<Value>)> {
    UnitOfMeasure::from_str(s)
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, format!("unknown unit '{}'", s)))
}

fn parse_hex(field: &str, s: &str) -> Result<Vec<u8>, (StatusCode, Json<Value>)> {
    hex::decode(s)
        .map_err(|_| reject(StatusCode::BAD_REQUEST, format!("{} is not valid hex", field)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUnitRequest {
    pub unit_id: String,
    pub product: String,
    pub operator_id: String,
    pub certification: Option<String>,
    pub registered_at_ms: u64,
}

pub async fn register_unit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterUnitRequest>,
) -> ApiResult {
    let product = parse_product(&req.product)?;
    let batch_id = state
        .service
        .register_unit(ProductionUnit {
            unit_id: req.unit_id,
            product,
            operator_id: req.operator_id,
            certification: req.certification,
            active: true,
            registered_at_ms: req.registered_at_ms,
        })
        .map_err(core_error)?;
    Ok(Json(json!({ "batchId": batch_id })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingRequest {
    pub unit_id: String,
    pub parameter: String,
    pub value: f64,
    pub unit_of_measure: String,
    pub timestamp_ms: u64,
    pub source_id: String,
    /// Hex-encoded Ed25519 signature over the reading digest
    pub proof: String,
}

impl ReadingRequest {
    fn into_reading(self) -> Result<Reading, (StatusCode, Json<Value>)> {
        Ok(Reading {
            unit_id: self.unit_id,
            parameter: parse_parameter(&self.parameter)?,
            value: self.value,
            unit_of_measure: parse_unit_of_measure(&self.unit_of_measure)?,
            timestamp_ms: self.timestamp_ms,
            source_id: self.source_id,
            proof: ReadingProof {
                signature: parse_hex("proof", &self.proof)?,
            },
        })
    }
}

pub async fn submit_attestation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReadingRequest>,
) -> ApiResult {
    let reading = req.into_reading()?;
    let outcome = state
        .service
        .submit_attestation(reading)
        .map_err(core_error)?;
    Ok(Json(json!({
        "attestationId": outcome.attestation.attestation_id,
        "batchId": outcome.batch_id,
        "phase": outcome.phase.as_str(),
        "becameReady": outcome.became_ready,
        "flagged": outcome.attestation.is_flagged(),
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestRequest {
    pub unit_id: String,
    pub yield_grams: f64,
    pub operator_id: String,
    /// Hex-encoded equipment sanitization proof
    pub sanitization_proof: String,
    pub timestamp_ms: u64,
}

pub async fn record_harvest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HarvestRequest>,
) -> ApiResult {
    let sanitization_proof = parse_hex("sanitizationProof", &req.sanitization_proof)?;
    let outcome = state
        .service
        .record_harvest(
            &req.unit_id,
            HarvestParams {
                yield_grams: req.yield_grams,
                operator_id: req.operator_id,
                sanitization_proof,
                timestamp_ms: req.timestamp_ms,
            },
        )
        .map_err(core_error)?;

    let settlement = match &outcome.settlement {
        SettlementOutcome::Issued { instruction } => json!({
            "outcome": "issued",
            "amount": instruction.amount,
            "recipientId": instruction.recipient_id,
        }),
        SettlementOutcome::Rejected { reason } => json!({
            "outcome": "rejected",
            "reason": reason.to_string(),
        }),
    };
    Ok(Json(json!({
        "harvestId": outcome.harvest_id,
        "batchId": outcome.batch_id,
        "qualityScore": outcome.quality.overall,
        "settlement": settlement,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplenishRequest {
    pub unit_id: String,
    /// Makeup mix as (component, grams) pairs
    pub components: Vec<(String, f64)>,
    pub timestamp_ms: u64,
}

pub async fn record_replenishment(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReplenishRequest>,
) -> ApiResult {
    let outcome = state
        .service
        .record_replenishment(
            &req.unit_id,
            MakeupMix {
                components: req.components,
                timestamp_ms: req.timestamp_ms,
            },
        )
        .map_err(core_error)?;
    Ok(Json(json!({
        "closedBatchId": outcome.closed_batch_id,
        "newBatchId": outcome.new_batch_id,
    })))
}

pub async fn submit_oracle_reading(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReadingRequest>,
) -> ApiResult {
    let reading = req.into_reading()?;
    let window_start_ms = state
        .service
        .submit_oracle_reading(reading)
        .map_err(core_error)?;
    Ok(Json(json!({ "windowStartMs": window_start_ms })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRequest {
    pub unit_id: String,
    pub parameter: String,
    pub window_start_ms: u64,
}

pub async fn aggregate_oracle_window(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AggregateRequest>,
) -> ApiResult {
    let parameter = parse_parameter(&req.parameter)?;
    // Freshness is judged against the server clock, never caller input
    let now_ms = Utc::now().timestamp_millis() as u64;
    let outcome = state
        .service
        .aggregate_oracle_window(&req.unit_id, parameter, req.window_start_ms, now_ms)
        .map_err(core_error)?;
    Ok(Json(json!({
        "attestationId": outcome.attestation.attestation_id,
        "value": outcome.attestation.value,
        "phase": outcome.phase.as_str(),
        "becameReady": outcome.became_ready,
    })))
}

pub async fn batch_status(
    State(state): State<Arc<AppState>>,
    Path(unit_id): Path<String>,
) -> ApiResult {
    let status = state.service.batch_status(&unit_id).map_err(core_error)?;
    Ok(Json(json!({
        "unitId": status.unit_id,
        "batchId": status.batch_id,
        "phase": status.phase.as_str(),
        "openSinceMs": status.open_since_ms,
        "attestationCount": status.attestation_count,
    })))
}

pub async fn harvest_score(
    State(state): State<Arc<AppState>>,
    Path(harvest_id): Path<String>,
) -> ApiResult {
    let score = state.service.harvest_score(&harvest_id).map_err(core_error)?;
    Ok(Json(json!({
        "batchId": score.batch_id,
        "overall": score.overall,
        "penaltyMultiplier": score.penalty_multiplier,
        "flaggedAttestations": score.flagged_attestations,
        "breakdown": score
            .breakdown
            .iter()
            .map(|s| json!({
                "parameter": s.parameter.as_str(),
                "meanValue": s.mean_value,
                "score": s.score,
                "weight": s.weight,
            }))
            .collect::<Vec<_>>(),
    })))
}

pub async fn deactivate_unit(
    State(state): State<Arc<AppState>>,
    Path(unit_id): Path<String>,
) -> ApiResult {
    state.service.deactivate_unit(&unit_id).map_err(core_error)?;
    Ok(Json(json!({ "unitId": unit_id, "active": false })))
}
