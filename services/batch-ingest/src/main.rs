use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tracing::info;

mod config;
mod handlers;
mod state;

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    elxr_core::logging::init();

    let config = Config::from_env()?;
    let state = Arc::new(AppState::new(config.clone())?);

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/units", post(handlers::register_unit))
        .route("/units/:unit_id/status", get(handlers::batch_status))
        .route("/units/:unit_id/deactivate", post(handlers::deactivate_unit))
        .route("/attestations", post(handlers::submit_attestation))
        .route("/harvests", post(handlers::record_harvest))
        .route("/harvests/:harvest_id/score", get(handlers::harvest_score))
        .route("/replenishments", post(handlers::record_replenishment))
        .route("/oracle/readings", post(handlers::submit_oracle_reading))
        .route("/oracle/aggregations", post(handlers::aggregate_oracle_window))
        .with_state(state)
        .layer(ServiceBuilder::new().into_inner());

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Batch-ingest service listening on {}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "batch-ingest",
        "port": state.config.port,
        "timestamp": Utc::now().to_rfc3339()
    })))
}
