//! Health and status endpoints

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};

use crate::state::AppState;
use crate::types::{HealthResponse, StatusResponse};

/// Create health routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
}

/// Health check endpoint
/// GET /health
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        in_flight_submissions: state.orchestrator().in_flight(),
        dev_mode: state.dev_mode(),
    };

    (StatusCode::OK, Json(response))
}

/// Detailed status endpoint
/// GET /status
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let resolver = state.resolver();
    let active_chain_id = resolver.active_profile().await.map(|p| p.chain_id);

    let response = StatusResponse {
        status: "running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        contract: state.contract_address(),
        supported_chains: resolver.supported_chains(),
        active_chain_id,
        backend_generation: resolver.active_generation().await,
        total_submissions: state.total_submissions(),
        degraded_submissions: state.degraded_submissions(),
        total_evaluations: state.total_evaluations(),
        uptime_secs: state.uptime_secs(),
    };

    (StatusCode::OK, Json(response))
}
