//! Credit pipeline endpoints

use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use super::{parse_account, ApiError};
use crate::chain::classify;
use crate::error::Stage;
use crate::services::NetworkProfile;
use crate::state::AppState;
use crate::types::{
    AccountStatusResponse, CancelResponse, EvaluateRequest, ScoreAssessment, SubmissionReceipt,
    SubmitCreditRequest,
};

/// Create credit routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/reputation/:account", get(reputation))
        .route("/credit/submit", post(submit))
        .route("/credit/submit/:account", delete(cancel))
        .route("/credit/status/:account", get(status))
        .route("/credit/evaluate", post(evaluate))
        .route("/network", get(network))
}

/// Analyze a wallet's on-chain reputation
/// GET /api/v1/reputation/:account
async fn reputation(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<ScoreAssessment>, ApiError> {
    let account = parse_account(&account)?;
    Ok(Json(state.analyzer().assess(account).await))
}

/// Encrypt and submit credit data
/// POST /api/v1/credit/submit
#[instrument(skip(state, request), fields(account = %request.account))]
async fn submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitCreditRequest>,
) -> Result<Json<SubmissionReceipt>, ApiError> {
    info!("Received credit submission");

    let receipt = state
        .orchestrator()
        .submit(&request.form(), request.account)
        .await?;
    state.record_submission(receipt.degraded.is_some());

    if let Err(e) = state.reconciler().refresh(request.account).await {
        warn!(error = %e, "Status refresh after submission failed");
    }

    Ok(Json(receipt))
}

/// Cancel a running submission
/// DELETE /api/v1/credit/submit/:account
async fn cancel(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let account = parse_account(&account)?;
    let cancelled = state.orchestrator().cancel(account);
    Ok(Json(CancelResponse { account, cancelled }))
}

/// Current lifecycle status, read from the contract
/// GET /api/v1/credit/status/:account
async fn status(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<AccountStatusResponse>, ApiError> {
    let account = parse_account(&account)?;
    let status = state.reconciler().refresh(account).await?;
    Ok(Json(AccountStatusResponse { account, status }))
}

/// Trigger loan evaluation
/// POST /api/v1/credit/evaluate
#[instrument(skip(state, request), fields(account = %request.account))]
async fn evaluate(
    State(state): State<AppState>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<AccountStatusResponse>, ApiError> {
    let status = state.reconciler().evaluate(request.account).await?;
    state.record_evaluation();
    Ok(Json(AccountStatusResponse {
        account: request.account,
        status,
    }))
}

/// Profile of the network the chain provider is connected to
/// GET /api/v1/network
async fn network(State(state): State<AppState>) -> Result<Json<NetworkProfile>, ApiError> {
    let chain_id = state
        .provider()
        .chain_id()
        .await
        .map_err(|e| classify(&e).at(Stage::ReadingStatus))?;
    Ok(Json(state.resolver().resolve(chain_id)?))
}
