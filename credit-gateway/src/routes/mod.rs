//! HTTP Routes for the Credit Gateway
//!
//! Health/status endpoints plus the credit pipeline API under `/api/v1`.

pub mod credit;
pub mod health;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;

use crate::error::{PipelineError, StageError};
use crate::state::AppState;
use crate::types::{Address, ErrorCode, ErrorResponse};

/// Create all routes
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        .nest("/api/v1", credit::routes())
        .with_state(state)
}

/// HTTP status for each error code
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidInput | ErrorCode::IncompleteForm => StatusCode::BAD_REQUEST,
        ErrorCode::AlreadyInProgress | ErrorCode::Cancelled => StatusCode::CONFLICT,
        ErrorCode::NoCreditData => StatusCode::PRECONDITION_FAILED,
        ErrorCode::UnsupportedNetwork | ErrorCode::ContractRejected => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorCode::DataUnavailable | ErrorCode::BackendUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorCode::TransportError | ErrorCode::EncryptionIncomplete => StatusCode::BAD_GATEWAY,
        ErrorCode::ConfirmationTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn details(error: &PipelineError) -> Option<serde_json::Value> {
    match error {
        PipelineError::IncompleteForm { missing } => Some(json!({ "missing": missing })),
        PipelineError::ContractRejected { category, .. } => Some(json!({ "category": category })),
        PipelineError::UnsupportedNetwork { chain_id } => Some(json!({ "chain_id": chain_id })),
        PipelineError::ConfirmationTimeout { hash, polls } => {
            Some(json!({ "transaction_hash": hash, "polls": polls }))
        }
        _ => None,
    }
}

/// Error returned by route handlers
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn invalid_account(raw: &str) -> Self {
        PipelineError::InvalidInput(format!("invalid account address: {raw}")).into()
    }
}

impl From<StageError> for ApiError {
    fn from(err: StageError) -> Self {
        let code = err.code();
        Self {
            status: status_for(code),
            body: ErrorResponse {
                code,
                stage: Some(err.stage),
                message: err.to_string(),
                details: details(&err.error),
            },
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let code = err.code();
        Self {
            status: status_for(code),
            body: ErrorResponse {
                code,
                stage: None,
                message: err.to_string(),
                details: details(&err),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Parse an account from a path segment
pub fn parse_account(raw: &str) -> Result<Address, ApiError> {
    raw.parse().map_err(|_| ApiError::invalid_account(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RejectionCategory, Stage};

    #[test]
    fn test_stage_error_response() {
        let err: ApiError = PipelineError::ContractRejected {
            category: RejectionCategory::InsufficientFunds,
            reason: "insufficient funds for gas".into(),
        }
        .at(Stage::WritingToContract)
        .into();

        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.body.stage, Some(Stage::WritingToContract));
        assert_eq!(
            err.body.details,
            Some(json!({ "category": "insufficient-funds" }))
        );
    }

    #[test]
    fn test_invalid_account() {
        let err = parse_account("0x1234").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.body.code, ErrorCode::InvalidInput);
    }
}
