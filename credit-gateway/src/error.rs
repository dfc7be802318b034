//! Pipeline error taxonomy
//!
//! Every failure that leaves the orchestrator or the reconciler is a
//! [`PipelineError`] tagged with the [`Stage`] it happened in, so callers can
//! tell which suspension point stalled.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::{Address, ChainId, ErrorCode, TxHash};

/// Step of a submission or evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CollectingReputation,
    AssemblingInputs,
    BuildingPayload,
    WritingToContract,
    AwaitingConfirmation,
    ReadingStatus,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::CollectingReputation => "collecting_reputation",
            Stage::AssemblingInputs => "assembling_inputs",
            Stage::BuildingPayload => "building_payload",
            Stage::WritingToContract => "writing_to_contract",
            Stage::AwaitingConfirmation => "awaiting_confirmation",
            Stage::ReadingStatus => "reading_status",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-facing category of a rejected contract call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectionCategory {
    RejectedByUser,
    InsufficientFunds,
    PreconditionFailed,
    Unknown,
}

impl fmt::Display for RejectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RejectionCategory::RejectedByUser => "rejected-by-user",
            RejectionCategory::InsufficientFunds => "insufficient-funds",
            RejectionCategory::PreconditionFailed => "precondition-failed",
            RejectionCategory::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("on-chain data unavailable: {0}")]
    DataUnavailable(String),
    #[error("unsupported network: no backend configuration for chain {chain_id}")]
    UnsupportedNetwork { chain_id: ChainId },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("incomplete form: missing {}", .missing.join(", "))]
    IncompleteForm { missing: Vec<&'static str> },
    #[error("encryption incomplete: {0}")]
    EncryptionIncomplete(String),
    #[error("contract rejected the call ({category}): {reason}")]
    ContractRejected {
        category: RejectionCategory,
        reason: String,
    },
    #[error("a submission for {0} is already in progress")]
    AlreadyInProgress(Address),
    #[error("no credit data submitted for {0}")]
    NoCreditData(Address),
    #[error("encryption backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("chain transport error: {0}")]
    Transport(String),
    #[error("transaction {hash} not confirmed after {polls} polls")]
    ConfirmationTimeout { hash: TxHash, polls: u32 },
    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::DataUnavailable(_) => ErrorCode::DataUnavailable,
            PipelineError::UnsupportedNetwork { .. } => ErrorCode::UnsupportedNetwork,
            PipelineError::InvalidInput(_) => ErrorCode::InvalidInput,
            PipelineError::IncompleteForm { .. } => ErrorCode::IncompleteForm,
            PipelineError::EncryptionIncomplete(_) => ErrorCode::EncryptionIncomplete,
            PipelineError::ContractRejected { .. } => ErrorCode::ContractRejected,
            PipelineError::AlreadyInProgress(_) => ErrorCode::AlreadyInProgress,
            PipelineError::NoCreditData(_) => ErrorCode::NoCreditData,
            PipelineError::BackendUnavailable(_) => ErrorCode::BackendUnavailable,
            PipelineError::Transport(_) => ErrorCode::TransportError,
            PipelineError::ConfirmationTimeout { .. } => ErrorCode::ConfirmationTimeout,
            PipelineError::Cancelled => ErrorCode::Cancelled,
        }
    }

    pub fn at(self, stage: Stage) -> StageError {
        StageError { stage, error: self }
    }
}

/// A pipeline error together with the stage that produced it
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{stage}: {error}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub error: PipelineError,
}

impl StageError {
    pub fn code(&self) -> ErrorCode {
        self.error.code()
    }

    /// Whether the failure happened before anything was broadcast. A transport
    /// error while sending is ambiguous and counts as a possible broadcast.
    pub fn is_side_effect_free(&self) -> bool {
        matches!(
            self.stage,
            Stage::CollectingReputation
                | Stage::AssemblingInputs
                | Stage::BuildingPayload
                | Stage::ReadingStatus
        ) || (self.stage == Stage::WritingToContract
            && !matches!(self.error, PipelineError::Transport(_)))
    }
}
