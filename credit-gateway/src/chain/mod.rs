//! Chain adapter
//!
//! Traits for the two on-chain collaborators (chain-data provider and the
//! credit scoring contract), their JSON-RPC and in-memory implementations,
//! and [`classify`], the one place where provider error shapes are mapped
//! onto the pipeline error taxonomy.

pub mod abi;
pub mod memory;
pub mod rpc;

use async_trait::async_trait;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{PipelineError, RejectionCategory};
use crate::types::{Address, ChainId, CiphertextHandle, CreditInputVector, TxHash};

pub use memory::DevChain;
pub use rpc::{JsonRpcClient, RpcCreditContract};

/// JSON-RPC code used by wallets when the user refuses a request (EIP-1193)
pub const USER_REJECTED_CODE: i64 = 4001;

/// Wallet refused the request without a user decision (EIP-1193)
pub const UNAUTHORIZED_CODE: i64 = 4100;

/// Node refused the transaction itself (EIP-1474)
pub const TRANSACTION_REJECTED_CODE: i64 = -32003;

/// Revert code returned by geth-style nodes for `eth_call`/`eth_estimateGas`
pub const EXECUTION_REVERTED_CODE: i64 = 3;

/// Raw error shapes produced by chain providers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rpc error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        /// Hex revert data, when the node returned any
        data: Option<String>,
    },
    #[error("transaction {0} reverted")]
    Reverted(TxHash),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("transaction {hash} not confirmed after {polls} polls")]
    NotConfirmed { hash: TxHash, polls: u32 },
}

/// Mined transaction summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
}

/// Latest `LoanApproved` / `LoanRejected` event for an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanDecision {
    pub approved: bool,
    /// Timestamp carried by the event
    pub timestamp: u64,
    pub block_number: u64,
}

/// Read access to public chain state
#[async_trait]
pub trait ChainDataProvider: Send + Sync {
    async fn chain_id(&self) -> Result<ChainId, ChainError>;
    async fn transaction_count(&self, address: Address) -> Result<u64, ChainError>;
    async fn balance(&self, address: Address) -> Result<BigUint, ChainError>;
    async fn block_number(&self) -> Result<u64, ChainError>;
}

/// Typed surface of the credit scoring contract
#[async_trait]
pub trait CreditContract: Send + Sync {
    fn address(&self) -> Address;

    /// `submitCreditData(bytes32 x6, bytes)`; handles in vector order
    async fn submit_credit_data(
        &self,
        from: Address,
        handles: &[CiphertextHandle; CreditInputVector::LEN],
        proof: &[u8],
    ) -> Result<TxHash, ChainError>;

    /// `evaluateLoan()`
    async fn evaluate_loan(&self, from: Address) -> Result<TxHash, ChainError>;

    /// Block until the transaction is mined
    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt, ChainError>;

    /// `hasCreditData()` as seen by `account`
    async fn has_credit_data(&self, account: Address) -> Result<bool, ChainError>;

    /// `getLoanStatus()` as seen by `account`
    async fn loan_status(&self, account: Address) -> Result<bool, ChainError>;

    /// `getCreditDataTimestamp()` as seen by `account`
    async fn credit_data_timestamp(&self, account: Address) -> Result<u64, ChainError>;

    async fn latest_decision(&self, account: Address) -> Result<Option<LoanDecision>, ChainError>;
}

/// Map a provider error onto the pipeline taxonomy.
pub fn classify(error: &ChainError) -> PipelineError {
    match error {
        ChainError::Transport(message) => PipelineError::Transport(message.clone()),
        ChainError::Decode(message) => {
            PipelineError::Transport(format!("malformed response: {message}"))
        }
        ChainError::NotConfirmed { hash, polls } => PipelineError::ConfirmationTimeout {
            hash: *hash,
            polls: *polls,
        },
        ChainError::Reverted(hash) => PipelineError::ContractRejected {
            category: RejectionCategory::PreconditionFailed,
            reason: format!("transaction {hash} reverted"),
        },
        ChainError::Rpc {
            code,
            message,
            data,
        } => {
            let lowered = message.to_ascii_lowercase();
            let revert_reason = data
                .as_deref()
                .and_then(|data| crate::types::decode_hex(data).ok())
                .and_then(|bytes| abi::decode_revert_reason(&bytes));

            let category = if *code == USER_REJECTED_CODE
                || lowered.contains("user rejected")
                || lowered.contains("user denied")
            {
                RejectionCategory::RejectedByUser
            } else if lowered.contains("insufficient funds") {
                RejectionCategory::InsufficientFunds
            } else if *code == EXECUTION_REVERTED_CODE
                || revert_reason.is_some()
                || lowered.contains("revert")
            {
                RejectionCategory::PreconditionFailed
            } else if *code == UNAUTHORIZED_CODE || *code == TRANSACTION_REJECTED_CODE {
                RejectionCategory::Unknown
            } else {
                // Node-side failure (missing method, rate or range limit, ...)
                return PipelineError::Transport(format!("rpc error {code}: {message}"));
            };

            PipelineError::ContractRejected {
                category,
                reason: revert_reason.unwrap_or_else(|| message.clone()),
            }
        }
    }
}
