//! In-memory dev chain
//!
//! Implements both chain traits against local state so the gateway can run
//! without a node (`dev_mode`) and the pipeline can be tested end to end.
//! Every transaction mines one block; block heights double as event
//! timestamps. Submitting new data clears a previous approval.

use async_trait::async_trait;
use num_bigint::BigUint;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::abi;
use super::{ChainDataProvider, ChainError, CreditContract, LoanDecision, TxReceipt};
use crate::services::attestation::{InputVerifierSigner, ProofBinding};
use crate::types::{encode_hex, Address, ChainId, CiphertextHandle, CreditInputVector, TxHash};

const REVERT_CODE: i64 = 3;

#[derive(Debug, Clone, Default)]
struct DevAccount {
    transaction_count: u64,
    balance_wei: BigUint,
}

#[derive(Debug, Clone)]
struct CreditRecord {
    handles: [CiphertextHandle; CreditInputVector::LEN],
    submitted_at: u64,
}

#[derive(Debug, Default)]
struct DevChainState {
    chain_id: ChainId,
    block_height: u64,
    accounts: HashMap<Address, DevAccount>,
    records: HashMap<Address, CreditRecord>,
    approvals: HashMap<Address, bool>,
    decisions: HashMap<Address, LoanDecision>,
    receipts: HashMap<TxHash, TxReceipt>,
    transactions_sent: u64,
    history_unavailable: bool,
    queued_write_error: Option<ChainError>,
    approve_on_evaluate: bool,
}

impl DevChainState {
    fn mine(&mut self, from: Address) -> TxReceipt {
        self.block_height += 1;
        self.transactions_sent += 1;
        self.accounts.entry(from).or_default().transaction_count += 1;

        let mut hasher = Sha256::new();
        hasher.update(b"credit-gateway:dev-chain:tx");
        hasher.update(self.chain_id.to_be_bytes());
        hasher.update(from.as_bytes());
        hasher.update(self.transactions_sent.to_be_bytes());
        let receipt = TxReceipt {
            transaction_hash: TxHash(hasher.finalize().into()),
            block_number: self.block_height,
            success: true,
        };
        self.receipts.insert(receipt.transaction_hash, receipt);
        receipt
    }
}

fn revert(reason: &str) -> ChainError {
    ChainError::Rpc {
        code: REVERT_CODE,
        message: format!("execution reverted: {reason}"),
        data: Some(encode_hex(&abi::encode_revert_reason(reason))),
    }
}

/// Local chain + credit contract
pub struct DevChain {
    contract: Address,
    /// Input verifier public key; proofs are checked when set
    verifier: Option<[u8; 32]>,
    state: Mutex<DevChainState>,
}

impl DevChain {
    pub fn new(chain_id: ChainId, contract: Address) -> Self {
        Self {
            contract,
            verifier: None,
            state: Mutex::new(DevChainState {
                chain_id,
                approve_on_evaluate: true,
                ..Default::default()
            }),
        }
    }

    /// Require submitted proofs to verify against this key
    pub fn with_input_verifier(mut self, public_key: [u8; 32]) -> Self {
        self.verifier = Some(public_key);
        self
    }

    fn state(&self) -> MutexGuard<'_, DevChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an account's public history
    pub fn fund(&self, address: Address, transaction_count: u64, balance_wei: BigUint) {
        self.state().accounts.insert(
            address,
            DevAccount {
                transaction_count,
                balance_wei,
            },
        );
    }

    /// Simulate a network switch
    pub fn set_chain_id(&self, chain_id: ChainId) {
        self.state().chain_id = chain_id;
    }

    /// Make history reads (nonce, balance, block height) fail
    pub fn set_history_unavailable(&self, unavailable: bool) {
        self.state().history_unavailable = unavailable;
    }

    /// Fail the next write with the given provider error
    pub fn fail_next_write(&self, error: ChainError) {
        self.state().queued_write_error = Some(error);
    }

    /// Outcome of subsequent `evaluateLoan()` calls
    pub fn set_approve_on_evaluate(&self, approve: bool) {
        self.state().approve_on_evaluate = approve;
    }

    /// Number of transactions mined so far
    pub fn transactions_sent(&self) -> u64 {
        self.state().transactions_sent
    }

    /// Handles stored for an account by the last submission
    pub fn stored_handles(&self, account: Address) -> Option<[CiphertextHandle; CreditInputVector::LEN]> {
        self.state().records.get(&account).map(|record| record.handles)
    }

    fn check_history(state: &DevChainState) -> Result<(), ChainError> {
        if state.history_unavailable {
            return Err(ChainError::Transport("dev chain history unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainDataProvider for DevChain {
    async fn chain_id(&self) -> Result<ChainId, ChainError> {
        Ok(self.state().chain_id)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, ChainError> {
        let state = self.state();
        Self::check_history(&state)?;
        Ok(state
            .accounts
            .get(&address)
            .map(|account| account.transaction_count)
            .unwrap_or(0))
    }

    async fn balance(&self, address: Address) -> Result<BigUint, ChainError> {
        let state = self.state();
        Self::check_history(&state)?;
        Ok(state
            .accounts
            .get(&address)
            .map(|account| account.balance_wei.clone())
            .unwrap_or_default())
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let state = self.state();
        Self::check_history(&state)?;
        Ok(state.block_height)
    }
}

#[async_trait]
impl CreditContract for DevChain {
    fn address(&self) -> Address {
        self.contract
    }

    async fn submit_credit_data(
        &self,
        from: Address,
        handles: &[CiphertextHandle; CreditInputVector::LEN],
        proof: &[u8],
    ) -> Result<TxHash, ChainError> {
        let mut state = self.state();
        if let Some(error) = state.queued_write_error.take() {
            return Err(error);
        }

        if let Some(public_key) = &self.verifier {
            let binding = ProofBinding {
                chain_id: state.chain_id,
                contract: self.contract,
                user: from,
            };
            InputVerifierSigner::verify(public_key, proof, &binding, handles)
                .map_err(|e| revert(&format!("invalid input proof: {e}")))?;
        }

        let receipt = state.mine(from);
        state.records.insert(
            from,
            CreditRecord {
                handles: *handles,
                submitted_at: receipt.block_number,
            },
        );
        state.approvals.remove(&from);
        Ok(receipt.transaction_hash)
    }

    async fn evaluate_loan(&self, from: Address) -> Result<TxHash, ChainError> {
        let mut state = self.state();
        if let Some(error) = state.queued_write_error.take() {
            return Err(error);
        }
        if !state.records.contains_key(&from) {
            return Err(revert("No credit data submitted"));
        }

        let receipt = state.mine(from);
        let approved = state.approve_on_evaluate;
        state.approvals.insert(from, approved);
        state.decisions.insert(
            from,
            LoanDecision {
                approved,
                timestamp: receipt.block_number,
                block_number: receipt.block_number,
            },
        );
        Ok(receipt.transaction_hash)
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt, ChainError> {
        self.state()
            .receipts
            .get(&hash)
            .copied()
            .ok_or(ChainError::NotConfirmed { hash, polls: 1 })
    }

    async fn has_credit_data(&self, account: Address) -> Result<bool, ChainError> {
        Ok(self.state().records.contains_key(&account))
    }

    async fn loan_status(&self, account: Address) -> Result<bool, ChainError> {
        Ok(self.state().approvals.get(&account).copied().unwrap_or(false))
    }

    async fn credit_data_timestamp(&self, account: Address) -> Result<u64, ChainError> {
        Ok(self
            .state()
            .records
            .get(&account)
            .map(|record| record.submitted_at)
            .unwrap_or(0))
    }

    async fn latest_decision(&self, account: Address) -> Result<Option<LoanDecision>, ChainError> {
        Ok(self.state().decisions.get(&account).copied())
    }
}
