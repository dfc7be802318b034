//! Status reconciler
//!
//! Derives an account's lifecycle from the contract's view state. The
//! contract is the source of truth; the local map is only a cache of the last
//! observation, holding at most `cache_limit` accounts.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::chain::{classify, ChainError, CreditContract, LoanDecision};
use crate::error::{PipelineError, Stage, StageError};
use crate::types::{Address, SubmissionStatus};

/// Fold the contract's view state into a lifecycle status.
///
/// `getLoanStatus()` only says "approved or not", so a rejection is told
/// apart from "not yet evaluated" by a decision event at or after the
/// current submission's timestamp.
pub fn fold(
    has_data: bool,
    approved: bool,
    submitted_at: u64,
    latest_decision: Option<LoanDecision>,
) -> SubmissionStatus {
    if !has_data {
        return SubmissionStatus::NoData;
    }
    if approved {
        return SubmissionStatus::Evaluated { approved: true };
    }
    match latest_decision {
        Some(decision) if decision.timestamp >= submitted_at => SubmissionStatus::Evaluated {
            approved: decision.approved,
        },
        _ => SubmissionStatus::Submitted,
    }
}

/// Accounts kept in the status cache by default
pub const DEFAULT_CACHE_LIMIT: usize = 10_000;

pub struct StatusReconciler {
    contract: Arc<dyn CreditContract>,
    cache: RwLock<HashMap<Address, SubmissionStatus>>,
    cache_limit: usize,
}

impl StatusReconciler {
    pub fn new(contract: Arc<dyn CreditContract>) -> Self {
        Self::with_cache_limit(contract, DEFAULT_CACHE_LIMIT)
    }

    pub fn with_cache_limit(contract: Arc<dyn CreditContract>, cache_limit: usize) -> Self {
        Self {
            contract,
            cache: RwLock::new(HashMap::new()),
            cache_limit: cache_limit.max(1),
        }
    }

    /// Last observed status, without touching the chain
    pub async fn cached(&self, account: Address) -> Option<SubmissionStatus> {
        self.cache.read().await.get(&account).copied()
    }

    fn read_error(error: ChainError) -> StageError {
        classify(&error).at(Stage::ReadingStatus)
    }

    /// Re-read the contract and overwrite the cached status. Read-only.
    #[instrument(skip(self))]
    pub async fn refresh(&self, account: Address) -> Result<SubmissionStatus, StageError> {
        let has_data = self
            .contract
            .has_credit_data(account)
            .await
            .map_err(Self::read_error)?;

        let status = if has_data {
            let (views, latest_decision) = tokio::join!(
                async {
                    tokio::try_join!(
                        self.contract.loan_status(account),
                        self.contract.credit_data_timestamp(account),
                    )
                },
                self.contract.latest_decision(account),
            );
            let (approved, submitted_at) = views.map_err(Self::read_error)?;

            // Without the event a rejection reads as still pending
            let latest_decision = latest_decision.unwrap_or_else(|e| {
                warn!(%account, error = %e, "Decision event lookup failed");
                None
            });
            fold(true, approved, submitted_at, latest_decision)
        } else {
            SubmissionStatus::NoData
        };

        let previous = {
            let mut cache = self.cache.write().await;
            if cache.len() >= self.cache_limit && !cache.contains_key(&account) {
                if let Some(evicted) = cache.keys().next().copied() {
                    cache.remove(&evicted);
                }
            }
            cache.insert(account, status)
        };
        if previous != Some(status) {
            info!(%account, status = status.label(), "Status changed");
        }
        Ok(status)
    }

    /// Send `evaluateLoan()` and return the refreshed status.
    ///
    /// Fails with `NoCreditData` before issuing any transaction when the
    /// account has nothing on-chain.
    #[instrument(skip(self))]
    pub async fn evaluate(&self, account: Address) -> Result<SubmissionStatus, StageError> {
        let has_data = self
            .contract
            .has_credit_data(account)
            .await
            .map_err(Self::read_error)?;
        if !has_data {
            return Err(PipelineError::NoCreditData(account).at(Stage::ReadingStatus));
        }

        let transaction_hash = self
            .contract
            .evaluate_loan(account)
            .await
            .map_err(|e| classify(&e).at(Stage::WritingToContract))?;

        let receipt = self
            .contract
            .wait_for_receipt(transaction_hash)
            .await
            .map_err(|e| classify(&e).at(Stage::AwaitingConfirmation))?;
        if !receipt.success {
            return Err(
                classify(&ChainError::Reverted(transaction_hash)).at(Stage::AwaitingConfirmation)
            );
        }
        info!(%account, %transaction_hash, block = receipt.block_number, "Loan evaluated");

        self.refresh(account).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::DevChain;
    use crate::types::CiphertextHandle;

    const USER: Address = Address([0xaa; 20]);

    fn decision(approved: bool, timestamp: u64) -> Option<LoanDecision> {
        Some(LoanDecision {
            approved,
            timestamp,
            block_number: timestamp,
        })
    }

    #[test]
    fn test_fold() {
        assert_eq!(fold(false, false, 0, None), SubmissionStatus::NoData);
        assert_eq!(fold(false, true, 0, decision(true, 5)), SubmissionStatus::NoData);
        assert_eq!(fold(true, false, 10, None), SubmissionStatus::Submitted);
        assert_eq!(
            fold(true, true, 10, None),
            SubmissionStatus::Evaluated { approved: true }
        );
        assert_eq!(
            fold(true, false, 10, decision(false, 12)),
            SubmissionStatus::Evaluated { approved: false }
        );
        // A decision about an older submission does not count
        assert_eq!(fold(true, false, 10, decision(false, 7)), SubmissionStatus::Submitted);
    }

    #[tokio::test]
    async fn test_evaluate_without_data_sends_nothing() {
        let chain = Arc::new(DevChain::new(31337, Address::ZERO));
        let reconciler = StatusReconciler::new(chain.clone());

        let err = reconciler.evaluate(USER).await.unwrap_err();
        assert_eq!(err.error, PipelineError::NoCreditData(USER));
        assert_eq!(chain.transactions_sent(), 0);
    }

    #[tokio::test]
    async fn test_refresh_is_stable_and_cached() {
        let chain = Arc::new(DevChain::new(31337, Address::ZERO));
        let reconciler = StatusReconciler::new(chain.clone());
        assert_eq!(reconciler.cached(USER).await, None);

        let handles = std::array::from_fn(|i| CiphertextHandle([i as u8; 32]));
        chain.submit_credit_data(USER, &handles, b"proof").await.unwrap();

        let first = reconciler.refresh(USER).await.unwrap();
        let second = reconciler.refresh(USER).await.unwrap();
        assert_eq!(first, SubmissionStatus::Submitted);
        assert_eq!(first, second);
        assert_eq!(reconciler.cached(USER).await, Some(SubmissionStatus::Submitted));
    }

    #[tokio::test]
    async fn test_cache_is_bounded() {
        let chain = Arc::new(DevChain::new(31337, Address::ZERO));
        let reconciler = StatusReconciler::with_cache_limit(chain, 2);

        for byte in 1..=5u8 {
            reconciler.refresh(Address([byte; 20])).await.unwrap();
        }
        assert_eq!(reconciler.cache.read().await.len(), 2);
        assert_eq!(
            reconciler.cached(Address([5u8; 20])).await,
            Some(SubmissionStatus::NoData)
        );
    }

    #[tokio::test]
    async fn test_rejection_after_evaluate() {
        let chain = Arc::new(DevChain::new(31337, Address::ZERO));
        chain.set_approve_on_evaluate(false);
        let reconciler = StatusReconciler::new(chain.clone());

        let handles = std::array::from_fn(|i| CiphertextHandle([i as u8; 32]));
        chain.submit_credit_data(USER, &handles, b"proof").await.unwrap();

        let status = reconciler.evaluate(USER).await.unwrap();
        assert_eq!(status, SubmissionStatus::Evaluated { approved: false });

        // Resubmitting puts the account back in the submitted state
        chain.submit_credit_data(USER, &handles, b"proof").await.unwrap();
        assert_eq!(reconciler.refresh(USER).await.unwrap(), SubmissionStatus::Submitted);
    }
}
