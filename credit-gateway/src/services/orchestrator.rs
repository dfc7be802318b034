//! Submission orchestrator
//!
//! Runs one credit-data submission through its stages:
//!
//! ```text
//! CollectingReputation -> AssemblingInputs -> BuildingPayload
//!     -> WritingToContract -> AwaitingConfirmation
//! ```
//!
//! Everything before the write is side-effect free. Once a transaction is
//! broadcast it is never retried or cancelled; its confirmation is awaited.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::builder::EncryptedInputBuilder;
use super::reputation::ReputationAnalyzer;
use super::resolver::BackendConfigResolver;
use crate::chain::{classify, ChainDataProvider, ChainError, CreditContract};
use crate::error::{PipelineError, Stage, StageError};
use crate::types::{Address, CreditInputVector, FormInputs, SubmissionReceipt};

/// Cooperative cancellation flag, checked between stages
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self, stage: Stage) -> Result<(), StageError> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled.at(stage));
        }
        Ok(())
    }
}

type InFlight = Mutex<HashMap<Address, CancelToken>>;

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashMap<Address, CancelToken>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases the per-account in-flight slot on drop
struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
    account: Address,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(&self.account);
    }
}

pub struct SubmissionOrchestrator {
    analyzer: ReputationAnalyzer,
    resolver: Arc<BackendConfigResolver>,
    builder: EncryptedInputBuilder,
    provider: Arc<dyn ChainDataProvider>,
    contract: Arc<dyn CreditContract>,
    in_flight: InFlight,
}

impl SubmissionOrchestrator {
    pub fn new(
        analyzer: ReputationAnalyzer,
        resolver: Arc<BackendConfigResolver>,
        provider: Arc<dyn ChainDataProvider>,
        contract: Arc<dyn CreditContract>,
    ) -> Self {
        Self {
            analyzer,
            resolver,
            builder: EncryptedInputBuilder::new(),
            provider,
            contract,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Number of submissions currently running
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Request cancellation of the account's running submission.
    /// Returns false when nothing is running.
    pub fn cancel(&self, account: Address) -> bool {
        match lock(&self.in_flight).get(&account) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn begin(&self, account: Address, token: &CancelToken) -> Result<InFlightGuard<'_>, StageError> {
        let mut in_flight = lock(&self.in_flight);
        if in_flight.contains_key(&account) {
            return Err(PipelineError::AlreadyInProgress(account).at(Stage::CollectingReputation));
        }
        in_flight.insert(account, token.clone());
        Ok(InFlightGuard {
            in_flight: &self.in_flight,
            account,
        })
    }

    pub async fn submit(
        &self,
        form: &FormInputs,
        account: Address,
    ) -> Result<SubmissionReceipt, StageError> {
        self.submit_with_cancel(form, account, CancelToken::new()).await
    }

    #[instrument(skip(self, form, cancel))]
    pub async fn submit_with_cancel(
        &self,
        form: &FormInputs,
        account: Address,
        cancel: CancelToken,
    ) -> Result<SubmissionReceipt, StageError> {
        let _guard = self.begin(account, &cancel)?;

        cancel.check(Stage::CollectingReputation)?;
        let assessment = self.analyzer.assess(account).await;
        let scores = assessment.scores();

        cancel.check(Stage::AssemblingInputs)?;
        let vector = CreditInputVector::assemble(form, scores)
            .map_err(|e| e.at(Stage::AssemblingInputs))?;

        cancel.check(Stage::BuildingPayload)?;
        let chain_id = self
            .provider
            .chain_id()
            .await
            .map_err(|e| classify(&e).at(Stage::BuildingPayload))?;
        let contract = self.contract.address();
        let context = self
            .resolver
            .context_for(chain_id, contract, account)
            .await
            .map_err(|e| e.at(Stage::BuildingPayload))?;
        let payload = self
            .builder
            .build_vector(&vector, account, contract, &context)
            .await
            .map_err(|e| e.at(Stage::BuildingPayload))?;

        // Last point where cancellation is honoured
        cancel.check(Stage::WritingToContract)?;
        let transaction_hash = self
            .contract
            .submit_credit_data(account, &payload.handles, &payload.proof)
            .await
            .map_err(|e| {
                warn!(%account, error = %e, "submitCreditData failed");
                classify(&e).at(Stage::WritingToContract)
            })?;
        info!(%account, %transaction_hash, "Credit data broadcast");

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

        let degraded = assessment.degraded_reason().map(String::from);
        info!(
            %account,
            %transaction_hash,
            block = receipt.block_number,
            degraded = degraded.is_some(),
            "Credit data confirmed"
        );

        Ok(SubmissionReceipt {
            submission_id: Uuid::new_v4().to_string(),
            account,
            chain_id,
            contract,
            transaction_hash,
            block_number: receipt.block_number,
            scores,
            degraded,
            submitted_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::DevChain;
    use crate::error::RejectionCategory;
    use crate::services::attestation::InputVerifierSigner;
    use crate::services::backend::DefaultBackendFactory;
    use crate::services::resolver::DeploymentMode;
    use crate::types::{ReputationScores, WEI_PER_ETH};
    use num_bigint::BigUint;

    const USER: Address = Address([0xaa; 20]);
    const CONTRACT: Address = Address([0xcc; 20]);

    fn form() -> FormInputs {
        FormInputs {
            income: Some(75),
            repayment_rate: Some(95),
            loan_history: Some(80),
        }
    }

    fn setup() -> (Arc<DevChain>, SubmissionOrchestrator) {
        let signer = Arc::new(InputVerifierSigner::new(&[7u8; 32]));
        let chain = Arc::new(DevChain::new(31337, CONTRACT).with_input_verifier(signer.public_key()));
        chain.fund(USER, 50, BigUint::from(WEI_PER_ETH));

        let factory = Arc::new(DefaultBackendFactory::new(reqwest::Client::new(), signer, true));
        let resolver = Arc::new(BackendConfigResolver::new(DeploymentMode::Strict, None, factory));
        let orchestrator = SubmissionOrchestrator::new(
            ReputationAnalyzer::new(chain.clone()),
            resolver,
            chain.clone(),
            chain.clone(),
        );
        (chain, orchestrator)
    }

    #[tokio::test]
    async fn test_submit_confirms() {
        let (chain, orchestrator) = setup();

        let receipt = orchestrator.submit(&form(), USER).await.unwrap();
        assert_eq!(receipt.chain_id, 31337);
        assert_eq!(receipt.contract, CONTRACT);
        assert!(receipt.degraded.is_none());
        assert_eq!(receipt.scores.balance_score, 10);
        assert_eq!(chain.transactions_sent(), 1);
        assert!(chain.stored_handles(USER).is_some());
        assert_eq!(orchestrator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_degraded_submission_uses_fallback() {
        let (chain, orchestrator) = setup();
        chain.set_history_unavailable(true);

        let receipt = orchestrator.submit(&form(), USER).await.unwrap();
        assert_eq!(receipt.scores, ReputationScores::DEMO_FALLBACK);
        assert!(receipt.degraded.is_some());
    }

    #[tokio::test]
    async fn test_incomplete_form_sends_nothing() {
        let (chain, orchestrator) = setup();
        let form = FormInputs {
            loan_history: None,
            ..form()
        };

        let err = orchestrator.submit(&form, USER).await.unwrap_err();
        assert_eq!(err.stage, Stage::AssemblingInputs);
        assert!(err.is_side_effect_free());
        assert_eq!(chain.transactions_sent(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_submission_never_broadcasts() {
        let (chain, orchestrator) = setup();
        let token = CancelToken::new();
        token.cancel();

        let err = orchestrator
            .submit_with_cancel(&form(), USER, token)
            .await
            .unwrap_err();
        assert_eq!(err.error, PipelineError::Cancelled);
        assert_eq!(chain.transactions_sent(), 0);
        assert!(!orchestrator.cancel(USER));
    }

    #[tokio::test]
    async fn test_unsupported_chain_is_staged() {
        let (chain, orchestrator) = setup();
        chain.set_chain_id(1);

        let err = orchestrator.submit(&form(), USER).await.unwrap_err();
        assert_eq!(err.stage, Stage::BuildingPayload);
        assert_eq!(err.error, PipelineError::UnsupportedNetwork { chain_id: 1 });
        assert_eq!(chain.transactions_sent(), 0);
    }

    #[tokio::test]
    async fn test_wallet_refusal_is_classified() {
        let (chain, orchestrator) = setup();
        chain.fail_next_write(ChainError::Rpc {
            code: 4001,
            message: "User denied transaction signature".into(),
            data: None,
        });

        let err = orchestrator.submit(&form(), USER).await.unwrap_err();
        assert_eq!(err.stage, Stage::WritingToContract);
        assert!(matches!(
            err.error,
            PipelineError::ContractRejected {
                category: RejectionCategory::RejectedByUser,
                ..
            }
        ));
        assert!(err.is_side_effect_free());
    }

    #[tokio::test]
    async fn test_second_submission_for_same_account_is_rejected() {
        let (_chain, orchestrator) = setup();
        let token = CancelToken::new();
        let _guard = orchestrator.begin(USER, &token).unwrap();

        let err = orchestrator.submit(&form(), USER).await.unwrap_err();
        assert_eq!(err.error, PipelineError::AlreadyInProgress(USER));
        assert!(orchestrator.cancel(USER));
        assert!(token.is_cancelled());
    }
}
