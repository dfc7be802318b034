//! Encrypted input builder
//!
//! Turns the six plaintext values into ciphertext handles plus one proof
//! bound to a (user, contract) pair. Validation happens before the backend
//! is touched, and the builder never retries.

use tracing::{debug, instrument};

use super::backend::EncryptionRequest;
use super::resolver::EncryptionContext;
use crate::error::PipelineError;
use crate::types::{Address, CiphertextHandle, CreditInputVector, EncryptedPayload};

#[derive(Debug, Clone, Copy, Default)]
pub struct EncryptedInputBuilder;

impl EncryptedInputBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Validate raw values and encrypt them
    pub async fn build(
        &self,
        values: &[i64],
        user: Address,
        contract: Address,
        context: &EncryptionContext,
    ) -> Result<EncryptedPayload, PipelineError> {
        let vector = CreditInputVector::from_values(values)?;
        self.build_vector(&vector, user, contract, context).await
    }

    #[instrument(skip(self, vector, context), fields(chain_id = context.chain_id, generation = context.handle.generation))]
    pub async fn build_vector(
        &self,
        vector: &CreditInputVector,
        user: Address,
        contract: Address,
        context: &EncryptionContext,
    ) -> Result<EncryptedPayload, PipelineError> {
        if context.user_address != user || context.target_contract != contract {
            return Err(PipelineError::InvalidInput(format!(
                "encryption context is bound to user {} and contract {}, not {user} and {contract}",
                context.user_address, context.target_contract
            )));
        }

        let request = EncryptionRequest {
            chain_id: context.chain_id,
            contract,
            user,
            values: vector.values().to_vec(),
        };

        let output = context
            .handle
            .backend
            .encrypt(&request)
            .await
            .map_err(|e| PipelineError::BackendUnavailable(e.to_string()))?;

        if output.handles.len() != CreditInputVector::LEN {
            return Err(PipelineError::EncryptionIncomplete(format!(
                "expected {} handles, got {}",
                CreditInputVector::LEN,
                output.handles.len()
            )));
        }
        if output.proof.is_empty() {
            return Err(PipelineError::EncryptionIncomplete("empty input proof".into()));
        }

        let handles: [CiphertextHandle; CreditInputVector::LEN] =
            output.handles.try_into().map_err(|handles: Vec<CiphertextHandle>| {
                PipelineError::EncryptionIncomplete(format!("got {} handles", handles.len()))
            })?;

        debug!(proof_len = output.proof.len(), "Encrypted payload built");
        Ok(EncryptedPayload {
            handles,
            proof: output.proof,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::backend::{BackendError, EncryptionBackend, EncryptionOutput};
    use crate::services::resolver::{BackendHandle, BackendMode, NetworkProfile};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const USER: Address = Address([0xaa; 20]);
    const CONTRACT: Address = Address([0xcc; 20]);

    /// Returns `produce` handles per session and counts calls
    struct ScriptedBackend {
        produce: usize,
        proof: Vec<u8>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EncryptionBackend for ScriptedBackend {
        fn mode(&self) -> BackendMode {
            BackendMode::Mock
        }

        async fn encrypt(&self, request: &EncryptionRequest) -> Result<EncryptionOutput, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(EncryptionOutput {
                handles: (0..self.produce)
                    .map(|i| CiphertextHandle([request.values[i] as u8; 32]))
                    .collect(),
                proof: self.proof.clone(),
            })
        }
    }

    fn context(backend: Arc<ScriptedBackend>) -> EncryptionContext {
        EncryptionContext {
            chain_id: 31337,
            backend_endpoint: None,
            verifier_address: None,
            target_contract: CONTRACT,
            user_address: USER,
            handle: Arc::new(BackendHandle {
                generation: 1,
                profile: NetworkProfile::hardhat(),
                backend,
            }),
        }
    }

    fn scripted(produce: usize, proof: &[u8]) -> Arc<ScriptedBackend> {
        Arc::new(ScriptedBackend {
            produce,
            proof: proof.to_vec(),
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_six_values_give_six_handles_and_one_proof() {
        let backend = scripted(6, b"proof");
        let payload = EncryptedInputBuilder::new()
            .build(&[75, 95, 80, 35, 10, 25], USER, CONTRACT, &context(backend.clone()))
            .await
            .unwrap();

        assert_eq!(payload.handles[0], CiphertextHandle([75; 32]));
        assert_eq!(payload.handles[5], CiphertextHandle([25; 32]));
        assert_eq!(payload.proof, b"proof");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_values_never_reach_backend() {
        let backend = scripted(6, b"proof");
        let builder = EncryptedInputBuilder::new();
        let ctx = context(backend.clone());

        for values in [vec![1, 2, 3, 4, 5], vec![1, 2, 3, 4, 5, -6], vec![1, 2, 3, 4, 5, 1 << 40]] {
            assert!(matches!(
                builder.build(&values, USER, CONTRACT, &ctx).await,
                Err(PipelineError::InvalidInput(_))
            ));
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_context_bound_to_other_pair_is_rejected() {
        let backend = scripted(6, b"proof");
        let ctx = context(backend.clone());

        let result = EncryptedInputBuilder::new()
            .build(&[1, 2, 3, 4, 5, 6], Address([0xbb; 20]), CONTRACT, &ctx)
            .await;
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_short_or_unproven_output_is_incomplete() {
        let short = EncryptedInputBuilder::new()
            .build(&[1, 2, 3, 4, 5, 6], USER, CONTRACT, &context(scripted(5, b"proof")))
            .await;
        assert_eq!(
            short,
            Err(PipelineError::EncryptionIncomplete("expected 6 handles, got 5".into()))
        );

        let unproven = EncryptedInputBuilder::new()
            .build(&[1, 2, 3, 4, 5, 6], USER, CONTRACT, &context(scripted(6, b"")))
            .await;
        assert!(matches!(unproven, Err(PipelineError::EncryptionIncomplete(_))));
    }
}
