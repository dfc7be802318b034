//! Encryption backends
//!
//! The homomorphic primitives are opaque to the gateway: a backend takes
//! plaintext 32-bit values bound to (chain, contract, user) and hands back
//! one ciphertext handle per value plus a single input proof covering all of
//! them.
//!
//! `RelayerBackend` sends the plaintext values to the relayer, so the relayer
//! operator is trusted with them; only the chain never sees plaintext.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

use super::attestation::{InputVerifierSigner, ProofBinding};
use super::resolver::{BackendMode, NetworkProfile};
use crate::chain::abi::keccak256;
use crate::types::{decode_hex, Address, ChainId, CiphertextHandle};

/// fhEVM type tag for `euint32`
const EUINT32_TYPE: u8 = 4;
const HANDLE_VERSION: u8 = 0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend initialization failed: {0}")]
    Init(String),
    #[error("encryption session failed: {0}")]
    Session(String),
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

/// One batch of plaintext values to encrypt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionRequest {
    pub chain_id: ChainId,
    pub contract: Address,
    pub user: Address,
    pub values: Vec<u32>,
}

/// Handles in request order and the aggregate proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionOutput {
    pub handles: Vec<CiphertextHandle>,
    pub proof: Vec<u8>,
}

#[async_trait]
pub trait EncryptionBackend: Send + Sync {
    fn mode(&self) -> BackendMode;

    /// Encrypt a whole batch in one session
    async fn encrypt(&self, request: &EncryptionRequest) -> Result<EncryptionOutput, BackendError>;
}

/// Builds a ready backend for a network profile (loads key parameters)
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn init(&self, profile: &NetworkProfile) -> Result<Arc<dyn EncryptionBackend>, BackendError>;
}

// ==================== Mock Coprocessor ====================

/// Local coprocessor for dev chains
///
/// Handles follow the fhEVM layout: 21 hash bytes, the value index, the
/// chain id (big endian), the type tag and the version byte. Ciphertexts are
/// derived from a per-instance nonce, so a fresh instance never reproduces
/// handles of a previous one.
pub struct MockCoprocessor {
    signer: Arc<InputVerifierSigner>,
    nonce: [u8; 32],
    sessions: AtomicU64,
}

impl MockCoprocessor {
    pub fn new(signer: Arc<InputVerifierSigner>) -> Self {
        Self::with_nonce(signer, rand::random())
    }

    pub fn with_nonce(signer: Arc<InputVerifierSigner>, nonce: [u8; 32]) -> Self {
        Self {
            signer,
            nonce,
            sessions: AtomicU64::new(0),
        }
    }

    /// Number of encryption sessions served
    pub fn sessions(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }

    fn handle(&self, session: u64, request: &EncryptionRequest, index: u8, value: u32) -> CiphertextHandle {
        let mut preimage = Vec::with_capacity(32 + 8 + 8 + 20 + 20 + 1 + 4);
        preimage.extend_from_slice(&self.nonce);
        preimage.extend_from_slice(&session.to_be_bytes());
        preimage.extend_from_slice(&request.chain_id.to_be_bytes());
        preimage.extend_from_slice(request.contract.as_bytes());
        preimage.extend_from_slice(request.user.as_bytes());
        preimage.push(index);
        preimage.extend_from_slice(&value.to_be_bytes());
        let digest = keccak256(&preimage);

        let mut handle = [0u8; 32];
        handle[..21].copy_from_slice(&digest[..21]);
        handle[21] = index;
        handle[22..30].copy_from_slice(&request.chain_id.to_be_bytes());
        handle[30] = EUINT32_TYPE;
        handle[31] = HANDLE_VERSION;
        CiphertextHandle(handle)
    }
}

#[async_trait]
impl EncryptionBackend for MockCoprocessor {
    fn mode(&self) -> BackendMode {
        BackendMode::Mock
    }

    async fn encrypt(&self, request: &EncryptionRequest) -> Result<EncryptionOutput, BackendError> {
        if request.values.len() > usize::from(u8::MAX) {
            return Err(BackendError::Session(format!(
                "batch of {} values exceeds the handle index range",
                request.values.len()
            )));
        }

        let session = self.sessions.fetch_add(1, Ordering::Relaxed);
        let handles: Vec<CiphertextHandle> = request
            .values
            .iter()
            .enumerate()
            .map(|(index, value)| self.handle(session, request, index as u8, *value))
            .collect();

        let binding = ProofBinding {
            chain_id: request.chain_id,
            contract: request.contract,
            user: request.user,
        };
        let proof = self.signer.sign(&binding, &handles).encode();

        debug!(session, handles = handles.len(), "Mock encryption session");
        Ok(EncryptionOutput { handles, proof })
    }
}

// ==================== Relayer ====================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyUrlResponse {
    #[serde(default)]
    public_key_id: Option<String>,
    #[serde(default)]
    crs_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InputProofRequest<'a> {
    contract_chain_id: ChainId,
    contract_address: Address,
    user_address: Address,
    public_key_id: &'a str,
    bits: u8,
    values: &'a [u32],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputProofResponse {
    handles: Vec<String>,
    input_proof: String,
}

/// HTTP relayer that runs encryption sessions on behalf of the gateway.
///
/// Values leave the gateway unencrypted over the relayer connection.
pub struct RelayerBackend {
    http: reqwest::Client,
    endpoint: String,
    public_key_id: String,
}

impl RelayerBackend {
    /// Fetch key parameters from `{endpoint}/v1/keyurl`
    #[instrument(skip(http))]
    pub async fn connect(http: reqwest::Client, endpoint: &str) -> Result<Self, BackendError> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let response = http
            .get(format!("{endpoint}/v1/keyurl"))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BackendError::Init(e.to_string()))?;

        let keys: KeyUrlResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Malformed(format!("keyurl: {e}")))?;
        let public_key_id = keys
            .public_key_id
            .ok_or_else(|| BackendError::Malformed("keyurl response has no publicKeyId".into()))?;

        info!(%endpoint, %public_key_id, crs_id = ?keys.crs_id, "Relayer key parameters loaded");

        Ok(Self {
            http,
            endpoint,
            public_key_id,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EncryptionBackend for RelayerBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Relayer
    }

    #[instrument(skip(self, request), fields(endpoint = %self.endpoint, values = request.values.len()))]
    async fn encrypt(&self, request: &EncryptionRequest) -> Result<EncryptionOutput, BackendError> {
        let body = InputProofRequest {
            contract_chain_id: request.chain_id,
            contract_address: request.contract,
            user_address: request.user,
            public_key_id: &self.public_key_id,
            bits: 32,
            values: &request.values,
        };

        let response = self
            .http
            .post(format!("{}/v1/input-proof", self.endpoint))
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BackendError::Session(e.to_string()))?;

        let output: InputProofResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Malformed(format!("input-proof: {e}")))?;

        let handles = output
            .handles
            .iter()
            .map(|h| h.parse::<CiphertextHandle>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BackendError::Malformed(format!("handle: {e}")))?;
        let proof = decode_hex(&output.input_proof)
            .map_err(|e| BackendError::Malformed(format!("input proof: {e}")))?;

        Ok(EncryptionOutput { handles, proof })
    }
}

// ==================== Factory ====================

/// Picks the backend matching a profile's mode
pub struct DefaultBackendFactory {
    http: reqwest::Client,
    signer: Arc<InputVerifierSigner>,
    /// Serve every chain from the mock coprocessor (dev mode)
    force_mock: bool,
    initializations: AtomicU64,
}

impl DefaultBackendFactory {
    pub fn new(http: reqwest::Client, signer: Arc<InputVerifierSigner>, force_mock: bool) -> Self {
        Self {
            http,
            signer,
            force_mock,
            initializations: AtomicU64::new(0),
        }
    }

    /// Number of backends built so far
    pub fn initializations(&self) -> u64 {
        self.initializations.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BackendFactory for DefaultBackendFactory {
    async fn init(&self, profile: &NetworkProfile) -> Result<Arc<dyn EncryptionBackend>, BackendError> {
        self.initializations.fetch_add(1, Ordering::Relaxed);

        if self.force_mock || profile.mode == BackendMode::Mock {
            return Ok(Arc::new(MockCoprocessor::new(self.signer.clone())));
        }

        let endpoint = profile.backend_endpoint.as_deref().ok_or_else(|| {
            BackendError::Init(format!("no relayer endpoint for chain {}", profile.chain_id))
        })?;
        let relayer = RelayerBackend::connect(self.http.clone(), endpoint).await?;
        Ok(Arc::new(relayer))
    }
}
