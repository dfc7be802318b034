//! Backend configuration resolver
//!
//! Maps a chain id to encryption-backend parameters and owns the single live
//! backend handle. The handle is replaced atomically when the chain changes;
//! callers receive an [`EncryptionContext`] snapshot that keeps the handle it
//! was built from alive, so in-flight builds finish against their original
//! backend.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use super::backend::{BackendFactory, EncryptionBackend};
use crate::error::PipelineError;
use crate::types::{Address, ChainId};

pub const SEPOLIA_CHAIN_ID: ChainId = 11_155_111;
pub const HARDHAT_CHAIN_ID: ChainId = 31_337;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// Remote relayer runs encryption sessions
    Relayer,
    /// In-process coprocessor for local chains
    Mock,
}

/// How chains outside the registry are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Unknown chains are rejected
    #[default]
    Strict,
    /// Unknown chains get a generic profile when an endpoint override exists
    Permissive,
}

impl FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(DeploymentMode::Strict),
            "permissive" => Ok(DeploymentMode::Permissive),
            other => Err(format!("unknown deployment mode: {other}")),
        }
    }
}

/// Connection parameters for one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub name: String,
    pub chain_id: ChainId,
    pub mode: BackendMode,
    pub backend_endpoint: Option<String>,
    pub gateway_url: Option<String>,
    pub acl_address: Option<Address>,
    pub kms_verifier_address: Option<Address>,
    pub rpc_url: Option<String>,
}

fn preset_address(value: &str) -> Option<Address> {
    value.parse().ok()
}

impl NetworkProfile {
    pub fn sepolia() -> Self {
        Self {
            name: "sepolia".into(),
            chain_id: SEPOLIA_CHAIN_ID,
            mode: BackendMode::Relayer,
            backend_endpoint: Some("https://relayer.testnet.zama.cloud".into()),
            gateway_url: Some("https://gateway.sepolia.zama.ai/".into()),
            acl_address: preset_address("0x687820221192C5B662b25367F70076A37bc79b6c"),
            kms_verifier_address: preset_address("0x1364cBBf2cDF5032C47d8226a6f6FBD2AFCDacAC"),
            rpc_url: Some("https://ethereum-sepolia-rpc.publicnode.com".into()),
        }
    }

    pub fn hardhat() -> Self {
        Self {
            name: "hardhat".into(),
            chain_id: HARDHAT_CHAIN_ID,
            mode: BackendMode::Mock,
            backend_endpoint: None,
            gateway_url: None,
            acl_address: None,
            kms_verifier_address: None,
            rpc_url: Some("http://localhost:8545".into()),
        }
    }
}

/// The live backend plus the profile it was built for
pub struct BackendHandle {
    /// Increases by one every time a backend is initialized
    pub generation: u64,
    pub profile: NetworkProfile,
    pub backend: Arc<dyn EncryptionBackend>,
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendHandle")
            .field("generation", &self.generation)
            .field("chain_id", &self.profile.chain_id)
            .field("mode", &self.backend.mode())
            .finish()
    }
}

/// Immutable snapshot handed to the input builder
#[derive(Debug, Clone)]
pub struct EncryptionContext {
    pub chain_id: ChainId,
    pub backend_endpoint: Option<String>,
    pub verifier_address: Option<Address>,
    pub target_contract: Address,
    pub user_address: Address,
    pub handle: Arc<BackendHandle>,
}

pub struct BackendConfigResolver {
    registry: HashMap<ChainId, NetworkProfile>,
    deployment_mode: DeploymentMode,
    endpoint_override: Option<String>,
    factory: Arc<dyn BackendFactory>,
    active: Mutex<Option<Arc<BackendHandle>>>,
    generation: AtomicU64,
}

impl BackendConfigResolver {
    pub fn new(
        deployment_mode: DeploymentMode,
        endpoint_override: Option<String>,
        factory: Arc<dyn BackendFactory>,
    ) -> Self {
        let registry = [NetworkProfile::sepolia(), NetworkProfile::hardhat()]
            .into_iter()
            .map(|profile| (profile.chain_id, profile))
            .collect();

        Self {
            registry,
            deployment_mode,
            endpoint_override,
            factory,
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Register or replace a network profile
    pub fn with_profile(mut self, profile: NetworkProfile) -> Self {
        self.registry.insert(profile.chain_id, profile);
        self
    }

    pub fn supported_chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<ChainId> = self.registry.keys().copied().collect();
        chains.sort_unstable();
        chains
    }

    /// Connection parameters for a chain. Never guesses an endpoint.
    pub fn resolve(&self, chain_id: ChainId) -> Result<NetworkProfile, PipelineError> {
        if let Some(profile) = self.registry.get(&chain_id) {
            let mut profile = profile.clone();
            if let Some(endpoint) = &self.endpoint_override {
                profile.backend_endpoint = Some(endpoint.clone());
            }
            return Ok(profile);
        }

        match (self.deployment_mode, &self.endpoint_override) {
            (DeploymentMode::Permissive, Some(endpoint)) => Ok(NetworkProfile {
                name: format!("chain-{chain_id}"),
                chain_id,
                mode: BackendMode::Relayer,
                backend_endpoint: Some(endpoint.clone()),
                gateway_url: None,
                acl_address: None,
                kms_verifier_address: None,
                rpc_url: None,
            }),
            _ => Err(PipelineError::UnsupportedNetwork { chain_id }),
        }
    }

    /// Return the live backend for `chain_id`, rebuilding it on a chain change.
    ///
    /// The lock is held across initialization, so concurrent callers wait for
    /// the new handle instead of observing the discarded one.
    #[instrument(skip(self))]
    pub async fn get_or_init(&self, chain_id: ChainId) -> Result<Arc<BackendHandle>, PipelineError> {
        let mut active = self.active.lock().await;

        if let Some(handle) = active.as_ref() {
            if handle.profile.chain_id == chain_id {
                return Ok(handle.clone());
            }
        }

        let profile = self.resolve(chain_id)?;

        if let Some(previous) = active.take() {
            info!(
                from_chain = previous.profile.chain_id,
                to_chain = chain_id,
                generation = previous.generation,
                "Chain changed, discarding encryption backend"
            );
        }

        let backend = self.factory.init(&profile).await.map_err(|e| {
            warn!(chain_id, error = %e, "Encryption backend initialization failed");
            PipelineError::BackendUnavailable(e.to_string())
        })?;

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = Arc::new(BackendHandle {
            generation,
            profile,
            backend,
        });
        info!(
            chain_id,
            generation,
            mode = ?handle.backend.mode(),
            "Encryption backend ready"
        );

        *active = Some(handle.clone());
        Ok(handle)
    }

    /// Context for one (user, contract) pair on `chain_id`
    pub async fn context_for(
        &self,
        chain_id: ChainId,
        contract: Address,
        user: Address,
    ) -> Result<EncryptionContext, PipelineError> {
        let handle = self.get_or_init(chain_id).await?;
        Ok(EncryptionContext {
            chain_id,
            backend_endpoint: handle.profile.backend_endpoint.clone(),
            verifier_address: handle.profile.kms_verifier_address,
            target_contract: contract,
            user_address: user,
            handle,
        })
    }

    /// Profile of the live backend, if one has been built
    pub async fn active_profile(&self) -> Option<NetworkProfile> {
        self.active.lock().await.as_ref().map(|h| h.profile.clone())
    }

    pub async fn active_generation(&self) -> Option<u64> {
        self.active.lock().await.as_ref().map(|h| h.generation)
    }
}
