//! Services for the Credit Gateway
//!
//! The encrypted-submission pipeline: reputation analysis, backend
//! resolution, input encryption, submission and status reconciliation.

pub mod attestation;
pub mod backend;
pub mod builder;
pub mod orchestrator;
pub mod reconciler;
pub mod reputation;
pub mod resolver;

pub use attestation::InputVerifierSigner;
pub use backend::{DefaultBackendFactory, EncryptionBackend, MockCoprocessor, RelayerBackend};
pub use builder::EncryptedInputBuilder;
pub use orchestrator::{CancelToken, SubmissionOrchestrator};
pub use reconciler::StatusReconciler;
pub use reputation::ReputationAnalyzer;
pub use resolver::{BackendConfigResolver, DeploymentMode, EncryptionContext, NetworkProfile};
