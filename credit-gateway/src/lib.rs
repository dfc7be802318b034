// Library entry point for credit-gateway
// Exposes the pipeline components for testing and external use

pub mod chain;
pub mod config;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
pub mod types;

// Re-export commonly used items
pub use error::{PipelineError, Stage, StageError};
pub use services::{
    BackendConfigResolver, EncryptedInputBuilder, ReputationAnalyzer, StatusReconciler,
    SubmissionOrchestrator,
};
