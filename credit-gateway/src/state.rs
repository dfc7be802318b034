//! Application State
//!
//! Shared state for the gateway, accessible from all route handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::chain::{ChainDataProvider, CreditContract};
use crate::services::{
    BackendConfigResolver, ReputationAnalyzer, StatusReconciler, SubmissionOrchestrator,
};
use crate::types::Address;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    provider: Arc<dyn ChainDataProvider>,
    contract: Address,
    analyzer: ReputationAnalyzer,
    resolver: Arc<BackendConfigResolver>,
    orchestrator: SubmissionOrchestrator,
    reconciler: StatusReconciler,
    dev_mode: bool,
    /// Confirmed submissions
    total_submissions: AtomicU64,
    /// Confirmed submissions that used the demo fallback scores
    degraded_submissions: AtomicU64,
    /// Confirmed evaluations
    total_evaluations: AtomicU64,
    /// Server start time
    start_time: Instant,
}

impl AppState {
    /// Wire the pipeline around one chain provider and one contract
    pub fn new(
        provider: Arc<dyn ChainDataProvider>,
        contract: Arc<dyn CreditContract>,
        resolver: Arc<BackendConfigResolver>,
        dev_mode: bool,
    ) -> Self {
        let analyzer = ReputationAnalyzer::new(provider.clone());
        let orchestrator = SubmissionOrchestrator::new(
            analyzer.clone(),
            resolver.clone(),
            provider.clone(),
            contract.clone(),
        );

        Self {
            inner: Arc::new(AppStateInner {
                provider,
                contract: contract.address(),
                analyzer,
                resolver,
                orchestrator,
                reconciler: StatusReconciler::new(contract),
                dev_mode,
                total_submissions: AtomicU64::new(0),
                degraded_submissions: AtomicU64::new(0),
                total_evaluations: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn provider(&self) -> &dyn ChainDataProvider {
        self.inner.provider.as_ref()
    }

    pub fn contract_address(&self) -> Address {
        self.inner.contract
    }

    pub fn analyzer(&self) -> &ReputationAnalyzer {
        &self.inner.analyzer
    }

    pub fn resolver(&self) -> &BackendConfigResolver {
        &self.inner.resolver
    }

    pub fn orchestrator(&self) -> &SubmissionOrchestrator {
        &self.inner.orchestrator
    }

    pub fn reconciler(&self) -> &StatusReconciler {
        &self.inner.reconciler
    }

    pub fn dev_mode(&self) -> bool {
        self.inner.dev_mode
    }

    pub fn record_submission(&self, degraded: bool) {
        self.inner.total_submissions.fetch_add(1, Ordering::Relaxed);
        if degraded {
            self.inner.degraded_submissions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_evaluation(&self) {
        self.inner.total_evaluations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_submissions(&self) -> u64 {
        self.inner.total_submissions.load(Ordering::Relaxed)
    }

    pub fn degraded_submissions(&self) -> u64 {
        self.inner.degraded_submissions.load(Ordering::Relaxed)
    }

    pub fn total_evaluations(&self) -> u64 {
        self.inner.total_evaluations.load(Ordering::Relaxed)
    }

    /// Get server uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }
}
