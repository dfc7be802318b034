//! On-chain reputation analysis
//!
//! Derives three 0-100 scores from public wallet history. The analyzer never
//! invents values: a failed read is `DataUnavailable`, and only
//! [`ReputationAnalyzer::assess`] substitutes the flagged demo fallback.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::chain::ChainDataProvider;
use crate::error::PipelineError;
use crate::types::{
    format_ether, Address, RawWalletObservables, ReputationScores, ScoreAssessment, WalletMetrics,
    WEI_PER_ETH,
};

/// Transaction count at which the activity score saturates
pub const TX_COUNT_CAP: u64 = 1000;
/// Balance (ETH) at which the balance score saturates
pub const BALANCE_CAP_ETH: u64 = 10;
/// Age (days) at which the age score saturates
pub const AGE_CAP_DAYS: u32 = 365;

/// Logarithmic activity score: `floor(100 * ln(count + 1) / ln(1001))`
pub fn normalize_tx_count(count: u64) -> u32 {
    if count == 0 {
        return 0;
    }
    if count >= TX_COUNT_CAP {
        return 100;
    }
    let ratio = ((count + 1) as f64).ln() / ((TX_COUNT_CAP + 1) as f64).ln();
    ((100.0 * ratio).floor() as u32).min(100)
}

/// Linear balance score over [0, 10] ETH, in exact wei arithmetic
pub fn normalize_balance_wei(balance_wei: &BigUint) -> u32 {
    if balance_wei.is_zero() {
        return 0;
    }
    let cap = BigUint::from(WEI_PER_ETH) * BALANCE_CAP_ETH;
    if balance_wei >= &cap {
        return 100;
    }
    (balance_wei * 100u32 / cap).to_u32().unwrap_or(100).min(100)
}

/// Approximate wallet age in days.
///
/// Assumes one transaction per day. This is a heuristic carried over from
/// the scoring model; it does not look at the first transaction's timestamp.
pub fn estimate_age_days(transaction_count: u64) -> u32 {
    transaction_count.min(u64::from(AGE_CAP_DAYS)) as u32
}

/// Linear age score over [0, 365] days
pub fn normalize_age(days: u32) -> u32 {
    if days >= AGE_CAP_DAYS {
        return 100;
    }
    days * 100 / AGE_CAP_DAYS
}

/// Scores for a set of observables
pub fn score(observables: &RawWalletObservables) -> ReputationScores {
    ReputationScores {
        transaction_count_score: normalize_tx_count(observables.transaction_count),
        balance_score: normalize_balance_wei(&observables.balance_wei),
        age_score: normalize_age(estimate_age_days(observables.transaction_count)),
    }
}

#[derive(Clone)]
pub struct ReputationAnalyzer {
    provider: Arc<dyn ChainDataProvider>,
}

impl ReputationAnalyzer {
    pub fn new(provider: Arc<dyn ChainDataProvider>) -> Self {
        Self { provider }
    }

    /// Read the wallet's history and score it
    #[instrument(skip(self))]
    pub async fn analyze(&self, address: Address) -> Result<WalletMetrics, PipelineError> {
        let (transaction_count, balance_wei, current_block_height) = tokio::try_join!(
            self.provider.transaction_count(address),
            self.provider.balance(address),
            self.provider.block_number(),
        )
        .map_err(|e| PipelineError::DataUnavailable(e.to_string()))?;

        let observables = RawWalletObservables {
            transaction_count,
            balance_wei,
            current_block_height,
        };
        let scores = score(&observables);
        let metrics = WalletMetrics {
            address,
            balance_eth: format_ether(&observables.balance_wei),
            estimated_age_days: estimate_age_days(observables.transaction_count),
            observables,
            scores,
            onchain_score: scores.combined(),
        };

        info!(
            %address,
            transaction_count = metrics.observables.transaction_count,
            balance_eth = %metrics.balance_eth,
            block = metrics.observables.current_block_height,
            tx_score = scores.transaction_count_score,
            balance_score = scores.balance_score,
            age_score = scores.age_score,
            onchain_score = metrics.onchain_score,
            "Wallet analyzed"
        );

        Ok(metrics)
    }

    /// Like [`analyze`](Self::analyze), but falls back to the demo scores
    pub async fn assess(&self, address: Address) -> ScoreAssessment {
        match self.analyze(address).await {
            Ok(metrics) => ScoreAssessment::Measured { metrics },
            Err(e) => {
                warn!(%address, error = %e, "Reputation unavailable, using demo fallback scores");
                ScoreAssessment::Degraded {
                    scores: ReputationScores::DEMO_FALLBACK,
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::DevChain;

    fn eth(tenths: u64) -> BigUint {
        BigUint::from(WEI_PER_ETH / 10) * tenths
    }

    #[test]
    fn test_tx_count_bounds() {
        assert_eq!(normalize_tx_count(0), 0);
        assert_eq!(normalize_tx_count(1000), 100);
        assert_eq!(normalize_tx_count(2000), 100);
        assert_eq!(normalize_tx_count(u64::MAX), 100);
        // floor(100 * ln 51 / ln 1001)
        assert_eq!(normalize_tx_count(50), 56);
    }

    #[test]
    fn test_tx_count_monotonic() {
        let mut previous = 0;
        for count in 0..=1200 {
            let score = normalize_tx_count(count);
            assert!(score <= 100);
            assert!(score >= previous, "score dropped at {count}");
            previous = score;
        }
    }

    #[test]
    fn test_balance_is_linear_below_cap() {
        assert_eq!(normalize_balance_wei(&BigUint::zero()), 0);
        assert_eq!(normalize_balance_wei(&eth(1)), 1);
        assert_eq!(normalize_balance_wei(&eth(50)), 50);
        assert_eq!(normalize_balance_wei(&eth(99)), 99);
        assert_eq!(normalize_balance_wei(&eth(100)), 100);
        assert_eq!(normalize_balance_wei(&(eth(100) * 1_000_000u32)), 100);
        // 0.0999.. ETH floors to 0
        assert_eq!(normalize_balance_wei(&(eth(1) - 1u32)), 0);
    }

    #[test]
    fn test_age_heuristic() {
        assert_eq!(estimate_age_days(90), 90);
        assert_eq!(estimate_age_days(5000), 365);
        assert_eq!(normalize_age(0), 0);
        assert_eq!(normalize_age(90), 24);
        assert_eq!(normalize_age(365), 100);
    }

    #[tokio::test]
    async fn test_analyze_reads_chain() {
        let chain = Arc::new(DevChain::new(31337, Address::ZERO));
        let wallet = Address([0x11; 20]);
        chain.fund(wallet, 1000, eth(25));

        let metrics = ReputationAnalyzer::new(chain).analyze(wallet).await.unwrap();
        assert_eq!(metrics.balance_eth, "2.5");
        assert_eq!(metrics.estimated_age_days, 365);
        assert_eq!(
            metrics.scores,
            ReputationScores {
                transaction_count_score: 100,
                balance_score: 25,
                age_score: 100,
            }
        );
        assert_eq!(metrics.onchain_score, 75);
    }

    #[tokio::test]
    async fn test_failed_read_is_data_unavailable() {
        let chain = Arc::new(DevChain::new(31337, Address::ZERO));
        chain.set_history_unavailable(true);
        let analyzer = ReputationAnalyzer::new(chain);

        assert!(matches!(
            analyzer.analyze(Address([0x11; 20])).await,
            Err(PipelineError::DataUnavailable(_))
        ));

        let assessment = analyzer.assess(Address([0x11; 20])).await;
        assert_eq!(assessment.scores(), ReputationScores::DEMO_FALLBACK);
        assert!(assessment.degraded_reason().is_some());
    }
}
