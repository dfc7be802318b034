//! Type definitions for the credit gateway
//!
//! Chain primitives, reputation and payload types, request/response types
//! and error codes.

use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::PipelineError;

pub type ChainId = u64;

/// Wei per native unit (ETH)
pub const WEI_PER_ETH: u64 = 1_000_000_000_000_000_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseHexError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

/// Decode a hex string with or without a `0x` prefix
pub fn decode_hex(value: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits)
}

/// Encode bytes as `0x`-prefixed lowercase hex
pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

macro_rules! hex_newtype {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = ParseHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = decode_hex(s)?;
                let actual = bytes.len();
                let array: [u8; $len] = bytes.try_into().map_err(|_| ParseHexError::WrongLength {
                    expected: $len,
                    actual,
                })?;
                Ok(Self(array))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_newtype!(
    /// 20-byte account or contract address
    Address,
    20
);

hex_newtype!(
    /// 32-byte transaction hash
    TxHash,
    32
);

hex_newtype!(
    /// Opaque 32-byte reference to an encrypted value usable on-chain
    CiphertextHandle,
    32
);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);
}

/// Hex (de)serialization for variable-length byte blobs
pub(crate) mod hex_blob {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_hex(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::decode_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Decimal string (de)serialization for wei amounts
mod decimal {
    use num_bigint::BigUint;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(deserializer)?;
        BigUint::parse_bytes(s.as_bytes(), 10)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid decimal amount: {s}")))
    }
}

/// Format a wei amount as a decimal ETH string with 18 fractional digits trimmed
pub fn format_ether(wei: &BigUint) -> String {
    let unit = BigUint::from(WEI_PER_ETH);
    let whole = wei / &unit;
    let fraction = wei % &unit;
    let fraction = format!("{:0>18}", fraction.to_str_radix(10));
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        format!("{whole}.0")
    } else {
        format!("{whole}.{fraction}")
    }
}

// ==================== Reputation Types ====================

/// Raw observables read from the chain at analysis time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawWalletObservables {
    pub transaction_count: u64,
    #[serde(with = "decimal")]
    pub balance_wei: BigUint,
    pub current_block_height: u64,
}

/// Normalized reputation scores, each in [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationScores {
    pub transaction_count_score: u32,
    pub balance_score: u32,
    pub age_score: u32,
}

impl ReputationScores {
    /// Demo values substituted when chain history cannot be read
    /// (50 transactions, 0.1 ETH, ~90 days).
    pub const DEMO_FALLBACK: ReputationScores = ReputationScores {
        transaction_count_score: 35,
        balance_score: 10,
        age_score: 25,
    };

    /// Rounded mean of the three scores
    pub fn combined(&self) -> u32 {
        let sum = self.transaction_count_score + self.balance_score + self.age_score;
        (sum + 1) / 3
    }
}

/// Full wallet analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletMetrics {
    pub address: Address,
    pub observables: RawWalletObservables,
    /// Balance in ETH, for display
    pub balance_eth: String,
    /// Approximate wallet age; derived from transaction volume, not elapsed time
    pub estimated_age_days: u32,
    pub scores: ReputationScores,
    /// Rounded mean of the three scores
    pub onchain_score: u32,
}

/// Reputation outcome as seen by the submission pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoreAssessment {
    Measured {
        metrics: WalletMetrics,
    },
    /// Chain reads failed and the demo fallback scores were applied
    Degraded {
        scores: ReputationScores,
        reason: String,
    },
}

impl ScoreAssessment {
    pub fn scores(&self) -> ReputationScores {
        match self {
            ScoreAssessment::Measured { metrics } => metrics.scores,
            ScoreAssessment::Degraded { scores, .. } => *scores,
        }
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        match self {
            ScoreAssessment::Measured { .. } => None,
            ScoreAssessment::Degraded { reason, .. } => Some(reason),
        }
    }
}

// ==================== Credit Input Types ====================

/// Self-reported form values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormInputs {
    pub income: Option<i64>,
    pub repayment_rate: Option<i64>,
    pub loan_history: Option<i64>,
}

/// The six plaintext values in the order the contract expects them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditInputVector([u32; CreditInputVector::LEN]);

impl CreditInputVector {
    pub const LEN: usize = 6;

    pub const FIELDS: [&'static str; CreditInputVector::LEN] = [
        "income",
        "repayment_rate",
        "loan_history",
        "transaction_count_score",
        "balance_score",
        "age_score",
    ];

    /// Validate raw values: exactly six, each in [0, 2^32 - 1]
    pub fn from_values(values: &[i64]) -> Result<Self, PipelineError> {
        if values.len() != Self::LEN {
            return Err(PipelineError::InvalidInput(format!(
                "expected {} values, got {}",
                Self::LEN,
                values.len()
            )));
        }

        let mut out = [0u32; Self::LEN];
        for (index, (&value, slot)) in values.iter().zip(out.iter_mut()).enumerate() {
            *slot = u32::try_from(value).map_err(|_| {
                PipelineError::InvalidInput(format!(
                    "{} = {value} does not fit in an unsigned 32-bit integer",
                    Self::FIELDS[index]
                ))
            })?;
        }
        Ok(Self(out))
    }

    /// Combine form inputs with reputation scores
    pub fn assemble(form: &FormInputs, scores: ReputationScores) -> Result<Self, PipelineError> {
        let missing: Vec<&'static str> = [
            ("income", form.income),
            ("repayment_rate", form.repayment_rate),
            ("loan_history", form.loan_history),
        ]
        .iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| *name)
        .collect();

        match (form.income, form.repayment_rate, form.loan_history) {
            (Some(income), Some(repayment_rate), Some(loan_history)) => Self::from_values(&[
                income,
                repayment_rate,
                loan_history,
                i64::from(scores.transaction_count_score),
                i64::from(scores.balance_score),
                i64::from(scores.age_score),
            ]),
            _ => Err(PipelineError::IncompleteForm { missing }),
        }
    }

    pub fn values(&self) -> &[u32; CreditInputVector::LEN] {
        &self.0
    }

    pub fn reputation(&self) -> ReputationScores {
        ReputationScores {
            transaction_count_score: self.0[3],
            balance_score: self.0[4],
            age_score: self.0[5],
        }
    }
}

/// Ciphertext handles and the single input proof covering all of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub handles: [CiphertextHandle; CreditInputVector::LEN],
    #[serde(with = "hex_blob")]
    pub proof: Vec<u8>,
}

// ==================== Lifecycle Types ====================

/// Observable submission/evaluation lifecycle of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmissionStatus {
    NoData,
    Submitted,
    Evaluated { approved: bool },
}

impl SubmissionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SubmissionStatus::NoData => "no_data",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Evaluated { approved: true } => "approved",
            SubmissionStatus::Evaluated { approved: false } => "rejected",
        }
    }
}

/// Result of a confirmed submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub submission_id: String,
    pub account: Address,
    pub chain_id: ChainId,
    pub contract: Address,
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub scores: ReputationScores,
    /// Set when the demo fallback scores were submitted
    pub degraded: Option<String>,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

// ==================== Request Types ====================

/// Request to encrypt and submit credit data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitCreditRequest {
    pub account: Address,
    #[serde(default)]
    pub income: Option<i64>,
    #[serde(default)]
    pub repayment_rate: Option<i64>,
    #[serde(default)]
    pub loan_history: Option<i64>,
}

impl SubmitCreditRequest {
    pub fn form(&self) -> FormInputs {
        FormInputs {
            income: self.income,
            repayment_rate: self.repayment_rate,
            loan_history: self.loan_history,
        }
    }
}

/// Request to trigger loan evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub account: Address,
}

// ==================== Response Types ====================

/// Error codes returned by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Reputation reads failed
    DataUnavailable,
    /// No backend configuration for the chain
    UnsupportedNetwork,
    /// Caller supplied malformed values
    InvalidInput,
    /// Form fields missing
    IncompleteForm,
    /// Backend returned fewer ciphertexts than requested
    EncryptionIncomplete,
    /// On-chain revert or wallet refusal
    ContractRejected,
    /// Another submission for the account is running
    AlreadyInProgress,
    /// Evaluation requested before any submission
    NoCreditData,
    /// Encryption backend failed
    BackendUnavailable,
    /// RPC endpoint unreachable or malformed reply
    TransportError,
    /// Submission cancelled by the caller
    Cancelled,
    /// Transaction never confirmed
    ConfirmationTimeout,
    /// Internal server error
    InternalError,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    /// Pipeline stage that failed
    pub stage: Option<crate::error::Stage>,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

/// Status of one account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountStatusResponse {
    pub account: Address,
    pub status: SubmissionStatus,
}

/// Cancellation outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub account: Address,
    pub cancelled: bool,
}

/// Server health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub in_flight_submissions: usize,
    pub dev_mode: bool,
}

/// Server status with more details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub contract: Address,
    pub supported_chains: Vec<ChainId>,
    pub active_chain_id: Option<ChainId>,
    pub backend_generation: Option<u64>,
    pub total_submissions: u64,
    pub degraded_submissions: u64,
    pub total_evaluations: u64,
    pub uptime_secs: u64,
}
