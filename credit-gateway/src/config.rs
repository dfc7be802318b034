//! Server Configuration
//!
//! Layered as `.env` (dotenvy), an optional `credit-gateway.toml`, then
//! `CREDIT_*` environment variables.

use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

use crate::chain::rpc::{ConfirmationPolicy, DecisionLogScan};
use crate::services::resolver::{DeploymentMode, SEPOLIA_CHAIN_ID};
use crate::types::{Address, ChainId};

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// In-memory chain and mock coprocessor
    #[serde(default)]
    pub dev_mode: bool,

    /// Expected chain
    #[serde(default = "default_chain_id")]
    pub chain_id: ChainId,

    /// Credit scoring contract
    #[serde(default)]
    pub contract_address: Address,

    /// Node URL; defaults to the network preset's RPC
    pub rpc_url: Option<String>,

    /// Replaces the preset encryption backend endpoint
    pub backend_endpoint: Option<String>,

    #[serde(default)]
    pub deployment_mode: DeploymentMode,

    /// Input verifier secret key (hex encoded)
    pub verifier_secret_key: Option<String>,

    /// HTTP timeout for RPC and relayer calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub confirmation_poll_interval_ms: u64,

    #[serde(default = "default_max_polls")]
    pub confirmation_max_polls: u32,

    /// First block scanned for loan decision events
    #[serde(default)]
    pub decision_log_from_block: u64,

    /// Blocks per `eth_getLogs` request; most public nodes cap the range
    #[serde(default = "default_log_chunk_blocks")]
    pub decision_log_chunk_blocks: u64,

    /// Lookback limit for decision events, in requests
    #[serde(default = "default_log_max_chunks")]
    pub decision_log_max_chunks: u32,

    /// CORS allowed origins
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_chain_id() -> ChainId {
    SEPOLIA_CHAIN_ID
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_polls() -> u32 {
    120
}

fn default_log_chunk_blocks() -> u64 {
    10_000
}

fn default_log_max_chunks() -> u32 {
    10
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            json_logs: false,
            dev_mode: false,
            chain_id: default_chain_id(),
            contract_address: Address::ZERO,
            rpc_url: None,
            backend_endpoint: None,
            deployment_mode: DeploymentMode::default(),
            verifier_secret_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            confirmation_poll_interval_ms: default_poll_interval_ms(),
            confirmation_max_polls: default_max_polls(),
            decision_log_from_block: 0,
            decision_log_chunk_blocks: default_log_chunk_blocks(),
            decision_log_max_chunks: default_log_max_chunks(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl Config {
    /// Load configuration from `.env`, `credit-gateway.toml` and `CREDIT_*` variables
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        config::Config::builder()
            .add_source(config::File::with_name("credit-gateway").required(false))
            .add_source(
                config::Environment::with_prefix("CREDIT")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors_origins"),
            )
            .build()?
            .try_deserialize()
    }

    /// Get socket address for binding
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy {
            poll_interval: Duration::from_millis(self.confirmation_poll_interval_ms),
            max_polls: self.confirmation_max_polls,
        }
    }

    pub fn decision_log_scan(&self) -> DecisionLogScan {
        DecisionLogScan {
            from_block: self.decision_log_from_block,
            chunk_blocks: self.decision_log_chunk_blocks,
            max_chunks: self.decision_log_max_chunks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_deserialize_from_empty_source() {
        let config: Config = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.chain_id, SEPOLIA_CHAIN_ID);
        assert_eq!(config.contract_address, Address::ZERO);
        assert_eq!(config.deployment_mode, DeploymentMode::Strict);
        assert_eq!(config.cors_origins, vec!["*"]);
        assert_eq!(config.decision_log_scan(), DecisionLogScan::default());
    }

    #[test]
    fn test_file_values_override_defaults() {
        let toml = r#"
            dev_mode = true
            chain_id = 31337
            contract_address = "0x00000000000000000000000000000000000000cc"
            deployment_mode = "permissive"
            confirmation_max_polls = 5
            decision_log_from_block = 7000000
            decision_log_chunk_blocks = 50000
        "#;
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(config.dev_mode);
        assert_eq!(config.chain_id, 31337);
        assert_eq!(config.contract_address.as_bytes()[19], 0xcc);
        assert_eq!(config.deployment_mode, DeploymentMode::Permissive);
        assert_eq!(config.confirmation_policy().max_polls, 5);
        assert_eq!(config.decision_log_scan().from_block, 7_000_000);
        assert_eq!(config.decision_log_scan().chunk_blocks, 50_000);
        assert_eq!(config.decision_log_scan().max_chunks, 10);
    }

    #[test]
    fn test_socket_addr() {
        let config = Config::default();
        assert_eq!(config.socket_addr().unwrap().port(), 3000);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.socket_addr().is_err());
    }
}
