//! JSON-RPC chain adapter
//!
//! Talks to an Ethereum node over HTTP. Writes go through
//! `eth_sendTransaction`, so the node (or the wallet proxy in front of it)
//! owns the signing keys.

use async_trait::async_trait;
use num_bigint::BigUint;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::abi;
use super::{ChainDataProvider, ChainError, CreditContract, LoanDecision, TxReceipt};
use crate::types::{decode_hex, encode_hex, Address, ChainId, CiphertextHandle, CreditInputVector, TxHash};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl RpcErrorObject {
    /// Revert data arrives either as a hex string or nested one level deep
    fn revert_data(&self) -> Option<String> {
        match &self.data {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Object(map)) => map.get("data").and_then(Value::as_str).map(String::from),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    block_number: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLog {
    topics: Vec<String>,
    data: String,
    block_number: String,
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_quantity(value: &str) -> Result<u64, ChainError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::Decode(format!("invalid quantity {value}: {e}")))
}

fn parse_big_quantity(value: &str) -> Result<BigUint, ChainError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return Ok(BigUint::default());
    }
    BigUint::parse_bytes(digits.as_bytes(), 16)
        .ok_or_else(|| ChainError::Decode(format!("invalid quantity {value}")))
}

fn quantity(value: u64) -> String {
    format!("0x{value:x}")
}

fn decode_data(value: &str) -> Result<Vec<u8>, ChainError> {
    decode_hex(value).map_err(|e| ChainError::Decode(format!("invalid hex data: {e}")))
}

/// Minimal JSON-RPC client
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(Self::with_client(http, url))
    }

    pub fn with_client(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one JSON-RPC request and deserialize its result
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!(method, id, "JSON-RPC request");

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let response: RpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::Decode(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(ChainError::Rpc {
                code: error.code,
                data: error.revert_data(),
                message: error.message,
            });
        }

        serde_json::from_value(response.result.unwrap_or(Value::Null))
            .map_err(|e| ChainError::Decode(format!("{method}: {e}")))
    }

    /// `eth_call` with `from` set so `msg.sender`-scoped views answer for the account
    pub async fn call(&self, from: Address, to: Address, data: &[u8]) -> Result<Vec<u8>, ChainError> {
        let result: String = self
            .request(
                "eth_call",
                json!([{ "from": from, "to": to, "data": encode_hex(data) }, "latest"]),
            )
            .await?;
        decode_data(&result)
    }

    pub async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        data: &[u8],
    ) -> Result<TxHash, ChainError> {
        let result: String = self
            .request(
                "eth_sendTransaction",
                json!([{ "from": from, "to": to, "data": encode_hex(data) }]),
            )
            .await?;
        result
            .parse()
            .map_err(|e| ChainError::Decode(format!("transaction hash: {e}")))
    }
}

#[async_trait]
impl ChainDataProvider for JsonRpcClient {
    async fn chain_id(&self) -> Result<ChainId, ChainError> {
        let value: String = self.request("eth_chainId", json!([])).await?;
        parse_quantity(&value)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, ChainError> {
        let value: String = self
            .request("eth_getTransactionCount", json!([address, "latest"]))
            .await?;
        parse_quantity(&value)
    }

    async fn balance(&self, address: Address) -> Result<BigUint, ChainError> {
        let value: String = self
            .request("eth_getBalance", json!([address, "latest"]))
            .await?;
        parse_big_quantity(&value)
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let value: String = self.request("eth_blockNumber", json!([])).await?;
        parse_quantity(&value)
    }
}

/// Receipt polling settings
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationPolicy {
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_polls: 120,
        }
    }
}

/// Block window for decision event lookups.
///
/// Logs are fetched newest first in ranges of `chunk_blocks`, stopping at
/// `from_block` or after `max_chunks` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionLogScan {
    pub from_block: u64,
    pub chunk_blocks: u64,
    pub max_chunks: u32,
}

impl Default for DecisionLogScan {
    fn default() -> Self {
        Self {
            from_block: 0,
            chunk_blocks: 10_000,
            max_chunks: 10,
        }
    }
}

impl DecisionLogScan {
    /// Inclusive block ranges to query, newest first
    pub fn ranges(&self, latest: u64) -> Vec<(u64, u64)> {
        let chunk = self.chunk_blocks.max(1);
        let mut ranges = Vec::new();
        let mut to = latest;
        while to >= self.from_block && ranges.len() < self.max_chunks as usize {
            let from = to.saturating_sub(chunk - 1).max(self.from_block);
            ranges.push((from, to));
            if from == 0 || from == self.from_block {
                break;
            }
            to = from - 1;
        }
        ranges
    }
}

/// The credit contract reached through [`JsonRpcClient`]
pub struct RpcCreditContract {
    client: Arc<JsonRpcClient>,
    address: Address,
    confirmation: ConfirmationPolicy,
    decision_scan: DecisionLogScan,
}

impl RpcCreditContract {
    pub fn new(
        client: Arc<JsonRpcClient>,
        address: Address,
        confirmation: ConfirmationPolicy,
        decision_scan: DecisionLogScan,
    ) -> Self {
        Self {
            client,
            address,
            confirmation,
            decision_scan,
        }
    }

    async fn view(&self, account: Address, signature: &str) -> Result<Vec<u8>, ChainError> {
        self.client
            .call(account, self.address, &abi::encode_call(signature))
            .await
    }

    fn decode_log(log: &RawLog, approved_topic: &str) -> Result<LoanDecision, ChainError> {
        let topic0 = log
            .topics
            .first()
            .ok_or_else(|| ChainError::Decode("log without topics".into()))?;
        let data = decode_data(&log.data)?;
        let timestamp =
            abi::decode_u64(&data).map_err(|e| ChainError::Decode(format!("event data: {e}")))?;

        Ok(LoanDecision {
            approved: topic0.eq_ignore_ascii_case(approved_topic),
            timestamp,
            block_number: parse_quantity(&log.block_number)?,
        })
    }
}

#[async_trait]
impl CreditContract for RpcCreditContract {
    fn address(&self) -> Address {
        self.address
    }

    #[instrument(skip(self, handles, proof), fields(contract = %self.address))]
    async fn submit_credit_data(
        &self,
        from: Address,
        handles: &[CiphertextHandle; CreditInputVector::LEN],
        proof: &[u8],
    ) -> Result<TxHash, ChainError> {
        let data = abi::encode_submit_credit_data(handles, proof);
        self.client.send_transaction(from, self.address, &data).await
    }

    #[instrument(skip(self), fields(contract = %self.address))]
    async fn evaluate_loan(&self, from: Address) -> Result<TxHash, ChainError> {
        let data = abi::encode_call(abi::EVALUATE_LOAN);
        self.client.send_transaction(from, self.address, &data).await
    }

    #[instrument(skip(self))]
    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt, ChainError> {
        for poll in 0..self.confirmation.max_polls {
            let receipt: Option<RawReceipt> = self
                .client
                .request("eth_getTransactionReceipt", json!([hash]))
                .await?;

            if let Some(receipt) = receipt {
                let success = match receipt.status.as_deref() {
                    Some(status) => parse_quantity(status)? == 1,
                    None => true,
                };
                let transaction_hash = receipt
                    .transaction_hash
                    .parse()
                    .map_err(|e| ChainError::Decode(format!("receipt hash: {e}")))?;
                debug!(poll, success, "Receipt received");
                return Ok(TxReceipt {
                    transaction_hash,
                    block_number: parse_quantity(&receipt.block_number)?,
                    success,
                });
            }

            tokio::time::sleep(self.confirmation.poll_interval).await;
        }

        warn!(%hash, polls = self.confirmation.max_polls, "Transaction not confirmed");
        Err(ChainError::NotConfirmed {
            hash,
            polls: self.confirmation.max_polls,
        })
    }

    async fn has_credit_data(&self, account: Address) -> Result<bool, ChainError> {
        let data = self.view(account, abi::HAS_CREDIT_DATA).await?;
        abi::decode_bool(&data).map_err(|e| ChainError::Decode(format!("hasCreditData: {e}")))
    }

    async fn loan_status(&self, account: Address) -> Result<bool, ChainError> {
        let data = self.view(account, abi::GET_LOAN_STATUS).await?;
        abi::decode_bool(&data).map_err(|e| ChainError::Decode(format!("getLoanStatus: {e}")))
    }

    async fn credit_data_timestamp(&self, account: Address) -> Result<u64, ChainError> {
        let data = self.view(account, abi::GET_CREDIT_DATA_TIMESTAMP).await?;
        abi::decode_u64(&data)
            .map_err(|e| ChainError::Decode(format!("getCreditDataTimestamp: {e}")))
    }

    async fn latest_decision(&self, account: Address) -> Result<Option<LoanDecision>, ChainError> {
        let approved_topic = encode_hex(&abi::event_topic(abi::LOAN_APPROVED_EVENT));
        let rejected_topic = encode_hex(&abi::event_topic(abi::LOAN_REJECTED_EVENT));
        let account_topic = encode_hex(&abi::address_word(&account));

        let latest = self.client.block_number().await?;
        for (from, to) in self.decision_scan.ranges(latest) {
            let logs: Vec<RawLog> = self
                .client
                .request(
                    "eth_getLogs",
                    json!([{
                        "address": self.address,
                        "fromBlock": quantity(from),
                        "toBlock": quantity(to),
                        "topics": [[&approved_topic, &rejected_topic], &account_topic],
                    }]),
                )
                .await?;

            if let Some(log) = logs.last() {
                return Self::decode_log(log, &approved_topic).map(Some);
            }
        }
        Ok(None)
    }
}
