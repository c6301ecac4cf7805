//! Private relay clients
//!
//! Bundle JSON-RPC (`eth_callBundle` / `eth_sendBundle`) keyed by target
//! block. Requests are authenticated with `X-Flashbots-Signature`
//! (`address:signature` over the hex keccak of the body), which relays that
//! don't need it ignore. Submission returns a bundle identifier, never a
//! transaction hash.

use super::bundle::Bundle;
use super::revert::{classify_revert_message, RevertReason};
use alloy::hex;
use alloy::primitives::keccak256;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("timed out")]
    Timeout,
}

/// Outcome of a bundle simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationResult {
    pub success: bool,
    pub revert: Option<RevertReason>,
    pub gas_used: Option<u64>,
}

#[async_trait]
pub trait Relay: Send + Sync {
    fn name(&self) -> &str;

    fn supports_simulation(&self) -> bool;

    async fn simulate(&self, bundle: &Bundle) -> Result<SimulationResult, RelayError>;

    /// Submit the bundle; returns the relay's bundle identifier
    async fn send_bundle(&self, bundle: &Bundle) -> Result<String, RelayError>;
}

/// `[[relay]]` entry of the markets file
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RelayConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub simulate: bool,
}

/// Bundle relay speaking Flashbots-style JSON-RPC over HTTP
pub struct JsonRpcRelay {
    config: RelayConfig,
    http: reqwest::Client,
    auth: PrivateKeySigner,
}

impl JsonRpcRelay {
    pub fn new(config: RelayConfig, auth: PrivateKeySigner, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { config, http, auth })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RelayError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": [params],
        })
        .to_string();

        let digest = format!("{:?}", keccak256(body.as_bytes()));
        let signature = self
            .auth
            .sign_message(digest.as_bytes())
            .await
            .map_err(|e| RelayError::Transport(format!("auth signing: {}", e)))?;
        let header = format!(
            "{:?}:{}",
            self.auth.address(),
            hex::encode_prefixed(signature.as_bytes())
        );

        let response = self
            .http
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .header("X-Flashbots-Signature", header)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RelayError::Timeout
                } else {
                    RelayError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let value: Value = response
            .json()
            .await
            .map_err(|e| RelayError::Malformed(e.to_string()))?;

        // JSON-RPC errors are often delivered with a non-2xx status
        if let Some(err) = rpc_error(&value) {
            return Err(err);
        }
        if !status.is_success() {
            return Err(RelayError::Status(status.as_u16()));
        }
        debug!("{} {} -> {}", self.config.name, method, value);
        Ok(value)
    }
}

#[async_trait]
impl Relay for JsonRpcRelay {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn supports_simulation(&self) -> bool {
        self.config.simulate
    }

    async fn simulate(&self, bundle: &Bundle) -> Result<SimulationResult, RelayError> {
        let params = json!({
            "txs": bundle.raw_hex(),
            "blockNumber": format!("0x{:x}", bundle.target_block),
            "stateBlockNumber": "latest",
        });
        let value = self.call("eth_callBundle", params).await?;
        parse_simulation_response(&value)
    }

    async fn send_bundle(&self, bundle: &Bundle) -> Result<String, RelayError> {
        let params = json!({
            "txs": bundle.raw_hex(),
            "blockNumber": format!("0x{:x}", bundle.target_block),
        });
        let value = self.call("eth_sendBundle", params).await?;
        parse_send_response(&value)
    }
}

fn rpc_error(value: &Value) -> Option<RelayError> {
    let err = value.get("error")?;
    if err.is_null() {
        return None;
    }
    Some(RelayError::Rpc {
        code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
        message: err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
    })
}

/// Extract the bundle identifier from an `eth_sendBundle` response
pub fn parse_send_response(value: &Value) -> Result<String, RelayError> {
    if let Some(err) = rpc_error(value) {
        return Err(err);
    }
    let result = value
        .get("result")
        .ok_or_else(|| RelayError::Malformed("missing result".to_string()))?;

    result
        .get("bundleHash")
        .and_then(Value::as_str)
        .or_else(|| result.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RelayError::Malformed(format!("no bundle hash in {}", result)))
}

/// Interpret an `eth_callBundle` response: the first failing transaction
/// decides the verdict
pub fn parse_simulation_response(value: &Value) -> Result<SimulationResult, RelayError> {
    if let Some(err) = rpc_error(value) {
        return Err(err);
    }
    let result = value
        .get("result")
        .ok_or_else(|| RelayError::Malformed("missing result".to_string()))?;

    let gas_used = result.get("totalGasUsed").and_then(Value::as_u64);
    let txs = result
        .get("results")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for tx in &txs {
        let failure = ["revert", "error"]
            .iter()
            .filter_map(|k| tx.get(*k).and_then(Value::as_str))
            .find(|s| !s.is_empty());
        if let Some(reason) = failure {
            return Ok(SimulationResult {
                success: false,
                revert: Some(classify_revert_message(reason)),
                gas_used,
            });
        }
    }

    Ok(SimulationResult {
        success: true,
        revert: None,
        gas_used,
    })
}
