//! Swap-quote service client
//!
//! Two calls per `get_quote`:
//!     1. price endpoint  - indicative `buyAmount`, no taker context
//!     2. quote endpoint  - binding calldata; requires `taker` and
//!        `slippagePercentage` or the service refuses executable data
//!
//! Any non-success status, malformed payload or missing execution data
//! yields `None`. There is no internal retry: the next scan cycle absorbs
//! transient failures.

use super::normalize::{normalize_quote, price_buy_amount};
use crate::types::SwapQuote;
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Anything that can price and quote a token swap
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Indicative output amount (price endpoint only)
    async fn get_price(&self, sell_token: Address, buy_token: Address, sell_amount: U256) -> Option<U256>;

    /// Executable quote (price + binding quote endpoints)
    async fn get_quote(&self, sell_token: Address, buy_token: Address, sell_amount: U256) -> Option<SwapQuote>;
}

/// Quote client settings
#[derive(Debug, Clone)]
pub struct QuoteClientConfig {
    pub chain_id: u64,
    /// Base URL of the service (e.g. `https://api.0x.org/swap/v1`)
    pub base_url: String,
    pub price_path: String,
    pub quote_path: String,
    pub api_key: Option<String>,
    /// Address that will execute the swap calldata (the settlement contract)
    pub taker: Address,
    /// Slippage tolerance as a fraction (0.01 = 1%)
    pub slippage: f64,
    pub timeout: Duration,
}

/// HTTP client for the swap-quote service
pub struct QuoteClient {
    config: QuoteClientConfig,
    http: reqwest::Client,
}

impl QuoteClient {
    pub fn new(config: QuoteClientConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn base_params(&self, sell_token: Address, buy_token: Address, sell_amount: U256) -> Vec<(&'static str, String)> {
        vec![
            ("chainId", self.config.chain_id.to_string()),
            ("sellToken", format!("{:?}", sell_token)),
            ("buyToken", format!("{:?}", buy_token)),
            ("sellAmount", sell_amount.to_string()),
        ]
    }

    /// GET and parse JSON; `None` on transport error, non-2xx or bad JSON
    async fn fetch(&self, path: &str, params: &[(&'static str, String)]) -> Option<Value> {
        let mut request = self.http.get(self.url(path)).query(params);
        if let Some(key) = &self.config.api_key {
            request = request.header("0x-api-key", key).header("0x-version", "v2");
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("Quote service {} request failed: {}", path, e);
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            debug!("Quote service {} returned {}", path, status);
            return None;
        }

        match response.json::<Value>().await {
            Ok(body) => Some(body),
            Err(e) => {
                debug!("Quote service {} payload malformed: {}", path, e);
                None
            }
        }
    }
}

#[async_trait]
impl QuoteSource for QuoteClient {
    async fn get_price(&self, sell_token: Address, buy_token: Address, sell_amount: U256) -> Option<U256> {
        let params = self.base_params(sell_token, buy_token, sell_amount);
        let body = self.fetch(&self.config.price_path, &params).await?;
        price_buy_amount(&body)
    }

    async fn get_quote(&self, sell_token: Address, buy_token: Address, sell_amount: U256) -> Option<SwapQuote> {
        // Indicative price first: cheap liquidity check before asking for calldata
        let indicative = self.get_price(sell_token, buy_token, sell_amount).await?;

        let mut params = self.base_params(sell_token, buy_token, sell_amount);
        params.push(("taker", format!("{:?}", self.config.taker)));
        params.push(("slippagePercentage", self.config.slippage.to_string()));

        let body = self.fetch(&self.config.quote_path, &params).await?;
        let quote = normalize_quote(&body);
        if quote.is_none() {
            debug!(
                "Quote {:?}->{:?} missing execution data (indicative {})",
                sell_token, buy_token, indicative
            );
        }
        quote
    }
}
