//! Core data structures
//!
//! Tokens, quotes, arbitrage paths, opportunities and fee bids shared by the
//! scanner, fee estimator and submission manager.

use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// ERC20 token loaded from static configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
}

impl Token {
    pub fn new(symbol: impl Into<String>, address: Address, decimals: u8) -> Self {
        Self {
            symbol: symbol.into(),
            address,
            decimals,
        }
    }

    /// One whole token in base units (10^decimals)
    pub fn one(&self) -> U256 {
        U256::from(10u64).pow(U256::from(self.decimals))
    }

    /// Convert base units to a float amount of whole tokens
    pub fn to_float(&self, amount: U256) -> f64 {
        u256_to_f64(amount) / 10f64.powi(self.decimals as i32)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

/// Normalized response of the swap-quote service.
///
/// A quote with `output_amount == 0` is never constructed; the quote client
/// returns `None` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapQuote {
    pub output_amount: U256,
    pub call_data: Bytes,
    pub target_address: Address,
}

/// Ordered token cycle starting and ending at `tokens[0]`.
///
/// `tokens` holds the distinct hops only; the return leg to the origin is
/// implied (`[USDC, WETH]` means USDC -> WETH -> USDC).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArbitragePath {
    pub name: String,
    pub tokens: Vec<Token>,
    /// Borrow amount in base units of the origin token
    pub borrow_amount: U256,
}

impl ArbitragePath {
    pub fn origin(&self) -> &Token {
        &self.tokens[0]
    }

    /// (sell, buy) pairs for every leg of the cycle, including the closing leg
    pub fn legs(&self) -> Vec<(&Token, &Token)> {
        let n = self.tokens.len();
        (0..n)
            .map(|i| (&self.tokens[i], &self.tokens[(i + 1) % n]))
            .collect()
    }

    pub fn hop_count(&self) -> usize {
        self.tokens.len()
    }

    /// Human-readable cycle, e.g. `USDC>WETH>USDC`
    pub fn route(&self) -> String {
        let mut parts: Vec<&str> = self.tokens.iter().map(|t| t.symbol.as_str()).collect();
        parts.push(self.origin().symbol.as_str());
        parts.join(">")
    }
}

impl fmt::Display for ArbitragePath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.route())
    }
}

/// Strategy that produced an opportunity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// A -> B -> A with a stablecoin origin
    RoundTrip,
    /// A -> B -> C -> A
    Triangular,
    /// A -> B -> A borrowing a non-stable (alternative) asset
    Alternative,
    /// Inferred from rate divergence between a small and a large probe
    PriceImpact,
}

impl Strategy {
    /// Base confidence before adjustments (USD price fallback etc.)
    pub fn base_confidence(&self) -> f64 {
        match self {
            Strategy::RoundTrip => 0.8,
            Strategy::Triangular => 0.7,
            Strategy::Alternative => 0.6,
            Strategy::PriceImpact => 0.3,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Strategy::RoundTrip => write!(f, "round_trip"),
            Strategy::Triangular => write!(f, "triangular"),
            Strategy::Alternative => write!(f, "alternative"),
            Strategy::PriceImpact => write!(f, "price_impact"),
        }
    }
}

/// One priced leg of an opportunity, carrying its executable quote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLeg {
    pub sell_token: Address,
    pub buy_token: Address,
    pub sell_amount: U256,
    pub quote: SwapQuote,
}

/// Arbitrage opportunity found in one scan cycle. Never persisted.
#[derive(Debug, Clone)]
pub struct Opportunity {
    pub path: ArbitragePath,
    pub strategy: Strategy,
    pub profit_percent: f64,
    pub estimated_profit_usd: f64,
    /// In [0, 1]
    pub confidence: f64,
    pub initial_amount: U256,
    pub final_amount: U256,
    /// Every leg that was priced, in execution order
    pub legs: Vec<PricedLeg>,
    pub block_number: u64,
}

impl Opportunity {
    /// True if every leg of the cycle carries execution data.
    /// Price-impact opportunities are inferred from probes and never executable.
    pub fn is_executable(&self) -> bool {
        self.strategy != Strategy::PriceImpact
            && !self.legs.is_empty()
            && self.legs.len() == self.path.hop_count()
    }
}

/// Observed base fee for one block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeSample {
    pub block_number: u64,
    pub base_fee_per_gas_gwei: f64,
}

/// EIP-1559 fee bid (wei)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBid {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    /// False when the latest base fee already exceeds the ceiling
    pub acceptable: bool,
}

pub const WEI_PER_GWEI: f64 = 1e9;

pub fn gwei_to_wei(gwei: f64) -> u128 {
    if !gwei.is_finite() || gwei <= 0.0 {
        return 0;
    }
    (gwei * WEI_PER_GWEI) as u128
}

pub fn wei_to_gwei(wei: u128) -> f64 {
    wei as f64 / WEI_PER_GWEI
}

/// Lossy U256 -> f64 (exact below 2^53, saturating above u128)
pub fn u256_to_f64(value: U256) -> f64 {
    u128::try_from(value).map(|v| v as f64).unwrap_or(f64::MAX)
}
