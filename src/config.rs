//! Configuration management
//!
//! Runtime settings come from the environment (`.env` loaded via dotenv);
//! the static market definition (tokens, paths, relays) comes from a TOML
//! file. Every problem found here is fatal: the bot does not start on a
//! partial configuration.

use crate::cache::CacheConfig;
use crate::gas::{CeilingParams, FeeEstimatorConfig, MIN_WINDOW_BLOCKS};
use crate::quote::QuoteClientConfig;
use crate::scanner::ScannerConfig;
use crate::submission::{BundleConfig, RelayConfig, SubmissionConfig};
use crate::types::{ArbitragePath, Token};
use alloy::primitives::utils::{parse_units, ParseUnits};
use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("invalid {key}: {reason}")]
    Invalid { key: String, reason: String },
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("path '{path}': {reason}")]
    Path { path: String, reason: String },
    #[error("settlement contract check failed: {0}")]
    Preflight(String),
}

fn invalid(key: &str, reason: impl Display) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

// ── Environment settings ─────────────────────────────────────────────

/// Runtime settings read from the environment
#[derive(Clone)]
pub struct BotConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub private_key: String,
    pub executor_address: Address,

    // Quote service
    pub quote_api_url: String,
    pub quote_price_path: String,
    pub quote_path: String,
    pub quote_api_key: Option<String>,
    pub quote_timeout_ms: u64,
    pub slippage_percent: f64,

    // Cache
    pub redis_url: Option<String>,
    pub cache_prefix: String,
    pub cache_capacity: usize,
    pub cache_sweep_secs: u64,
    pub quote_ttl_secs: u64,
    pub price_ttl_secs: u64,

    // Scanner
    pub min_profit_stable_pct: f64,
    pub min_profit_volatile_pct: f64,
    pub min_profit_triangular_pct: f64,
    pub price_impact_threshold_pct: f64,
    pub price_impact_probe: bool,
    pub inter_call_delay_ms: u64,
    pub usd_symbol: String,
    pub native_symbol: String,
    pub stable_symbols: Vec<String>,

    // Decision gate
    pub min_profit_usd: f64,
    pub cooldown_blocks: u64,
    pub cooldown_max_strikes: u32,

    // Gas
    pub max_gas_price_gwei: f64,
    pub gas_floor_gwei: f64,
    pub gas_stddev_multiplier: f64,
    pub fee_history_blocks: u64,
    pub reward_percentile: f64,
    pub default_priority_fee_gwei: f64,
    pub gas_limit: u64,
    pub withdraw_gas_limit: u64,

    // Submission
    pub atomic_withdrawal: bool,
    pub public_fallback: bool,
    pub live_mode: bool,
    pub simulate: bool,
    pub grace_blocks: u64,
    pub relay_timeout_ms: u64,
    pub inclusion_poll_ms: u64,
    pub block_time_ms: u64,
}

/// Reads typed values from a key lookup
struct Env<F: Fn(&str) -> Option<String>> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.optional(key) {
            Some(raw) => raw.parse::<T>().map_err(|e| invalid(key, e)),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key).map(|v| v.to_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => Err(invalid(key, format!("expected boolean, got '{}'", other))),
            },
        }
    }
}

impl BotConfig {
    /// Load `.env` (if present) and read the process environment
    pub fn load(env_file: Option<&Path>) -> Result<Self, ConfigError> {
        match env_file {
            Some(path) => {
                dotenv::from_path(path).map_err(|e| ConfigError::Read {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            }
            None => {
                dotenv::dotenv().ok();
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let executor_raw = env.required("EXECUTOR_ADDRESS")?;
        let executor_address =
            Address::from_str(&executor_raw).map_err(|e| invalid("EXECUTOR_ADDRESS", e))?;

        let stable_symbols = env
            .optional("STABLE_SYMBOLS")
            .unwrap_or_else(|| "USDC,USDT,DAI".to_string())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            rpc_url: env.required("RPC_URL")?,
            chain_id: env
                .required("CHAIN_ID")?
                .parse()
                .map_err(|e| invalid("CHAIN_ID", e))?,
            private_key: env.required("PRIVATE_KEY")?,
            executor_address,

            quote_api_url: env.required("QUOTE_API_URL")?,
            quote_price_path: env
                .optional("QUOTE_PRICE_PATH")
                .unwrap_or_else(|| "/swap/allowance-holder/price".to_string()),
            quote_path: env
                .optional("QUOTE_PATH")
                .unwrap_or_else(|| "/swap/allowance-holder/quote".to_string()),
            quote_api_key: env.optional("QUOTE_API_KEY"),
            quote_timeout_ms: env.parse_or("QUOTE_TIMEOUT_MS", 5_000)?,
            slippage_percent: env.parse_or("SLIPPAGE_PERCENT", 0.5)?,

            redis_url: env.optional("REDIS_URL"),
            cache_prefix: env
                .optional("CACHE_PREFIX")
                .unwrap_or_else(|| "relayarb:".to_string()),
            cache_capacity: env.parse_or("CACHE_CAPACITY", 10_000)?,
            cache_sweep_secs: env.parse_or("CACHE_SWEEP_SECS", 60)?,
            quote_ttl_secs: env.parse_or("QUOTE_CACHE_TTL_SECS", 2)?,
            price_ttl_secs: env.parse_or("PRICE_CACHE_TTL_SECS", 30)?,

            min_profit_stable_pct: env.parse_or("MIN_PROFIT_STABLE_PCT", 0.3)?,
            min_profit_volatile_pct: env.parse_or("MIN_PROFIT_VOLATILE_PCT", 0.5)?,
            min_profit_triangular_pct: env.parse_or("MIN_PROFIT_TRIANGULAR_PCT", 0.4)?,
            price_impact_threshold_pct: env.parse_or("PRICE_IMPACT_THRESHOLD_PCT", 1.0)?,
            price_impact_probe: env.flag("PRICE_IMPACT_PROBE", true)?,
            inter_call_delay_ms: env.parse_or("INTER_CALL_DELAY_MS", 250)?,
            usd_symbol: env
                .optional("USD_SYMBOL")
                .unwrap_or_else(|| "USDC".to_string())
                .to_uppercase(),
            native_symbol: env
                .optional("NATIVE_SYMBOL")
                .unwrap_or_else(|| "WETH".to_string())
                .to_uppercase(),
            stable_symbols,

            min_profit_usd: env.parse_or("MIN_PROFIT_USD", 1.0)?,
            cooldown_blocks: env.parse_or("COOLDOWN_BLOCKS", 10)?,
            cooldown_max_strikes: env.parse_or("COOLDOWN_MAX_STRIKES", 3)?,

            max_gas_price_gwei: env.parse_or("MAX_GAS_PRICE_GWEI", 100.0)?,
            gas_floor_gwei: env.parse_or("GAS_FLOOR_GWEI", 1.0)?,
            gas_stddev_multiplier: env.parse_or("GAS_STDDEV_MULTIPLIER", 2.0)?,
            fee_history_blocks: env.parse_or("FEE_HISTORY_BLOCKS", MIN_WINDOW_BLOCKS)?,
            reward_percentile: env.parse_or("REWARD_PERCENTILE", 50.0)?,
            default_priority_fee_gwei: env.parse_or("DEFAULT_PRIORITY_FEE_GWEI", 2.0)?,
            gas_limit: env.parse_or("GAS_LIMIT", 600_000)?,
            withdraw_gas_limit: env.parse_or("WITHDRAW_GAS_LIMIT", 80_000)?,

            atomic_withdrawal: env.flag("ATOMIC_WITHDRAWAL", false)?,
            public_fallback: env.flag("PUBLIC_FALLBACK", true)?,
            live_mode: env.flag("LIVE_MODE", false)?,
            simulate: env.flag("SIMULATE_BUNDLES", true)?,
            grace_blocks: env.parse_or("GRACE_BLOCKS", 2)?,
            relay_timeout_ms: env.parse_or("RELAY_TIMEOUT_MS", 3_000)?,
            inclusion_poll_ms: env.parse_or("INCLUSION_POLL_MS", 500)?,
            block_time_ms: env.parse_or("BLOCK_TIME_MS", 2_000)?,
        })
    }

    /// Cross-field and market checks
    pub fn validate(&self, markets: &Markets) -> Result<(), ConfigError> {
        self.signer()?;

        if !self.max_gas_price_gwei.is_finite() || self.max_gas_price_gwei <= 0.0 {
            return Err(invalid("MAX_GAS_PRICE_GWEI", "must be positive"));
        }
        if !self.gas_floor_gwei.is_finite()
            || self.gas_floor_gwei < 0.0
            || self.gas_floor_gwei > self.max_gas_price_gwei
        {
            return Err(invalid(
                "GAS_FLOOR_GWEI",
                format!("must be within [0, {}]", self.max_gas_price_gwei),
            ));
        }
        if self.fee_history_blocks < MIN_WINDOW_BLOCKS {
            return Err(invalid(
                "FEE_HISTORY_BLOCKS",
                format!("must be at least {}", MIN_WINDOW_BLOCKS),
            ));
        }
        if !(0.0..=100.0).contains(&self.reward_percentile) {
            return Err(invalid("REWARD_PERCENTILE", "must be within [0, 100]"));
        }
        if !(self.slippage_percent > 0.0 && self.slippage_percent <= 50.0) {
            return Err(invalid("SLIPPAGE_PERCENT", "must be within (0, 50]"));
        }
        for (key, value) in [
            ("MIN_PROFIT_STABLE_PCT", self.min_profit_stable_pct),
            ("MIN_PROFIT_VOLATILE_PCT", self.min_profit_volatile_pct),
            ("MIN_PROFIT_TRIANGULAR_PCT", self.min_profit_triangular_pct),
            ("PRICE_IMPACT_THRESHOLD_PCT", self.price_impact_threshold_pct),
            ("MIN_PROFIT_USD", self.min_profit_usd),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(key, "must be a non-negative number"));
            }
        }
        if markets.relays.is_empty() && !self.public_fallback {
            return Err(invalid(
                "relay",
                "no relays configured and PUBLIC_FALLBACK is disabled",
            ));
        }
        for symbol in [&self.usd_symbol, &self.native_symbol] {
            if markets.token(symbol).is_none() {
                return Err(invalid("token", format!("'{}' is not defined in markets", symbol)));
            }
        }

        let paths = markets.paths()?;
        if paths.is_empty() {
            return Err(invalid("path", "no enabled paths"));
        }
        Ok(())
    }

    pub fn signer(&self) -> Result<PrivateKeySigner, ConfigError> {
        self.private_key
            .parse::<PrivateKeySigner>()
            .map_err(|e| invalid("PRIVATE_KEY", e))
    }

    // ── Component settings ──

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            store_url: self.redis_url.clone(),
            key_prefix: self.cache_prefix.clone(),
            memory_capacity: self.cache_capacity,
            sweep_interval: Duration::from_secs(self.cache_sweep_secs.max(1)),
        }
    }

    pub fn quote_client_config(&self) -> QuoteClientConfig {
        QuoteClientConfig {
            chain_id: self.chain_id,
            base_url: self.quote_api_url.clone(),
            price_path: self.quote_price_path.clone(),
            quote_path: self.quote_path.clone(),
            api_key: self.quote_api_key.clone(),
            // The settlement contract executes the swap calldata
            taker: self.executor_address,
            slippage: self.slippage_percent / 100.0,
            timeout: Duration::from_millis(self.quote_timeout_ms),
        }
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            min_profit_stable_pct: self.min_profit_stable_pct,
            min_profit_volatile_pct: self.min_profit_volatile_pct,
            min_profit_triangular_pct: self.min_profit_triangular_pct,
            price_impact_threshold_pct: self.price_impact_threshold_pct,
            price_impact_probe: self.price_impact_probe,
            probe_divisor: 100,
            inter_call_delay: Duration::from_millis(self.inter_call_delay_ms),
            quote_ttl_secs: self.quote_ttl_secs,
        }
    }

    pub fn fee_estimator_config(&self) -> FeeEstimatorConfig {
        FeeEstimatorConfig {
            window_blocks: self.fee_history_blocks,
            ceiling: CeilingParams {
                multiplier: self.gas_stddev_multiplier,
                floor_gwei: self.gas_floor_gwei,
                max_gwei: self.max_gas_price_gwei,
            },
            reward_percentile: self.reward_percentile,
            default_priority_fee_gwei: self.default_priority_fee_gwei,
            cache_ttl_secs: 300,
        }
    }

    pub fn bundle_config(&self) -> BundleConfig {
        BundleConfig {
            chain_id: self.chain_id,
            executor: self.executor_address,
            gas_limit: self.gas_limit,
            withdraw_gas_limit: self.withdraw_gas_limit,
            atomic_withdrawal: self.atomic_withdrawal,
        }
    }

    pub fn submission_config(&self) -> SubmissionConfig {
        SubmissionConfig {
            grace_blocks: self.grace_blocks,
            poll_interval: Duration::from_millis(self.inclusion_poll_ms),
            relay_timeout: Duration::from_millis(self.relay_timeout_ms),
            public_fallback: self.public_fallback,
            live: self.live_mode,
            simulate: self.simulate,
            block_time: Duration::from_millis(self.block_time_ms),
        }
    }

    /// Scheme and host of the RPC endpoint; path and query often carry API keys
    pub fn rpc_endpoint(&self) -> String {
        match reqwest::Url::parse(&self.rpc_url) {
            Ok(url) => match url.host_str() {
                Some(host) => format!("{}://{}", url.scheme(), host),
                None => url.scheme().to_string(),
            },
            Err(_) => "<unparseable>".to_string(),
        }
    }
}

// ── Markets file ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct TokenEntry {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathEntry {
    pub name: String,
    /// Token symbols; the cycle returns to the first
    pub tokens: Vec<String>,
    /// Borrow amount in whole origin tokens (decimal string)
    pub borrow: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Static market definition: `[[token]]`, `[[path]]`, `[[relay]]`
#[derive(Debug, Clone, Deserialize)]
pub struct Markets {
    #[serde(rename = "token", default)]
    pub tokens: Vec<TokenEntry>,
    #[serde(rename = "path", default)]
    pub path_entries: Vec<PathEntry>,
    #[serde(rename = "relay", default)]
    pub relays: Vec<RelayConfig>,
}

impl Markets {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let display = path.as_ref().display().to_string();
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: display.clone(),
            reason: e.to_string(),
        })?;
        Self::parse(&content).map_err(|e| match e {
            ConfigError::Invalid { reason, .. } => ConfigError::Read {
                path: display,
                reason,
            },
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| invalid("markets", e))
    }

    fn token_map(&self) -> HashMap<String, Token> {
        self.tokens
            .iter()
            .map(|t| {
                (
                    t.symbol.to_uppercase(),
                    Token::new(t.symbol.clone(), t.address, t.decimals),
                )
            })
            .collect()
    }

    pub fn token(&self, symbol: &str) -> Option<Token> {
        self.token_map().remove(&symbol.to_uppercase())
    }

    /// Resolve enabled paths against the token table
    pub fn paths(&self) -> Result<Vec<ArbitragePath>, ConfigError> {
        let tokens = self.token_map();
        let mut paths = Vec::new();

        for entry in self.path_entries.iter().filter(|p| p.enabled) {
            let err = |reason: String| ConfigError::Path {
                path: entry.name.clone(),
                reason,
            };

            if !(2..=3).contains(&entry.tokens.len()) {
                return Err(err(format!(
                    "needs 2 or 3 tokens, got {}",
                    entry.tokens.len()
                )));
            }

            let resolved = entry
                .tokens
                .iter()
                .map(|s| {
                    tokens
                        .get(&s.to_uppercase())
                        .cloned()
                        .ok_or_else(|| err(format!("unknown token '{}'", s)))
                })
                .collect::<Result<Vec<_>, _>>()?;

            for (i, t) in resolved.iter().enumerate() {
                if resolved[..i].iter().any(|o| o.address == t.address) {
                    return Err(err(format!("token '{}' repeats", t.symbol)));
                }
            }

            let borrow = match parse_units(&entry.borrow, resolved[0].decimals)
                .map_err(|e| err(format!("borrow '{}': {}", entry.borrow, e)))?
            {
                ParseUnits::U256(value) => value,
                ParseUnits::I256(_) => U256::ZERO,
            };
            if borrow.is_zero() {
                return Err(err("borrow amount must be positive".to_string()));
            }

            paths.push(ArbitragePath {
                name: entry.name.clone(),
                tokens: resolved,
                borrow_amount: borrow,
            });
        }

        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    const MARKETS: &str = r#"
[[token]]
symbol = "USDC"
address = "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"
decimals = 6

[[token]]
symbol = "WETH"
address = "0x7ceB23fD6bC0adD59E62ac25578270cFf1b9f619"
decimals = 18

[[token]]
symbol = "DAI"
address = "0x8f3Cf7ad23Cd3CaDbD9735AFf958023239c6A063"
decimals = 18

[[path]]
name = "usdc-weth"
tokens = ["USDC", "WETH"]
borrow = "1000"

[[path]]
name = "tri"
tokens = ["USDC", "WETH", "DAI"]
borrow = "250.5"

[[path]]
name = "off"
tokens = ["USDC", "NOPE"]
borrow = "1"
enabled = false

[[relay]]
name = "flashbots"
url = "https://relay.flashbots.net"
simulate = true
"#;

    fn base_env() -> HashMap<String, String> {
        [
            ("RPC_URL", "wss://rpc.example"),
            ("CHAIN_ID", "137"),
            ("PRIVATE_KEY", KEY),
            ("EXECUTOR_ADDRESS", "0x00000000000000000000000000000000000000cc"),
            ("QUOTE_API_URL", "https://api.0x.org"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn load(env: &HashMap<String, String>) -> Result<BotConfig, ConfigError> {
        BotConfig::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn test_defaults_applied() {
        let cfg = load(&base_env()).unwrap();
        assert_eq!(cfg.chain_id, 137);
        assert_eq!(cfg.fee_history_blocks, MIN_WINDOW_BLOCKS);
        assert!(!cfg.live_mode);
        assert!(!cfg.atomic_withdrawal);
        assert!(cfg.public_fallback);
        assert_eq!(cfg.stable_symbols, vec!["USDC", "USDT", "DAI"]);
        assert!((cfg.quote_client_config().slippage - 0.005).abs() < 1e-12);
    }

    #[test]
    fn test_missing_credentials_fail() {
        let mut env = base_env();
        env.remove("PRIVATE_KEY");
        assert!(matches!(load(&env), Err(ConfigError::Missing("PRIVATE_KEY"))));

        let mut env = base_env();
        env.insert("EXECUTOR_ADDRESS".into(), "not-an-address".into());
        assert!(matches!(load(&env), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_flags_parse() {
        let mut env = base_env();
        env.insert("LIVE_MODE".into(), "true".into());
        env.insert("ATOMIC_WITHDRAWAL".into(), "1".into());
        let cfg = load(&env).unwrap();
        assert!(cfg.live_mode && cfg.atomic_withdrawal);

        env.insert("PUBLIC_FALLBACK".into(), "maybe".into());
        assert!(load(&env).is_err());
    }

    #[test]
    fn test_block_time_bounds_submission_watch() {
        let mut env = base_env();
        assert_eq!(load(&env).unwrap().submission_config().block_time, Duration::from_secs(2));

        env.insert("BLOCK_TIME_MS".into(), "12000".into());
        assert_eq!(load(&env).unwrap().submission_config().block_time, Duration::from_secs(12));
    }

    #[test]
    fn test_rpc_endpoint_hides_credentials() {
        let mut env = base_env();
        env.insert(
            "RPC_URL".into(),
            "wss://polygon-mainnet.g.alchemy.com/v2/sEcReTkEy€€€€€€€€€€€€€€€€€€".into(),
        );
        let endpoint = load(&env).unwrap().rpc_endpoint();
        assert_eq!(endpoint, "wss://polygon-mainnet.g.alchemy.com");
        assert!(!endpoint.contains("sEcReT"));

        env.insert("RPC_URL".into(), "ünicode-not-a-url".into());
        assert_eq!(load(&env).unwrap().rpc_endpoint(), "<unparseable>");
    }

    #[test]
    fn test_markets_resolve_paths() {
        let markets = Markets::parse(MARKETS).unwrap();
        let paths = markets.paths().unwrap();

        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].borrow_amount, U256::from(1_000_000_000u64));
        assert_eq!(paths[1].tokens.len(), 3);
        assert_eq!(paths[1].borrow_amount, U256::from(250_500_000u64));
        assert_eq!(markets.relays[0].name, "flashbots");
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        let markets = Markets::parse(MARKETS).unwrap();
        load(&base_env()).unwrap().validate(&markets).unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_gas_bounds() {
        let markets = Markets::parse(MARKETS).unwrap();
        let mut env = base_env();
        env.insert("GAS_FLOOR_GWEI".into(), "500".into());
        assert!(load(&env).unwrap().validate(&markets).is_err());

        let mut env = base_env();
        env.insert("FEE_HISTORY_BLOCKS".into(), "5".into());
        assert!(load(&env).unwrap().validate(&markets).is_err());
    }

    #[test]
    fn test_validate_requires_relay_or_fallback() {
        let mut markets = Markets::parse(MARKETS).unwrap();
        markets.relays.clear();
        let mut env = base_env();
        env.insert("PUBLIC_FALLBACK".into(), "false".into());
        assert!(load(&env).unwrap().validate(&markets).is_err());
    }

    #[test]
    fn test_unknown_token_in_path_rejected() {
        let mut markets = Markets::parse(MARKETS).unwrap();
        markets.path_entries[2].enabled = true;
        match markets.paths() {
            Err(ConfigError::Path { path, .. }) => assert_eq!(path, "off"),
            other => panic!("unexpected {:?}", other.map(|p| p.len())),
        }
    }
}
