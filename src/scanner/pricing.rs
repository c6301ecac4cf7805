//! USD Reference Pricing
//!
//! Converts token amounts to USD through a dedicated reference quote
//! (token -> USD stablecoin for one whole token), memoized in the two-tier
//! cache. A static price table is consulted only when the quote fails.

use crate::cache::TwoTierCache;
use crate::quote::QuoteSource;
use crate::types::Token;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Last-resort prices for common tokens
const FALLBACK_PRICES_USD: &[(&str, f64)] = &[
    ("WETH", 3000.0),
    ("ETH", 3000.0),
    ("WBTC", 95000.0),
    ("WMATIC", 0.90),
    ("MATIC", 0.90),
    ("LINK", 15.0),
    ("UNI", 10.0),
];

/// Where a USD price came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    /// The token is the USD reference itself
    Reference,
    /// Stablecoin assumed at $1 after the reference quote failed
    Peg,
    Quote,
    Cache,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsdPrice {
    pub usd: f64,
    pub source: PriceSource,
}

impl UsdPrice {
    /// True when the price did not come from a live or cached quote
    pub fn is_estimated(&self) -> bool {
        matches!(self.source, PriceSource::Fallback | PriceSource::Peg)
    }
}

/// Token -> USD pricer backed by the quote service and the cache
pub struct UsdPricer {
    quotes: Arc<dyn QuoteSource>,
    cache: Arc<TwoTierCache>,
    usd_token: Token,
    stable_symbols: Vec<String>,
    ttl_secs: u64,
    fallback: HashMap<String, f64>,
}

impl UsdPricer {
    pub fn new(
        quotes: Arc<dyn QuoteSource>,
        cache: Arc<TwoTierCache>,
        usd_token: Token,
        stable_symbols: Vec<String>,
        ttl_secs: u64,
    ) -> Self {
        let fallback = FALLBACK_PRICES_USD
            .iter()
            .map(|(s, p)| (s.to_string(), *p))
            .collect();
        Self {
            quotes,
            cache,
            usd_token,
            stable_symbols: stable_symbols.into_iter().map(|s| s.to_uppercase()).collect(),
            ttl_secs,
            fallback,
        }
    }

    pub fn is_stable(&self, token: &Token) -> bool {
        token.address == self.usd_token.address
            || self.stable_symbols.contains(&token.symbol.to_uppercase())
    }

    fn cache_key(token: &Token) -> String {
        format!("price:usd:{:x}", token.address)
    }

    /// USD price of one whole `token`
    pub async fn price_usd(&self, token: &Token) -> Option<UsdPrice> {
        if token.address == self.usd_token.address {
            return Some(UsdPrice {
                usd: 1.0,
                source: PriceSource::Reference,
            });
        }

        let key = Self::cache_key(token);
        if let Some(usd) = self.cache.get::<f64>(&key).await {
            return Some(UsdPrice {
                usd,
                source: PriceSource::Cache,
            });
        }

        if let Some(out) = self
            .quotes
            .get_price(token.address, self.usd_token.address, token.one())
            .await
        {
            let usd = self.usd_token.to_float(out);
            if usd.is_finite() && usd > 0.0 {
                self.cache.set(&key, &usd, self.ttl_secs).await;
                return Some(UsdPrice {
                    usd,
                    source: PriceSource::Quote,
                });
            }
        }

        debug!("USD reference quote for {} failed, using fallback table", token.symbol);
        if self.stable_symbols.contains(&token.symbol.to_uppercase()) {
            return Some(UsdPrice {
                usd: 1.0,
                source: PriceSource::Peg,
            });
        }
        self.fallback
            .get(&token.symbol.to_uppercase())
            .map(|usd| UsdPrice {
                usd: *usd,
                source: PriceSource::Fallback,
            })
    }
}
