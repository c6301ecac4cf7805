//! Opportunity Scanner
//!
//! Purpose:
//!     Price every configured cycle hop-by-hop through the quote service and
//!     emit the ones whose round trip beats the strategy's minimum threshold.
//!
//! Strategies:
//!     - RoundTrip:   A -> B -> A, stablecoin origin (stable threshold)
//!     - Alternative: A -> B -> A, non-stable origin (volatile threshold)
//!     - Triangular:  A -> B -> C -> A (triangular threshold)
//!     - PriceImpact: small vs large probe on the first leg of a two-token
//!       path. Informational only, never executable.
//!
//! Notes:
//!     - External calls are paced by a fixed inter-call gap
//!     - Executable leg quotes are memoized in the two-tier cache for a short TTL
//!     - Any failure on a path skips that path only

use super::pricing::UsdPricer;
use crate::cache::TwoTierCache;
use crate::quote::QuoteSource;
use crate::types::{u256_to_f64, ArbitragePath, Opportunity, PricedLeg, Strategy, SwapQuote};
use alloy::primitives::{Address, U256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::{debug, info};

/// Scanner thresholds and pacing
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Round-trip minimum profit (%), stablecoin origin
    pub min_profit_stable_pct: f64,
    /// Round-trip minimum profit (%), non-stable origin
    pub min_profit_volatile_pct: f64,
    pub min_profit_triangular_pct: f64,
    /// Minimum rate divergence (%) between small and large probe
    pub price_impact_threshold_pct: f64,
    pub price_impact_probe: bool,
    /// Small probe = borrow amount / divisor
    pub probe_divisor: u64,
    pub inter_call_delay: Duration,
    /// 0 disables leg-quote caching
    pub quote_ttl_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_profit_stable_pct: 0.3,
            min_profit_volatile_pct: 0.5,
            min_profit_triangular_pct: 0.4,
            price_impact_threshold_pct: 1.0,
            price_impact_probe: true,
            probe_divisor: 100,
            inter_call_delay: Duration::from_millis(250),
            quote_ttl_secs: 2,
        }
    }
}

/// Why a path produced no opportunity this cycle
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    QuoteUnavailable { leg: usize },
    NotProfitable,
    BelowThreshold { profit_percent: f64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SkipReason::QuoteUnavailable { leg } => write!(f, "no quote for leg {}", leg),
            SkipReason::NotProfitable => write!(f, "not profitable"),
            SkipReason::BelowThreshold { profit_percent } => {
                write!(f, "below threshold ({:.4}%)", profit_percent)
            }
        }
    }
}

/// Result of one scan cycle
#[derive(Debug, Default)]
pub struct ScanReport {
    pub block_number: u64,
    pub scanned: usize,
    pub skipped: Vec<(String, SkipReason)>,
    pub opportunities: Vec<Opportunity>,
}

impl ScanReport {
    /// Most profitable opportunity that carries complete execution data
    pub fn best_executable(&self) -> Option<&Opportunity> {
        self.opportunities
            .iter()
            .filter(|o| o.is_executable())
            .max_by(|a, b| a.estimated_profit_usd.total_cmp(&b.estimated_profit_usd))
    }
}

/// Minimum gap between consecutive quote-service calls. A zero gap
/// disables pacing.
fn call_limiter(gap: Duration) -> Option<DefaultDirectRateLimiter> {
    Quota::with_period(gap).map(RateLimiter::direct)
}

pub struct OpportunityScanner {
    config: ScannerConfig,
    quotes: Arc<dyn QuoteSource>,
    cache: Arc<TwoTierCache>,
    pricer: UsdPricer,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl OpportunityScanner {
    pub fn new(
        config: ScannerConfig,
        quotes: Arc<dyn QuoteSource>,
        cache: Arc<TwoTierCache>,
        pricer: UsdPricer,
    ) -> Self {
        let limiter = call_limiter(config.inter_call_delay);
        Self {
            config,
            quotes,
            cache,
            pricer,
            limiter,
        }
    }

    pub fn pricer(&self) -> &UsdPricer {
        &self.pricer
    }

    async fn pace(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    pub fn classify(&self, path: &ArbitragePath) -> Strategy {
        if path.hop_count() >= 3 {
            Strategy::Triangular
        } else if self.pricer.is_stable(path.origin()) {
            Strategy::RoundTrip
        } else {
            Strategy::Alternative
        }
    }

    fn threshold_pct(&self, strategy: Strategy) -> f64 {
        match strategy {
            Strategy::RoundTrip => self.config.min_profit_stable_pct,
            Strategy::Alternative => self.config.min_profit_volatile_pct,
            Strategy::Triangular => self.config.min_profit_triangular_pct,
            Strategy::PriceImpact => self.config.price_impact_threshold_pct,
        }
    }

    /// Scan all paths and return the emitted opportunities
    pub async fn scan(&self, paths: &[ArbitragePath], block_number: u64) -> Vec<Opportunity> {
        self.scan_report(paths, block_number).await.opportunities
    }

    /// Scan all paths, keeping per-path skip reasons for the cycle report
    pub async fn scan_report(&self, paths: &[ArbitragePath], block_number: u64) -> ScanReport {
        let mut report = ScanReport {
            block_number,
            ..Default::default()
        };

        for path in paths {
            report.scanned += 1;
            let strategy = self.classify(path);

            let legs = match self.price_cycle(path).await {
                Ok(legs) => legs,
                Err(reason) => {
                    debug!("{} skipped: {}", path, reason);
                    report.skipped.push((path.name.clone(), reason));
                    continue;
                }
            };

            if path.hop_count() == 2 && self.config.price_impact_probe {
                if let Some(opp) = self.probe_price_impact(path, &legs[0], block_number).await {
                    report.opportunities.push(opp);
                }
            }

            match self.evaluate(path, strategy, legs, block_number).await {
                Ok(opp) => {
                    info!(
                        "OPPORTUNITY {} {} profit={:.4}% (${:.2}) confidence={:.2}",
                        strategy, path, opp.profit_percent, opp.estimated_profit_usd, opp.confidence
                    );
                    report.opportunities.push(opp);
                }
                Err(reason) => {
                    debug!("{} skipped: {}", path, reason);
                    report.skipped.push((path.name.clone(), reason));
                }
            }
        }

        report
    }

    /// Chain executable quotes across every leg of the cycle
    async fn price_cycle(&self, path: &ArbitragePath) -> Result<Vec<PricedLeg>, SkipReason> {
        let mut amount = path.borrow_amount;
        let mut legs = Vec::with_capacity(path.hop_count());

        for (i, (sell, buy)) in path.legs().into_iter().enumerate() {
            let quote = self
                .quote_leg(sell.address, buy.address, amount)
                .await
                .ok_or(SkipReason::QuoteUnavailable { leg: i })?;
            let next = quote.output_amount;
            legs.push(PricedLeg {
                sell_token: sell.address,
                buy_token: buy.address,
                sell_amount: amount,
                quote,
            });
            amount = next;
        }

        Ok(legs)
    }

    async fn quote_leg(&self, sell: Address, buy: Address, amount: U256) -> Option<SwapQuote> {
        let ttl = self.config.quote_ttl_secs;
        let key = format!("quote:{:x}:{:x}:{}", sell, buy, amount);

        if ttl > 0 {
            if let Some(cached) = self.cache.get::<SwapQuote>(&key).await {
                return Some(cached);
            }
        }

        self.pace().await;
        let quote = self.quotes.get_quote(sell, buy, amount).await?;
        if quote.output_amount.is_zero() {
            return None;
        }
        if ttl > 0 {
            self.cache.set(&key, &quote, ttl).await;
        }
        Some(quote)
    }

    async fn evaluate(
        &self,
        path: &ArbitragePath,
        strategy: Strategy,
        legs: Vec<PricedLeg>,
        block_number: u64,
    ) -> Result<Opportunity, SkipReason> {
        let initial = path.borrow_amount;
        let final_amount = legs
            .last()
            .map(|l| l.quote.output_amount)
            .unwrap_or_default();

        if final_amount <= initial || initial.is_zero() {
            return Err(SkipReason::NotProfitable);
        }

        let gain = final_amount - initial;
        let profit_percent = u256_to_f64(gain) / u256_to_f64(initial) * 100.0;
        if profit_percent <= self.threshold_pct(strategy) {
            return Err(SkipReason::BelowThreshold { profit_percent });
        }

        let origin = path.origin();
        let price = self.pricer.price_usd(origin).await;
        let estimated_profit_usd = price
            .map(|p| origin.to_float(gain) * p.usd)
            .unwrap_or(0.0);
        let estimated = price.map(|p| p.is_estimated()).unwrap_or(true);

        Ok(Opportunity {
            path: path.clone(),
            strategy,
            profit_percent,
            estimated_profit_usd,
            confidence: confidence(strategy, estimated),
            initial_amount: initial,
            final_amount,
            legs,
            block_number,
        })
    }

    /// Compare the first leg's rate for a small probe against the full borrow
    async fn probe_price_impact(
        &self,
        path: &ArbitragePath,
        large: &PricedLeg,
        block_number: u64,
    ) -> Option<Opportunity> {
        let small_in = large.sell_amount / U256::from(self.config.probe_divisor.max(1));
        if small_in.is_zero() {
            return None;
        }

        self.pace().await;
        let small_out = self
            .quotes
            .get_price(large.sell_token, large.buy_token, small_in)
            .await?;

        let rate_small = u256_to_f64(small_out) / u256_to_f64(small_in);
        let rate_large = u256_to_f64(large.quote.output_amount) / u256_to_f64(large.sell_amount);
        if !rate_small.is_finite() || rate_small <= 0.0 {
            return None;
        }

        let impact_pct = (rate_small - rate_large) / rate_small * 100.0;
        if !impact_pct.is_finite() || impact_pct <= self.config.price_impact_threshold_pct {
            return None;
        }

        let origin = path.origin();
        let price = self.pricer.price_usd(origin).await;
        let notional_usd = price
            .map(|p| origin.to_float(path.borrow_amount) * p.usd)
            .unwrap_or(0.0);
        let estimated = price.map(|p| p.is_estimated()).unwrap_or(true);

        debug!("Price impact {:.3}% on {}", impact_pct, path);
        Some(Opportunity {
            path: path.clone(),
            strategy: Strategy::PriceImpact,
            profit_percent: impact_pct,
            estimated_profit_usd: notional_usd * impact_pct / 100.0,
            confidence: confidence(Strategy::PriceImpact, estimated),
            initial_amount: path.borrow_amount,
            final_amount: large.quote.output_amount,
            legs: Vec::new(),
            block_number,
        })
    }
}

/// Strategy base confidence, halved when the USD price was estimated
fn confidence(strategy: Strategy, estimated_price: bool) -> f64 {
    let base = strategy.base_confidence();
    let c = if estimated_price { base * 0.5 } else { base };
    c.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::types::Token;
    use alloy::primitives::Bytes;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fixed outputs per (sell, buy) pair, regardless of amount
    #[derive(Default)]
    struct RouteQuotes {
        quotes: HashMap<(Address, Address), U256>,
        prices: HashMap<(Address, Address), U256>,
        quote_calls: AtomicU32,
    }

    #[async_trait]
    impl QuoteSource for RouteQuotes {
        async fn get_price(&self, sell: Address, buy: Address, _amount: U256) -> Option<U256> {
            self.prices.get(&(sell, buy)).copied()
        }

        async fn get_quote(&self, sell: Address, buy: Address, _amount: U256) -> Option<SwapQuote> {
            self.quote_calls.fetch_add(1, Ordering::SeqCst);
            self.quotes.get(&(sell, buy)).map(|out| SwapQuote {
                output_amount: *out,
                call_data: Bytes::from(vec![0xab, sell.0[0], buy.0[0]]),
                target_address: Address::repeat_byte(0xee),
            })
        }
    }

    fn usdc() -> Token {
        Token::new("USDC", Address::repeat_byte(1), 6)
    }

    fn weth() -> Token {
        Token::new("WETH", Address::repeat_byte(2), 18)
    }

    fn dai() -> Token {
        Token::new("DAI", Address::repeat_byte(3), 18)
    }

    fn path(name: &str, tokens: Vec<Token>, borrow: u64) -> ArbitragePath {
        ArbitragePath {
            name: name.to_string(),
            tokens,
            borrow_amount: U256::from(borrow),
        }
    }

    fn config() -> ScannerConfig {
        ScannerConfig {
            min_profit_stable_pct: 0.3,
            price_impact_probe: false,
            inter_call_delay: Duration::ZERO,
            quote_ttl_secs: 0,
            ..Default::default()
        }
    }

    fn scanner(source: RouteQuotes, config: ScannerConfig) -> (OpportunityScanner, Arc<RouteQuotes>) {
        let source = Arc::new(source);
        let cache = Arc::new(TwoTierCache::new(CacheConfig::default()));
        let pricer = UsdPricer::new(
            source.clone(),
            cache.clone(),
            usdc(),
            vec!["USDC".into(), "USDT".into(), "DAI".into()],
            30,
        );
        (OpportunityScanner::new(config, source.clone(), cache, pricer), source)
    }

    fn round_trip_source(final_out: u64) -> RouteQuotes {
        let mut source = RouteQuotes::default();
        source.quotes.insert(
            (usdc().address, weth().address),
            U256::from(500_000_000_000_000_000u128),
        );
        source
            .quotes
            .insert((weth().address, usdc().address), U256::from(final_out));
        source
    }

    #[tokio::test]
    async fn test_round_trip_gain_above_threshold_is_emitted() {
        let (scanner, _) = scanner(round_trip_source(1_005_000_000), config());
        let paths = vec![path("usdc-weth", vec![usdc(), weth()], 1_000_000_000)];

        let opps = scanner.scan(&paths, 100).await;

        assert_eq!(opps.len(), 1);
        let opp = &opps[0];
        assert_eq!(opp.strategy, Strategy::RoundTrip);
        assert!((opp.profit_percent - 0.5).abs() < 1e-9);
        assert!((opp.estimated_profit_usd - 5.0).abs() < 1e-9);
        assert!((opp.confidence - 0.8).abs() < 1e-9);
        assert!(opp.is_executable());
        assert_eq!(opp.legs.len(), 2);
        assert_eq!(opp.legs[1].sell_amount, U256::from(500_000_000_000_000_000u128));
    }

    #[tokio::test]
    async fn test_zero_gain_emits_nothing() {
        let (scanner, _) = scanner(round_trip_source(1_000_000_000), config());
        let paths = vec![path("usdc-weth", vec![usdc(), weth()], 1_000_000_000)];

        let report = scanner.scan_report(&paths, 100).await;

        assert!(report.opportunities.is_empty());
        assert_eq!(report.skipped[0].1, SkipReason::NotProfitable);
    }

    #[tokio::test]
    async fn test_loss_never_emitted() {
        for out in [1u64, 999_999_999, 1_000_000_000] {
            let (scanner, _) = scanner(round_trip_source(out), config());
            let paths = vec![path("usdc-weth", vec![usdc(), weth()], 1_000_000_000)];
            assert!(scanner.scan(&paths, 1).await.is_empty(), "out={}", out);
        }
    }

    #[tokio::test]
    async fn test_gain_below_threshold_skipped() {
        let (scanner, _) = scanner(round_trip_source(1_002_000_000), config());
        let paths = vec![path("usdc-weth", vec![usdc(), weth()], 1_000_000_000)];

        let report = scanner.scan_report(&paths, 1).await;
        assert!(report.opportunities.is_empty());
        assert!(matches!(report.skipped[0].1, SkipReason::BelowThreshold { .. }));
    }

    #[tokio::test]
    async fn test_failing_path_does_not_abort_scan() {
        let mut source = round_trip_source(1_005_000_000);
        // DAI leg has no quote
        source
            .quotes
            .insert((usdc().address, dai().address), U256::from(1_000u64));
        let (scanner, _) = scanner(source, config());

        let paths = vec![
            path("usdc-dai", vec![usdc(), dai()], 1_000_000_000),
            path("usdc-weth", vec![usdc(), weth()], 1_000_000_000),
        ];
        let report = scanner.scan_report(&paths, 1).await;

        assert_eq!(report.scanned, 2);
        assert_eq!(report.opportunities.len(), 1);
        assert_eq!(report.opportunities[0].path.name, "usdc-weth");
        assert_eq!(report.skipped[0].1, SkipReason::QuoteUnavailable { leg: 1 });
    }

    #[tokio::test]
    async fn test_triangular_uses_own_threshold() {
        let mut source = RouteQuotes::default();
        source.quotes.insert((usdc().address, weth().address), U256::from(5u64) * U256::from(10u64).pow(U256::from(17)));
        source.quotes.insert((weth().address, dai().address), U256::from(1_000u64) * U256::from(10u64).pow(U256::from(18)));
        source.quotes.insert((dai().address, usdc().address), U256::from(1_004_500_000u64));

        let mut cfg = config();
        cfg.min_profit_triangular_pct = 0.4;
        let (scanner, _) = scanner(source, cfg);

        let paths = vec![path("tri", vec![usdc(), weth(), dai()], 1_000_000_000)];
        let opps = scanner.scan(&paths, 1).await;

        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].strategy, Strategy::Triangular);
        assert_eq!(opps[0].legs.len(), 3);
        assert!((opps[0].profit_percent - 0.45).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_volatile_origin_uses_volatile_threshold_and_fallback_price() {
        let mut source = RouteQuotes::default();
        let one_eth = U256::from(10u64).pow(U256::from(18));
        source.quotes.insert((weth().address, usdc().address), U256::from(3_000_000_000u64));
        // 1.006 WETH back
        source.quotes.insert((usdc().address, weth().address), one_eth + one_eth * U256::from(6u64) / U256::from(1000u64));

        let (scanner, _) = scanner(source, config());
        let paths = vec![path("weth-usdc", vec![weth(), usdc()], 1_000_000_000_000_000_000)];
        let opps = scanner.scan(&paths, 1).await;

        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].strategy, Strategy::Alternative);
        // No reference quote -> fallback table -> halved confidence
        assert!((opps[0].confidence - 0.3).abs() < 1e-9);
        assert!(opps[0].estimated_profit_usd > 0.0);
    }

    #[tokio::test]
    async fn test_price_impact_is_informational() {
        let mut source = round_trip_source(1_000_000_000);
        // small probe: 10 USDC -> 0.0051 WETH (rate 2% better than the full size)
        source.prices.insert(
            (usdc().address, weth().address),
            U256::from(5_100_000_000_000_000u128),
        );
        let mut cfg = config();
        cfg.price_impact_probe = true;
        cfg.price_impact_threshold_pct = 1.0;
        let (scanner, _) = scanner(source, cfg);

        let paths = vec![path("usdc-weth", vec![usdc(), weth()], 1_000_000_000)];
        let report = scanner.scan_report(&paths, 1).await;

        assert_eq!(report.opportunities.len(), 1);
        let opp = &report.opportunities[0];
        assert_eq!(opp.strategy, Strategy::PriceImpact);
        assert!(opp.profit_percent > 1.9 && opp.profit_percent < 2.0);
        assert!(!opp.is_executable());
        assert!(report.best_executable().is_none());
    }

    #[tokio::test]
    async fn test_leg_quotes_are_cached() {
        let mut cfg = config();
        cfg.quote_ttl_secs = 30;
        let (scanner, source) = scanner(round_trip_source(1_005_000_000), cfg);
        let paths = vec![path("usdc-weth", vec![usdc(), weth()], 1_000_000_000)];

        scanner.scan(&paths, 1).await;
        let opps = scanner.scan(&paths, 2).await;

        assert_eq!(source.quote_calls.load(Ordering::SeqCst), 2);
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].legs[0].quote.target_address, Address::repeat_byte(0xee));
    }

    #[tokio::test]
    async fn test_calls_are_paced() {
        let mut cfg = config();
        cfg.inter_call_delay = Duration::from_millis(100);
        let (scanner, _) = scanner(round_trip_source(1_005_000_000), cfg);
        let paths = vec![path("usdc-weth", vec![usdc(), weth()], 1_000_000_000)];

        // two legs: the second call waits one full gap
        let started = std::time::Instant::now();
        scanner.scan(&paths, 1).await;
        assert!(started.elapsed() >= Duration::from_millis(90));
    }
}
