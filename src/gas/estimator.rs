//! Fee Estimator
//!
//! Derives a statistically bounded gas-price ceiling from recent base fees
//! and turns it into an EIP-1559 fee bid.
//!
//! Algorithm:
//!     - On a new block height, fetch the full history window again (never
//!       append-only, so missed blocks cannot cause drift).
//!     - ceiling = clamp(mean + k * stddev, floor, max)
//!     - On fetch failure keep the last good ceiling; with no history ever,
//!       fall back to the configured max. The estimator never raises.
//!
//! Concurrency:
//!     Refreshes are serialized by `refresh_lock` and keyed by block height,
//!     so a height is fetched at most once. Readers only take the state lock.

use super::window::{CeilingParams, FeeWindow};
use crate::cache::TwoTierCache;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::types::{gwei_to_wei, wei_to_gwei, FeeBid, FeeSample};
use alloy::eips::BlockNumberOrTag;
use alloy::providers::Provider;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Minimum history window in blocks
pub const MIN_WINDOW_BLOCKS: u64 = 20;

/// Cache key for the last good ceiling
const CEILING_CACHE_KEY: &str = "gas:ceiling";

/// One fee-history fetch
#[derive(Debug, Clone, Default)]
pub struct FeeHistorySnapshot {
    /// Historical base fees, oldest first
    pub samples: Vec<FeeSample>,
    /// Priority fee rewards at the requested percentile (wei), one per block
    pub priority_fees_wei: Vec<u128>,
}

/// Source of block fee history
#[async_trait]
pub trait FeeHistorySource: Send + Sync {
    async fn fee_history(&self, block_count: u64, reward_percentile: f64) -> anyhow::Result<FeeHistorySnapshot>;
}

/// `eth_feeHistory` over an alloy provider
pub struct RpcFeeHistory<P> {
    provider: Arc<P>,
}

impl<P> RpcFeeHistory<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: Provider + 'static> FeeHistorySource for RpcFeeHistory<P> {
    async fn fee_history(&self, block_count: u64, reward_percentile: f64) -> anyhow::Result<FeeHistorySnapshot> {
        let history = self
            .provider
            .get_fee_history(block_count, BlockNumberOrTag::Latest, &[reward_percentile])
            .await?;

        // base_fee_per_gas has block_count + 1 entries; the last one is the
        // projection for the next block, not history.
        let samples = history
            .base_fee_per_gas
            .iter()
            .take(block_count as usize)
            .enumerate()
            .map(|(i, fee)| FeeSample {
                block_number: history.oldest_block + i as u64,
                base_fee_per_gas_gwei: wei_to_gwei(*fee),
            })
            .collect();

        let priority_fees_wei = history
            .reward
            .unwrap_or_default()
            .iter()
            .filter_map(|rewards| rewards.first().copied())
            .collect();

        Ok(FeeHistorySnapshot {
            samples,
            priority_fees_wei,
        })
    }
}

/// Estimator settings
#[derive(Debug, Clone)]
pub struct FeeEstimatorConfig {
    pub window_blocks: u64,
    pub ceiling: CeilingParams,
    /// Percentile requested for priority-fee rewards
    pub reward_percentile: f64,
    /// Priority fee used before any reward history is seen
    pub default_priority_fee_gwei: f64,
    pub cache_ttl_secs: u64,
}

#[derive(Debug)]
struct EstimatorState {
    window: FeeWindow,
    last_refreshed_block: Option<u64>,
    last_good_ceiling: Option<f64>,
    priority_fee_gwei: Option<f64>,
    consecutive_failures: u32,
}

/// Statistical gas-price ceiling estimator
pub struct FeeEstimator {
    source: Arc<dyn FeeHistorySource>,
    cache: Option<Arc<TwoTierCache>>,
    config: FeeEstimatorConfig,
    state: RwLock<EstimatorState>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl FeeEstimator {
    pub fn new(source: Arc<dyn FeeHistorySource>, config: FeeEstimatorConfig) -> Self {
        let window_blocks = config.window_blocks.max(MIN_WINDOW_BLOCKS);
        Self {
            source,
            cache: None,
            config: FeeEstimatorConfig {
                window_blocks,
                ..config
            },
            state: RwLock::new(EstimatorState {
                window: FeeWindow::new(window_blocks as usize),
                last_refreshed_block: None,
                last_good_ceiling: None,
                priority_fee_gwei: None,
                consecutive_failures: 0,
            }),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Publish good ceilings to the shared cache
    pub fn with_cache(mut self, cache: Arc<TwoTierCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Seed the last good ceiling from the cache (previous process run).
    /// Only applies while no ceiling has been computed.
    pub async fn warm_start(&self) {
        let Some(cache) = &self.cache else { return };
        if let Some(ceiling) = cache.get::<f64>(CEILING_CACHE_KEY).await {
            let params = self.config.ceiling;
            if ceiling.is_finite() && ceiling >= params.floor_gwei && ceiling <= params.max_gwei {
                let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
                if state.last_good_ceiling.is_none() {
                    state.last_good_ceiling = Some(ceiling);
                    info!("Gas ceiling warm-started from cache: {:.2} gwei", ceiling);
                }
            }
        }
    }

    /// Refresh the window for a newly observed block height.
    /// Heights at or below the last refreshed height are ignored.
    pub async fn on_new_block(&self, block_number: u64) {
        let _guard = self.refresh_lock.lock().await;

        {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            if matches!(state.last_refreshed_block, Some(last) if block_number <= last) {
                return;
            }
        }

        let policy = RetryPolicy::new(2, Duration::from_millis(100));
        let source = Arc::clone(&self.source);
        let window_blocks = self.config.window_blocks;
        let percentile = self.config.reward_percentile;
        let result = retry_with_backoff("fee history", policy, || {
            let source = Arc::clone(&source);
            async move { source.fee_history(window_blocks, percentile).await }
        })
        .await;

        let published = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.last_refreshed_block = Some(block_number);

            match result {
                Ok(snapshot) if !snapshot.samples.is_empty() => {
                    state.window.replace(snapshot.samples);
                    let ceiling = self.config.ceiling.ceiling_for(&state.window.fees_gwei());
                    state.last_good_ceiling = Some(ceiling);
                    state.consecutive_failures = 0;

                    let mut rewards: Vec<f64> = snapshot
                        .priority_fees_wei
                        .into_iter()
                        .filter(|w| *w > 0)
                        .map(wei_to_gwei)
                        .collect();
                    if !rewards.is_empty() {
                        rewards.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                        state.priority_fee_gwei = Some(rewards[rewards.len() / 2]);
                    }

                    debug!(
                        "Gas ceiling @ block {}: {:.2} gwei ({} samples, latest base {:.2})",
                        block_number,
                        ceiling,
                        state.window.len(),
                        state.window.latest().map(|s| s.base_fee_per_gas_gwei).unwrap_or(0.0)
                    );
                    Some(ceiling)
                }
                Ok(_) => {
                    state.consecutive_failures += 1;
                    warn!("Fee history @ block {} returned no samples - keeping last ceiling", block_number);
                    None
                }
                Err(e) => {
                    state.consecutive_failures += 1;
                    warn!(
                        "Fee history @ block {} failed ({} in a row): {} - keeping {:.2} gwei",
                        block_number,
                        state.consecutive_failures,
                        e,
                        state.last_good_ceiling.unwrap_or(self.config.ceiling.max_gwei)
                    );
                    None
                }
            }
        };

        if let (Some(ceiling), Some(cache)) = (published, &self.cache) {
            cache.set(CEILING_CACHE_KEY, &ceiling, self.config.cache_ttl_secs).await;
        }
    }

    /// Last good ceiling, or the configured max if none was ever computed
    pub fn current_ceiling_gwei(&self) -> f64 {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .last_good_ceiling
            .unwrap_or(self.config.ceiling.max_gwei)
    }

    /// EIP-1559 bid capped at the current ceiling.
    ///
    /// Priority fee is halved until it no longer exceeds the max fee.
    /// `acceptable` is false when the latest base fee plus tip already
    /// exceeds the ceiling.
    pub fn optimal_fee_bid(&self) -> FeeBid {
        let ceiling_gwei = self.current_ceiling_gwei();
        let (priority_gwei, latest_base_gwei) = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            (
                state
                    .priority_fee_gwei
                    .unwrap_or(self.config.default_priority_fee_gwei),
                state.window.latest().map(|s| s.base_fee_per_gas_gwei),
            )
        };

        let max_fee = gwei_to_wei(ceiling_gwei);
        let mut priority = gwei_to_wei(priority_gwei);
        while priority > max_fee && priority > 0 {
            priority /= 2;
        }

        let acceptable = match latest_base_gwei {
            Some(base) => gwei_to_wei(base).saturating_add(priority) <= max_fee,
            None => true,
        };

        FeeBid {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority,
            acceptable,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Scripted fee-history source
    struct ScriptedSource {
        fees_gwei: Vec<f64>,
        reward_gwei: f64,
        failing: AtomicBool,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(fees_gwei: Vec<f64>, reward_gwei: f64) -> Arc<Self> {
            Arc::new(Self {
                fees_gwei,
                reward_gwei,
                failing: AtomicBool::new(false),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl FeeHistorySource for ScriptedSource {
        async fn fee_history(&self, _block_count: u64, _pct: f64) -> anyhow::Result<FeeHistorySnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("rpc timeout");
            }
            Ok(FeeHistorySnapshot {
                samples: self
                    .fees_gwei
                    .iter()
                    .enumerate()
                    .map(|(i, f)| FeeSample {
                        block_number: 100 + i as u64,
                        base_fee_per_gas_gwei: *f,
                    })
                    .collect(),
                priority_fees_wei: vec![gwei_to_wei(self.reward_gwei); self.fees_gwei.len()],
            })
        }
    }

    fn config() -> FeeEstimatorConfig {
        FeeEstimatorConfig {
            window_blocks: 20,
            ceiling: CeilingParams {
                multiplier: 2.0,
                floor_gwei: 1.0,
                max_gwei: 100.0,
            },
            reward_percentile: 50.0,
            default_priority_fee_gwei: 2.0,
            cache_ttl_secs: 60,
        }
    }

    #[tokio::test]
    async fn test_no_history_returns_configured_max() {
        let source = ScriptedSource::new(vec![], 1.0);
        let estimator = FeeEstimator::new(source, config());

        assert_eq!(estimator.current_ceiling_gwei(), 100.0);
        estimator.on_new_block(1).await;
        assert_eq!(estimator.current_ceiling_gwei(), 100.0);
    }

    #[tokio::test]
    async fn test_ceiling_from_history() {
        let source = ScriptedSource::new(vec![10.0, 30.0], 1.5);
        let estimator = FeeEstimator::new(source, config());

        estimator.on_new_block(200).await;
        assert!((estimator.current_ceiling_gwei() - 40.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failures_keep_last_good_value() {
        let source = ScriptedSource::new(vec![10.0, 30.0], 1.5);
        let estimator = FeeEstimator::new(source.clone(), config());
        estimator.on_new_block(200).await;
        let good = estimator.current_ceiling_gwei();

        source.failing.store(true, Ordering::SeqCst);
        for height in 201..=205 {
            estimator.on_new_block(height).await;
            assert_eq!(estimator.current_ceiling_gwei(), good);
        }
        assert_eq!(estimator.consecutive_failures(), 5);
    }

    #[tokio::test]
    async fn test_same_height_fetched_once() {
        let source = ScriptedSource::new(vec![10.0, 30.0], 1.5);
        let estimator = FeeEstimator::new(source.clone(), config());

        estimator.on_new_block(300).await;
        estimator.on_new_block(300).await;
        estimator.on_new_block(299).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_priority_fee_halved_below_max_fee() {
        // ceiling clamps to floor 1 gwei; reward 5 gwei must be halved to <= 1
        let source = ScriptedSource::new(vec![0.2; 20], 5.0);
        let estimator = FeeEstimator::new(source, config());
        estimator.on_new_block(1).await;

        let bid = estimator.optimal_fee_bid();
        assert_eq!(bid.max_fee_per_gas, 1_000_000_000);
        assert!(bid.max_priority_fee_per_gas <= bid.max_fee_per_gas);
        assert_eq!(bid.max_priority_fee_per_gas, 625_000_000);
        assert!(bid.acceptable);
    }

    #[tokio::test]
    async fn test_bid_unacceptable_when_base_above_ceiling() {
        // Latest base fee 300 gwei but ceiling capped at 100
        let mut fees = vec![1.0; 19];
        fees.push(300.0);
        let source = ScriptedSource::new(fees, 1.0);
        let estimator = FeeEstimator::new(source, config());
        estimator.on_new_block(1).await;

        assert!(!estimator.optimal_fee_bid().acceptable);
    }

    #[tokio::test]
    async fn test_warm_start_from_cache() {
        let cache = Arc::new(TwoTierCache::new(CacheConfig::default()));
        let source = ScriptedSource::new(vec![10.0, 30.0], 1.5);
        let first = FeeEstimator::new(source, config()).with_cache(Arc::clone(&cache));
        first.on_new_block(10).await;

        let failing = ScriptedSource::new(vec![], 1.0);
        failing.failing.store(true, Ordering::SeqCst);
        let second = FeeEstimator::new(failing, config()).with_cache(cache);
        second.warm_start().await;
        assert!((second.current_ceiling_gwei() - 40.0).abs() < 1e-9);
    }
}
