//! Scan Cycle Pipeline
//!
//! One cycle per new block height:
//!     fee refresh -> cooldown filter -> scan -> best executable opportunity
//!     -> decision gate -> submission -> cooldown bookkeeping -> cycle report
//!
//! Gate:
//!     net = estimated_profit_usd - gas_units * ceiling_gwei * 1e-9 * native_usd
//!     execute only if the fee bid is acceptable and net >= min_profit_usd
//!
//! Block notifications arrive on a watch channel: a cycle in progress always
//! completes, and only the newest height seen meanwhile is scanned next.

use crate::gas::FeeEstimator;
use crate::scanner::{OpportunityScanner, PathCooldown};
use crate::submission::{ExecutionReport, SubmissionManager, SubmissionOutcome};
use crate::types::{ArbitragePath, Opportunity, Strategy, Token};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Decision gate settings
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub min_profit_usd: f64,
    /// Gas units charged per execution (arbitrage + optional withdrawal)
    pub gas_units: u64,
}

/// What the cycle ended up doing
#[derive(Debug, Clone, PartialEq)]
pub enum CycleDecision {
    /// Nothing worth gating
    Skipped(String),
    /// Opportunity found but rejected by the gate
    Profitable { rejected: String },
    DryRun,
    Executed { handle: String },
    Failed(String),
}

impl fmt::Display for CycleDecision {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CycleDecision::Skipped(reason) => write!(f, "skipped ({})", reason),
            CycleDecision::Profitable { rejected } => write!(f, "profitable, not executed ({})", rejected),
            CycleDecision::DryRun => write!(f, "dry run"),
            CycleDecision::Executed { handle } => write!(f, "executed ({})", handle),
            CycleDecision::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// One line of decision history per block
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub block_number: u64,
    pub scanned: usize,
    pub suppressed: usize,
    pub skipped: usize,
    pub opportunities: usize,
    pub best: Option<(Strategy, f64, f64)>,
    pub gas_cost_usd: Option<f64>,
    pub decision: CycleDecision,
    pub execution: Option<ExecutionReport>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineStats {
    pub cycles: u64,
    pub opportunities: u64,
    pub executed: u64,
    pub failed: u64,
}

/// Net USD profit after gas, or the rejection reason
pub fn gate(opp_usd: f64, gas_cost_usd: f64, min_profit_usd: f64) -> Result<f64, String> {
    let net = opp_usd - gas_cost_usd;
    if !net.is_finite() {
        return Err("profit not computable".to_string());
    }
    if net < min_profit_usd {
        return Err(format!(
            "net ${:.2} (gross ${:.2} - gas ${:.2}) below ${:.2}",
            net, opp_usd, gas_cost_usd, min_profit_usd
        ));
    }
    Ok(net)
}

pub struct Pipeline {
    scanner: OpportunityScanner,
    fees: Arc<FeeEstimator>,
    submission: SubmissionManager,
    cooldown: PathCooldown,
    paths: Vec<ArbitragePath>,
    native_token: Token,
    config: GateConfig,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(
        scanner: OpportunityScanner,
        fees: Arc<FeeEstimator>,
        submission: SubmissionManager,
        cooldown: PathCooldown,
        paths: Vec<ArbitragePath>,
        native_token: Token,
        config: GateConfig,
    ) -> Self {
        Self {
            scanner,
            fees,
            submission,
            cooldown,
            paths,
            native_token,
            config,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// USD cost of one execution at the current ceiling
    async fn gas_cost_usd(&self) -> Option<f64> {
        let native = self.scanner.pricer().price_usd(&self.native_token).await?;
        let gwei = self.fees.current_ceiling_gwei();
        Some(self.config.gas_units as f64 * gwei * 1e-9 * native.usd)
    }

    pub async fn run_cycle(&mut self, block_number: u64) -> CycleReport {
        self.stats.cycles += 1;
        self.fees.on_new_block(block_number).await;

        self.cooldown.cleanup(block_number);
        let active: Vec<ArbitragePath> = self
            .paths
            .iter()
            .filter(|p| !self.cooldown.is_path_suppressed(&p.name, block_number))
            .cloned()
            .collect();
        let suppressed = self.paths.len() - active.len();

        let scan = self.scanner.scan_report(&active, block_number).await;
        self.stats.opportunities += scan.opportunities.len() as u64;

        let mut report = CycleReport {
            block_number,
            scanned: scan.scanned,
            suppressed,
            skipped: scan.skipped.len(),
            opportunities: scan.opportunities.len(),
            best: None,
            gas_cost_usd: None,
            decision: CycleDecision::Skipped("no executable opportunity".to_string()),
            execution: None,
        };

        let Some(best) = scan.best_executable() else {
            log_cycle(&report);
            return report;
        };
        report.best = Some((best.strategy, best.profit_percent, best.estimated_profit_usd));

        let decision = self.decide_and_execute(best, &mut report).await;
        report.decision = decision;
        log_cycle(&report);
        report
    }

    async fn decide_and_execute(&mut self, best: &Opportunity, report: &mut CycleReport) -> CycleDecision {
        let bid = self.fees.optimal_fee_bid();
        if !bid.acceptable {
            return CycleDecision::Profitable {
                rejected: format!(
                    "base fee above ceiling {:.2} gwei",
                    self.fees.current_ceiling_gwei()
                ),
            };
        }

        let Some(gas_cost) = self.gas_cost_usd().await else {
            return CycleDecision::Profitable {
                rejected: format!("no USD price for {}", self.native_token.symbol),
            };
        };
        report.gas_cost_usd = Some(gas_cost);

        if let Err(reason) = gate(best.estimated_profit_usd, gas_cost, self.config.min_profit_usd) {
            return CycleDecision::Profitable { rejected: reason };
        }

        let execution = self.submission.execute(best, &bid).await;
        let decision = match &execution.outcome {
            SubmissionOutcome::Included { .. } => {
                self.stats.executed += 1;
                self.cooldown.record_success(&best.path.name, best.strategy);
                CycleDecision::Executed {
                    handle: execution.handle.clone().unwrap_or_default(),
                }
            }
            SubmissionOutcome::DryRun => CycleDecision::DryRun,
            outcome => {
                self.stats.failed += 1;
                if outcome.is_market_failure() {
                    self.cooldown
                        .record_failure(&best.path.name, best.strategy, report.block_number);
                }
                CycleDecision::Failed(outcome.to_string())
            }
        };
        report.execution = Some(execution);
        decision
    }

    /// Drive cycles from block notifications until shutdown or the block
    /// source goes away.
    pub async fn run(mut self, mut blocks: watch::Receiver<u64>, mut shutdown: watch::Receiver<bool>) -> PipelineStats {
        let mut last_block = 0u64;
        loop {
            tokio::select! {
                changed = blocks.changed() => {
                    if changed.is_err() {
                        warn!("Block source closed, stopping pipeline");
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    info!("Shutdown requested, stopping pipeline");
                    break;
                }
            }

            let block = *blocks.borrow_and_update();
            if block <= last_block {
                continue;
            }
            if last_block != 0 && block > last_block + 1 {
                info!("Skipped {} stale block(s) while scanning", block - last_block - 1);
            }
            last_block = block;

            self.run_cycle(block).await;

            if self.stats.cycles % 100 == 0 {
                let s = self.stats;
                info!(
                    "Cycle {} | {} opps found | {} executed | {} failed | {} paths cooling down",
                    s.cycles,
                    s.opportunities,
                    s.executed,
                    s.failed,
                    self.cooldown.active_count()
                );
            }
        }
        self.stats
    }
}

fn log_cycle(report: &CycleReport) {
    let (strategy, profit_pct, profit_usd) = match report.best {
        Some((s, pct, usd)) => (s.to_string(), pct, usd),
        None => ("-".to_string(), 0.0, 0.0),
    };
    info!(
        block = report.block_number,
        scanned = report.scanned,
        suppressed = report.suppressed,
        skipped = report.skipped,
        opportunities = report.opportunities,
        best_strategy = %strategy,
        best_profit_pct = profit_pct,
        best_profit_usd = profit_usd,
        gas_cost_usd = report.gas_cost_usd.unwrap_or_default(),
        decision = %report.decision,
        "scan cycle"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, TwoTierCache};
    use crate::gas::{CeilingParams, FeeEstimatorConfig, FeeHistorySnapshot, FeeHistorySource};
    use crate::quote::QuoteSource;
    use crate::scanner::{ScannerConfig, UsdPricer};
    use crate::submission::bundle::tests::TEST_KEY;
    use crate::submission::{BundleBuilder, BundleConfig, ChainClient, MinedReceipt, SubmissionConfig};
    use crate::types::{gwei_to_wei, FeeSample, SwapQuote};
    use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
    use alloy::signers::local::PrivateKeySigner;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    struct FixedFees(f64);

    #[async_trait]
    impl FeeHistorySource for FixedFees {
        async fn fee_history(&self, block_count: u64, _pct: f64) -> anyhow::Result<FeeHistorySnapshot> {
            Ok(FeeHistorySnapshot {
                samples: (0..block_count)
                    .map(|i| FeeSample {
                        block_number: i,
                        base_fee_per_gas_gwei: self.0,
                    })
                    .collect(),
                priority_fees_wei: vec![gwei_to_wei(1.0); block_count as usize],
            })
        }
    }

    /// USDC -> WETH -> USDC returning `final_out`; WETH priced at $2000
    struct Quotes {
        final_out: u64,
    }

    #[async_trait]
    impl QuoteSource for Quotes {
        async fn get_price(&self, sell: Address, _buy: Address, _amount: U256) -> Option<U256> {
            (sell == weth().address).then(|| U256::from(2_000_000_000u64))
        }

        async fn get_quote(&self, sell: Address, _buy: Address, _amount: U256) -> Option<SwapQuote> {
            let out = if sell == usdc().address {
                U256::from(500_000_000_000_000_000u128)
            } else {
                U256::from(self.final_out)
            };
            Some(SwapQuote {
                output_amount: out,
                call_data: Bytes::from(vec![1, 2, 3]),
                target_address: Address::repeat_byte(0xee),
            })
        }
    }

    struct IdleChain;

    #[async_trait]
    impl ChainClient for IdleChain {
        async fn block_number(&self) -> anyhow::Result<u64> {
            Ok(100)
        }

        async fn pending_nonce(&self, _address: Address) -> anyhow::Result<u64> {
            Ok(0)
        }

        async fn receipt_status(&self, _tx_hash: B256) -> anyhow::Result<Option<MinedReceipt>> {
            Ok(None)
        }

        async fn send_raw_transaction(&self, raw: &Bytes) -> anyhow::Result<B256> {
            Ok(keccak256(raw))
        }
    }

    fn usdc() -> Token {
        Token::new("USDC", Address::repeat_byte(1), 6)
    }

    fn weth() -> Token {
        Token::new("WETH", Address::repeat_byte(2), 18)
    }

    /// Flat base fees below the floor pin the ceiling at `floor_gwei`
    fn pipeline(final_out: u64, floor_gwei: f64, min_profit_usd: f64) -> Pipeline {
        let cache = Arc::new(TwoTierCache::new(CacheConfig::default()));
        let quotes = Arc::new(Quotes { final_out });
        let pricer = UsdPricer::new(quotes.clone(), cache.clone(), usdc(), vec!["USDC".into()], 30);
        let scanner = OpportunityScanner::new(
            ScannerConfig {
                price_impact_probe: false,
                inter_call_delay: Duration::ZERO,
                quote_ttl_secs: 0,
                ..Default::default()
            },
            quotes,
            cache,
            pricer,
        );

        let fees = Arc::new(FeeEstimator::new(
            Arc::new(FixedFees(floor_gwei / 2.0)),
            FeeEstimatorConfig {
                window_blocks: 20,
                ceiling: CeilingParams {
                    multiplier: 2.0,
                    floor_gwei,
                    max_gwei: 100.0,
                },
                reward_percentile: 50.0,
                default_priority_fee_gwei: 2.0,
                cache_ttl_secs: 60,
            },
        ));

        let chain: Arc<dyn ChainClient> = Arc::new(IdleChain);
        let signer: PrivateKeySigner = TEST_KEY.parse().unwrap();
        let builder = BundleBuilder::new(
            signer,
            chain.clone(),
            BundleConfig {
                chain_id: 137,
                executor: Address::repeat_byte(0xcc),
                gas_limit: 500_000,
                withdraw_gas_limit: 80_000,
                atomic_withdrawal: false,
            },
        );
        let submission = SubmissionManager::new(builder, Vec::new(), chain, SubmissionConfig::default());

        Pipeline::new(
            scanner,
            fees,
            submission,
            PathCooldown::new(10, 3),
            vec![ArbitragePath {
                name: "usdc-weth".to_string(),
                tokens: vec![usdc(), weth()],
                borrow_amount: U256::from(1_000_000_000u64),
            }],
            weth(),
            GateConfig {
                min_profit_usd,
                gas_units: 500_000,
            },
        )
    }

    #[test]
    fn test_gate_subtracts_gas() {
        let net = assert_ok!(gate(10.0, 3.0, 5.0));
        assert!((net - 7.0).abs() < 1e-12);
        assert_err!(gate(10.0, 6.0, 5.0));
        assert_err!(gate(f64::NAN, 1.0, 0.0));
    }

    #[tokio::test]
    async fn test_profitable_cycle_goes_to_dry_run() {
        // ceiling 10 gwei; 500k gas * 10 gwei * $2000 = $10
        let mut pipeline = pipeline(1_050_000_000, 10.0, 1.0);
        let report = pipeline.run_cycle(101).await;

        assert_eq!(report.opportunities, 1);
        assert!((report.gas_cost_usd.unwrap() - 10.0).abs() < 1e-6);
        assert_eq!(report.decision, CycleDecision::DryRun);
        assert_eq!(
            report.execution.unwrap().outcome,
            SubmissionOutcome::DryRun
        );
    }

    #[tokio::test]
    async fn test_gas_cost_blocks_thin_opportunity() {
        // $5 gross profit against $10 gas
        let mut pipeline = pipeline(1_005_000_000, 10.0, 1.0);
        let report = pipeline.run_cycle(101).await;

        assert_eq!(report.opportunities, 1);
        assert!(matches!(report.decision, CycleDecision::Profitable { .. }));
        assert!(report.execution.is_none());
    }

    #[tokio::test]
    async fn test_no_opportunity_is_skipped() {
        let mut pipeline = pipeline(1_000_000_000, 10.0, 1.0);
        let report = pipeline.run_cycle(101).await;

        assert_eq!(report.scanned, 1);
        assert_eq!(report.skipped, 1);
        assert!(matches!(report.decision, CycleDecision::Skipped(_)));
        assert_eq!(pipeline.stats().cycles, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let pipeline = pipeline(1_000_000_000, 10.0, 1.0);
        let (block_tx, block_rx) = watch::channel(0u64);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(pipeline.run(block_rx, stop_rx));
        block_tx.send(101).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();

        let stats = handle.await.unwrap();
        assert_eq!(stats.cycles, 1);
    }
}
