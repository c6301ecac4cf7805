//! Submission Manager
//!
//! Per attempt:
//!     BUILD -> SIMULATE (advisory) -> RACE_PRIVATE_RELAYS
//!           -> INCLUDED | TIMEOUT -> FALLBACK_PUBLIC (once) -> DONE
//!
//! Racing:
//!     Every relay gets the same bundle concurrently in its own task. The first
//!     relay to return a handle is authoritative for inclusion watching; the
//!     others keep running and their verdicts are only logged. Identical
//!     transactions cannot be included twice (same nonces).
//!
//! Every path ends in a `SubmissionOutcome` carried by the returned report.

use super::bundle::{Bundle, BundleBuilder};
use super::chain::ChainClient;
use super::relay::{Relay, RelayError, SimulationResult};
use super::revert::{classify_revert_data, classify_revert_message, RevertReason};
use crate::types::{FeeBid, Opportunity};
use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{Address, Bytes, B256};
use futures::stream::{FuturesUnordered, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SubmissionConfig {
    /// Blocks past the target block before an attempt times out
    pub grace_blocks: u64,
    pub poll_interval: Duration,
    pub relay_timeout: Duration,
    pub public_fallback: bool,
    /// False = build, sign and simulate only
    pub live: bool,
    pub simulate: bool,
    /// Expected block interval; bounds inclusion watching in wall-clock time
    pub block_time: Duration,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            grace_blocks: 2,
            poll_interval: Duration::from_millis(500),
            relay_timeout: Duration::from_secs(3),
            public_fallback: true,
            live: false,
            simulate: true,
            block_time: Duration::from_secs(2),
        }
    }
}

/// How the included transaction reached the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    Relay(String),
    Public,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Channel::Relay(name) => write!(f, "relay:{}", name),
            Channel::Public => write!(f, "public"),
        }
    }
}

/// Terminal result of one submission attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionOutcome {
    #[error("included by block {block} via {channel}")]
    Included { block: u64, channel: Channel },
    #[error("dry run, not sent")]
    DryRun,
    #[error("{0}")]
    Reverted(RevertReason),
    #[error("not included by block {deadline}")]
    Timeout { deadline: u64 },
    #[error("all relays rejected the bundle: {0}")]
    RelayRejected(String),
    #[error("public fallback send failed: {0}")]
    FallbackFailed(String),
    #[error("build failed: {0}")]
    BuildFailed(String),
}

impl SubmissionOutcome {
    /// Failures caused by market state (revert, no inclusion)
    pub fn is_market_failure(&self) -> bool {
        matches!(
            self,
            SubmissionOutcome::Reverted(_) | SubmissionOutcome::Timeout { .. }
        )
    }
}

/// Reportable result of `execute`
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub success: bool,
    /// Relay bundle handle, or the execution tx hash for public sends
    pub handle: Option<String>,
    pub outcome: SubmissionOutcome,
    pub error: Option<String>,
    pub simulation: Option<SimulationResult>,
    pub tx_hashes: Vec<B256>,
}

impl ExecutionReport {
    fn new(outcome: SubmissionOutcome, handle: Option<String>, bundle: Option<&Bundle>, simulation: Option<SimulationResult>) -> Self {
        let success = matches!(outcome, SubmissionOutcome::Included { .. });
        let error = match &outcome {
            SubmissionOutcome::Included { .. } | SubmissionOutcome::DryRun => None,
            other => Some(other.to_string()),
        };
        Self {
            success,
            handle,
            outcome,
            error,
            simulation,
            tx_hashes: bundle.map(|b| b.tx_hashes.clone()).unwrap_or_default(),
        }
    }

    /// Attach an error that did not decide the outcome
    fn with_secondary_error(mut self, message: String) -> Self {
        self.error = Some(match self.error.take() {
            Some(primary) => format!("{}; {}", primary, message),
            None => message,
        });
        self
    }
}

enum Watch {
    Included(u64),
    Reverted(u64),
    TimedOut,
}

enum PrivateFailure {
    TimedOut,
    Rejected(String),
}

pub struct SubmissionManager {
    builder: BundleBuilder,
    relays: Vec<Arc<dyn Relay>>,
    chain: Arc<dyn ChainClient>,
    config: SubmissionConfig,
}

impl SubmissionManager {
    pub fn new(
        builder: BundleBuilder,
        relays: Vec<Arc<dyn Relay>>,
        chain: Arc<dyn ChainClient>,
        config: SubmissionConfig,
    ) -> Self {
        Self {
            builder,
            relays,
            chain,
            config,
        }
    }

    pub fn is_live(&self) -> bool {
        self.config.live
    }

    /// Run one full submission attempt for `opp`
    pub async fn execute(&self, opp: &Opportunity, bid: &FeeBid) -> ExecutionReport {
        let report = self.attempt(opp, bid).await;

        let handle = report.handle.as_deref().unwrap_or("-");
        match &report.outcome {
            SubmissionOutcome::Included { .. } => info!(
                "✅ SUBMISSION {} {}: {} handle={}",
                opp.strategy, opp.path.name, report.outcome, handle
            ),
            SubmissionOutcome::DryRun => info!(
                "🧪 SUBMISSION {} {}: dry run, bundle={} simulation={}",
                opp.strategy,
                opp.path.name,
                handle,
                describe_simulation(report.simulation.as_ref())
            ),
            _ => warn!(
                "❌ SUBMISSION {} {}: {} handle={}",
                opp.strategy, opp.path.name, report.outcome, handle
            ),
        }
        report
    }

    async fn attempt(&self, opp: &Opportunity, bid: &FeeBid) -> ExecutionReport {
        // BUILD
        let current = match self.chain.block_number().await {
            Ok(b) => b,
            Err(e) => {
                return ExecutionReport::new(SubmissionOutcome::BuildFailed(format!("block number: {}", e)), None, None, None)
            }
        };
        let target = current + 1;
        let bundle = match self.builder.build(opp, bid, target).await {
            Ok(b) => Arc::new(b),
            Err(e) => return ExecutionReport::new(SubmissionOutcome::BuildFailed(e.to_string()), None, None, None),
        };
        let bundle_hash = format!("{:?}", bundle.hash());

        // SIMULATE
        let simulation = if self.config.simulate {
            self.simulate(&bundle).await
        } else {
            None
        };

        if !self.config.live {
            return ExecutionReport::new(SubmissionOutcome::DryRun, Some(bundle_hash), Some(&bundle), simulation);
        }

        // RACE_PRIVATE_RELAYS
        let deadline = target + self.config.grace_blocks;
        let private = if self.relays.is_empty() {
            PrivateFailure::Rejected("no relays configured".to_string())
        } else {
            match self.race_relays(bundle.clone()).await {
                Ok((relay, handle)) => {
                    info!("Bundle accepted by {} (handle {}), watching until block {}", relay, handle, deadline);
                    match self.watch_inclusion(&bundle, current, deadline).await {
                        Watch::Included(block) => {
                            let outcome = SubmissionOutcome::Included {
                                block,
                                channel: Channel::Relay(relay),
                            };
                            return ExecutionReport::new(outcome, Some(handle), Some(&bundle), simulation);
                        }
                        Watch::Reverted(block) => {
                            let reason = self.revert_reason(&bundle, block, simulation.as_ref()).await;
                            let outcome = SubmissionOutcome::Reverted(reason);
                            return ExecutionReport::new(outcome, Some(handle), Some(&bundle), simulation);
                        }
                        Watch::TimedOut => PrivateFailure::TimedOut,
                    }
                }
                Err(errors) => PrivateFailure::Rejected(
                    errors
                        .iter()
                        .map(|(name, e)| format!("{}: {}", name, e))
                        .collect::<Vec<_>>()
                        .join("; "),
                ),
            }
        };

        // FALLBACK_PUBLIC
        if !self.config.public_fallback {
            let outcome = match private {
                PrivateFailure::TimedOut => SubmissionOutcome::Timeout { deadline },
                PrivateFailure::Rejected(reason) => SubmissionOutcome::RelayRejected(reason),
            };
            return ExecutionReport::new(outcome, Some(bundle_hash), Some(&bundle), simulation);
        }

        match &private {
            PrivateFailure::TimedOut => warn!("Bundle not included by block {}, falling back to public network", deadline),
            PrivateFailure::Rejected(reason) => warn!("All relays failed ({}), falling back to public network", reason),
        }
        self.public_fallback(&bundle, simulation).await
    }

    /// Advisory: a failed or unavailable simulation never blocks submission
    async fn simulate(&self, bundle: &Bundle) -> Option<SimulationResult> {
        let relay = self.relays.iter().find(|r| r.supports_simulation())?;
        match tokio::time::timeout(self.config.relay_timeout, relay.simulate(bundle)).await {
            Ok(Ok(sim)) => {
                if !sim.success {
                    warn!(
                        "Simulation on {} failed: {} (submitting anyway)",
                        relay.name(),
                        sim.revert
                            .as_ref()
                            .map(|r| r.to_string())
                            .unwrap_or_else(|| "unknown".to_string())
                    );
                }
                Some(sim)
            }
            Ok(Err(e)) => {
                warn!("Simulation on {} errored: {}", relay.name(), e);
                None
            }
            Err(_) => {
                warn!("Simulation on {} timed out", relay.name());
                None
            }
        }
    }

    /// Submit to every relay concurrently; first accepted handle wins
    async fn race_relays(&self, bundle: Arc<Bundle>) -> Result<(String, String), Vec<(String, RelayError)>> {
        let timeout = self.config.relay_timeout;
        let mut pending: FuturesUnordered<_> = self
            .relays
            .iter()
            .map(|relay| {
                let relay = relay.clone();
                let bundle = bundle.clone();
                tokio::spawn(async move {
                    let result = match tokio::time::timeout(timeout, relay.send_bundle(&bundle)).await {
                        Ok(r) => r,
                        Err(_) => Err(RelayError::Timeout),
                    };
                    (relay.name().to_string(), result)
                })
            })
            .collect();

        let mut errors = Vec::new();
        while let Some(joined) = pending.next().await {
            match joined {
                Ok((name, Ok(handle))) => {
                    // Late verdicts are informational only
                    tokio::spawn(async move {
                        while let Some(joined) = pending.next().await {
                            match joined {
                                Ok((name, Ok(handle))) => debug!("{} also accepted bundle ({})", name, handle),
                                Ok((name, Err(e))) => debug!("{} rejected bundle after winner: {}", name, e),
                                Err(e) => debug!("relay task failed: {}", e),
                            }
                        }
                    });
                    return Ok((name, handle));
                }
                Ok((name, Err(e))) => {
                    warn!("Relay {} failed: {}", name, e);
                    errors.push((name, e));
                }
                Err(e) => {
                    error!("Relay task panicked: {}", e);
                    errors.push(("unknown".to_string(), RelayError::Transport(e.to_string())));
                }
            }
        }
        Err(errors)
    }

    /// Poll until the execution tx is mined or the chain passes `deadline`.
    ///
    /// Also bounded in wall-clock time (two spare blocks past the deadline at
    /// the expected block time), so a stalled RPC cannot hold the attempt open.
    async fn watch_inclusion(&self, bundle: &Bundle, from_height: u64, deadline: u64) -> Watch {
        let blocks = deadline.saturating_sub(from_height).saturating_add(2);
        let limit = self
            .config
            .block_time
            .saturating_mul(u32::try_from(blocks).unwrap_or(u32::MAX));

        match tokio::time::timeout(limit, self.poll_inclusion(bundle, from_height, deadline)).await {
            Ok(watch) => watch,
            Err(_) => {
                warn!("No chain progress observed within {:?}, giving up on block {}", limit, deadline);
                Watch::TimedOut
            }
        }
    }

    async fn poll_inclusion(&self, bundle: &Bundle, from_height: u64, deadline: u64) -> Watch {
        let Some(tx_hash) = bundle.execution_hash() else {
            return Watch::TimedOut;
        };
        let mut height = from_height;

        loop {
            match self.chain.receipt_status(tx_hash).await {
                Ok(Some(receipt)) => {
                    let block = receipt
                        .block_number
                        .unwrap_or_else(|| height.max(bundle.target_block));
                    return if receipt.success {
                        Watch::Included(block)
                    } else {
                        Watch::Reverted(block)
                    };
                }
                Ok(None) => {}
                Err(e) => debug!("Receipt poll failed: {}", e),
            }

            match self.chain.block_number().await {
                Ok(h) => height = h,
                Err(e) => debug!("Block poll failed: {}", e),
            }
            if height > deadline {
                return Watch::TimedOut;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Single public-network attempt with the already signed transactions.
    /// Once the execution tx is out it is always watched; a failed withdrawal
    /// send is only carried as a secondary error.
    async fn public_fallback(&self, bundle: &Bundle, simulation: Option<SimulationResult>) -> ExecutionReport {
        let Some((execution, rest)) = bundle.txs.split_first() else {
            let outcome = SubmissionOutcome::FallbackFailed("empty bundle".to_string());
            return ExecutionReport::new(outcome, None, Some(bundle), simulation);
        };

        let handle = match self.chain.send_raw_transaction(execution).await {
            Ok(hash) => format!("{:?}", hash),
            Err(e) => {
                let message = e.to_string();
                let outcome = match classify_revert_message(&message) {
                    RevertReason::Other(_) => SubmissionOutcome::FallbackFailed(message),
                    reason => SubmissionOutcome::Reverted(reason),
                };
                return ExecutionReport::new(outcome, None, Some(bundle), simulation);
            }
        };

        let mut withdrawal_error = None;
        for raw in rest {
            if let Err(e) = self.chain.send_raw_transaction(raw).await {
                warn!("Withdrawal send failed, still watching execution tx {}: {}", handle, e);
                withdrawal_error = Some(format!("withdrawal send failed: {}", e));
                break;
            }
        }

        let height = self
            .chain
            .block_number()
            .await
            .unwrap_or(bundle.target_block);
        let deadline = height + 1 + self.config.grace_blocks;

        let outcome = match self.watch_inclusion(bundle, height, deadline).await {
            Watch::Included(block) => SubmissionOutcome::Included {
                block,
                channel: Channel::Public,
            },
            Watch::Reverted(block) => {
                SubmissionOutcome::Reverted(self.revert_reason(bundle, block, simulation.as_ref()).await)
            }
            Watch::TimedOut => SubmissionOutcome::Timeout { deadline },
        };

        let report = ExecutionReport::new(outcome, Some(handle), Some(bundle), simulation);
        match withdrawal_error {
            Some(err) => report.with_secondary_error(err),
            None => report,
        }
    }

    /// Reason for an on-chain revert, most specific first:
    /// replayed revert data, node message, simulation verdict, generic.
    async fn revert_reason(&self, bundle: &Bundle, block: u64, simulation: Option<&SimulationResult>) -> RevertReason {
        if let Some((to, input)) = execution_call(bundle) {
            let from = self.builder.signer_address();
            // state the inclusion block started from
            match self
                .chain
                .replay_call(from, to, input, block.saturating_sub(1))
                .await
            {
                Ok(Some(data)) if !data.is_empty() => return classify_revert_data(&data),
                Ok(_) => debug!("Replay at block {} did not reproduce the revert", block),
                Err(e) => match classify_revert_message(&e.to_string()) {
                    RevertReason::Other(_) => debug!("Revert replay failed: {}", e),
                    reason => return reason,
                },
            }
        }

        simulation
            .and_then(|s| s.revert.clone())
            .unwrap_or_else(|| RevertReason::Other(format!("execution reverted in block {}", block)))
    }
}

/// Target and calldata of the execution transaction
fn execution_call(bundle: &Bundle) -> Option<(Address, Bytes)> {
    let raw = bundle.txs.first()?;
    let envelope = TxEnvelope::decode_2718(&mut raw.as_ref()).ok()?;
    Some((envelope.to()?, envelope.input().clone()))
}

fn describe_simulation(sim: Option<&SimulationResult>) -> String {
    match sim {
        None => "n/a".to_string(),
        Some(s) if s.success => "ok".to_string(),
        Some(s) => s
            .revert
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "failed".to_string()),
    }
}
