//! Flash-loan Arbitrage Bot
//!
//! Main entry point. Loads `.env` + the markets TOML, checks the settlement
//! contract, then runs one scan cycle per new block:
//!     WS subscribe_blocks() -> watch channel -> Pipeline::run
//!
//! Quotes come from the swap-quote service, fee ceilings from fee history,
//! and executions go to the configured private relays with a one-shot public
//! fallback. `LIVE_MODE=false` (default) builds, signs and simulates only.

use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use relayarb_bot::cache::TwoTierCache;
use relayarb_bot::config::{BotConfig, ConfigError, Markets};
use relayarb_bot::contracts::{IFlashArbExecutor, IERC20};
use relayarb_bot::gas::{FeeEstimator, RpcFeeHistory};
use relayarb_bot::pipeline::{GateConfig, Pipeline};
use relayarb_bot::quote::{QuoteClient, QuoteSource};
use relayarb_bot::scanner::{OpportunityScanner, PathCooldown, UsdPricer};
use relayarb_bot::submission::{
    BundleBuilder, ChainClient, JsonRpcRelay, ProviderChain, Relay, SubmissionManager,
};
use relayarb_bot::types::ArbitragePath;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Flash-loan arbitrage bot: quote scanning + private relay submission
#[derive(Parser)]
#[command(name = "relayarb-bot")]
struct Args {
    /// Environment file loaded before reading settings
    #[arg(long, env = "ENV_FILE")]
    env_file: Option<PathBuf>,

    /// Markets file ([[token]], [[path]], [[relay]])
    #[arg(short, long, env = "MARKETS_FILE", default_value = "markets.toml")]
    markets: PathBuf,

    /// Emit JSON log lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    info!("Arbitrage Bot Starting...");

    let config = BotConfig::load(args.env_file.as_deref())?;
    let markets = Markets::load(&args.markets)?;
    config.validate(&markets)?;
    let paths = markets.paths()?;
    let signer = config.signer()?;

    info!("Configuration loaded (chain_id: {})", config.chain_id);
    info!("RPC endpoint: {}", config.rpc_endpoint());
    info!("Executor: {:?} | signer: {:?}", config.executor_address, signer.address());
    info!("Paths: {} | relays: {}", paths.len(), markets.relays.len());
    for path in &paths {
        info!("  - {}", path);
    }
    if config.live_mode {
        warn!("LIVE MODE: bundles will be submitted");
    } else {
        info!("Dry run: bundles are built, signed and simulated but never sent");
    }

    info!("Connecting via WebSocket...");
    let provider: DynProvider = ProviderBuilder::new()
        .connect_ws(WsConnect::new(config.rpc_url.clone()))
        .await
        .context("WebSocket connect failed")?
        .erased();
    let provider = Arc::new(provider);

    let block = provider.get_block_number().await?;
    info!("Connected! Current block: {}", block);

    preflight(&provider, &config, &signer, &paths).await?;

    // Cache
    let cache = Arc::new(TwoTierCache::new(config.cache_config()));
    cache.open().await;

    // Fee estimator
    let fees = Arc::new(
        FeeEstimator::new(
            Arc::new(RpcFeeHistory::new(Arc::clone(&provider))),
            config.fee_estimator_config(),
        )
        .with_cache(Arc::clone(&cache)),
    );
    fees.warm_start().await;
    fees.on_new_block(block).await;
    info!("Gas ceiling: {:.2} gwei", fees.current_ceiling_gwei());

    // Scanner
    let quotes: Arc<dyn QuoteSource> = Arc::new(QuoteClient::new(config.quote_client_config())?);
    let usd_token = markets
        .token(&config.usd_symbol)
        .ok_or(ConfigError::Missing("USD_SYMBOL"))?;
    let native_token = markets
        .token(&config.native_symbol)
        .ok_or(ConfigError::Missing("NATIVE_SYMBOL"))?;
    let pricer = UsdPricer::new(
        Arc::clone(&quotes),
        Arc::clone(&cache),
        usd_token,
        config.stable_symbols.clone(),
        config.price_ttl_secs,
    );
    let scanner = OpportunityScanner::new(config.scanner_config(), quotes, Arc::clone(&cache), pricer);

    // Submission
    let relay_timeout = Duration::from_millis(config.relay_timeout_ms);
    let mut relays: Vec<Arc<dyn Relay>> = Vec::new();
    for relay in &markets.relays {
        info!("Relay {} -> {} (simulate: {})", relay.name, relay.url, relay.simulate);
        relays.push(Arc::new(JsonRpcRelay::new(relay.clone(), signer.clone(), relay_timeout)?));
    }
    let chain: Arc<dyn ChainClient> = Arc::new(ProviderChain::new(Arc::clone(&provider)));
    let builder = BundleBuilder::new(signer, Arc::clone(&chain), config.bundle_config());
    let submission = SubmissionManager::new(builder, relays, chain, config.submission_config());

    let gas_units = config.gas_limit
        + if config.atomic_withdrawal {
            config.withdraw_gas_limit
        } else {
            0
        };
    let pipeline = Pipeline::new(
        scanner,
        fees,
        submission,
        PathCooldown::new(config.cooldown_blocks, config.cooldown_max_strikes),
        paths,
        native_token,
        GateConfig {
            min_profit_usd: config.min_profit_usd,
            gas_units,
        },
    );

    // Shutdown on SIGINT / SIGTERM
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let signals_handle = signals.handle();
    tokio::spawn(async move {
        if let Some(sig) = signals.next().await {
            info!("Received signal {} - shutting down", sig);
            let _ = shutdown_tx.send(true);
        }
    });

    let (block_tx, block_rx) = watch::channel(0u64);
    let feed = tokio::spawn(block_feed(Arc::clone(&provider), block_tx));

    info!("Entering main loop (block subscription)...");
    let stats = pipeline.run(block_rx, shutdown_rx).await;

    feed.abort();
    signals_handle.close();
    cache.close();
    info!(
        "Stopped after {} cycles | {} opportunities | {} executed | {} failed",
        stats.cycles, stats.opportunities, stats.executed, stats.failed
    );
    Ok(())
}

/// The settlement contract must be owned by the signer and not paused.
/// Token decimals that disagree with the markets file are fatal too.
async fn preflight(
    provider: &Arc<DynProvider>,
    config: &BotConfig,
    signer: &alloy::signers::local::PrivateKeySigner,
    paths: &[ArbitragePath],
) -> Result<(), ConfigError> {
    let executor = IFlashArbExecutor::new(config.executor_address, provider.as_ref().clone());

    let owner = executor
        .owner()
        .call()
        .await
        .map_err(|e| ConfigError::Preflight(format!("owner(): {}", e)))?;
    if owner != signer.address() {
        return Err(ConfigError::Preflight(format!(
            "owner {:?} is not the signer {:?}",
            owner,
            signer.address()
        )));
    }

    let paused = executor
        .paused()
        .call()
        .await
        .map_err(|e| ConfigError::Preflight(format!("paused(): {}", e)))?;
    if paused {
        return Err(ConfigError::Preflight("contract is paused".to_string()));
    }

    let mut checked = std::collections::HashSet::new();
    for token in paths.iter().flat_map(|p| p.tokens.iter()) {
        if !checked.insert(token.address) {
            continue;
        }
        let erc20 = IERC20::new(token.address, provider.as_ref().clone());
        match erc20.decimals().call().await {
            Ok(decimals) if decimals == token.decimals => {}
            Ok(decimals) => {
                return Err(ConfigError::Preflight(format!(
                    "{} has {} decimals on-chain, {} configured",
                    token.symbol, decimals, token.decimals
                )))
            }
            Err(e) => warn!("decimals() for {} failed: {}", token.symbol, e),
        }
    }

    info!("Preflight OK: owner {:?}, not paused, {} tokens checked", owner, checked.len());
    Ok(())
}

/// Forward new block heights into the watch channel, resubscribing when the
/// WebSocket stream ends.
async fn block_feed(provider: Arc<DynProvider>, tx: watch::Sender<u64>) {
    loop {
        match provider.subscribe_blocks().await {
            Ok(sub) => {
                info!("Block subscription active");
                let mut stream = sub.into_stream();
                while let Some(header) = stream.next().await {
                    if tx.send(header.number).is_err() {
                        return;
                    }
                }
                warn!("Block subscription ended, resubscribing...");
            }
            Err(e) => error!("Block subscription failed: {}", e),
        }
        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
