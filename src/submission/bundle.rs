//! Bundle Builder
//!
//! Purpose:
//!     Turn an executable opportunity into signed EIP-1559 transactions:
//!     1. executeFlashLoan(origin, borrow, abi.encode(SwapStep[]))
//!     2. withdraw(origin), only with the atomic-withdrawal policy
//!
//! Notes:
//!     - The nonce is fetched ONCE per bundle and assigned sequentially before
//!       signing. Per-transaction nonce reads race against pending state.
//!     - userData carries every priced leg. Submitting only part of the cycle
//!       would execute a trade the profit figure never described.

use super::chain::ChainClient;
use crate::contracts::{IFlashArbExecutor, SwapStep};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::types::{FeeBid, Opportunity};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{keccak256, Address, Bytes, B256};
use alloy::rpc::types::eth::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::{SolCall, SolValue};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Ordered signed transactions targeting one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub txs: Vec<Bytes>,
    pub tx_hashes: Vec<B256>,
    pub nonces: Vec<u64>,
    pub target_block: u64,
}

impl Bundle {
    /// Local identifier: keccak256 over the concatenated tx hashes
    pub fn hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(self.tx_hashes.len() * 32);
        for h in &self.tx_hashes {
            buf.extend_from_slice(h.as_slice());
        }
        keccak256(buf)
    }

    pub fn raw_hex(&self) -> Vec<String> {
        self.txs.iter().map(|tx| tx.to_string()).collect()
    }

    /// Hash of the arbitrage transaction (always first)
    pub fn execution_hash(&self) -> Option<B256> {
        self.tx_hashes.first().copied()
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("opportunity is not executable: {0}")]
    NotExecutable(String),
    #[error("nonce fetch failed: {0}")]
    Nonce(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Clone)]
pub struct BundleConfig {
    pub chain_id: u64,
    /// Settlement contract
    pub executor: Address,
    pub gas_limit: u64,
    pub withdraw_gas_limit: u64,
    pub atomic_withdrawal: bool,
}

pub struct BundleBuilder {
    signer: PrivateKeySigner,
    wallet: EthereumWallet,
    chain: Arc<dyn ChainClient>,
    config: BundleConfig,
    nonce_retry: RetryPolicy,
}

impl BundleBuilder {
    pub fn new(signer: PrivateKeySigner, chain: Arc<dyn ChainClient>, config: BundleConfig) -> Self {
        let wallet = EthereumWallet::from(signer.clone());
        Self {
            signer,
            wallet,
            chain,
            config,
            nonce_retry: RetryPolicy::new(3, Duration::from_millis(100)),
        }
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    /// Build and sign the bundle for `target_block`
    pub async fn build(&self, opp: &Opportunity, bid: &FeeBid, target_block: u64) -> Result<Bundle, BuildError> {
        if !opp.is_executable() {
            return Err(BuildError::NotExecutable(format!(
                "{} has {}/{} priced legs",
                opp.strategy,
                opp.legs.len(),
                opp.path.hop_count()
            )));
        }

        let from = self.signer.address();
        let chain = self.chain.clone();
        let base_nonce = retry_with_backoff("pending nonce", self.nonce_retry, || {
            let chain = chain.clone();
            async move { chain.pending_nonce(from).await }
        })
        .await
        .map_err(|e| BuildError::Nonce(e.to_string()))?;

        let mut bundle = Bundle {
            txs: Vec::with_capacity(2),
            tx_hashes: Vec::with_capacity(2),
            nonces: Vec::with_capacity(2),
            target_block,
        };

        let (raw, hash) = self
            .sign(execution_calldata(opp), base_nonce, self.config.gas_limit, bid)
            .await?;
        bundle.txs.push(raw);
        bundle.tx_hashes.push(hash);
        bundle.nonces.push(base_nonce);

        if self.config.atomic_withdrawal {
            let nonce = base_nonce + 1;
            let calldata: Bytes = IFlashArbExecutor::withdrawCall {
                token: opp.path.origin().address,
            }
            .abi_encode()
            .into();
            let (raw, hash) = self
                .sign(calldata, nonce, self.config.withdraw_gas_limit, bid)
                .await?;
            bundle.txs.push(raw);
            bundle.tx_hashes.push(hash);
            bundle.nonces.push(nonce);
        }

        debug!(
            "Built bundle {} ({} txs, nonce {}, target block {})",
            bundle.hash(),
            bundle.txs.len(),
            base_nonce,
            target_block
        );
        Ok(bundle)
    }

    async fn sign(&self, input: Bytes, nonce: u64, gas_limit: u64, bid: &FeeBid) -> Result<(Bytes, B256), BuildError> {
        let mut tx = TransactionRequest::default()
            .with_to(self.config.executor)
            .with_input(input)
            .with_chain_id(self.config.chain_id)
            .with_nonce(nonce)
            .with_gas_limit(gas_limit)
            .with_max_priority_fee_per_gas(bid.max_priority_fee_per_gas)
            .with_max_fee_per_gas(bid.max_fee_per_gas);
        tx.from = Some(self.signer.address());

        let envelope = tx
            .build(&self.wallet)
            .await
            .map_err(|e| BuildError::Signing(e.to_string()))?;
        let raw = Bytes::from(envelope.encoded_2718());
        let hash = keccak256(&raw);
        Ok((raw, hash))
    }
}

/// One `SwapStep` per priced leg, in execution order
pub fn swap_steps(opp: &Opportunity) -> Vec<SwapStep> {
    opp.legs
        .iter()
        .map(|leg| SwapStep {
            sellToken: leg.sell_token,
            buyToken: leg.buy_token,
            target: leg.quote.target_address,
            data: leg.quote.call_data.clone(),
        })
        .collect()
}

/// Calldata for `executeFlashLoan` borrowing the path's origin token
pub fn execution_calldata(opp: &Opportunity) -> Bytes {
    let steps = swap_steps(opp);
    IFlashArbExecutor::executeFlashLoanCall {
        tokens: vec![opp.path.origin().address],
        amounts: vec![opp.initial_amount],
        userData: steps.abi_encode().into(),
    }
    .abi_encode()
    .into()
}
