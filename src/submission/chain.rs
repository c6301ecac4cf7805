//! Chain access used by bundle building, inclusion watching, revert replay
//! and the public fallback path.

use alloy::eips::BlockId;
use alloy::network::{ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::Provider;
use alloy::rpc::types::eth::TransactionRequest;
use async_trait::async_trait;
use std::sync::Arc;

/// Receipt of a mined transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinedReceipt {
    pub success: bool,
    pub block_number: Option<u64>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> anyhow::Result<u64>;

    /// Next nonce for `address`, counting pending transactions
    async fn pending_nonce(&self, address: Address) -> anyhow::Result<u64>;

    /// `Some` once mined, `None` while unknown
    async fn receipt_status(&self, tx_hash: B256) -> anyhow::Result<Option<MinedReceipt>>;

    async fn send_raw_transaction(&self, raw: &Bytes) -> anyhow::Result<B256>;

    /// Re-run a call against the state at `block`.
    ///
    /// `Ok(Some(data))` is the revert payload, `Ok(None)` means the call does
    /// not revert there (or replay is unavailable).
    async fn replay_call(&self, _from: Address, _to: Address, _input: Bytes, _block: u64) -> anyhow::Result<Option<Bytes>> {
        Ok(None)
    }
}

/// `ChainClient` over any alloy provider
pub struct ProviderChain<P> {
    provider: Arc<P>,
}

impl<P> ProviderChain<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P> ChainClient for ProviderChain<P>
where
    P: Provider + Send + Sync + 'static,
{
    async fn block_number(&self) -> anyhow::Result<u64> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn pending_nonce(&self, address: Address) -> anyhow::Result<u64> {
        Ok(self.provider.get_transaction_count(address).pending().await?)
    }

    async fn receipt_status(&self, tx_hash: B256) -> anyhow::Result<Option<MinedReceipt>> {
        let receipt = self.provider.get_transaction_receipt(tx_hash).await?;
        Ok(receipt.map(|r| MinedReceipt {
            success: r.status(),
            block_number: r.block_number(),
        }))
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> anyhow::Result<B256> {
        let pending = self.provider.send_raw_transaction(raw).await?;
        Ok(*pending.tx_hash())
    }

    async fn replay_call(&self, from: Address, to: Address, input: Bytes, block: u64) -> anyhow::Result<Option<Bytes>> {
        let tx = TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_input(input);

        match self.provider.call(tx).block(BlockId::number(block)).await {
            Ok(_) => Ok(None),
            Err(e) => match e.as_error_resp() {
                Some(payload) => match payload.as_revert_data() {
                    Some(data) => Ok(Some(data)),
                    // Node reported a revert without data; let the caller match the message
                    None => anyhow::bail!("{}", payload.message),
                },
                None => Err(e.into()),
            },
        }
    }
}
