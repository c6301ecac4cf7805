//! Revert classification
//!
//! Maps settlement-contract failures onto distinct, reportable categories.
//! Raw revert data is decoded by custom-error selector; relay and node error
//! strings fall back to keyword matching.

use crate::contracts::IFlashArbExecutor::{InsufficientProfit, SwapFailed, UntrustedTarget};
use alloy::hex;
use alloy::sol_types::{Revert, SolError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RevertReason {
    #[error("untrusted swap target ({0})")]
    UntrustedTarget(String),
    #[error("insufficient profit ({0})")]
    InsufficientProfit(String),
    #[error("swap execution failed ({0})")]
    SwapFailed(String),
    #[error("reverted: {0}")]
    Other(String),
}

/// Classify ABI-encoded revert data (custom error or `Error(string)`)
pub fn classify_revert_data(data: &[u8]) -> RevertReason {
    if data.len() < 4 {
        return RevertReason::Other(format!("0x{}", hex::encode(data)));
    }
    let selector: [u8; 4] = [data[0], data[1], data[2], data[3]];

    if selector == UntrustedTarget::SELECTOR {
        if let Ok(e) = UntrustedTarget::abi_decode(data) {
            return RevertReason::UntrustedTarget(format!("{:?}", e.target));
        }
    } else if selector == InsufficientProfit::SELECTOR {
        if let Ok(e) = InsufficientProfit::abi_decode(data) {
            return RevertReason::InsufficientProfit(format!(
                "profit {} < {} bps",
                e.profit, e.minProfitBps
            ));
        }
    } else if selector == SwapFailed::SELECTOR {
        if let Ok(e) = SwapFailed::abi_decode(data) {
            return RevertReason::SwapFailed(format!("step {}", e.step));
        }
    } else if selector == Revert::SELECTOR {
        if let Ok(e) = Revert::abi_decode(data) {
            return classify_revert_message(&e.reason);
        }
    }

    RevertReason::Other(format!("0x{}", hex::encode(data)))
}

/// Classify a revert string as reported by a relay simulation or a node
pub fn classify_revert_message(message: &str) -> RevertReason {
    let trimmed = message.trim();

    // Some relays hand back the raw revert payload as hex
    if let Some(stripped) = trimmed.strip_prefix("0x") {
        if let Ok(bytes) = hex::decode(stripped) {
            if bytes.len() >= 4 {
                return classify_revert_data(&bytes);
            }
        }
    }

    let lower = trimmed.to_lowercase();
    if lower.contains("untrustedtarget") || lower.contains("untrusted target") {
        RevertReason::UntrustedTarget(trimmed.to_string())
    } else if lower.contains("insufficientprofit") || lower.contains("insufficient profit") {
        RevertReason::InsufficientProfit(trimmed.to_string())
    } else if lower.contains("swapfailed") || lower.contains("swap failed") {
        RevertReason::SwapFailed(trimmed.to_string())
    } else {
        RevertReason::Other(trimmed.to_string())
    }
}
