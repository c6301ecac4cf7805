//! Quote response normalization
//!
//! The quote service has shipped several response shapes across API versions
//! (`buyAmount` as string or number, calldata under `transaction.data` or
//! top-level `data`, target under `transaction.to`, `to` or `target`).
//! Everything is folded into `SwapQuote` here; nothing past this module sees
//! the raw JSON.

use crate::types::SwapQuote;
use alloy::primitives::{Address, Bytes, U256};
use serde_json::Value;
use std::str::FromStr;

/// Parse an amount given as decimal string, hex string or JSON number
pub fn parse_amount(value: &Value) -> Option<U256> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x") {
                U256::from_str_radix(hex, 16).ok()
            } else {
                U256::from_str(s).ok()
            }
        }
        Value::Number(n) => n.as_u64().map(U256::from),
        _ => None,
    }
}

fn lookup<'a>(body: &'a Value, paths: &[&[&str]]) -> Option<&'a Value> {
    paths.iter().find_map(|path| {
        let mut cursor = body;
        for key in *path {
            cursor = cursor.get(key)?;
        }
        if cursor.is_null() {
            None
        } else {
            Some(cursor)
        }
    })
}

/// Indicative output amount from a price response. Zero is treated as absent.
pub fn price_buy_amount(body: &Value) -> Option<U256> {
    let amount = lookup(body, &[&["buyAmount"], &["price", "buyAmount"]]).and_then(parse_amount)?;
    (!amount.is_zero()).then_some(amount)
}

/// Normalize a binding quote response.
///
/// Returns `None` when the output amount is missing or zero, or when the
/// response lacks executable calldata or a target address.
pub fn normalize_quote(body: &Value) -> Option<SwapQuote> {
    let output_amount = price_buy_amount(body)?;

    let call_data = lookup(body, &[&["transaction", "data"], &["data"], &["tx", "data"]])
        .and_then(Value::as_str)
        .and_then(|s| Bytes::from_str(s).ok())
        .filter(|b| !b.is_empty())?;

    let target_address = lookup(
        body,
        &[&["transaction", "to"], &["to"], &["target"], &["tx", "to"]],
    )
    .and_then(Value::as_str)
    .and_then(|s| Address::from_str(s).ok())
    .filter(|a| !a.is_zero())?;

    Some(SwapQuote {
        output_amount,
        call_data,
        target_address,
    })
}
