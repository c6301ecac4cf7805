//! Quote Module
//!
//! Swap-quote service client and response normalization.

pub mod client;
pub mod normalize;

pub use client::{QuoteClient, QuoteClientConfig, QuoteSource};
