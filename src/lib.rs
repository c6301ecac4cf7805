//! Flash-loan Arbitrage Bot Library
//!
//! Quote-driven cycle scanning, statistical gas ceilings and private relay
//! submission with a public fallback.

pub mod cache;
pub mod config;
pub mod contracts;
pub mod gas;
pub mod pipeline;
pub mod quote;
pub mod retry;
pub mod scanner;
pub mod submission;
pub mod types;

// Re-export commonly used types
pub use cache::TwoTierCache;
pub use config::{BotConfig, ConfigError, Markets};
pub use gas::FeeEstimator;
pub use pipeline::Pipeline;
pub use quote::{QuoteClient, QuoteSource};
pub use scanner::OpportunityScanner;
pub use submission::{SubmissionManager, SubmissionOutcome};
pub use types::{ArbitragePath, FeeBid, Opportunity, Strategy, SwapQuote, Token};
