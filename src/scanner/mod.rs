//! Opportunity Scanner Module
//!
//! Hop-by-hop cycle pricing, USD reference pricing and per-path cooldown.

pub mod cooldown;
pub mod pricing;
#[allow(clippy::module_inception)]
pub mod scanner;

pub use cooldown::PathCooldown;
pub use pricing::{PriceSource, UsdPrice, UsdPricer};
pub use scanner::{OpportunityScanner, ScanReport, ScannerConfig, SkipReason};
