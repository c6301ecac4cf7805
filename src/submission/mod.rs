//! Submission Module
//!
//! Bundle building, private relay racing, inclusion watching and the public
//! fallback path.

pub mod bundle;
pub mod chain;
pub mod manager;
pub mod relay;
pub mod revert;

pub use bundle::{Bundle, BundleBuilder, BundleConfig, BuildError};
pub use chain::{ChainClient, MinedReceipt, ProviderChain};
pub use manager::{Channel, ExecutionReport, SubmissionConfig, SubmissionManager, SubmissionOutcome};
pub use relay::{JsonRpcRelay, Relay, RelayConfig, RelayError, SimulationResult};
pub use revert::{classify_revert_data, classify_revert_message, RevertReason};
