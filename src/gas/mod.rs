//! Gas Module
//!
//! Fee-history window statistics and the gas ceiling / fee bid estimator.

pub mod estimator;
pub mod window;

pub use estimator::{
    FeeEstimator, FeeEstimatorConfig, FeeHistorySnapshot, FeeHistorySource, RpcFeeHistory,
    MIN_WINDOW_BLOCKS,
};
pub use window::{CeilingParams, FeeWindow};
