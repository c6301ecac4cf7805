//! Fee sample window
//!
//! Fixed-capacity window of per-block base fees. Refreshes replace the whole
//! window; `push` exists for incremental observation and evicts oldest first.

use crate::types::FeeSample;
use std::collections::VecDeque;

/// Ceiling parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CeilingParams {
    /// k in `mean + k * stddev`
    pub multiplier: f64,
    pub floor_gwei: f64,
    pub max_gwei: f64,
}

impl CeilingParams {
    /// `clamp(mean + k * stddev, floor, max)`.
    ///
    /// Empty, all-zero or non-finite input yields `max_gwei`.
    pub fn ceiling_for(&self, fees_gwei: &[f64]) -> f64 {
        let finite: Vec<f64> = fees_gwei
            .iter()
            .copied()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .collect();

        if finite.is_empty() || finite.iter().all(|f| *f == 0.0) {
            return self.max_gwei;
        }

        let (mean, stddev) = mean_stddev(&finite);
        let raw = mean + self.multiplier * stddev;
        if !raw.is_finite() {
            return self.max_gwei;
        }

        raw.max(self.floor_gwei).min(self.max_gwei)
    }
}

/// Population mean and standard deviation. Caller guarantees non-empty input.
pub fn mean_stddev(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Bounded sliding window of fee samples
#[derive(Debug, Clone)]
pub struct FeeWindow {
    samples: VecDeque<FeeSample>,
    capacity: usize,
}

impl FeeWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append one sample, evicting the oldest when full
    pub fn push(&mut self, sample: FeeSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Replace the whole window. Keeps only the newest `capacity` samples.
    pub fn replace(&mut self, samples: Vec<FeeSample>) {
        let skip = samples.len().saturating_sub(self.capacity);
        self.samples = samples.into_iter().skip(skip).collect();
    }

    pub fn fees_gwei(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.base_fee_per_gas_gwei).collect()
    }

    pub fn latest(&self) -> Option<&FeeSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
