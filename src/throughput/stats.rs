//! Summary statistics over per-round measurements.

use serde::{Deserialize, Serialize};

/// Median, mean and spread of a set of measurements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistic {
    pub median: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
    pub sample_count: usize,
}

impl Statistic {
    /// Summarize `values`, ignoring non-finite entries.
    ///
    /// Returns `None` when nothing is left: an empty set has no median, and
    /// callers must be able to tell that apart from a measured zero.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;

        let variance = if count > 1 {
            sorted.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (count - 1) as f64
        } else {
            0.0
        };

        Some(Self {
            median: median_of_sorted(&sorted),
            mean,
            min: sorted[0],
            max: sorted[count - 1],
            std_dev: variance.sqrt(),
            sample_count: count,
        })
    }
}

/// Median of an already sorted, non-empty slice.
fn median_of_sorted(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
