//! Summary statistics over a drained batch.
//!
//! Computed after each successful flush for the log line and the tracker
//! statistics. Uses only values already on the measurements, including the
//! RR differences filled in at drain time.

use crate::sensor::Measurement;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Heart-rate and variability figures for one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Number of measurements in the batch
    pub count: usize,
    /// Mean heart rate in bpm
    pub mean_heart_rate: f64,
    /// Mean RR interval in ms
    pub mean_rr: f64,
    /// Sample standard deviation of RR intervals (SDNN) in ms
    pub sdnn: Option<f64>,
    /// Root mean square of successive RR differences in ms
    pub rmssd: Option<f64>,
}

/// Summarize a drained batch. Returns `None` for an empty batch.
pub fn summarize(batch: &[Measurement]) -> Option<BatchSummary> {
    if batch.is_empty() {
        return None;
    }

    let heart_rates: Vec<f64> = batch.iter().map(|m| m.heart_rate).collect();
    let rr: Vec<f64> = batch.iter().map(|m| m.rr_interval).collect();
    let squared_diffs: Vec<f64> = batch
        .iter()
        .filter_map(Measurement::rr_difference)
        .map(|d| d * d)
        .collect();

    let sdnn = if rr.len() > 1 {
        Some(rr.iter().std_dev())
    } else {
        None
    };
    let rmssd = if squared_diffs.is_empty() {
        None
    } else {
        Some(squared_diffs.iter().mean().sqrt())
    };

    Some(BatchSummary {
        count: batch.len(),
        mean_heart_rate: heart_rates.iter().mean(),
        mean_rr: rr.iter().mean(),
        sdnn,
        rmssd,
    })
}
