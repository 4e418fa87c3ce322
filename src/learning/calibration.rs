//! Calibration aggregation: the read path over the outcome record set.
//!
//! Aggregates are recomputed from the append-only records (cached per N new
//! records by the owning store); nothing here is authoritative state.

use serde::Serialize;
use std::collections::HashMap;

use crate::types::{ConfidenceOutcomeRecord, HypothesisCategory, VerificationOutcome};

/// Number of 0.10-wide confidence bins across [0, 1].
const BIN_COUNT: usize = 10;

/// One confidence bin of width 0.10.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationBin {
    pub lo: f64,
    pub hi: f64,
    pub count: usize,
    pub mean_predicted: f64,
    pub success_rate: f64,
}

/// Aggregates over the whole outcome record set.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationSummary {
    pub total_records: usize,
    /// category -> (success rate, outcome count)
    pub per_category: HashMap<HypothesisCategory, (f64, usize)>,
    pub bins: Vec<CalibrationBin>,
    /// Expected Calibration Error over populated bins.
    pub ece: f64,
}

impl CalibrationSummary {
    pub fn empty() -> Self {
        Self {
            total_records: 0,
            per_category: HashMap::new(),
            bins: Vec::new(),
            ece: 0.0,
        }
    }
}

fn is_success(outcome: VerificationOutcome) -> bool {
    outcome == VerificationOutcome::Success
}

/// Recompute all aggregates from scratch.
pub fn summarize(records: &[ConfidenceOutcomeRecord]) -> CalibrationSummary {
    if records.is_empty() {
        return CalibrationSummary::empty();
    }

    let mut per_category: HashMap<HypothesisCategory, (usize, usize)> = HashMap::new();
    let mut bin_counts = [0usize; BIN_COUNT];
    let mut bin_pred_sum = [0.0f64; BIN_COUNT];
    let mut bin_success = [0usize; BIN_COUNT];

    for record in records {
        let entry = per_category.entry(record.category).or_insert((0, 0));
        entry.1 += 1;
        if is_success(record.outcome) {
            entry.0 += 1;
        }

        let idx = ((record.predicted_confidence * BIN_COUNT as f64) as usize).min(BIN_COUNT - 1);
        bin_counts[idx] += 1;
        bin_pred_sum[idx] += record.predicted_confidence;
        if is_success(record.outcome) {
            bin_success[idx] += 1;
        }
    }

    let bins: Vec<CalibrationBin> = (0..BIN_COUNT)
        .map(|i| {
            let count = bin_counts[i];
            CalibrationBin {
                lo: i as f64 / BIN_COUNT as f64,
                hi: (i + 1) as f64 / BIN_COUNT as f64,
                count,
                mean_predicted: if count == 0 {
                    0.0
                } else {
                    bin_pred_sum[i] / count as f64
                },
                success_rate: if count == 0 {
                    0.0
                } else {
                    bin_success[i] as f64 / count as f64
                },
            }
        })
        .collect();

    let total = records.len();
    let ece = bins
        .iter()
        .filter(|b| b.count > 0)
        .map(|b| (b.count as f64 / total as f64) * (b.mean_predicted - b.success_rate).abs())
        .sum();

    CalibrationSummary {
        total_records: total,
        per_category: per_category
            .into_iter()
            .map(|(category, (successes, count))| {
                (category, (successes as f64 / count as f64, count))
            })
            .collect(),
        bins,
        ece,
    }
}
