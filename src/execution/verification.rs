//! Post-action verification.
//!
//! After execution the pipeline waits out a stabilization window, sampling
//! the verification metric set at three sub-windows, then classifies the
//! outcome from direction-aware before/after improvements and sub-window
//! stability.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use statrs::statistics::Statistics;
use tracing::debug;

use crate::config::defaults::{
    LOWER_IS_BETTER_METRICS, STABILIZATION_SUBWINDOWS, VERIFICATION_METRICS,
};
use crate::perception::MetricsBackend;
use crate::types::{Recommendation, VerificationOutcome, VerificationReport};

/// Direction-aware improvement for one metric; None when undefined (zero or
/// missing pre value).
fn improvement(metric: &str, pre: f64, post: f64) -> Option<f64> {
    if pre == 0.0 || !pre.is_finite() || !post.is_finite() {
        return None;
    }
    if LOWER_IS_BETTER_METRICS.contains(&metric) {
        Some((pre - post) / pre)
    } else {
        Some((post - pre) / pre)
    }
}

/// Per-metric improvements and their unweighted mean.
pub fn compare(
    pre: &BTreeMap<String, f64>,
    post: &BTreeMap<String, f64>,
) -> (BTreeMap<String, f64>, f64) {
    let mut per_metric = BTreeMap::new();
    for (metric, pre_value) in pre {
        let Some(post_value) = post.get(metric) else {
            continue;
        };
        if let Some(delta) = improvement(metric, *pre_value, *post_value) {
            per_metric.insert(metric.clone(), delta);
        }
    }
    let overall = if per_metric.is_empty() {
        0.0
    } else {
        per_metric.values().sum::<f64>() / per_metric.len() as f64
    };
    (per_metric, overall)
}

/// Max relative stddev of any metric across the stabilization samples.
pub fn max_relative_stddev(samples: &[BTreeMap<String, f64>]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let mut worst: f64 = 0.0;
    let metrics: std::collections::BTreeSet<&String> =
        samples.iter().flat_map(|s| s.keys()).collect();
    for metric in metrics {
        let values: Vec<f64> = samples.iter().filter_map(|s| s.get(metric).copied()).collect();
        if values.len() < 2 {
            continue;
        }
        let mean = values.as_slice().mean();
        if mean.abs() < f64::EPSILON {
            continue;
        }
        let rel = values.as_slice().std_dev() / mean.abs();
        if rel.is_finite() {
            worst = worst.max(rel);
        }
    }
    worst
}

/// Outcome classification. Instability trumps the improvement bands.
pub fn classify(
    overall: f64,
    max_rel_stddev: f64,
    improvement_threshold: f64,
    unstable_threshold: f64,
) -> VerificationOutcome {
    if max_rel_stddev > unstable_threshold {
        return VerificationOutcome::Unstable;
    }
    if overall >= improvement_threshold {
        VerificationOutcome::Success
    } else if overall >= 0.10 {
        VerificationOutcome::PartialSuccess
    } else if overall > -0.05 {
        VerificationOutcome::NoChange
    } else {
        VerificationOutcome::Degraded
    }
}

/// Operator-facing next step for an outcome.
pub fn recommendation(outcome: VerificationOutcome, reversible: bool) -> Recommendation {
    match outcome {
        VerificationOutcome::Success => Recommendation::Monitor,
        VerificationOutcome::PartialSuccess => Recommendation::Continue,
        VerificationOutcome::NoChange | VerificationOutcome::Unstable => Recommendation::Escalate,
        VerificationOutcome::Degraded => {
            if reversible {
                Recommendation::Rollback
            } else {
                Recommendation::Escalate
            }
        }
    }
}

/// Runs the stabilization wait and produces the verification report.
pub struct Verifier {
    metrics: Arc<dyn MetricsBackend>,
    pub stabilization_window: Duration,
    improvement_threshold: f64,
    unstable_threshold: f64,
}

impl Verifier {
    pub fn new(
        metrics: Arc<dyn MetricsBackend>,
        stabilization_window: Duration,
        improvement_threshold: f64,
        unstable_threshold: f64,
    ) -> Self {
        Self {
            metrics,
            stabilization_window,
            improvement_threshold,
            unstable_threshold,
        }
    }

    /// Capture the fixed verification metric set for a service. Metrics the
    /// backend cannot supply are absent from the map.
    pub async fn capture(&self, service: &str) -> BTreeMap<String, f64> {
        let mut snapshot = BTreeMap::new();
        for metric in VERIFICATION_METRICS {
            match self.metrics.current_value(service, metric).await {
                Ok(Some(value)) => {
                    snapshot.insert(metric.to_string(), value);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(service, metric, error = %e, "verification capture miss");
                }
            }
        }
        snapshot
    }

    /// Wait out the stabilization window (the pipeline's only internal
    /// suspension point), sampling at sub-windows, then classify.
    ///
    /// Returns the report plus the post-action metric snapshot (the last
    /// sub-window sample).
    pub async fn verify(
        &self,
        service: &str,
        pre_metrics: &BTreeMap<String, f64>,
        reversible: bool,
    ) -> (VerificationReport, BTreeMap<String, f64>) {
        let sub_wait = self.stabilization_window / STABILIZATION_SUBWINDOWS as u32;
        let mut samples: Vec<BTreeMap<String, f64>> = Vec::with_capacity(STABILIZATION_SUBWINDOWS);
        for _ in 0..STABILIZATION_SUBWINDOWS {
            tokio::time::sleep(sub_wait).await;
            samples.push(self.capture(service).await);
        }

        #[allow(clippy::unwrap_used)] // STABILIZATION_SUBWINDOWS >= 1
        let post_metrics = samples.last().cloned().unwrap();
        let (per_metric, overall) = compare(pre_metrics, &post_metrics);
        let max_rel = max_relative_stddev(&samples);
        let outcome = classify(
            overall,
            max_rel,
            self.improvement_threshold,
            self.unstable_threshold,
        );

        let report = VerificationReport {
            outcome,
            overall_improvement: overall,
            per_metric_improvement: per_metric,
            max_relative_stddev: max_rel,
            recommendation: recommendation(outcome, reversible),
            verified_at: Utc::now(),
        };
        (report, post_metrics)
    }
}
