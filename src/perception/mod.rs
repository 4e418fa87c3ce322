//! Perception: z-score anomaly detection over metric baselines.
//!
//! For each monitored (service, metric) pair the detector treats the first
//! N-1 points of a window as baseline and the last point as current, then
//! emits a [`Signal`] when the z-score clears the anomaly threshold.
//!
//! Backend failures are not incidents: the poll logs, returns empty, and the
//! next cycle retries. A flat metric (stddev 0) is silently skipped.

pub mod backend;
mod poller;

pub use backend::{
    HttpLogBackend, HttpMetricsBackend, LogBackend, LogLine, MetricsBackend, TimeSeries,
};
pub use poller::{run_perception_loop, PerceptionConfig, LOG_ERROR_COUNT_METRIC};

use chrono::{DateTime, Utc};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

use crate::types::{Signal, SignalSource};

/// Stateless z-score detector.
#[derive(Debug, Clone, Copy)]
pub struct AnomalyDetector {
    /// Minimum |z| for emission (>= comparison, boundary included).
    pub threshold_sigma: f64,
}

impl AnomalyDetector {
    pub fn new(threshold_sigma: f64) -> Self {
        Self { threshold_sigma }
    }

    /// Evaluate one window of points for a (service, metric) pair.
    ///
    /// Points must be in ascending timestamp order; an out-of-order window is
    /// skipped, not aborted. Needs at least 3 points (2 baseline + current).
    pub fn observe(
        &self,
        service: &str,
        metric: &str,
        source: SignalSource,
        labels: &BTreeMap<String, String>,
        points: &[(DateTime<Utc>, f64)],
    ) -> Option<Signal> {
        if points.len() < 3 {
            return None;
        }
        if points.windows(2).any(|w| w[1].0 < w[0].0) {
            tracing::warn!(
                service,
                metric,
                "out-of-order timestamps from backend — skipping window"
            );
            return None;
        }

        let (current_ts, current) = points[points.len() - 1];
        let baseline: Vec<f64> = points[..points.len() - 1].iter().map(|(_, v)| *v).collect();
        let mean = baseline.as_slice().mean();
        let stddev = baseline.as_slice().std_dev();

        // Flat metric: nothing to say.
        if !(stddev > 0.0) || !stddev.is_finite() {
            return None;
        }

        let z = (current - mean) / stddev;
        if !z.is_finite() || z.abs() < self.threshold_sigma {
            return None;
        }

        Some(Signal {
            service: service.to_string(),
            metric_name: metric.to_string(),
            value: current,
            baseline: mean,
            deviation_sigma: z,
            timestamp: current_ts,
            source,
            labels: labels.clone(),
        })
    }
}
