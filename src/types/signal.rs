//! Signal types: one normalized anomaly observation from metrics, logs, or traces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where an anomalous observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Metric,
    Log,
    Trace,
}

impl std::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Metric => write!(f, "metric"),
            Self::Log => write!(f, "log"),
            Self::Trace => write!(f, "trace"),
        }
    }
}

/// Shared severity scale for signals and incidents.
///
/// Ordered so `max()` implements monotonic escalation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Severity {
    /// Map an absolute z-score to a severity band.
    ///
    /// Bands: [3,4) low, [4,5) medium, [5,6) high, >=6 critical. Values below
    /// the anomaly threshold never reach this function.
    pub fn from_sigma(abs_z: f64) -> Self {
        if abs_z >= 6.0 {
            Self::Critical
        } else if abs_z >= 5.0 {
            Self::High
        } else if abs_z >= 4.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Severity-derived anomaly confidence used by hypothesis scoring.
    pub fn anomaly_confidence(self) -> f64 {
        match self {
            Self::Low => 0.40,
            Self::Medium => 0.60,
            Self::High => 0.80,
            Self::Critical => 0.95,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One anomalous observation emitted by perception.
///
/// Invariant: `deviation_sigma.abs() >= anomaly_threshold_sigma` at emission.
/// Signals live only until the correlation window they fall into closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Service the observation belongs to.
    pub service: String,
    /// Metric (or log/trace stream) identifier.
    pub metric_name: String,
    /// Observed value at the current point.
    pub value: f64,
    /// Baseline mean over the preceding window.
    pub baseline: f64,
    /// Signed z-score of the current point against the baseline.
    pub deviation_sigma: f64,
    /// Backend timestamp of the current point.
    pub timestamp: DateTime<Utc>,
    /// Origin of the observation.
    pub source: SignalSource,
    /// Labels after volatile-label filtering (sorted for stable hashing).
    pub labels: BTreeMap<String, String>,
}

impl Signal {
    /// Severity band for this signal's deviation.
    pub fn severity(&self) -> Severity {
        Severity::from_sigma(self.deviation_sigma.abs())
    }
}
