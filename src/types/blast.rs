//! Blast-radius assessment types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Impact scope bands derived from the blast score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlastLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl BlastLevel {
    /// Band boundaries: <0.20 MINIMAL, <0.40 LOW, <0.60 MEDIUM, <0.80 HIGH,
    /// otherwise CRITICAL.
    pub fn from_score(score: f64) -> Self {
        if score < 0.20 {
            Self::Minimal
        } else if score < 0.40 {
            Self::Low
        } else if score < 0.60 {
            Self::Medium
        } else if score < 0.80 {
            Self::High
        } else {
            Self::Critical
        }
    }

    /// Urgency multiplier applied to risk adjustment and cost projection.
    pub fn urgency_multiplier(self) -> f64 {
        match self {
            Self::Minimal => 1.0,
            Self::Low => 1.5,
            Self::Medium => 2.5,
            Self::High => 3.5,
            Self::Critical => 5.0,
        }
    }
}

impl std::fmt::Display for BlastLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minimal => write!(f, "MINIMAL"),
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Computed impact scope for one incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlastRadiusAssessment {
    pub incident_id: Uuid,
    /// Transitive dependents of the affected service.
    pub affected_services_count: usize,
    pub request_volume_qps: f64,
    /// Fraction of dependents currently showing anomalies, in [0, 1].
    pub error_propagation_ratio: f64,
    /// Criticality weight of the affected service, in [0, 1].
    pub criticality_score: f64,
    /// Composite score in [0, 1].
    pub blast_score: f64,
    pub level: BlastLevel,
    pub urgency_multiplier: f64,
    pub estimated_users_impacted: u64,
    pub revenue_impact_per_hour: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_bands() {
        assert_eq!(BlastLevel::from_score(0.0), BlastLevel::Minimal);
        assert_eq!(BlastLevel::from_score(0.19), BlastLevel::Minimal);
        assert_eq!(BlastLevel::from_score(0.20), BlastLevel::Low);
        assert_eq!(BlastLevel::from_score(0.59), BlastLevel::Medium);
        assert_eq!(BlastLevel::from_score(0.60), BlastLevel::High);
        assert_eq!(BlastLevel::from_score(0.80), BlastLevel::Critical);
        assert_eq!(BlastLevel::from_score(1.0), BlastLevel::Critical);
    }

    #[test]
    fn urgency_scales_with_level() {
        assert_eq!(BlastLevel::Minimal.urgency_multiplier(), 1.0);
        assert_eq!(BlastLevel::Critical.urgency_multiplier(), 5.0);
    }
}
