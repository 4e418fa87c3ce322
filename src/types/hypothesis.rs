//! Hypothesis types: candidate root causes with deterministic confidence.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of root-cause categories.
///
/// New categories require editing this enum — intentionally, so the reasoning
/// model cannot introduce arbitrary classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisCategory {
    MemoryLeak,
    CpuSpike,
    LatencySpike,
    ErrorSpike,
    DatabaseIssue,
    NetworkIssue,
    DeploymentRegression,
    ResourceExhaustion,
    DependencyFailure,
    Other,
}

impl HypothesisCategory {
    pub const ALL: [Self; 10] = [
        Self::MemoryLeak,
        Self::CpuSpike,
        Self::LatencySpike,
        Self::ErrorSpike,
        Self::DatabaseIssue,
        Self::NetworkIssue,
        Self::DeploymentRegression,
        Self::ResourceExhaustion,
        Self::DependencyFailure,
        Self::Other,
    ];

    /// Default category prior, before any learning-store override.
    pub fn default_prior(self) -> f64 {
        match self {
            Self::MemoryLeak => 0.70,
            Self::CpuSpike => 0.75,
            Self::LatencySpike => 0.70,
            Self::ErrorSpike => 0.85,
            Self::DatabaseIssue => 0.65,
            Self::NetworkIssue => 0.60,
            Self::DeploymentRegression => 0.80,
            Self::ResourceExhaustion => 0.70,
            Self::DependencyFailure => 0.70,
            Self::Other => 0.50,
        }
    }
}

impl std::fmt::Display for HypothesisCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MemoryLeak => "memory_leak",
            Self::CpuSpike => "cpu_spike",
            Self::LatencySpike => "latency_spike",
            Self::ErrorSpike => "error_spike",
            Self::DatabaseIssue => "database_issue",
            Self::NetworkIssue => "network_issue",
            Self::DeploymentRegression => "deployment_regression",
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::DependencyFailure => "dependency_failure",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Unscored hypothesis as returned by the reasoning adapter.
///
/// Carries no confidence by construction; any score the model volunteers is
/// stripped during parsing and kept only for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawHypothesis {
    pub description: String,
    pub category: HypothesisCategory,
    /// Signal/metric identifiers that must already exist on the incident.
    pub evidence_refs: Vec<String>,
    /// Free-form rationale from the model.
    pub reasoning: String,
    /// Score the model volunteered, if any. Audit only — never used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_suggested_score: Option<f64>,
}

/// A scored candidate root-cause attached to one incident.
///
/// The four audit components reproduce `confidence` exactly:
/// `clip(0.40*base + 0.35*evidence + 0.25*anomaly + dep_boost, 0.01, 0.99)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub incident_id: Uuid,
    /// Stable order of confidence descending; ties broken by category prior
    /// then description.
    pub rank: u32,
    pub description: String,
    pub category: HypothesisCategory,
    /// Deterministic confidence in [0.01, 0.99].
    pub confidence: f64,
    /// Audit component: category prior.
    pub base_confidence: f64,
    /// Audit component: evidence term.
    pub evidence_quality: f64,
    /// Audit component: anomaly term.
    pub anomaly_strength: f64,
    /// Audit component: dependency-graph adjustment.
    pub dependency_boost: f64,
    /// Signal/metric identifiers supporting this hypothesis.
    pub supporting_signals: Vec<String>,
    /// Free text from the reasoning model.
    pub reasoning: String,
    /// Score the model volunteered, kept purely for audit (never governs
    /// control flow).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_suggested_score: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priors_match_defaults() {
        assert_eq!(HypothesisCategory::ErrorSpike.default_prior(), 0.85);
        assert_eq!(HypothesisCategory::Other.default_prior(), 0.50);
    }

    #[test]
    fn category_serde_round_trip() {
        let json = serde_json::to_string(&HypothesisCategory::DeploymentRegression).unwrap();
        assert_eq!(json, "\"deployment_regression\"");
        let parsed: HypothesisCategory = serde_json::from_str("\"memory_leak\"").unwrap();
        assert_eq!(parsed, HypothesisCategory::MemoryLeak);
    }

    #[test]
    fn unknown_category_is_rejected() {
        let parsed: Result<HypothesisCategory, _> = serde_json::from_str("\"cosmic_rays\"");
        assert!(parsed.is_err());
    }
}
