//! Verification outcomes, calibration records, and operator feedback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{ActionType, BlastLevel, HypothesisCategory, RiskLevel};

/// Post-action classification from before/after metric comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationOutcome {
    Success,
    PartialSuccess,
    NoChange,
    Degraded,
    Unstable,
}

impl std::fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::PartialSuccess => write!(f, "PARTIAL_SUCCESS"),
            Self::NoChange => write!(f, "NO_CHANGE"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Unstable => write!(f, "UNSTABLE"),
        }
    }
}

/// Operator-facing next step derived from the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Monitor,
    Continue,
    Escalate,
    Rollback,
}

/// Full verification result attached to an executed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub outcome: VerificationOutcome,
    /// Unweighted mean of defined per-metric improvements.
    pub overall_improvement: f64,
    /// Direction-aware improvement per metric; absent metrics were undefined
    /// (zero or missing pre value).
    pub per_metric_improvement: BTreeMap<String, f64>,
    /// Max relative stddev observed across the stabilization sub-windows.
    pub max_relative_stddev: f64,
    pub recommendation: Recommendation,
    pub verified_at: DateTime<Utc>,
}

/// Append-only calibration record; one per verification. Never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceOutcomeRecord {
    pub incident_id: Uuid,
    pub service: String,
    pub category: HypothesisCategory,
    pub predicted_confidence: f64,
    pub action_type: ActionType,
    pub executed: bool,
    pub outcome: VerificationOutcome,
    pub time_to_resolution_s: f64,
    pub blast_level: BlastLevel,
    pub risk_level: RiskLevel,
    /// Before/after deltas per metric: `post - pre`.
    pub metric_deltas: BTreeMap<String, f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Operator assessment classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    HypothesisCorrect,
    HypothesisIncorrect,
    ActionSuccessful,
    ActionInappropriate,
    Escalated,
    Comment,
}

/// Append-only operator feedback record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorFeedback {
    pub incident_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hypothesis_rank: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<Uuid>,
    pub feedback_type: FeedbackType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_category: Option<HypothesisCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_action_type: Option<ActionType>,
    #[serde(default)]
    pub text: String,
    pub timestamp: DateTime<Utc>,
}
