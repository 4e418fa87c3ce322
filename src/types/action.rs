//! Action types: remediation candidates, risk profiles, status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::PipelineError;

use super::VerificationReport;

/// Closed set of remediation action types.
///
/// Runtime dispatch goes through the action registry; runbooks cannot
/// introduce behaviors outside this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ScaleUp,
    ScaleDown,
    ClearCache,
    ToggleFeatureFlag,
    RestartPod,
    RollbackDeployment,
    DrainNode,
}

impl ActionType {
    pub const ALL: [Self; 7] = [
        Self::ScaleUp,
        Self::ScaleDown,
        Self::ClearCache,
        Self::ToggleFeatureFlag,
        Self::RestartPod,
        Self::RollbackDeployment,
        Self::DrainNode,
    ];

    /// Natural inverse where one exists. Rollback automation additionally
    /// requires the runbook to declare the inverse on the allowed action.
    pub fn natural_inverse(self) -> Option<Self> {
        match self {
            Self::ScaleUp => Some(Self::ScaleDown),
            Self::ScaleDown => Some(Self::ScaleUp),
            Self::ToggleFeatureFlag => Some(Self::ToggleFeatureFlag),
            Self::ClearCache | Self::RestartPod | Self::RollbackDeployment | Self::DrainNode => {
                None
            }
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ScaleUp => "scale_up",
            Self::ScaleDown => "scale_down",
            Self::ClearCache => "clear_cache",
            Self::ToggleFeatureFlag => "toggle_feature_flag",
            Self::RestartPod => "restart_pod",
            Self::RollbackDeployment => "rollback_deployment",
            Self::DrainNode => "drain_node",
        };
        f.write_str(s)
    }
}

/// Risk scale used by runbook allowed actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Scope an action can damage if it goes wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlastImpact {
    Pod,
    Deployment,
    Cluster,
    Datacenter,
}

/// Static risk characterization of one action type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskProfile {
    /// Intrinsic risk in [0, 1].
    pub risk_score: f64,
    pub expected_downtime_s: f64,
    pub worst_case_downtime_s: f64,
    pub recovery_time_s: f64,
    pub reversible: bool,
    pub blast_impact: BlastImpact,
    /// Dollars per minute of downtime.
    pub cost_per_minute: f64,
    /// Named predicates that must hold before this action is eligible.
    pub prerequisites: Vec<String>,
    pub side_effects: Vec<String>,
}

/// How the effector should run the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    DryRun,
    Live,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DryRun => write!(f, "dry_run"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// Action lifecycle states.
///
/// `PROPOSED -> PENDING_APPROVAL -> (APPROVED | REJECTED)`;
/// `APPROVED -> EXECUTING -> (SUCCEEDED | FAILED | ROLLED_BACK)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Proposed,
    PendingApproval,
    Approved,
    Rejected,
    Executing,
    Succeeded,
    Failed,
    RolledBack,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Succeeded | Self::Failed | Self::RolledBack
        )
    }

    pub fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Proposed, Self::PendingApproval)
                | (Self::PendingApproval, Self::Approved)
                | (Self::PendingApproval, Self::Rejected)
                | (Self::Approved, Self::Executing)
                | (Self::Executing, Self::Succeeded)
                | (Self::Executing, Self::Failed)
                | (Self::Executing, Self::RolledBack)
        )
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proposed => write!(f, "PROPOSED"),
            Self::PendingApproval => write!(f, "PENDING_APPROVAL"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Executing => write!(f, "EXECUTING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
            Self::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

/// One candidate or scheduled remediation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub incident_id: Uuid,
    /// Rank of the hypothesis this action addresses.
    pub hypothesis_rank: u32,
    pub action_type: ActionType,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub risk_profile: RiskProfile,
    pub status: ActionStatus,
    pub approval_required: bool,
    /// Gate rule that decided the approval routing.
    pub approval_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_mode: ExecutionMode,
    /// Effector attempt id; completed attempts are never re-executed.
    pub attempt_id: Option<u64>,
    pub pre_metrics: BTreeMap<String, f64>,
    pub post_metrics: BTreeMap<String, f64>,
    pub verification: Option<VerificationReport>,
    /// Projected cost of running this action, urgency-adjusted.
    pub expected_cost: f64,
    pub worst_case_cost: f64,
    /// Failure or rejection detail for terminal states.
    pub status_reason: Option<String>,
}

impl Action {
    /// Apply a status transition, failing loudly on violations.
    pub fn transition(&mut self, to: ActionStatus) -> Result<(), PipelineError> {
        if !self.status.can_transition_to(to) {
            return Err(PipelineError::StaleState {
                entity: format!("action {}", self.id),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}
