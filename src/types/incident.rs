//! Incident record and status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::error::PipelineError;

use super::Severity;

/// Incident lifecycle states.
///
/// Legal transitions:
/// `DETECTED -> ANALYZING -> PENDING_APPROVAL -> APPROVED -> EXECUTING ->
/// {RESOLVED, ESCALATED, FAILED}`, plus any non-terminal state may jump to
/// ESCALATED (SLA breach, operator escalation) or FAILED (integrity
/// violation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    Detected,
    Analyzing,
    PendingApproval,
    Approved,
    Executing,
    Resolved,
    Escalated,
    Failed,
}

impl IncidentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Escalated | Self::Failed)
    }

    /// Whether a transition to `to` is legal from this state.
    pub fn can_transition_to(self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        // Escalation and integrity failure are reachable from any live state.
        if to == Self::Escalated || to == Self::Failed {
            return true;
        }
        matches!(
            (self, to),
            (Self::Detected, Self::Analyzing)
                | (Self::Analyzing, Self::PendingApproval)
                | (Self::PendingApproval, Self::Approved)
                | (Self::Approved, Self::Executing)
                | (Self::Executing, Self::Resolved)
        )
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Detected => write!(f, "DETECTED"),
            Self::Analyzing => write!(f, "ANALYZING"),
            Self::PendingApproval => write!(f, "PENDING_APPROVAL"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Executing => write!(f, "EXECUTING"),
            Self::Resolved => write!(f, "RESOLVED"),
            Self::Escalated => write!(f, "ESCALATED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// One entry in an incident's audit timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub at: DateTime<Utc>,
    /// Short machine-readable kind, e.g. "status_change", "duplicate_merged".
    pub kind: String,
    pub detail: String,
}

impl TimelineEvent {
    pub fn now(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            kind: kind.into(),
            detail: detail.into(),
        }
    }
}

/// A persisted work unit spanning detection to resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub service: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub detected_at: DateTime<Utc>,
    /// Set iff `status` is terminal.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Which subsystem created the incident (e.g. "correlation").
    pub detection_source: String,
    /// Metric/log identifiers implicated by contributing signals.
    pub affected_components: BTreeSet<String>,
    /// Metric -> latest observed value at detection/merge time.
    pub metrics_snapshot: BTreeMap<String, f64>,
    /// Freeform enrichment (recent deployments, operator notes).
    pub context: BTreeMap<String, String>,
    /// Cross-incident dedup key.
    pub fingerprint: String,
    /// Signals absorbed by dedup and fingerprint merges.
    pub duplicate_count: u32,
    /// Set when the reasoning backend was unavailable and the fallback
    /// hypothesis path was taken.
    #[serde(default)]
    pub reasoning_degraded: bool,
    /// Cause string carried by every terminal state.
    pub terminal_cause: Option<String>,
    /// Audit timeline, append-only.
    pub timeline: Vec<TimelineEvent>,
}

impl Incident {
    /// Apply a status transition, enforcing the state machine, severity
    /// monotonicity, and the terminal `resolved_at` invariant.
    ///
    /// Illegal transitions fail loudly with source and target state.
    pub fn transition(
        &mut self,
        to: IncidentStatus,
        cause: Option<String>,
    ) -> Result<(), PipelineError> {
        if !self.status.can_transition_to(to) {
            return Err(PipelineError::StaleState {
                entity: format!("incident {}", self.id),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        let from = self.status;
        self.status = to;
        if to.is_terminal() {
            self.resolved_at = Some(Utc::now());
            self.terminal_cause = cause.clone();
        }
        self.timeline.push(TimelineEvent::now(
            "status_change",
            match cause {
                Some(c) => format!("{from} -> {to} ({c})"),
                None => format!("{from} -> {to}"),
            },
        ));
        Ok(())
    }

    /// Raise severity, never lower it.
    pub fn escalate_severity(&mut self, severity: Severity) {
        if severity > self.severity {
            self.timeline.push(TimelineEvent::now(
                "severity_change",
                format!("{} -> {}", self.severity, severity),
            ));
            self.severity = severity;
        }
    }

    /// Evidence universe for validating hypothesis evidence refs:
    /// affected components plus metric snapshot keys.
    pub fn evidence_universe(&self) -> BTreeSet<String> {
        let mut set = self.affected_components.clone();
        set.extend(self.metrics_snapshot.keys().cloned());
        set
    }
}
