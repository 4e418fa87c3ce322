//! Pipeline error taxonomy.
//!
//! One enum covers every failure class the control plane distinguishes. The
//! kind string (`ErrorKind::as_str`) is what appears in logs, timeline events,
//! and API error bodies, so it must stay stable.

use thiserror::Error;
use uuid::Uuid;

/// Stable error classification used in logs and response bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid dependency graph or runbook. Fatal at startup; during hot
    /// reload the previous good snapshot is retained.
    Configuration,
    /// Metrics / logs / reasoning / effector transport failure or timeout.
    /// Recovered locally by the owning stage.
    ExternalUnavailable,
    /// State-machine violation (e.g. approving a resolved action). 409.
    StaleState,
    /// Daily execution ceiling hit.
    RateLimited,
    /// SLA expired while PENDING_APPROVAL.
    ApprovalTimeout,
    /// A pipeline stage exceeded its deadline.
    StageTimeout,
    /// Invariant violation (missing reference, confidence out of range).
    DataIntegrity,
    /// Same incident fingerprint within the active window; merged, not failed.
    Duplicate,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::ExternalUnavailable => "external_unavailable",
            Self::StaleState => "stale_state",
            Self::RateLimited => "rate_limited",
            Self::ApprovalTimeout => "approval_timeout",
            Self::StageTimeout => "stage_timeout",
            Self::DataIntegrity => "data_integrity",
            Self::Duplicate => "duplicate",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by pipeline stages and the operator API.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{backend} unavailable: {message}")]
    ExternalUnavailable { backend: &'static str, message: String },

    #[error("illegal transition {from} -> {to} for {entity}")]
    StaleState {
        entity: String,
        from: String,
        to: String,
    },

    #[error("daily execution ceiling hit for {action_type}")]
    RateLimited { action_type: String },

    #[error("approval SLA expired for action {action_id}")]
    ApprovalTimeout { action_id: Uuid },

    #[error("stage_timeout:{stage}")]
    StageTimeout { stage: &'static str },

    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("duplicate incident fingerprint {fingerprint}")]
    Duplicate { fingerprint: String },

    #[error("already_proposed: incident {incident_id} has a live action")]
    AlreadyProposed { incident_id: Uuid },
}

impl PipelineError {
    /// Classification for logs and API bodies.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::ExternalUnavailable { .. } => ErrorKind::ExternalUnavailable,
            Self::StaleState { .. } => ErrorKind::StaleState,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::ApprovalTimeout { .. } => ErrorKind::ApprovalTimeout,
            Self::StageTimeout { .. } => ErrorKind::StageTimeout,
            Self::DataIntegrity(_) => ErrorKind::DataIntegrity,
            Self::Duplicate { .. } | Self::AlreadyProposed { .. } => ErrorKind::Duplicate,
        }
    }

    /// True when the owning stage should degrade locally instead of
    /// surfacing to the orchestrator.
    pub fn is_degradable(&self) -> bool {
        matches!(self, Self::ExternalUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(ErrorKind::ExternalUnavailable.as_str(), "external_unavailable");
        assert_eq!(ErrorKind::StaleState.as_str(), "stale_state");
        assert_eq!(ErrorKind::ApprovalTimeout.as_str(), "approval_timeout");
    }

    #[test]
    fn stage_timeout_formats_with_stage_name() {
        let err = PipelineError::StageTimeout { stage: "reasoning" };
        assert_eq!(err.to_string(), "stage_timeout:reasoning");
        assert_eq!(err.kind(), ErrorKind::StageTimeout);
    }

    #[test]
    fn only_external_unavailable_degrades() {
        let ext = PipelineError::ExternalUnavailable {
            backend: "metrics",
            message: "connect refused".to_string(),
        };
        assert!(ext.is_degradable());
        assert!(!PipelineError::DataIntegrity("x".to_string()).is_degradable());
    }
}
