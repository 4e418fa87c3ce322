//! Core data model for the incident-response pipeline.
//!
//! Split by lifecycle stage: signals (perception output), incidents
//! (correlation output), hypotheses (reasoning + scoring), actions
//! (selection + execution), blast assessments, and outcome/feedback records.

mod action;
mod blast;
mod hypothesis;
mod incident;
mod outcome;
mod signal;

pub use action::{
    Action, ActionStatus, ActionType, BlastImpact, ExecutionMode, RiskLevel, RiskProfile,
};
pub use blast::{BlastLevel, BlastRadiusAssessment};
pub use hypothesis::{Hypothesis, HypothesisCategory, RawHypothesis};
pub use incident::{Incident, IncidentStatus, TimelineEvent};
pub use outcome::{
    ConfidenceOutcomeRecord, FeedbackType, OperatorFeedback, Recommendation, VerificationOutcome,
    VerificationReport,
};
pub use signal::{Severity, Signal, SignalSource};
