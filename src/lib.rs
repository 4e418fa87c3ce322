//! AIRRA: Adaptive Incident Response & Remediation Agent
//!
//! Closed-loop incident-response control plane for a fleet of production
//! services.
//!
//! ## Architecture
//!
//! - **Perception**: z-score anomaly detection over polled metric baselines
//! - **Deduplication**: windowed fingerprint suppression ahead of correlation
//! - **Correlation**: sliding-window grouping into incident candidates
//! - **Reasoning**: external model adapter — ideas only, never scores
//! - **Scoring**: deterministic hypothesis confidence with audit components
//! - **Blast radius & selection**: topology-aware, runbook-constrained
//! - **Approval gate**: auto vs. operator routing with daily rate limits
//! - **Execution & verification**: effector invocation, stabilization wait,
//!   before/after outcome classification, calibration write-back

pub mod actions;
pub mod api;
pub mod approval;
pub mod blast;
pub mod config;
pub mod correlation;
pub mod dedup;
pub mod error;
pub mod execution;
pub mod graph;
pub mod learning;
pub mod perception;
pub mod pipeline;
pub mod reasoning;
pub mod registry;
pub mod runbook;
pub mod scoring;
pub mod store;
pub mod types;

// Re-export the working vocabulary of the pipeline.
pub use error::{ErrorKind, PipelineError};
pub use types::{
    Action, ActionStatus, ActionType, BlastLevel, BlastRadiusAssessment, ConfidenceOutcomeRecord,
    ExecutionMode, Hypothesis, HypothesisCategory, Incident, IncidentStatus, OperatorFeedback,
    RawHypothesis, Recommendation, Severity, Signal, SignalSource, VerificationOutcome,
    VerificationReport,
};

// Re-export the component surfaces used by the binary and integration tests.
pub use approval::DailyCounters;
pub use correlation::Correlator;
pub use dedup::DedupTable;
pub use execution::{Effector, Executor, Verifier};
pub use graph::{DependencyGraph, GraphHandle};
pub use learning::LearningStore;
pub use perception::{AnomalyDetector, MetricsBackend};
pub use pipeline::{PipelineContext, PipelineStats};
pub use reasoning::{ReasoningAdapter, ReasoningBackend};
pub use runbook::{Runbook, RunbookHandle, RunbookSet};
pub use scoring::CategoryPriors;
pub use store::{IncidentStore, MemoryStore};
