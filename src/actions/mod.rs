//! Action registry and runbook-constrained selection.
//!
//! Action behavior is dispatched over the closed [`ActionType`] enum: each
//! variant maps to a static risk profile, a prerequisite set, and (where one
//! exists) an inverse. Runbooks can narrow and parameterize what this
//! registry offers; they can never extend it.

pub mod prerequisites;
pub mod selection;

pub use prerequisites::{all_hold, evaluate, PrereqContext, KNOWN_PREDICATES};
pub use selection::{select_action, ProposedRemediation, SelectionContext, SelectionOutcome};

use crate::types::{ActionType, BlastImpact, RiskProfile};

/// Static risk profile for one action type.
///
/// Runbook `risk_level` is an operator label; these numbers drive ranking
/// and cost projection.
pub fn risk_profile(action_type: ActionType) -> RiskProfile {
    match action_type {
        ActionType::ScaleUp => RiskProfile {
            risk_score: 0.15,
            expected_downtime_s: 0.0,
            worst_case_downtime_s: 30.0,
            recovery_time_s: 60.0,
            reversible: true,
            blast_impact: BlastImpact::Deployment,
            cost_per_minute: 2.0,
            prerequisites: vec![],
            side_effects: vec!["increased infrastructure spend".to_string()],
        },
        ActionType::ScaleDown => RiskProfile {
            risk_score: 0.25,
            expected_downtime_s: 0.0,
            worst_case_downtime_s: 60.0,
            recovery_time_s: 60.0,
            reversible: true,
            blast_impact: BlastImpact::Deployment,
            cost_per_minute: 2.0,
            prerequisites: vec!["replicas_available".to_string()],
            side_effects: vec!["reduced headroom under load".to_string()],
        },
        ActionType::ClearCache => RiskProfile {
            risk_score: 0.30,
            expected_downtime_s: 5.0,
            worst_case_downtime_s: 120.0,
            recovery_time_s: 300.0,
            reversible: false,
            blast_impact: BlastImpact::Deployment,
            cost_per_minute: 5.0,
            prerequisites: vec!["cache_layer_present".to_string()],
            side_effects: vec!["cold-cache latency until refill".to_string()],
        },
        ActionType::ToggleFeatureFlag => RiskProfile {
            risk_score: 0.20,
            expected_downtime_s: 0.0,
            worst_case_downtime_s: 10.0,
            recovery_time_s: 10.0,
            reversible: true,
            blast_impact: BlastImpact::Deployment,
            cost_per_minute: 1.0,
            prerequisites: vec![],
            side_effects: vec!["feature unavailable while disabled".to_string()],
        },
        ActionType::RestartPod => RiskProfile {
            risk_score: 0.35,
            expected_downtime_s: 15.0,
            worst_case_downtime_s: 90.0,
            recovery_time_s: 120.0,
            reversible: false,
            blast_impact: BlastImpact::Pod,
            cost_per_minute: 4.0,
            prerequisites: vec!["replicas_available".to_string()],
            side_effects: vec!["in-flight requests dropped".to_string()],
        },
        ActionType::RollbackDeployment => RiskProfile {
            risk_score: 0.45,
            expected_downtime_s: 30.0,
            worst_case_downtime_s: 300.0,
            recovery_time_s: 300.0,
            reversible: true,
            blast_impact: BlastImpact::Deployment,
            cost_per_minute: 8.0,
            prerequisites: vec!["recent_deployment_present".to_string()],
            side_effects: vec!["recent fixes reverted with the regression".to_string()],
        },
        ActionType::DrainNode => RiskProfile {
            risk_score: 0.60,
            expected_downtime_s: 60.0,
            worst_case_downtime_s: 600.0,
            recovery_time_s: 600.0,
            reversible: true,
            blast_impact: BlastImpact::Cluster,
            cost_per_minute: 12.0,
            prerequisites: vec!["node_drain_capacity".to_string()],
            side_effects: vec!["workload rescheduling churn".to_string()],
        },
    }
}
