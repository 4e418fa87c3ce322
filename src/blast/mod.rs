//! Blast-radius assessment.
//!
//! Deterministic scope computation per incident: how much of the fleet sits
//! downstream of the affected service, how much traffic it carries, how far
//! anomalies have already propagated, and how critical the service is. The
//! resulting level drives the urgency multiplier, the decision-to-act rule,
//! and the approval gate.

use std::collections::HashSet;

use crate::graph::DependencyGraph;
use crate::types::{BlastLevel, BlastRadiusAssessment, Incident};

/// Downstream count at which the dependency term saturates.
const DOWNSTREAM_SATURATION: f64 = 10.0;

/// QPS at which the volume term saturates.
const VOLUME_SATURATION_QPS: f64 = 100.0;

/// Rough users reached per unit of QPS over a minute, for impact estimates.
const USERS_PER_QPS_MINUTE: f64 = 60.0;

/// Revenue attributed to one request, for impact estimates (dollars).
const REVENUE_PER_REQUEST: f64 = 0.02;

/// Compute the blast radius for an incident.
///
/// `live_anomalous_services` is the set of services with a live (non-terminal)
/// incident or recent anomalous signals; `request_volume_qps` is 0 when the
/// metrics backend could not supply it.
pub fn assess(
    incident: &Incident,
    graph: &DependencyGraph,
    live_anomalous_services: &HashSet<String>,
    request_volume_qps: f64,
) -> BlastRadiusAssessment {
    let dependents = graph.transitive_dependents(&incident.service);
    let downstream = dependents.len();

    let propagation = if dependents.is_empty() {
        0.0
    } else {
        dependents
            .iter()
            .filter(|s| live_anomalous_services.contains(*s))
            .count() as f64
            / dependents.len() as f64
    };

    let criticality = graph.criticality_weight(&incident.service);

    let blast_score = 0.30 * (downstream as f64 / DOWNSTREAM_SATURATION).min(1.0)
        + 0.25 * (request_volume_qps / VOLUME_SATURATION_QPS).min(1.0)
        + 0.25 * propagation
        + 0.20 * criticality;

    let level = BlastLevel::from_score(blast_score);

    BlastRadiusAssessment {
        incident_id: incident.id,
        affected_services_count: downstream,
        request_volume_qps,
        error_propagation_ratio: propagation,
        criticality_score: criticality,
        blast_score,
        level,
        urgency_multiplier: level.urgency_multiplier(),
        estimated_users_impacted: (request_volume_qps
            * USERS_PER_QPS_MINUTE
            * (1.0 + propagation)) as u64,
        revenue_impact_per_hour: request_volume_qps * 3600.0 * REVENUE_PER_REQUEST * criticality,
    }
}
