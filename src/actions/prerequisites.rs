//! Named prerequisite predicates.
//!
//! Runbooks reference predicates by name; evaluation runs against the
//! incident's metrics snapshot and the dependency graph. The set is closed:
//! runbook validation rejects unknown names at load, and evaluation of an
//! unknown name fails closed anyway.

use crate::graph::{DependencyGraph, Tier};
use crate::types::Incident;

/// Evaluation context for one predicate check.
pub struct PrereqContext<'a> {
    pub incident: &'a Incident,
    pub graph: &'a DependencyGraph,
}

/// Every predicate name the evaluator understands.
pub const KNOWN_PREDICATES: &[&str] = &[
    "replicas_available",
    "error_rate_below_half",
    "service_not_tier0",
    "has_upstream_dependency",
    "recent_deployment_present",
    "cache_layer_present",
    "traffic_below_saturation",
    "node_drain_capacity",
];

/// Evaluate one named predicate. Unknown names fail closed.
pub fn evaluate(name: &str, ctx: &PrereqContext<'_>) -> bool {
    let snapshot = &ctx.incident.metrics_snapshot;
    match name {
        // At least one spare replica to absorb a restart or drain.
        "replicas_available" => snapshot
            .get("available_replicas")
            .is_some_and(|v| *v >= 2.0),
        // Don't act on a service that is already mostly failing.
        "error_rate_below_half" => snapshot.get("error_rate").is_some_and(|v| *v < 0.5),
        "service_not_tier0" => ctx
            .graph
            .node(&ctx.incident.service)
            .is_some_and(|n| n.tier != Tier::Tier0),
        "has_upstream_dependency" => !ctx.graph.direct_upstreams(&ctx.incident.service).is_empty(),
        // Rollback only makes sense when a deployment is on record.
        "recent_deployment_present" => ctx.incident.context.contains_key("recent_deployment"),
        "cache_layer_present" => {
            ctx.incident.context.contains_key("cache_layer")
                || snapshot.contains_key("cache_hit_rate")
        }
        "traffic_below_saturation" => snapshot
            .get("request_rate")
            .map_or(true, |v| *v < 1000.0),
        "node_drain_capacity" => snapshot
            .get("schedulable_nodes")
            .is_some_and(|v| *v >= 2.0),
        unknown => {
            tracing::warn!(predicate = unknown, "unknown prerequisite — failing closed");
            false
        }
    }
}

/// Evaluate a list of predicate names; all must hold.
pub fn all_hold(names: &[String], ctx: &PrereqContext<'_>) -> bool {
    names.iter().all(|n| evaluate(n, ctx))
}
