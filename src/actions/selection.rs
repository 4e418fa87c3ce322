//! Runbook-constrained action selection.
//!
//! Given ranked hypotheses, the matched runbook, the blast assessment, and
//! the daily budgets, pick the lowest-risk eligible action — or decide to
//! observe, or escalate. Selection never invents actions: the candidate set
//! is exactly the runbook's allow-list filtered by prerequisites.

use std::collections::BTreeMap;

use crate::approval::{DailyCounters, RateLimitState};
use crate::graph::DependencyGraph;
use crate::runbook::{AllowedAction, RunbookSet};
use crate::types::{
    ActionType, BlastLevel, BlastRadiusAssessment, Hypothesis, Incident, RiskProfile,
};

use super::prerequisites::{all_hold, PrereqContext};
use super::risk_profile;

/// Inputs to one selection pass.
pub struct SelectionContext<'a> {
    pub incident: &'a Incident,
    pub hypotheses: &'a [Hypothesis],
    pub runbooks: &'a RunbookSet,
    pub graph: &'a DependencyGraph,
    pub blast: &'a BlastRadiusAssessment,
    pub counters: &'a DailyCounters,
    pub confidence_floor: f64,
}

/// A selected action, ready for the approval gate.
#[derive(Debug, Clone)]
pub struct ProposedRemediation {
    pub action_type: ActionType,
    pub runbook_id: String,
    pub allowed: AllowedAction,
    pub risk_profile: RiskProfile,
    pub hypothesis_rank: u32,
    pub adjusted_risk: f64,
    pub expected_cost: f64,
    pub worst_case_cost: f64,
    pub rate_limit_state: RateLimitState,
    pub parameters: BTreeMap<String, serde_json::Value>,
}

/// What selection decided for this incident.
#[derive(Debug)]
pub enum SelectionOutcome {
    Proposed(Box<ProposedRemediation>),
    /// Blast/confidence too low to act; keep watching.
    Observe { hypothesis_rank: u32, confidence: f64 },
    Escalate { reason: String },
}

/// Decision-to-act rule combining blast level and hypothesis confidence.
fn should_act(level: BlastLevel, confidence: f64) -> bool {
    match level {
        BlastLevel::Critical => true,
        BlastLevel::High => confidence >= 0.70,
        BlastLevel::Medium => confidence >= 0.80,
        BlastLevel::Low | BlastLevel::Minimal => confidence >= 0.90,
    }
}

/// Run one selection pass.
pub fn select_action(ctx: &SelectionContext<'_>) -> SelectionOutcome {
    // Highest-ranked hypothesis clearing the floor (>= — the boundary is
    // eligible).
    let Some(hypothesis) = ctx
        .hypotheses
        .iter()
        .find(|h| h.confidence >= ctx.confidence_floor)
    else {
        return SelectionOutcome::Escalate {
            reason: format!(
                "no hypothesis at or above confidence floor {:.2}",
                ctx.confidence_floor
            ),
        };
    };

    let Some(runbook) = ctx.runbooks.lookup(hypothesis.category, &ctx.incident.service) else {
        return SelectionOutcome::Escalate {
            reason: format!(
                "no runbook for category {} (service {})",
                hypothesis.category, ctx.incident.service
            ),
        };
    };

    if !should_act(ctx.blast.level, hypothesis.confidence) {
        return SelectionOutcome::Observe {
            hypothesis_rank: hypothesis.rank,
            confidence: hypothesis.confidence,
        };
    }

    // Candidate set: allow-listed actions whose prerequisites all hold.
    // Prerequisites come from both the static profile and the runbook entry.
    let prereq_ctx = PrereqContext {
        incident: ctx.incident,
        graph: ctx.graph,
    };
    let mut candidates: Vec<ProposedRemediation> = runbook
        .allowed_actions
        .iter()
        .filter_map(|allowed| {
            let profile = risk_profile(allowed.action_type);
            let holds = all_hold(&profile.prerequisites, &prereq_ctx)
                && all_hold(&allowed.prerequisites, &prereq_ctx);
            if !holds {
                return None;
            }
            Some(build_candidate(ctx, runbook.id.clone(), hypothesis, allowed, profile))
        })
        .collect();

    if candidates.is_empty() {
        return SelectionOutcome::Escalate {
            reason: format!(
                "no allowed action with satisfied prerequisites in runbook {}",
                runbook.id
            ),
        };
    }

    candidates.sort_by(|a, b| {
        a.adjusted_risk
            .partial_cmp(&b.adjusted_risk)
            .unwrap_or(std::cmp::Ordering::Equal)
            // Reversible before irreversible.
            .then_with(|| b.risk_profile.reversible.cmp(&a.risk_profile.reversible))
            .then_with(|| {
                a.risk_profile
                    .expected_downtime_s
                    .partial_cmp(&b.risk_profile.expected_downtime_s)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| {
                a.worst_case_cost
                    .partial_cmp(&b.worst_case_cost)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });

    // Prefer the lowest-risk candidate with auto budget remaining; when every
    // budget is consumed, propose the lowest-risk one anyway and let the gate
    // route it to operator approval.
    let chosen = candidates
        .iter()
        .position(|c| c.rate_limit_state != RateLimitState::Exhausted)
        .unwrap_or(0);
    SelectionOutcome::Proposed(Box::new(candidates.swap_remove(chosen)))
}

fn build_candidate(
    ctx: &SelectionContext<'_>,
    runbook_id: String,
    hypothesis: &Hypothesis,
    allowed: &AllowedAction,
    profile: RiskProfile,
) -> ProposedRemediation {
    let urgency = ctx.blast.urgency_multiplier;
    let adjusted_risk = (profile.risk_score * ctx.graph.criticality_weight(&ctx.incident.service)
        - (urgency - 1.0) * crate::config::defaults::URGENCY_RISK_DISCOUNT)
        .clamp(0.0, 1.0);

    let expected_cost = profile.expected_downtime_s / 60.0 * profile.cost_per_minute * urgency;
    let worst_case_cost = profile.worst_case_downtime_s / 60.0 * profile.cost_per_minute * urgency;

    ProposedRemediation {
        action_type: allowed.action_type,
        runbook_id,
        allowed: allowed.clone(),
        rate_limit_state: ctx
            .counters
            .state(allowed.action_type, allowed.max_auto_executions_per_day),
        risk_profile: profile,
        hypothesis_rank: hypothesis.rank,
        adjusted_risk,
        expected_cost,
        worst_case_cost,
        parameters: allowed.default_parameters.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blast;
    use crate::types::{HypothesisCategory, IncidentStatus, Severity};
    use chrono::Utc;
    use std::collections::{BTreeSet, HashSet};
    use uuid::Uuid;

    fn make_graph() -> DependencyGraph {
        DependencyGraph::from_yaml_str(
            r"
payment-service:
  depends_on: []
  tier: tier-1
  team: payments
  criticality: high
",
        )
        .unwrap()
    }

    fn make_incident() -> Incident {
        Incident {
            id: Uuid::new_v4(),
            service: "payment-service".to_string(),
            severity: Severity::High,
            status: IncidentStatus::Analyzing,
            detected_at: Utc::now(),
            resolved_at: None,
            detection_source: "correlation".to_string(),
            affected_components: BTreeSet::from(["cpu_usage".to_string()]),
            metrics_snapshot: [
                ("cpu_usage".to_string(), 97.0),
                ("available_replicas".to_string(), 3.0),
                ("error_rate".to_string(), 0.1),
            ]
            .into(),
            context: Default::default(),
            fingerprint: "fp".to_string(),
            duplicate_count: 0,
            reasoning_degraded: false,
            terminal_cause: None,
            timeline: Vec::new(),
        }
    }

    fn make_hypothesis(confidence: f64) -> Hypothesis {
        Hypothesis {
            incident_id: Uuid::new_v4(),
            rank: 1,
            description: "CPU saturation".to_string(),
            category: HypothesisCategory::CpuSpike,
            confidence,
            base_confidence: 0.75,
            evidence_quality: 0.6,
            anomaly_strength: 0.7,
            dependency_boost: 0.0,
            supporting_signals: vec!["cpu_usage".to_string()],
            reasoning: String::new(),
            model_suggested_score: None,
        }
    }

    fn make_runbooks() -> RunbookSet {
        RunbookSet::from_yaml_str(
            r"
- id: rb-cpu
  category: cpu_spike
  allowed_actions:
    - action_type: scale_up
      description: scale out
      approval_required: false
      risk_level: low
      max_auto_executions_per_day: 10
    - action_type: restart_pod
      description: bounce the worst pod
      approval_required: true
      risk_level: medium
      prerequisites: [replicas_available]
      max_auto_executions_per_day: 5
",
            crate::actions::KNOWN_PREDICATES,
        )
        .unwrap()
    }

    fn make_blast(incident: &Incident, graph: &DependencyGraph) -> BlastRadiusAssessment {
        // No dependents, high criticality: MINIMAL-ish; force higher levels in
        // individual tests by overriding fields.
        blast::assess(incident, graph, &HashSet::new(), 50.0)
    }

    struct Fixture {
        incident: Incident,
        graph: DependencyGraph,
        runbooks: RunbookSet,
        counters: DailyCounters,
        blast: BlastRadiusAssessment,
    }

    fn fixture() -> Fixture {
        let incident = make_incident();
        let graph = make_graph();
        let blast = make_blast(&incident, &graph);
        Fixture {
            incident,
            graph,
            runbooks: make_runbooks(),
            counters: DailyCounters::in_memory(),
            blast,
        }
    }

    fn select(fx: &Fixture, hypotheses: &[Hypothesis]) -> SelectionOutcome {
        select_action(&SelectionContext {
            incident: &fx.incident,
            hypotheses,
            runbooks: &fx.runbooks,
            graph: &fx.graph,
            blast: &fx.blast,
            counters: &fx.counters,
            confidence_floor: 0.60,
        })
    }

    #[test]
    fn below_floor_escalates() {
        let fx = fixture();
        let out = select(&fx, &[make_hypothesis(0.59)]);
        assert!(matches!(out, SelectionOutcome::Escalate { .. }));
    }

    #[test]
    fn floor_boundary_is_eligible() {
        let mut fx = fixture();
        fx.blast.level = BlastLevel::Critical; // act regardless of confidence
        fx.blast.urgency_multiplier = 5.0;
        let out = select(&fx, &[make_hypothesis(0.60)]);
        assert!(matches!(out, SelectionOutcome::Proposed(_)));
    }

    #[test]
    fn low_blast_with_modest_confidence_observes() {
        let mut fx = fixture();
        fx.blast.level = BlastLevel::Low;
        let out = select(&fx, &[make_hypothesis(0.85)]);
        assert!(matches!(out, SelectionOutcome::Observe { .. }));
    }

    #[test]
    fn low_blast_with_very_high_confidence_acts() {
        let mut fx = fixture();
        fx.blast.level = BlastLevel::Low;
        fx.blast.urgency_multiplier = 1.5;
        let out = select(&fx, &[make_hypothesis(0.92)]);
        let SelectionOutcome::Proposed(p) = out else {
            panic!("expected proposal");
        };
        // scale_up (risk 0.15) ranks below restart_pod (risk 0.35).
        assert_eq!(p.action_type, ActionType::ScaleUp);
    }

    #[test]
    fn missing_runbook_escalates() {
        let mut fx = fixture();
        fx.blast.level = BlastLevel::Critical;
        let mut h = make_hypothesis(0.9);
        h.category = HypothesisCategory::NetworkIssue;
        let out = select(&fx, &[h]);
        let SelectionOutcome::Escalate { reason } = out else {
            panic!("expected escalation");
        };
        assert!(reason.contains("no runbook"));
    }

    #[test]
    fn failed_prerequisites_drop_candidates() {
        let mut fx = fixture();
        fx.blast.level = BlastLevel::Critical;
        fx.blast.urgency_multiplier = 5.0;
        // Without spare replicas both scale_up survives (no prereqs) and
        // restart_pod is dropped; removing the replica metric entirely keeps
        // only scale_up.
        fx.incident.metrics_snapshot.remove("available_replicas");
        let out = select(&fx, &[make_hypothesis(0.9)]);
        let SelectionOutcome::Proposed(p) = out else {
            panic!("expected proposal");
        };
        assert_eq!(p.action_type, ActionType::ScaleUp);
    }

    #[test]
    fn exhausted_budget_falls_back_to_next_candidate_or_gate() {
        let mut fx = fixture();
        fx.blast.level = BlastLevel::Critical;
        fx.blast.urgency_multiplier = 5.0;

        // Consume the scale_up budget.
        for _ in 0..10 {
            fx.counters.try_increment(ActionType::ScaleUp, 10).unwrap();
        }
        let out = select(&fx, &[make_hypothesis(0.9)]);
        let SelectionOutcome::Proposed(p) = out else {
            panic!("expected proposal");
        };
        // restart_pod still has budget, so it is preferred over the exhausted
        // scale_up.
        assert_eq!(p.action_type, ActionType::RestartPod);

        // Exhaust restart_pod too: lowest-risk candidate is proposed anyway,
        // carrying the Exhausted state for the gate to route.
        for _ in 0..5 {
            fx.counters.try_increment(ActionType::RestartPod, 5).unwrap();
        }
        let out = select(&fx, &[make_hypothesis(0.9)]);
        let SelectionOutcome::Proposed(p) = out else {
            panic!("expected proposal");
        };
        assert_eq!(p.action_type, ActionType::ScaleUp);
        assert_eq!(p.rate_limit_state, RateLimitState::Exhausted);
    }

    #[test]
    fn costs_scale_with_urgency() {
        let mut fx = fixture();
        fx.blast.level = BlastLevel::Critical;
        fx.blast.urgency_multiplier = 5.0;
        let out = select(&fx, &[make_hypothesis(0.9)]);
        let SelectionOutcome::Proposed(p) = out else {
            panic!("expected proposal");
        };
        let profile = &p.risk_profile;
        let expected =
            profile.worst_case_downtime_s / 60.0 * profile.cost_per_minute * 5.0;
        assert!((p.worst_case_cost - expected).abs() < 1e-9);
        assert!(p.worst_case_cost >= p.expected_cost);
    }
}
