//! Per-incident analysis coordinator.
//!
//! Runs the stage sequence for one incident on one worker:
//! reasoning -> scoring -> blast radius -> action selection -> approval gate
//! -> execution -> verification -> outcome recording. Every stage carries a
//! deadline; a blown deadline escalates the incident with
//! `stage_timeout:<stage>`. External-backend failures degrade locally and
//! the pipeline continues; everything else lands in the timeline and a
//! terminal state with a cause string.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::actions::{select_action, SelectionContext, SelectionOutcome};
use crate::approval::decide;
use crate::blast;
use crate::error::PipelineError;
use crate::execution::ExecutionResult;
use crate::scoring::{score_and_rank, DependencyContext};
use crate::store::transition_incident;
use crate::types::{
    Action, ActionStatus, ActionType, ConfidenceOutcomeRecord, ExecutionMode, Incident,
    IncidentStatus, RiskLevel, Signal, TimelineEvent, VerificationOutcome,
};

use super::PipelineContext;

/// Deadline for the quick computational stages.
const COMPUTE_STAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Extra slack on top of the reasoning call timeout.
const REASONING_STAGE_SLACK: Duration = Duration::from_secs(10);

/// Extra slack on top of the stabilization window for the execution stage.
const EXECUTION_STAGE_SLACK: Duration = Duration::from_secs(600);

/// Spawn the analysis task for a fresh incident, bounded by the worker pool.
pub fn spawn_analysis(ctx: PipelineContext, incident_id: Uuid, signals: Vec<Signal>) {
    tokio::spawn(async move {
        let permit = match ctx.analysis_permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return, // semaphore closed on shutdown
        };
        analyze_incident(&ctx, incident_id, signals).await;
        drop(permit);
    });
}

/// Wrap one stage with its deadline.
async fn stage<T, F>(name: &'static str, deadline: Duration, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| PipelineError::StageTimeout { stage: name })
}

/// Run stages 4-8 for one incident to completion.
pub async fn analyze_incident(ctx: &PipelineContext, incident_id: Uuid, signals: Vec<Signal>) {
    if let Err(e) = run_analysis(ctx, incident_id, &signals).await {
        handle_stage_error(ctx, incident_id, &e);
    }
}

async fn run_analysis(
    ctx: &PipelineContext,
    incident_id: Uuid,
    signals: &[Signal],
) -> Result<(), PipelineError> {
    transition_incident(ctx.store.as_ref(), incident_id, IncidentStatus::Analyzing, None)?;
    let mut incident = ctx
        .store
        .get_incident(incident_id)
        .ok_or_else(|| PipelineError::DataIntegrity(format!("incident {incident_id} vanished")))?;

    let graph = ctx.graph.snapshot();
    let runbooks = ctx.runbooks.snapshot();

    // Stage: reasoning (advisory only).
    let reasoning_deadline = crate::config::get().reasoning_timeout + REASONING_STAGE_SLACK;
    let output = stage("reasoning", reasoning_deadline, async {
        ctx.reasoning
            .generate(
                &incident,
                &runbooks.category_names(),
                &graph.neighborhood_summary(&incident.service),
            )
            .await
    })
    .await?;

    if output.degraded {
        incident = ctx.store.update_incident(incident_id, &mut |i| {
            i.reasoning_degraded = true;
            i.timeline.push(TimelineEvent::now(
                "reasoning_degraded",
                "reasoning backend unavailable; fallback hypothesis in use",
            ));
            Ok(())
        })?;
    }

    // Stage: deterministic confidence scoring.
    let hypotheses = stage("scoring", COMPUTE_STAGE_TIMEOUT, async {
        let mut live = ctx.store.live_services();
        live.remove(&incident.service); // this incident is not its own context
        let dep = DependencyContext {
            direct_upstream_live: graph
                .direct_upstreams(&incident.service)
                .iter()
                .any(|s| live.contains(s)),
            transitive_upstream_live: graph
                .transitive_upstreams(&incident.service)
                .iter()
                .any(|s| live.contains(s)),
            downstream_live: graph
                .transitive_dependents(&incident.service)
                .iter()
                .any(|s| live.contains(s)),
        };
        score_and_rank(
            output.hypotheses,
            &incident,
            signals,
            &ctx.learning.priors(),
            dep,
        )
    })
    .await?;

    for h in &hypotheses {
        ctx.stats.bump(&ctx.stats.hypotheses_scored);
        info!(
            incident_id = %incident_id,
            rank = h.rank,
            category = %h.category,
            confidence = h.confidence,
            "hypothesis scored"
        );
    }
    ctx.store.put_hypotheses(incident_id, hypotheses.clone());

    // Stage: blast radius.
    let assessment = stage("blast_radius", COMPUTE_STAGE_TIMEOUT, async {
        let qps = match incident.metrics_snapshot.get("request_rate") {
            Some(v) => *v,
            None => ctx
                .metrics
                .current_value(&incident.service, "request_rate")
                .await
                .ok()
                .flatten()
                .unwrap_or(0.0),
        };
        blast::assess(&incident, &graph, &ctx.store.live_services(), qps)
    })
    .await?;
    info!(
        incident_id = %incident_id,
        blast_score = assessment.blast_score,
        level = %assessment.level,
        "blast radius assessed"
    );
    ctx.store.put_blast(assessment.clone());

    // Stage: runbook-constrained selection.
    let selection = stage("action_selection", COMPUTE_STAGE_TIMEOUT, async {
        select_action(&SelectionContext {
            incident: &incident,
            hypotheses: &hypotheses,
            runbooks: &runbooks,
            graph: &graph,
            blast: &assessment,
            counters: &ctx.counters,
            confidence_floor: crate::config::get().confidence_floor,
        })
    })
    .await?;

    let proposal = match selection {
        SelectionOutcome::Escalate { reason } => {
            escalate(ctx, incident_id, &reason)?;
            return Ok(());
        }
        SelectionOutcome::Observe {
            hypothesis_rank,
            confidence,
        } => {
            ctx.store.update_incident(incident_id, &mut |i| {
                i.timeline.push(TimelineEvent::now(
                    "queued_for_observation",
                    format!(
                        "blast {} with hypothesis #{hypothesis_rank} confidence {confidence:.2} below act threshold",
                        assessment.level
                    ),
                ));
                Ok(())
            })?;
            info!(incident_id = %incident_id, "queued for observation");
            return Ok(());
        }
        SelectionOutcome::Proposed(p) => p,
    };

    // Approval gate.
    let gate = decide(
        &proposal.allowed,
        assessment.level,
        &proposal.risk_profile,
        proposal.rate_limit_state,
    );
    if gate.budget_warning {
        ctx.store.update_incident(incident_id, &mut |i| {
            i.timeline.push(TimelineEvent::now(
                "rate_limit_warning",
                format!("{} at >=80% of its daily auto budget", proposal.action_type),
            ));
            Ok(())
        })?;
    }

    let default_mode = if crate::config::get().dry_run_mode {
        ExecutionMode::DryRun
    } else {
        ExecutionMode::Live
    };

    let mut action = Action {
        id: Uuid::new_v4(),
        incident_id,
        hypothesis_rank: proposal.hypothesis_rank,
        action_type: proposal.action_type,
        parameters: proposal.parameters.clone(),
        risk_profile: proposal.risk_profile.clone(),
        status: ActionStatus::Proposed,
        approval_required: gate.approval_required,
        approval_reason: Some(gate.reason.to_string()),
        requested_at: Utc::now(),
        approved_at: None,
        approved_by: None,
        executed_at: None,
        execution_mode: default_mode,
        attempt_id: None,
        pre_metrics: BTreeMap::new(),
        post_metrics: BTreeMap::new(),
        verification: None,
        expected_cost: proposal.expected_cost,
        worst_case_cost: proposal.worst_case_cost,
        status_reason: None,
    };
    action.transition(ActionStatus::PendingApproval)?;
    let action_id = action.id;

    match ctx.store.propose_action(action) {
        Ok(()) => {}
        Err(PipelineError::AlreadyProposed { .. }) => {
            // Lost the proposal race to a concurrent worker; the winner's
            // action proceeds.
            info!(incident_id = %incident_id, "action already proposed — standing down");
            return Ok(());
        }
        Err(e) => return Err(e),
    }
    ctx.stats.bump(&ctx.stats.actions_proposed);
    transition_incident(
        ctx.store.as_ref(),
        incident_id,
        IncidentStatus::PendingApproval,
        None,
    )?;

    if gate.approval_required {
        // Notification transport is an external concern; the hook point is a
        // dedicated tracing target plus a timeline event.
        ctx.store.update_incident(incident_id, &mut |i| {
            i.timeline.push(TimelineEvent::now(
                "approval_requested",
                format!("{} awaiting operator ({})", proposal.action_type, gate.reason),
            ));
            Ok(())
        })?;
        info!(
            target: "airra::notify",
            incident_id = %incident_id,
            action_id = %action_id,
            action_type = %proposal.action_type,
            reason = gate.reason,
            "operator approval required"
        );
        return Ok(());
    }

    // Auto path: consume the budget atomically; a lost race escalates with
    // rate_limited.
    if let Err(e) = ctx.counters.try_increment(
        proposal.action_type,
        proposal.allowed.max_auto_executions_per_day,
    ) {
        warn!(incident_id = %incident_id, error = %e, "auto budget race lost");
        ctx.store.update_action(action_id, &mut |a| {
            a.transition(ActionStatus::Rejected)?;
            a.status_reason = Some("rate_limited".to_string());
            Ok(())
        })?;
        escalate(ctx, incident_id, "rate_limited")?;
        return Ok(());
    }

    ctx.store.update_action(action_id, &mut |a| {
        a.transition(ActionStatus::Approved)?;
        a.approved_at = Some(Utc::now());
        a.approved_by = Some("auto".to_string());
        Ok(())
    })?;
    ctx.stats.bump(&ctx.stats.actions_auto_approved);
    transition_incident(ctx.store.as_ref(), incident_id, IncidentStatus::Approved, None)?;
    info!(
        incident_id = %incident_id,
        action_id = %action_id,
        action_type = %proposal.action_type,
        "action auto-approved"
    );

    let execution_deadline = crate::config::get().stabilization_window + EXECUTION_STAGE_SLACK;
    stage(
        "execution",
        execution_deadline,
        run_execution(ctx, incident_id, action_id),
    )
    .await??;
    Ok(())
}

/// Execute an approved action, then apply outcome handling.
pub async fn run_execution(
    ctx: &PipelineContext,
    incident_id: Uuid,
    action_id: Uuid,
) -> Result<(), PipelineError> {
    transition_incident(ctx.store.as_ref(), incident_id, IncidentStatus::Executing, None)?;

    let result = ctx
        .executor
        .execute_and_verify(ctx.store.as_ref(), action_id)
        .await?;
    ctx.stats.bump(&ctx.stats.actions_executed);

    record_outcome(ctx, incident_id, &result);
    apply_outcome(ctx, incident_id, &result)
}

/// Append the confidence/outcome pair — the only write-back to the learning
/// store.
fn record_outcome(ctx: &PipelineContext, incident_id: Uuid, result: &ExecutionResult) {
    let Some(incident) = ctx.store.get_incident(incident_id) else {
        error!(incident_id = %incident_id, "incident vanished before outcome recording");
        return;
    };
    let hypotheses = ctx.store.hypotheses(incident_id);
    let Some(hypothesis) = hypotheses
        .iter()
        .find(|h| h.rank == result.action.hypothesis_rank)
    else {
        error!(
            incident_id = %incident_id,
            rank = result.action.hypothesis_rank,
            "hypothesis missing for outcome record"
        );
        return;
    };

    let mut metric_deltas = BTreeMap::new();
    for (metric, pre) in &result.action.pre_metrics {
        if let Some(post) = result.action.post_metrics.get(metric) {
            metric_deltas.insert(metric.clone(), post - pre);
        }
    }

    let blast_level = ctx
        .store
        .blast(incident_id)
        .map_or(crate::types::BlastLevel::Minimal, |b| b.level);

    ctx.learning.append_outcome(ConfidenceOutcomeRecord {
        incident_id,
        service: incident.service.clone(),
        category: hypothesis.category,
        predicted_confidence: hypothesis.confidence,
        action_type: result.action.action_type,
        executed: result.executed,
        outcome: result.outcome,
        time_to_resolution_s: (Utc::now() - incident.detected_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .as_secs_f64(),
        blast_level,
        risk_level: risk_level_from_score(result.action.risk_profile.risk_score),
        metric_deltas,
        recorded_at: Utc::now(),
    });
    ctx.stats.bump(&ctx.stats.outcomes_recorded);
}

/// Settle the incident from the verification outcome, enqueueing the inverse
/// action on a reversible DEGRADED result.
fn apply_outcome(
    ctx: &PipelineContext,
    incident_id: Uuid,
    result: &ExecutionResult,
) -> Result<(), PipelineError> {
    if result.action.status == ActionStatus::Failed {
        escalate(ctx, incident_id, "execution_failed")?;
        return Ok(());
    }

    match result.outcome {
        VerificationOutcome::Success => {
            transition_incident(
                ctx.store.as_ref(),
                incident_id,
                IncidentStatus::Resolved,
                Some("remediation_verified".to_string()),
            )?;
        }
        VerificationOutcome::PartialSuccess => {
            transition_incident(
                ctx.store.as_ref(),
                incident_id,
                IncidentStatus::Resolved,
                Some("partial_improvement".to_string()),
            )?;
        }
        VerificationOutcome::NoChange => {
            escalate(ctx, incident_id, "verification_no_change")?;
        }
        VerificationOutcome::Unstable => {
            escalate(ctx, incident_id, "verification_unstable")?;
        }
        VerificationOutcome::Degraded => {
            if result.action.risk_profile.reversible {
                if let Some(inverse) = declared_inverse(ctx, incident_id, &result.action) {
                    enqueue_inverse(ctx, incident_id, &result.action, inverse)?;
                    return Ok(());
                }
            }
            escalate(ctx, incident_id, "degraded_without_inverse")?;
        }
    }
    Ok(())
}

/// Inverse declared by the matched runbook for this action, if any.
fn declared_inverse(
    ctx: &PipelineContext,
    incident_id: Uuid,
    action: &Action,
) -> Option<ActionType> {
    let hypotheses = ctx.store.hypotheses(incident_id);
    let hypothesis = hypotheses.iter().find(|h| h.rank == action.hypothesis_rank)?;
    let incident = ctx.store.get_incident(incident_id)?;
    let runbooks = ctx.runbooks.snapshot();
    let runbook = runbooks.lookup(hypothesis.category, &incident.service)?;
    runbook.allowed(action.action_type)?.inverse_action_type
}

/// Queue the inverse action for operator approval; the incident stays in
/// EXECUTING until the rollback settles it.
fn enqueue_inverse(
    ctx: &PipelineContext,
    incident_id: Uuid,
    original: &Action,
    inverse: ActionType,
) -> Result<(), PipelineError> {
    let mut action = Action {
        id: Uuid::new_v4(),
        incident_id,
        hypothesis_rank: original.hypothesis_rank,
        action_type: inverse,
        parameters: original.parameters.clone(),
        risk_profile: crate::actions::risk_profile(inverse),
        status: ActionStatus::Proposed,
        approval_required: true,
        approval_reason: Some("degraded_rollback".to_string()),
        requested_at: Utc::now(),
        approved_at: None,
        approved_by: None,
        executed_at: None,
        execution_mode: original.execution_mode,
        attempt_id: None,
        pre_metrics: BTreeMap::new(),
        post_metrics: BTreeMap::new(),
        verification: None,
        expected_cost: 0.0,
        worst_case_cost: 0.0,
        status_reason: None,
    };
    action.transition(ActionStatus::PendingApproval)?;
    let inverse_id = action.id;
    ctx.store.propose_action(action)?;

    ctx.store.update_incident(incident_id, &mut |i| {
        i.timeline.push(TimelineEvent::now(
            "rollback_enqueued",
            format!(
                "verification degraded after {}; inverse {} awaiting approval",
                original.action_type, inverse
            ),
        ));
        Ok(())
    })?;
    info!(
        target: "airra::notify",
        incident_id = %incident_id,
        action_id = %inverse_id,
        action_type = %inverse,
        "degraded outcome — rollback action awaiting approval"
    );
    Ok(())
}

/// Map an intrinsic risk score onto the operator-facing risk scale.
fn risk_level_from_score(score: f64) -> RiskLevel {
    if score < 0.25 {
        RiskLevel::Low
    } else if score < 0.50 {
        RiskLevel::Medium
    } else if score < 0.75 {
        RiskLevel::High
    } else {
        RiskLevel::Critical
    }
}

fn escalate(ctx: &PipelineContext, incident_id: Uuid, reason: &str) -> Result<(), PipelineError> {
    ctx.stats.bump(&ctx.stats.incidents_escalated);
    warn!(incident_id = %incident_id, reason, "incident escalated");
    transition_incident(
        ctx.store.as_ref(),
        incident_id,
        IncidentStatus::Escalated,
        Some(reason.to_string()),
    )?;
    Ok(())
}

fn handle_stage_error(ctx: &PipelineContext, incident_id: Uuid, e: &PipelineError) {
    error!(
        incident_id = %incident_id,
        kind = %e.kind(),
        error = %e,
        "pipeline stage failed"
    );
    let _ = ctx.store.update_incident(incident_id, &mut |i| {
        i.timeline.push(TimelineEvent::now("stage_error", e.to_string()));
        Ok(())
    });
    let target = match e {
        PipelineError::DataIntegrity(_) => IncidentStatus::Failed,
        _ => IncidentStatus::Escalated,
    };
    let transitioned = transition_incident(
        ctx.store.as_ref(),
        incident_id,
        target,
        Some(e.to_string()),
    );
    if transitioned.is_ok() && target == IncidentStatus::Escalated {
        ctx.stats.bump(&ctx.stats.incidents_escalated);
    }
}

// ============================================================================
// Operator decisions (invoked from the API)
// ============================================================================

/// Approve a pending action. Idempotent: re-approving with the same payload
/// returns the already-approved action unchanged.
pub async fn approve_action(
    ctx: &PipelineContext,
    action_id: Uuid,
    by: &str,
    execution_mode: ExecutionMode,
) -> Result<Action, PipelineError> {
    let action = ctx
        .store
        .get_action(action_id)
        .ok_or_else(|| PipelineError::DataIntegrity(format!("action {action_id} not found")))?;

    let incident = ctx.store.get_incident(action.incident_id).ok_or_else(|| {
        PipelineError::DataIntegrity(format!("incident {} not found", action.incident_id))
    })?;
    if incident.status.is_terminal() {
        return Err(PipelineError::StaleState {
            entity: format!("incident {}", incident.id),
            from: incident.status.to_string(),
            to: "APPROVED".to_string(),
        });
    }

    // Idempotent re-approval by the same operator with the same mode.
    if action.approved_by.as_deref() == Some(by)
        && action.execution_mode == execution_mode
        && action.status != ActionStatus::PendingApproval
    {
        return Ok(action);
    }

    let updated = ctx.store.update_action(action_id, &mut |a| {
        a.transition(ActionStatus::Approved)?;
        a.approved_at = Some(Utc::now());
        a.approved_by = Some(by.to_string());
        a.execution_mode = execution_mode;
        Ok(())
    })?;

    transition_incident(
        ctx.store.as_ref(),
        action.incident_id,
        IncidentStatus::Approved,
        None,
    )?;
    info!(
        action_id = %action_id,
        incident_id = %action.incident_id,
        by,
        mode = %execution_mode,
        "action approved by operator"
    );

    // Execution runs on its own worker; the API call returns immediately.
    let exec_ctx = ctx.clone();
    let incident_id = action.incident_id;
    tokio::spawn(async move {
        let deadline = crate::config::get().stabilization_window + EXECUTION_STAGE_SLACK;
        let result = stage(
            "execution",
            deadline,
            run_execution(&exec_ctx, incident_id, action_id),
        )
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) | Err(e) => handle_stage_error(&exec_ctx, incident_id, &e),
        }
    });

    Ok(updated)
}

/// Reject a pending action; the incident escalates to the operator.
pub async fn reject_action(
    ctx: &PipelineContext,
    action_id: Uuid,
    by: &str,
    reason: &str,
) -> Result<Action, PipelineError> {
    let action = ctx
        .store
        .get_action(action_id)
        .ok_or_else(|| PipelineError::DataIntegrity(format!("action {action_id} not found")))?;

    let updated = ctx.store.update_action(action_id, &mut |a| {
        a.transition(ActionStatus::Rejected)?;
        a.status_reason = Some(format!("rejected by {by}: {reason}"));
        Ok(())
    })?;

    escalate(ctx, action.incident_id, &format!("rejected_by_operator: {reason}"))?;
    info!(action_id = %action_id, by, reason, "action rejected by operator");
    Ok(updated)
}

/// Operator-initiated escalation of an incident; any pending action is
/// rejected alongside.
pub async fn escalate_incident(
    ctx: &PipelineContext,
    incident_id: Uuid,
    reason: &str,
) -> Result<Incident, PipelineError> {
    for action in ctx.store.actions_for(incident_id) {
        if action.status == ActionStatus::PendingApproval {
            let _ = ctx.store.update_action(action.id, &mut |a| {
                a.transition(ActionStatus::Rejected)?;
                a.status_reason = Some("incident_escalated".to_string());
                Ok(())
            });
        }
    }
    ctx.stats.bump(&ctx.stats.incidents_escalated);
    transition_incident(
        ctx.store.as_ref(),
        incident_id,
        IncidentStatus::Escalated,
        Some(reason.to_string()),
    )
}

// ============================================================================
// Test support
// ============================================================================


#[cfg(test)]
mod tests {
    use super::test_support::make_context;
    use super::*;
    use crate::types::Severity;
    use std::collections::{BTreeMap, BTreeSet};

    fn seed_pending_action(ctx: &PipelineContext, incident_status: IncidentStatus) -> (Uuid, Uuid) {
        let incident = Incident {
            id: Uuid::new_v4(),
            service: "payment-service".to_string(),
            severity: Severity::High,
            status: incident_status,
            detected_at: Utc::now(),
            resolved_at: if incident_status.is_terminal() {
                Some(Utc::now())
            } else {
                None
            },
            detection_source: "correlation".to_string(),
            affected_components: BTreeSet::new(),
            metrics_snapshot: BTreeMap::new(),
            context: BTreeMap::new(),
            fingerprint: Uuid::new_v4().to_string(),
            duplicate_count: 0,
            reasoning_degraded: false,
            terminal_cause: None,
            timeline: Vec::new(),
        };
        let incident_id = incident.id;
        ctx.store.create_incident(incident).unwrap();

        let action = Action {
            id: Uuid::new_v4(),
            incident_id,
            hypothesis_rank: 1,
            action_type: ActionType::RestartPod,
            parameters: BTreeMap::new(),
            risk_profile: crate::actions::risk_profile(ActionType::RestartPod),
            status: ActionStatus::PendingApproval,
            approval_required: true,
            approval_reason: Some("runbook_policy".to_string()),
            requested_at: Utc::now(),
            approved_at: None,
            approved_by: None,
            executed_at: None,
            execution_mode: ExecutionMode::DryRun,
            attempt_id: None,
            pre_metrics: BTreeMap::new(),
            post_metrics: BTreeMap::new(),
            verification: None,
            expected_cost: 0.0,
            worst_case_cost: 0.0,
            status_reason: None,
        };
        let action_id = action.id;
        ctx.store.propose_action(action).unwrap();
        (incident_id, action_id)
    }

    #[tokio::test]
    async fn approve_on_terminal_incident_is_stale_state() {
        let ctx = make_context().await;
        let (_, action_id) = seed_pending_action(&ctx, IncidentStatus::Escalated);

        let err = approve_action(&ctx, action_id, "alice", ExecutionMode::DryRun)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::StaleState);
    }

    #[tokio::test]
    async fn re_approval_with_identical_payload_is_idempotent() {
        let ctx = make_context().await;
        let (_, action_id) = seed_pending_action(&ctx, IncidentStatus::PendingApproval);

        let first = approve_action(&ctx, action_id, "alice", ExecutionMode::DryRun)
            .await
            .unwrap();
        assert_eq!(first.status, ActionStatus::Approved);

        // Second identical approval: same id, no error, no extra transition —
        // regardless of how far background execution has progressed.
        let second = approve_action(&ctx, action_id, "alice", ExecutionMode::DryRun)
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.approved_by.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn reject_escalates_the_incident() {
        let ctx = make_context().await;
        let (incident_id, action_id) = seed_pending_action(&ctx, IncidentStatus::PendingApproval);

        let rejected = reject_action(&ctx, action_id, "bob", "too risky").await.unwrap();
        assert_eq!(rejected.status, ActionStatus::Rejected);

        let incident = ctx.store.get_incident(incident_id).unwrap();
        assert_eq!(incident.status, IncidentStatus::Escalated);
        assert!(incident
            .terminal_cause
            .as_deref()
            .unwrap()
            .contains("too risky"));
    }

    #[tokio::test]
    async fn operator_escalation_rejects_pending_actions() {
        let ctx = make_context().await;
        let (incident_id, action_id) = seed_pending_action(&ctx, IncidentStatus::PendingApproval);

        let incident = escalate_incident(&ctx, incident_id, "paging the team")
            .await
            .unwrap();
        assert_eq!(incident.status, IncidentStatus::Escalated);
        assert_eq!(
            ctx.store.get_action(action_id).unwrap().status,
            ActionStatus::Rejected
        );
    }

    #[tokio::test]
    async fn degraded_reasoning_marks_incident_and_continues() {
        let ctx = make_context().await; // canned reasoning returns an invalid doc
        let incident = Incident {
            id: Uuid::new_v4(),
            service: "svc".to_string(),
            severity: Severity::Medium,
            status: IncidentStatus::Detected,
            detected_at: Utc::now(),
            resolved_at: None,
            detection_source: "correlation".to_string(),
            affected_components: BTreeSet::from(["error_rate".to_string()]),
            metrics_snapshot: BTreeMap::from([("error_rate".to_string(), 0.4)]),
            context: BTreeMap::new(),
            fingerprint: "fp".to_string(),
            duplicate_count: 0,
            reasoning_degraded: false,
            terminal_cause: None,
            timeline: Vec::new(),
        };
        let id = incident.id;
        ctx.store.create_incident(incident).unwrap();

        analyze_incident(&ctx, id, Vec::new()).await;

        let incident = ctx.store.get_incident(id).unwrap();
        assert!(incident.reasoning_degraded);
        // Fallback hypothesis was scored and persisted.
        let hypotheses = ctx.store.hypotheses(id);
        assert_eq!(hypotheses.len(), 1);
        assert_eq!(hypotheses[0].category, crate::types::HypothesisCategory::Other);
    }
}
