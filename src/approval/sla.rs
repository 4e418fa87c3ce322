//! Approval-SLA sweeper.
//!
//! Once a minute, any action sitting in PENDING_APPROVAL longer than the SLA
//! is rejected with `approval_timeout` and its incident escalates with the
//! same cause. No execution is ever attempted for a timed-out action.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::store::{transition_incident, IncidentStore};
use crate::types::{ActionStatus, IncidentStatus, TimelineEvent};

/// One sweep pass; returns how many actions were timed out.
pub fn sweep_once(store: &dyn IncidentStore, sla: Duration) -> usize {
    let now = Utc::now();
    let mut timed_out = 0;

    for action in store.pending_approval_actions() {
        let waited = (now - action.requested_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if waited <= sla {
            continue;
        }

        let result = store.update_action(action.id, &mut |a| {
            a.transition(ActionStatus::Rejected)?;
            a.status_reason = Some("approval_timeout".to_string());
            Ok(())
        });
        match result {
            Ok(_) => {
                timed_out += 1;
                info!(
                    action_id = %action.id,
                    incident_id = %action.incident_id,
                    waited_s = waited.as_secs(),
                    "approval SLA breached — action rejected"
                );
            }
            Err(e) => {
                // Raced with an operator decision; leave it alone.
                warn!(action_id = %action.id, error = %e, "SLA rejection skipped");
                continue;
            }
        }

        let escalated = transition_incident(
            store,
            action.incident_id,
            IncidentStatus::Escalated,
            Some("approval_timeout".to_string()),
        );
        if let Err(e) = escalated {
            warn!(
                incident_id = %action.incident_id,
                error = %e,
                "incident already terminal during SLA escalation"
            );
        } else {
            let _ = store.update_incident(action.incident_id, &mut |i| {
                i.timeline.push(TimelineEvent::now(
                    "sla_breach",
                    format!("action {} rejected after {}s", action.id, waited.as_secs()),
                ));
                Ok(())
            });
        }
    }

    timed_out
}

/// Sweeper loop; runs until cancelled.
pub async fn run_sla_sweeper(
    store: Arc<dyn IncidentStore>,
    sla: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(sla_s = sla.as_secs(), "approval SLA sweeper started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let timed_out = sweep_once(store.as_ref(), sla);
        if timed_out > 0 {
            info!(timed_out, "approval SLA sweep complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{
        ActionType, ExecutionMode, Incident, Severity,
    };
    use std::collections::{BTreeMap, BTreeSet};
    use uuid::Uuid;

    fn seed_pending(store: &MemoryStore, age: chrono::Duration) -> (Uuid, Uuid) {
        let incident = Incident {
            id: Uuid::new_v4(),
            service: "payment-service".to_string(),
            severity: Severity::High,
            status: IncidentStatus::PendingApproval,
            detected_at: Utc::now() - age,
            resolved_at: None,
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
        store.create_incident(incident).unwrap();

        let action = crate::types::Action {
            id: Uuid::new_v4(),
            incident_id,
            hypothesis_rank: 1,
            action_type: ActionType::RestartPod,
            parameters: BTreeMap::new(),
            risk_profile: crate::actions::risk_profile(ActionType::RestartPod),
            status: ActionStatus::PendingApproval,
            approval_required: true,
            approval_reason: Some("runbook_policy".to_string()),
            requested_at: Utc::now() - age,
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
        store.propose_action(action).unwrap();
        (incident_id, action_id)
    }

    #[test]
    fn breach_rejects_action_and_escalates_incident() {
        let store = MemoryStore::new();
        // 121 minutes pending against a 120-minute SLA.
        let (incident_id, action_id) = seed_pending(&store, chrono::Duration::minutes(121));

        let timed_out = sweep_once(&store, Duration::from_secs(120 * 60));
        assert_eq!(timed_out, 1);

        let action = store.get_action(action_id).unwrap();
        assert_eq!(action.status, ActionStatus::Rejected);
        assert_eq!(action.status_reason.as_deref(), Some("approval_timeout"));
        assert!(action.executed_at.is_none());

        let incident = store.get_incident(incident_id).unwrap();
        assert_eq!(incident.status, IncidentStatus::Escalated);
        assert_eq!(incident.terminal_cause.as_deref(), Some("approval_timeout"));
        assert!(incident.resolved_at.is_some());
    }

    #[test]
    fn within_sla_is_untouched() {
        let store = MemoryStore::new();
        let (incident_id, action_id) = seed_pending(&store, chrono::Duration::minutes(30));

        let timed_out = sweep_once(&store, Duration::from_secs(120 * 60));
        assert_eq!(timed_out, 0);
        assert_eq!(
            store.get_action(action_id).unwrap().status,
            ActionStatus::PendingApproval
        );
        assert_eq!(
            store.get_incident(incident_id).unwrap().status,
            IncidentStatus::PendingApproval
        );
    }
}
