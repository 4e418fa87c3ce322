//! Incident store seam.
//!
//! The relational store is an external collaborator; the pipeline talks to
//! it through [`IncidentStore`]. The in-process [`MemoryStore`] implements
//! the two guarantees the concurrency model needs:
//!
//! - status transitions for a single incident/action are serialized (the
//!   row-level-lock equivalent), and illegal transitions fail loudly;
//! - at most one live action exists per incident; a second concurrent
//!   proposal observes `already_proposed`.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use uuid::Uuid;

use crate::error::PipelineError;
use crate::types::{
    Action, ActionStatus, BlastRadiusAssessment, Hypothesis, Incident, IncidentStatus,
};

/// Persistence interface for incidents, hypotheses, actions, and blast
/// assessments.
pub trait IncidentStore: Send + Sync {
    fn create_incident(&self, incident: Incident) -> Result<(), PipelineError>;
    fn get_incident(&self, id: Uuid) -> Option<Incident>;
    /// Recent incidents, newest first.
    fn list_incidents(&self, limit: usize) -> Vec<Incident>;
    /// Live (non-terminal) incident with this fingerprint, if any.
    fn find_live_by_fingerprint(&self, fingerprint: &str) -> Option<Uuid>;
    /// Services that currently have a live incident.
    fn live_services(&self) -> HashSet<String>;
    /// Serialized mutation of one incident; returns the updated copy.
    fn update_incident(
        &self,
        id: Uuid,
        f: &mut dyn FnMut(&mut Incident) -> Result<(), PipelineError>,
    ) -> Result<Incident, PipelineError>;

    fn put_hypotheses(&self, incident_id: Uuid, hypotheses: Vec<Hypothesis>);
    fn hypotheses(&self, incident_id: Uuid) -> Vec<Hypothesis>;

    fn put_blast(&self, assessment: BlastRadiusAssessment);
    fn blast(&self, incident_id: Uuid) -> Option<BlastRadiusAssessment>;

    /// Insert a new action; fails with `already_proposed` when the incident
    /// already has a live action.
    fn propose_action(&self, action: Action) -> Result<(), PipelineError>;
    fn get_action(&self, id: Uuid) -> Option<Action>;
    fn actions_for(&self, incident_id: Uuid) -> Vec<Action>;
    /// All actions currently awaiting operator approval.
    fn pending_approval_actions(&self) -> Vec<Action>;
    /// Serialized mutation of one action; returns the updated copy.
    fn update_action(
        &self,
        id: Uuid,
        f: &mut dyn FnMut(&mut Action) -> Result<(), PipelineError>,
    ) -> Result<Action, PipelineError>;
}

#[derive(Default)]
struct MemoryInner {
    incidents: HashMap<Uuid, Incident>,
    /// Creation order for newest-first listing.
    incident_order: Vec<Uuid>,
    hypotheses: HashMap<Uuid, Vec<Hypothesis>>,
    blasts: HashMap<Uuid, BlastRadiusAssessment>,
    actions: HashMap<Uuid, Action>,
    actions_by_incident: HashMap<Uuid, Vec<Uuid>>,
}

/// In-process store; the write lock is the transition serializer.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::unwrap_used)] // poisoned store lock is unrecoverable
    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryInner> {
        self.inner.read().unwrap()
    }

    #[allow(clippy::unwrap_used)]
    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryInner> {
        self.inner.write().unwrap()
    }
}

impl IncidentStore for MemoryStore {
    fn create_incident(&self, incident: Incident) -> Result<(), PipelineError> {
        let mut inner = self.write();
        if inner.incidents.contains_key(&incident.id) {
            return Err(PipelineError::DataIntegrity(format!(
                "incident {} already exists",
                incident.id
            )));
        }
        inner.incident_order.push(incident.id);
        inner.incidents.insert(incident.id, incident);
        Ok(())
    }

    fn get_incident(&self, id: Uuid) -> Option<Incident> {
        self.read().incidents.get(&id).cloned()
    }

    fn list_incidents(&self, limit: usize) -> Vec<Incident> {
        let inner = self.read();
        inner
            .incident_order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| inner.incidents.get(id).cloned())
            .collect()
    }

    fn find_live_by_fingerprint(&self, fingerprint: &str) -> Option<Uuid> {
        self.read()
            .incidents
            .values()
            .find(|i| i.fingerprint == fingerprint && !i.status.is_terminal())
            .map(|i| i.id)
    }

    fn live_services(&self) -> HashSet<String> {
        self.read()
            .incidents
            .values()
            .filter(|i| !i.status.is_terminal())
            .map(|i| i.service.clone())
            .collect()
    }

    fn update_incident(
        &self,
        id: Uuid,
        f: &mut dyn FnMut(&mut Incident) -> Result<(), PipelineError>,
    ) -> Result<Incident, PipelineError> {
        let mut inner = self.write();
        let incident = inner
            .incidents
            .get_mut(&id)
            .ok_or_else(|| PipelineError::DataIntegrity(format!("incident {id} not found")))?;
        f(incident)?;
        Ok(incident.clone())
    }

    fn put_hypotheses(&self, incident_id: Uuid, hypotheses: Vec<Hypothesis>) {
        self.write().hypotheses.insert(incident_id, hypotheses);
    }

    fn hypotheses(&self, incident_id: Uuid) -> Vec<Hypothesis> {
        self.read()
            .hypotheses
            .get(&incident_id)
            .cloned()
            .unwrap_or_default()
    }

    fn put_blast(&self, assessment: BlastRadiusAssessment) {
        self.write()
            .blasts
            .insert(assessment.incident_id, assessment);
    }

    fn blast(&self, incident_id: Uuid) -> Option<BlastRadiusAssessment> {
        self.read().blasts.get(&incident_id).cloned()
    }

    fn propose_action(&self, action: Action) -> Result<(), PipelineError> {
        let mut inner = self.write();
        // Unique-constraint equivalent: one live action per incident.
        let has_live = inner
            .actions_by_incident
            .get(&action.incident_id)
            .is_some_and(|ids| {
                ids.iter().any(|aid| {
                    inner
                        .actions
                        .get(aid)
                        .is_some_and(|a| !a.status.is_terminal())
                })
            });
        if has_live {
            return Err(PipelineError::AlreadyProposed {
                incident_id: action.incident_id,
            });
        }
        inner
            .actions_by_incident
            .entry(action.incident_id)
            .or_default()
            .push(action.id);
        inner.actions.insert(action.id, action);
        Ok(())
    }

    fn get_action(&self, id: Uuid) -> Option<Action> {
        self.read().actions.get(&id).cloned()
    }

    fn actions_for(&self, incident_id: Uuid) -> Vec<Action> {
        let inner = self.read();
        inner
            .actions_by_incident
            .get(&incident_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.actions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn pending_approval_actions(&self) -> Vec<Action> {
        self.read()
            .actions
            .values()
            .filter(|a| a.status == ActionStatus::PendingApproval)
            .cloned()
            .collect()
    }

    fn update_action(
        &self,
        id: Uuid,
        f: &mut dyn FnMut(&mut Action) -> Result<(), PipelineError>,
    ) -> Result<Action, PipelineError> {
        let mut inner = self.write();
        let action = inner
            .actions
            .get_mut(&id)
            .ok_or_else(|| PipelineError::DataIntegrity(format!("action {id} not found")))?;
        f(action)?;
        Ok(action.clone())
    }
}

/// Transition an incident's status through the store, enforcing the state
/// machine and terminal-cause invariants.
pub fn transition_incident(
    store: &dyn IncidentStore,
    id: Uuid,
    to: IncidentStatus,
    cause: Option<String>,
) -> Result<Incident, PipelineError> {
    store.update_incident(id, &mut |incident| incident.transition(to, cause.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Severity, TimelineEvent};
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet};

    fn make_incident(fingerprint: &str) -> Incident {
        Incident {
            id: Uuid::new_v4(),
            service: "payment-service".to_string(),
            severity: Severity::High,
            status: IncidentStatus::Detected,
            detected_at: Utc::now(),
            resolved_at: None,
            detection_source: "correlation".to_string(),
            affected_components: BTreeSet::new(),
            metrics_snapshot: BTreeMap::new(),
            context: BTreeMap::new(),
            fingerprint: fingerprint.to_string(),
            duplicate_count: 0,
            reasoning_degraded: false,
            terminal_cause: None,
            timeline: vec![TimelineEvent::now("created", "detected")],
        }
    }

    fn make_action(incident_id: Uuid, status: ActionStatus) -> Action {
        Action {
            id: Uuid::new_v4(),
            incident_id,
            hypothesis_rank: 1,
            action_type: crate::types::ActionType::ScaleUp,
            parameters: BTreeMap::new(),
            risk_profile: crate::actions::risk_profile(crate::types::ActionType::ScaleUp),
            status,
            approval_required: false,
            approval_reason: None,
            requested_at: Utc::now(),
            approved_at: None,
            approved_by: None,
            executed_at: None,
            execution_mode: crate::types::ExecutionMode::DryRun,
            attempt_id: None,
            pre_metrics: BTreeMap::new(),
            post_metrics: BTreeMap::new(),
            verification: None,
            expected_cost: 0.0,
            worst_case_cost: 0.0,
            status_reason: None,
        }
    }

    #[test]
    fn fingerprint_lookup_ignores_terminal_incidents() {
        let store = MemoryStore::new();
        let mut incident = make_incident("fp-1");
        let id = incident.id;
        incident.status = IncidentStatus::Resolved;
        incident.resolved_at = Some(Utc::now());
        store.create_incident(incident).unwrap();
        assert!(store.find_live_by_fingerprint("fp-1").is_none());

        let live = make_incident("fp-1");
        let live_id = live.id;
        store.create_incident(live).unwrap();
        assert_eq!(store.find_live_by_fingerprint("fp-1"), Some(live_id));
        assert_ne!(live_id, id);
    }

    #[test]
    fn second_live_action_observes_already_proposed() {
        let store = MemoryStore::new();
        let incident = make_incident("fp");
        let incident_id = incident.id;
        store.create_incident(incident).unwrap();

        store
            .propose_action(make_action(incident_id, ActionStatus::PendingApproval))
            .unwrap();
        let err = store
            .propose_action(make_action(incident_id, ActionStatus::Proposed))
            .unwrap_err();
        assert!(err.to_string().contains("already_proposed"));
    }

    #[test]
    fn terminal_action_frees_the_constraint() {
        let store = MemoryStore::new();
        let incident = make_incident("fp");
        let incident_id = incident.id;
        store.create_incident(incident).unwrap();

        store
            .propose_action(make_action(incident_id, ActionStatus::Rejected))
            .unwrap();
        // Rejected is terminal, so a follow-up proposal is allowed.
        store
            .propose_action(make_action(incident_id, ActionStatus::PendingApproval))
            .unwrap();
        assert_eq!(store.actions_for(incident_id).len(), 2);
    }

    #[test]
    fn illegal_transition_fails_loudly_and_changes_nothing() {
        let store = MemoryStore::new();
        let incident = make_incident("fp");
        let id = incident.id;
        store.create_incident(incident).unwrap();

        let err = transition_incident(&store, id, IncidentStatus::Executing, None).unwrap_err();
        assert!(err.to_string().contains("DETECTED"));
        assert!(err.to_string().contains("EXECUTING"));
        assert_eq!(
            store.get_incident(id).unwrap().status,
            IncidentStatus::Detected
        );
    }

    #[test]
    fn live_services_reflect_non_terminal_incidents() {
        let store = MemoryStore::new();
        store.create_incident(make_incident("a")).unwrap();
        let mut resolved = make_incident("b");
        resolved.service = "other-service".to_string();
        resolved.status = IncidentStatus::Resolved;
        store.create_incident(resolved).unwrap();

        let live = store.live_services();
        assert!(live.contains("payment-service"));
        assert!(!live.contains("other-service"));
    }

    #[test]
    fn listing_is_newest_first() {
        let store = MemoryStore::new();
        let first = make_incident("1");
        let second = make_incident("2");
        let second_id = second.id;
        store.create_incident(first).unwrap();
        store.create_incident(second).unwrap();

        let listed = store.list_incidents(1);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, second_id);
    }
}
