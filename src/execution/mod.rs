//! Execution: effector invocation with attempt tracking, then verification.
//!
//! One approved action executes exactly once: the attempt id recorded on the
//! action makes re-execution refuse loudly. Effector failures never reach
//! verification; they settle the action as FAILED with an outcome of
//! NO_CHANGE (nothing started) or DEGRADED (started, then failed — side
//! effects possible).

pub mod effector;
mod verification;

pub use effector::{AttemptStatus, Effector, ExecutionReceipt, HttpEffector};
pub use verification::{
    classify, compare, max_relative_stddev, recommendation, Verifier,
};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::defaults::EFFECTOR_POLL_INTERVAL_SECONDS;
use crate::error::PipelineError;
use crate::store::IncidentStore;
use crate::types::{
    Action, ActionStatus, TimelineEvent, VerificationOutcome, VerificationReport,
};

/// Final result of one execute-and-verify pass.
#[derive(Debug)]
pub struct ExecutionResult {
    pub action: Action,
    /// Present when verification ran (effector succeeded).
    pub report: Option<VerificationReport>,
    /// Outcome recorded for the learning store; always set.
    pub outcome: VerificationOutcome,
    /// Whether the effector actually started the attempt.
    pub executed: bool,
}

/// Drives the effector and the verifier for approved actions.
pub struct Executor {
    effector: Arc<dyn Effector>,
    verifier: Verifier,
    /// Cap on status polls before declaring the attempt lost.
    max_status_polls: u32,
}

impl Executor {
    pub fn new(effector: Arc<dyn Effector>, verifier: Verifier) -> Self {
        Self {
            effector,
            verifier,
            max_status_polls: 150,
        }
    }

    /// Execute an approved action and verify the outcome.
    ///
    /// The caller owns incident status transitions; this method owns the
    /// action's.
    pub async fn execute_and_verify(
        &self,
        store: &dyn IncidentStore,
        action_id: Uuid,
    ) -> Result<ExecutionResult, PipelineError> {
        let action = store
            .get_action(action_id)
            .ok_or_else(|| PipelineError::DataIntegrity(format!("action {action_id} not found")))?;

        // Completed attempts are never re-executed.
        if action.attempt_id.is_some() {
            return Err(PipelineError::StaleState {
                entity: format!("action {action_id}"),
                from: action.status.to_string(),
                to: ActionStatus::Executing.to_string(),
            });
        }

        let incident = store
            .get_incident(action.incident_id)
            .ok_or_else(|| {
                PipelineError::DataIntegrity(format!("incident {} not found", action.incident_id))
            })?;
        let service = incident.service.clone();

        // Pre-action snapshot of the fixed verification metric set.
        let pre_metrics = self.verifier.capture(&service).await;
        let action = store.update_action(action_id, &mut |a| {
            a.transition(ActionStatus::Executing)?;
            a.executed_at = Some(Utc::now());
            a.pre_metrics = pre_metrics.clone();
            Ok(())
        })?;

        info!(
            action_id = %action_id,
            incident_id = %action.incident_id,
            action_type = %action.action_type,
            mode = %action.execution_mode,
            "invoking effector"
        );

        let receipt = self
            .effector
            .execute(action.action_type, &action.parameters, action.execution_mode)
            .await;

        let receipt = match receipt {
            Ok(r) => r,
            Err(e) => {
                // Transport failure before anything started.
                let action = self.settle_failed(store, action_id, e.to_string())?;
                return Ok(ExecutionResult {
                    action,
                    report: None,
                    outcome: VerificationOutcome::NoChange,
                    executed: false,
                });
            }
        };

        if !receipt.started() {
            let reason = receipt
                .error
                .unwrap_or_else(|| "effector rejected the execution".to_string());
            let action = self.settle_failed(store, action_id, reason)?;
            return Ok(ExecutionResult {
                action,
                report: None,
                outcome: VerificationOutcome::NoChange,
                executed: false,
            });
        }

        let attempt_id = receipt.attempt_id;
        let action = store.update_action(action_id, &mut |a| {
            a.attempt_id = Some(attempt_id);
            Ok(())
        })?;

        match self.await_attempt(attempt_id).await {
            AttemptStatus::Succeeded => {}
            AttemptStatus::Failed(detail) => {
                // Started then failed: observable side effects are possible.
                let action = self.settle_failed(store, action_id, detail)?;
                return Ok(ExecutionResult {
                    action,
                    report: None,
                    outcome: VerificationOutcome::Degraded,
                    executed: true,
                });
            }
            AttemptStatus::Running => {
                let action =
                    self.settle_failed(store, action_id, "attempt never settled".to_string())?;
                return Ok(ExecutionResult {
                    action,
                    report: None,
                    outcome: VerificationOutcome::Degraded,
                    executed: true,
                });
            }
        }

        let reversible = action.risk_profile.reversible;
        let (report, post_metrics) =
            self.verifier.verify(&service, &pre_metrics, reversible).await;
        let outcome = report.outcome;

        let action = store.update_action(action_id, &mut |a| {
            a.transition(ActionStatus::Succeeded)?;
            a.post_metrics = post_metrics.clone();
            a.verification = Some(report.clone());
            Ok(())
        })?;

        info!(
            action_id = %action_id,
            outcome = %outcome,
            overall = report.overall_improvement,
            "verification complete"
        );

        Ok(ExecutionResult {
            action,
            report: Some(report),
            outcome,
            executed: true,
        })
    }

    /// Poll the effector until the attempt settles or the poll budget runs
    /// out.
    async fn await_attempt(&self, attempt_id: u64) -> AttemptStatus {
        let poll = Duration::from_secs(EFFECTOR_POLL_INTERVAL_SECONDS);
        for _ in 0..self.max_status_polls {
            match self.effector.status(attempt_id).await {
                Ok(AttemptStatus::Running) => tokio::time::sleep(poll).await,
                Ok(settled) => return settled,
                Err(e) => {
                    warn!(attempt_id, error = %e, "effector status poll failed — retrying");
                    tokio::time::sleep(poll).await;
                }
            }
        }
        AttemptStatus::Running
    }

    fn settle_failed(
        &self,
        store: &dyn IncidentStore,
        action_id: Uuid,
        reason: String,
    ) -> Result<Action, PipelineError> {
        warn!(action_id = %action_id, reason = %reason, "execution failed");
        let action = store.update_action(action_id, &mut |a| {
            a.transition(ActionStatus::Failed)?;
            a.status_reason = Some(reason.clone());
            Ok(())
        })?;
        let _ = store.update_incident(action.incident_id, &mut |i| {
            i.timeline.push(TimelineEvent::now(
                "execution_failed",
                format!("action {action_id}: {reason}"),
            ));
            Ok(())
        });
        Ok(action)
    }
}
