//! Operator API handlers.
//!
//! The inbound surface is the minimal set the control loop needs: approve or
//! reject a pending action, escalate an incident, submit feedback, and
//! inspect incidents, calibration, registries, and pipeline stats.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::{approve_action, escalate_incident, reject_action, PipelineContext};
use crate::types::{
    Action, ActionType, BlastRadiusAssessment, ExecutionMode, FeedbackType, Hypothesis, Incident,
    OperatorFeedback,
};

use super::envelope::ApiError;

// ============================================================================
// Request/response bodies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApproveBody {
    pub by: String,
    pub execution_mode: ExecutionMode,
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub by: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct EscalateBody {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
    pub feedback_type: FeedbackType,
    #[serde(default)]
    pub hypothesis_rank: Option<u32>,
    #[serde(default)]
    pub action_id: Option<Uuid>,
    #[serde(default)]
    pub correct_category: Option<crate::types::HypothesisCategory>,
    #[serde(default)]
    pub correct_action_type: Option<ActionType>,
    #[serde(default)]
    pub text: String,
}

/// Incident with its attached records embedded.
#[derive(Debug, Serialize)]
pub struct IncidentDetail {
    #[serde(flatten)]
    pub incident: Incident,
    pub hypotheses: Vec<Hypothesis>,
    pub actions: Vec<Action>,
    pub blast_radius: Option<BlastRadiusAssessment>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

// ============================================================================
// Approval endpoints
// ============================================================================

pub async fn post_approve(
    State(ctx): State<PipelineContext>,
    Path(action_id): Path<Uuid>,
    Json(body): Json<ApproveBody>,
) -> Response {
    if ctx.store.get_action(action_id).is_none() {
        return ApiError::not_found(format!("action {action_id} not found"))
            .with_action(action_id)
            .into_response();
    }
    match approve_action(&ctx, action_id, &body.by, body.execution_mode).await {
        Ok(action) => (StatusCode::OK, Json(action)).into_response(),
        Err(e) => ApiError::from_pipeline(&e)
            .with_action(action_id)
            .into_response(),
    }
}

pub async fn post_reject(
    State(ctx): State<PipelineContext>,
    Path(action_id): Path<Uuid>,
    Json(body): Json<RejectBody>,
) -> Response {
    if ctx.store.get_action(action_id).is_none() {
        return ApiError::not_found(format!("action {action_id} not found"))
            .with_action(action_id)
            .into_response();
    }
    match reject_action(&ctx, action_id, &body.by, &body.reason).await {
        Ok(action) => (StatusCode::OK, Json(action)).into_response(),
        Err(e) => ApiError::from_pipeline(&e)
            .with_action(action_id)
            .into_response(),
    }
}

// ============================================================================
// Incident endpoints
// ============================================================================

pub async fn post_escalate(
    State(ctx): State<PipelineContext>,
    Path(incident_id): Path<Uuid>,
    Json(body): Json<EscalateBody>,
) -> Response {
    if ctx.store.get_incident(incident_id).is_none() {
        return ApiError::not_found(format!("incident {incident_id} not found"))
            .with_incident(incident_id)
            .into_response();
    }
    match escalate_incident(&ctx, incident_id, &body.reason).await {
        Ok(incident) => (StatusCode::OK, Json(incident)).into_response(),
        Err(e) => ApiError::from_pipeline(&e)
            .with_incident(incident_id)
            .into_response(),
    }
}

pub async fn post_feedback(
    State(ctx): State<PipelineContext>,
    Path(incident_id): Path<Uuid>,
    Json(body): Json<FeedbackBody>,
) -> Response {
    if ctx.store.get_incident(incident_id).is_none() {
        return ApiError::not_found(format!("incident {incident_id} not found"))
            .with_incident(incident_id)
            .into_response();
    }

    let feedback = OperatorFeedback {
        incident_id,
        hypothesis_rank: body.hypothesis_rank,
        action_id: body.action_id,
        feedback_type: body.feedback_type,
        correct_category: body.correct_category,
        correct_action_type: body.correct_action_type,
        text: body.text,
        timestamp: Utc::now(),
    };
    match ctx.learning.append_feedback(&feedback) {
        Ok(()) => (StatusCode::CREATED, Json(feedback)).into_response(),
        Err(e) => ApiError::from_pipeline(&e)
            .with_incident(incident_id)
            .into_response(),
    }
}

pub async fn get_incident(
    State(ctx): State<PipelineContext>,
    Path(incident_id): Path<Uuid>,
) -> Response {
    let Some(incident) = ctx.store.get_incident(incident_id) else {
        return ApiError::not_found(format!("incident {incident_id} not found"))
            .with_incident(incident_id)
            .into_response();
    };
    let detail = IncidentDetail {
        hypotheses: ctx.store.hypotheses(incident_id),
        actions: ctx.store.actions_for(incident_id),
        blast_radius: ctx.store.blast(incident_id),
        incident,
    };
    (StatusCode::OK, Json(detail)).into_response()
}

pub async fn list_incidents(
    State(ctx): State<PipelineContext>,
    Query(params): Query<ListParams>,
) -> Response {
    let incidents = ctx.store.list_incidents(params.limit.min(500));
    (StatusCode::OK, Json(incidents)).into_response()
}

// ============================================================================
// Introspection endpoints
// ============================================================================

pub async fn get_healthz() -> Response {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
}

pub async fn get_stats(State(ctx): State<PipelineContext>) -> Response {
    let (seen, admitted) = ctx.dedup.stats();
    let mut stats = ctx.stats.snapshot();
    if let Some(map) = stats.as_object_mut() {
        map.insert("signals_seen".to_string(), seen.into());
        map.insert("signals_admitted".to_string(), admitted.into());
        map.insert(
            "dedup_compression_ratio".to_string(),
            serde_json::json!(ctx.dedup.compression_ratio()),
        );
    }
    (StatusCode::OK, Json(stats)).into_response()
}

pub async fn get_calibration(State(ctx): State<PipelineContext>) -> Response {
    (StatusCode::OK, Json(ctx.learning.calibration())).into_response()
}

pub async fn get_runbook_registry(State(ctx): State<PipelineContext>) -> Response {
    let snapshot = ctx.runbooks.snapshot();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "snapshot_hash": snapshot.snapshot_hash(),
            "loaded_at": snapshot.loaded_at,
            "runbooks": snapshot.len(),
            "categories": snapshot.category_names(),
        })),
    )
        .into_response()
}

pub async fn get_dependency_registry(State(ctx): State<PipelineContext>) -> Response {
    let snapshot = ctx.graph.snapshot();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "snapshot_hash": snapshot.snapshot_hash(),
            "loaded_at": snapshot.loaded_at,
            "services": snapshot.services().count(),
        })),
    )
        .into_response()
}
