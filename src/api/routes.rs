//! Operator API routes.
//!
//! - `POST /approvals/{action_id}/approve` — authorize a pending action
//! - `POST /approvals/{action_id}/reject` — reject a pending action
//! - `POST /incidents/{id}/escalate` — hand an incident to the operator
//! - `POST /incidents/{id}/feedback` — record operator feedback
//! - `GET  /incidents/{id}` — incident with hypotheses/actions/timeline
//! - `GET  /incidents`, `/stats`, `/calibration`, `/registry/*`, `/healthz`

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::pipeline::PipelineContext;

use super::handlers;

/// Build the operator API router.
pub fn api_routes(ctx: PipelineContext) -> Router {
    Router::new()
        .route("/approvals/:action_id/approve", post(handlers::post_approve))
        .route("/approvals/:action_id/reject", post(handlers::post_reject))
        .route("/incidents/:id/escalate", post(handlers::post_escalate))
        .route("/incidents/:id/feedback", post(handlers::post_feedback))
        .route("/incidents/:id", get(handlers::get_incident))
        .route("/incidents", get(handlers::list_incidents))
        .route("/healthz", get(handlers::get_healthz))
        .route("/stats", get(handlers::get_stats))
        .route("/calibration", get(handlers::get_calibration))
        .route("/registry/runbooks", get(handlers::get_runbook_registry))
        .route(
            "/registry/dependencies",
            get(handlers::get_dependency_registry),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
