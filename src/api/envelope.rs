//! API error envelope.
//!
//! Success responses return the entity directly; errors share one body shape
//! carrying the stable error kind, a message safe to show an operator, and
//! the identifiers involved.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ErrorKind, PipelineError};

/// Error body: `{error_kind, message, incident_id?, action_id?}`.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error_kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<Uuid>,
    #[serde(skip)]
    status: StatusCode,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            error_kind: "not_found".to_string(),
            message: message.into(),
            incident_id: None,
            action_id: None,
            status: StatusCode::NOT_FOUND,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            error_kind: "bad_request".to_string(),
            message: message.into(),
            incident_id: None,
            action_id: None,
            status: StatusCode::BAD_REQUEST,
        }
    }

    /// Classify a pipeline error onto an HTTP status.
    pub fn from_pipeline(e: &PipelineError) -> Self {
        let status = match e.kind() {
            ErrorKind::StaleState | ErrorKind::Duplicate => StatusCode::CONFLICT,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Configuration | ErrorKind::DataIntegrity => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ErrorKind::ExternalUnavailable => StatusCode::BAD_GATEWAY,
            ErrorKind::ApprovalTimeout | ErrorKind::StageTimeout => StatusCode::CONFLICT,
        };
        Self {
            error_kind: e.kind().as_str().to_string(),
            message: e.to_string(),
            incident_id: None,
            action_id: None,
            status,
        }
    }

    pub fn with_incident(mut self, id: Uuid) -> Self {
        self.incident_id = Some(id);
        self
    }

    pub fn with_action(mut self, id: Uuid) -> Self {
        self.action_id = Some(id);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, axum::Json(self)).into_response()
    }
}
