//! Action effector client.
//!
//! The effector performs the actual side effects (pod restarts, scaling,
//! rollbacks). The pipeline submits an execution, receives an attempt id,
//! and polls until the attempt settles. Dry-run submissions are recorded by
//! the effector without external side effects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::PipelineError;
use crate::types::{ActionType, ExecutionMode};

/// Result of submitting an execution.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionReceipt {
    /// "started" or "rejected".
    pub status: String,
    pub attempt_id: u64,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionReceipt {
    pub fn started(&self) -> bool {
        self.status == "started"
    }
}

/// Settled or in-flight state of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptStatus {
    Running,
    Succeeded,
    Failed(String),
}

/// The effector as the pipeline sees it.
#[async_trait]
pub trait Effector: Send + Sync {
    async fn execute(
        &self,
        action_type: ActionType,
        parameters: &BTreeMap<String, serde_json::Value>,
        execution_mode: ExecutionMode,
    ) -> Result<ExecutionReceipt, PipelineError>;

    async fn status(&self, attempt_id: u64) -> Result<AttemptStatus, PipelineError>;

    /// Operator-initiated cancellation of a running attempt.
    async fn cancel(&self, attempt_id: u64) -> Result<(), PipelineError>;
}

#[derive(Debug, Serialize)]
struct ExecuteBody<'a> {
    action_type: ActionType,
    parameters: &'a BTreeMap<String, serde_json::Value>,
    execution_mode: ExecutionMode,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    /// "running" | "succeeded" | "failed"
    status: String,
    #[serde(default)]
    detail: Option<String>,
}

/// HTTP implementation against the effector service.
#[derive(Clone)]
pub struct HttpEffector {
    http: reqwest::Client,
    base_url: String,
}

impl HttpEffector {
    pub fn new(base_url: &str, timeout: std::time::Duration) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Configuration(format!("effector client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Effector for HttpEffector {
    async fn execute(
        &self,
        action_type: ActionType,
        parameters: &BTreeMap<String, serde_json::Value>,
        execution_mode: ExecutionMode,
    ) -> Result<ExecutionReceipt, PipelineError> {
        let resp = self
            .http
            .post(format!("{}/actions/execute", self.base_url))
            .json(&ExecuteBody {
                action_type,
                parameters,
                execution_mode,
            })
            .send()
            .await
            .map_err(|e| PipelineError::ExternalUnavailable {
                backend: "effector",
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(PipelineError::ExternalUnavailable {
                backend: "effector",
                message: format!("status {}", resp.status()),
            });
        }

        resp.json()
            .await
            .map_err(|e| PipelineError::ExternalUnavailable {
                backend: "effector",
                message: format!("malformed body: {e}"),
            })
    }

    async fn status(&self, attempt_id: u64) -> Result<AttemptStatus, PipelineError> {
        let resp = self
            .http
            .get(format!("{}/actions/{attempt_id}", self.base_url))
            .send()
            .await
            .map_err(|e| PipelineError::ExternalUnavailable {
                backend: "effector",
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(PipelineError::ExternalUnavailable {
                backend: "effector",
                message: format!("status {}", resp.status()),
            });
        }

        let body: StatusBody =
            resp.json()
                .await
                .map_err(|e| PipelineError::ExternalUnavailable {
                    backend: "effector",
                    message: format!("malformed body: {e}"),
                })?;

        Ok(match body.status.as_str() {
            "running" => AttemptStatus::Running,
            "succeeded" => AttemptStatus::Succeeded,
            _ => AttemptStatus::Failed(body.detail.unwrap_or_else(|| body.status.clone())),
        })
    }

    async fn cancel(&self, attempt_id: u64) -> Result<(), PipelineError> {
        let resp = self
            .http
            .post(format!("{}/actions/{attempt_id}/cancel", self.base_url))
            .send()
            .await
            .map_err(|e| PipelineError::ExternalUnavailable {
                backend: "effector",
                message: e.to_string(),
            })?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(PipelineError::ExternalUnavailable {
                backend: "effector",
                message: format!("cancel status {}", resp.status()),
            })
        }
    }
}
