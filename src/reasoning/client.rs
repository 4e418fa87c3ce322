//! HTTP client for the external reasoning model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Request body for `POST /generate`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Token accounting returned by the model service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// Response body for `POST /generate`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// The reasoning model as the pipeline sees it: prompt in, text out.
///
/// The adapter owns timeouts, caching, parsing, and the degraded path;
/// implementations only move bytes.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, PipelineError>;
}

/// HTTP implementation against the reasoning service.
#[derive(Clone)]
pub struct HttpReasoningBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpReasoningBackend {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| PipelineError::Configuration(format!("reasoning client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl ReasoningBackend for HttpReasoningBackend {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, PipelineError> {
        let resp = self
            .http
            .post(format!("{}/generate", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| PipelineError::ExternalUnavailable {
                backend: "reasoning",
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(PipelineError::ExternalUnavailable {
                backend: "reasoning",
                message: format!("status {}", resp.status()),
            });
        }

        resp.json()
            .await
            .map_err(|e| PipelineError::ExternalUnavailable {
                backend: "reasoning",
                message: format!("malformed body: {e}"),
            })
    }
}
