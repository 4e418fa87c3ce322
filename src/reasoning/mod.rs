//! Reasoning adapter: external model in, raw hypotheses out — nothing else.
//!
//! The model is a suggestion engine. It proposes root-cause hypotheses with
//! evidence references and rationale; every numeric score it volunteers is
//! discarded. Deterministic confidence is computed downstream by scoring.
//!
//! Failure semantics: timeout, transport error, or an unparseable response
//! degrade to a single `other` hypothesis built from the incident's own
//! top-deviation signals, with `reasoning_degraded` flagged on the incident.
//! The pipeline always continues.

mod cache;
mod client;
mod parsing;
mod prompt;

pub use cache::ResponseCache;
pub use client::{GenerateRequest, GenerateResponse, HttpReasoningBackend, ReasoningBackend, Usage};
pub use parsing::parse_hypotheses;
pub use prompt::{system_prompt, user_prompt};

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::defaults::FALLBACK_EVIDENCE_SIGNALS;
use crate::types::{HypothesisCategory, Incident, RawHypothesis};

/// Result of one reasoning pass.
#[derive(Debug)]
pub struct ReasoningOutput {
    pub hypotheses: Vec<RawHypothesis>,
    /// True when the backend failed and the fallback path produced the
    /// hypotheses; propagated to `Incident.reasoning_degraded`.
    pub degraded: bool,
    /// True when the response was served from the cache.
    pub cached: bool,
}

/// Adapter owning prompts, timeout, cache, parsing, and the degraded path.
pub struct ReasoningAdapter {
    backend: Arc<dyn ReasoningBackend>,
    cache: Option<ResponseCache>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    timeout: Duration,
}

impl ReasoningAdapter {
    pub fn new(
        backend: Arc<dyn ReasoningBackend>,
        cache: Option<ResponseCache>,
        model: String,
        temperature: f64,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            cache,
            model,
            temperature,
            max_tokens: 2048,
            timeout,
        }
    }

    /// Generate validated raw hypotheses for an incident.
    ///
    /// `runbook_categories` is names-only; `neighborhood` is the dependency
    /// graph summary for the incident's service.
    pub async fn generate(
        &self,
        incident: &Incident,
        runbook_categories: &[String],
        neighborhood: &str,
    ) -> ReasoningOutput {
        let system = prompt::system_prompt();
        let user = prompt::user_prompt(incident, runbook_categories, neighborhood);
        let key = ResponseCache::key(&system, &user, &self.model, self.temperature);

        let (text, cached) = match self.fetch(&system, &user, &key).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(
                    incident_id = %incident.id,
                    error = %e,
                    "reasoning backend unavailable — falling back to degraded hypothesis"
                );
                return ReasoningOutput {
                    hypotheses: vec![fallback_hypothesis(incident)],
                    degraded: true,
                    cached: false,
                };
            }
        };

        let parsed = match parsing::parse_hypotheses(&text) {
            Ok(h) => h,
            Err(e) => {
                warn!(
                    incident_id = %incident.id,
                    error = %e,
                    "reasoning response malformed — falling back to degraded hypothesis"
                );
                return ReasoningOutput {
                    hypotheses: vec![fallback_hypothesis(incident)],
                    degraded: true,
                    cached,
                };
            }
        };

        // Evidence refs must already exist on the incident; anything else is
        // fabricated and drops the whole hypothesis.
        let universe = incident.evidence_universe();
        let before = parsed.len();
        let valid: Vec<RawHypothesis> = parsed
            .into_iter()
            .filter(|h| {
                let ok = h.evidence_refs.iter().all(|r| universe.contains(r));
                if !ok {
                    warn!(
                        incident_id = %incident.id,
                        description = %h.description,
                        "dropping hypothesis with fabricated evidence refs"
                    );
                }
                ok
            })
            .collect();

        if valid.len() < crate::config::defaults::MIN_HYPOTHESES {
            info!(
                incident_id = %incident.id,
                parsed = before,
                survived = valid.len(),
                "too few valid hypotheses — substituting fallback"
            );
            return ReasoningOutput {
                hypotheses: vec![fallback_hypothesis(incident)],
                degraded: false,
                cached,
            };
        }

        ReasoningOutput {
            hypotheses: valid,
            degraded: false,
            cached,
        }
    }

    async fn fetch(
        &self,
        system: &str,
        user: &str,
        key: &str,
    ) -> Result<(String, bool), crate::error::PipelineError> {
        if let Some(ref cache) = self.cache {
            if let Some(text) = cache.get(key) {
                return Ok((text, true));
            }
        }

        let request = GenerateRequest {
            system_prompt: system.to_string(),
            user_prompt: user.to_string(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = tokio::time::timeout(self.timeout, self.backend.generate(&request))
            .await
            .map_err(|_| crate::error::PipelineError::ExternalUnavailable {
                backend: "reasoning",
                message: format!("timeout after {:?}", self.timeout),
            })??;

        if let Some(ref cache) = self.cache {
            cache.put(key, &response.text);
        }
        Ok((response.text, false))
    }
}

/// Single `other` hypothesis from the incident's own strongest evidence.
fn fallback_hypothesis(incident: &Incident) -> RawHypothesis {
    let evidence_refs: Vec<String> = incident
        .affected_components
        .iter()
        .take(FALLBACK_EVIDENCE_SIGNALS)
        .cloned()
        .collect();
    RawHypothesis {
        description: format!(
            "Unclassified anomaly on {} across {} component(s)",
            incident.service,
            incident.affected_components.len()
        ),
        category: HypothesisCategory::Other,
        evidence_refs,
        reasoning: "Reasoning backend unavailable or returned no usable hypotheses; \
                    derived from the incident's own anomalous signals."
            .to_string(),
        model_suggested_score: None,
    }
}
