//! Strict parsing of reasoning-model output.
//!
//! The model must return a single JSON document with 2..5 hypotheses. Any
//! other shape is an error and triggers the adapter's degraded path. A
//! `confidence` field volunteered by the model is stripped into
//! `model_suggested_score` for audit and never used.

use serde::Deserialize;

use crate::config::defaults::{MAX_HYPOTHESES, MIN_HYPOTHESES};
use crate::error::PipelineError;
use crate::types::{HypothesisCategory, RawHypothesis};

#[derive(Debug, Deserialize)]
struct WireDocument {
    hypotheses: Vec<WireHypothesis>,
}

#[derive(Debug, Deserialize)]
struct WireHypothesis {
    description: String,
    /// Parsed as a string so an unknown category drops one hypothesis, not
    /// the whole document.
    category: String,
    #[serde(default)]
    evidence_refs: Vec<String>,
    #[serde(default)]
    reasoning: String,
    /// Models sometimes volunteer a score despite instructions. Captured for
    /// audit, then discarded from control flow.
    #[serde(default)]
    confidence: Option<f64>,
}

/// Parse model text into raw hypotheses.
///
/// Returns an error when the document shape is wrong or the hypothesis count
/// is outside [2, 5]. Hypotheses with an unknown category are dropped (the
/// caller re-checks the survivor count).
pub fn parse_hypotheses(text: &str) -> Result<Vec<RawHypothesis>, PipelineError> {
    let cleaned = strip_code_fences(text);

    let doc: WireDocument = serde_json::from_str(cleaned).map_err(|e| {
        PipelineError::ExternalUnavailable {
            backend: "reasoning",
            message: format!("response is not the expected JSON document: {e}"),
        }
    })?;

    if doc.hypotheses.len() < MIN_HYPOTHESES || doc.hypotheses.len() > MAX_HYPOTHESES {
        return Err(PipelineError::ExternalUnavailable {
            backend: "reasoning",
            message: format!(
                "model returned {} hypotheses, expected {MIN_HYPOTHESES}..{MAX_HYPOTHESES}",
                doc.hypotheses.len()
            ),
        });
    }

    let mut out = Vec::with_capacity(doc.hypotheses.len());
    for wire in doc.hypotheses {
        let category: HypothesisCategory =
            match serde_json::from_value(serde_json::Value::String(wire.category.clone())) {
                Ok(c) => c,
                Err(_) => {
                    tracing::warn!(
                        category = %wire.category,
                        "dropping hypothesis with unknown category"
                    );
                    continue;
                }
            };
        if wire.confidence.is_some() {
            tracing::debug!("model volunteered a confidence value — discarded from control flow");
        }
        out.push(RawHypothesis {
            description: wire.description,
            category,
            evidence_refs: wire.evidence_refs,
            reasoning: wire.reasoning,
            model_suggested_score: wire.confidence,
        });
    }
    Ok(out)
}

/// Drop a leading/trailing markdown code fence if the model wrapped its JSON.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}
