//! Runbook registry.
//!
//! Runbooks are the operator-authored allow-list of remediation actions per
//! hypothesis category, loaded from `runbooks.yaml` and published as an
//! immutable snapshot behind an [`arc_swap::ArcSwap`]. Action selection can
//! only ever pick from a matched runbook's `allowed_actions`.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::types::{ActionType, HypothesisCategory, RiskLevel};

/// One action an operator allows for a category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowedAction {
    pub action_type: ActionType,
    pub description: String,
    pub approval_required: bool,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub default_parameters: BTreeMap<String, serde_json::Value>,
    /// Named predicates that must all hold; unknown names fail closed.
    #[serde(default)]
    pub prerequisites: Vec<String>,
    pub max_auto_executions_per_day: u32,
    /// Declared inverse for DEGRADED rollback automation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse_action_type: Option<ActionType>,
}

/// Operator-authored remediation policy for one hypothesis category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runbook {
    pub id: String,
    pub category: HypothesisCategory,
    /// None matches any service.
    #[serde(default)]
    pub service: Option<String>,
    pub allowed_actions: Vec<AllowedAction>,
    /// Name -> query template, surfaced to operators.
    #[serde(default)]
    pub diagnostic_queries: BTreeMap<String, String>,
    #[serde(default)]
    pub escalation_criteria: Vec<String>,
}

impl Runbook {
    /// Whether an action type is on this runbook's allow-list.
    pub fn allows(&self, action_type: ActionType) -> bool {
        self.allowed_actions
            .iter()
            .any(|a| a.action_type == action_type)
    }

    pub fn allowed(&self, action_type: ActionType) -> Option<&AllowedAction> {
        self.allowed_actions
            .iter()
            .find(|a| a.action_type == action_type)
    }
}

/// Immutable, validated runbook set.
#[derive(Debug, Clone)]
pub struct RunbookSet {
    runbooks: Vec<Runbook>,
    snapshot_hash: String,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

impl RunbookSet {
    /// Parse and validate a YAML list of runbooks.
    ///
    /// `known_predicates` is the set of predicate names the evaluator
    /// understands; a runbook naming anything else is rejected at load so it
    /// cannot fail closed silently at selection time.
    pub fn from_yaml_str(raw: &str, known_predicates: &[&str]) -> Result<Self, PipelineError> {
        let runbooks: Vec<Runbook> = serde_yaml::from_str(raw)
            .map_err(|e| PipelineError::Configuration(format!("runbooks: {e}")))?;

        for rb in &runbooks {
            if rb.allowed_actions.is_empty() {
                return Err(PipelineError::Configuration(format!(
                    "runbooks: {} has no allowed_actions",
                    rb.id
                )));
            }
            for action in &rb.allowed_actions {
                for prereq in &action.prerequisites {
                    if !known_predicates.contains(&prereq.as_str()) {
                        return Err(PipelineError::Configuration(format!(
                            "runbooks: {} names undefined prerequisite {prereq:?}",
                            rb.id
                        )));
                    }
                }
                if !action.approval_required && action.max_auto_executions_per_day == 0 {
                    return Err(PipelineError::Configuration(format!(
                        "runbooks: {} allows auto {} with max_auto_executions_per_day=0",
                        rb.id, action.action_type
                    )));
                }
                if let Some(inverse) = action.inverse_action_type {
                    if inverse == action.action_type
                        && action.action_type != ActionType::ToggleFeatureFlag
                    {
                        return Err(PipelineError::Configuration(format!(
                            "runbooks: {} declares {} as its own inverse",
                            rb.id, action.action_type
                        )));
                    }
                }
            }
        }

        Ok(Self {
            runbooks,
            snapshot_hash: format!("{:x}", md5::compute(raw.as_bytes())),
            loaded_at: chrono::Utc::now(),
        })
    }

    pub fn load(path: &Path, known_predicates: &[&str]) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!("runbooks: cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&raw, known_predicates)
    }

    pub fn snapshot_hash(&self) -> &str {
        &self.snapshot_hash
    }

    pub fn len(&self) -> usize {
        self.runbooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runbooks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Runbook> {
        self.runbooks.iter()
    }

    /// Match a runbook for (category, service): exact service match first,
    /// then the any-service fallback.
    pub fn lookup(&self, category: HypothesisCategory, service: &str) -> Option<&Runbook> {
        self.runbooks
            .iter()
            .find(|rb| rb.category == category && rb.service.as_deref() == Some(service))
            .or_else(|| {
                self.runbooks
                    .iter()
                    .find(|rb| rb.category == category && rb.service.is_none())
            })
    }

    /// Category names with at least one runbook, for reasoning prompts
    /// (names only — no action details leave the control plane).
    pub fn category_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.runbooks.iter().map(|rb| rb.category.to_string()).collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Process-wide handle to the active runbook snapshot.
#[derive(Clone)]
pub struct RunbookHandle {
    inner: Arc<ArcSwap<RunbookSet>>,
}

impl RunbookHandle {
    pub fn new(set: RunbookSet) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(set)),
        }
    }

    pub fn snapshot(&self) -> Arc<RunbookSet> {
        self.inner.load_full()
    }

    pub fn swap(&self, set: RunbookSet) {
        self.inner.store(Arc::new(set));
    }
}
