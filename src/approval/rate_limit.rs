//! Daily auto-execution counters.
//!
//! Rate limits cap how many times an action type may auto-execute per UTC
//! day. Counters roll at the UTC midnight boundary and are persisted to a
//! sled tree at that boundary (plus on graceful shutdown); increments lost to
//! a mid-day crash are acceptable and fail open toward requiring approval.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::PipelineError;
use crate::types::ActionType;

/// Where an action type stands against its daily auto budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitState {
    Clear,
    /// At or past 80% of the budget; auto execution still allowed, warning
    /// recorded.
    Approaching,
    /// Budget fully consumed; further executions require operator approval.
    Exhausted,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedCounters {
    day: NaiveDate,
    counts: HashMap<ActionType, u32>,
}

struct Inner {
    day: NaiveDate,
    counts: HashMap<ActionType, u32>,
}

/// Per-action-type daily execution counters. Shared across workers.
pub struct DailyCounters {
    tree: Option<sled::Tree>,
    inner: Mutex<Inner>,
}

const PERSIST_KEY: &str = "daily_counters";

impl DailyCounters {
    /// In-memory counters (tests, or persistence disabled).
    pub fn in_memory() -> Self {
        Self {
            tree: None,
            inner: Mutex::new(Inner {
                day: Utc::now().date_naive(),
                counts: HashMap::new(),
            }),
        }
    }

    /// Counters backed by a sled tree; restores a same-day snapshot if one
    /// was persisted.
    pub fn open(db: &sled::Db) -> Result<Self, PipelineError> {
        let tree = db
            .open_tree("daily_counters")
            .map_err(|e| PipelineError::Configuration(format!("daily counters: {e}")))?;

        let today = Utc::now().date_naive();
        let restored = tree
            .get(PERSIST_KEY)
            .ok()
            .flatten()
            .and_then(|bytes| serde_json::from_slice::<PersistedCounters>(&bytes).ok())
            .filter(|p| p.day == today)
            .map(|p| p.counts)
            .unwrap_or_default();

        Ok(Self {
            tree: Some(tree),
            inner: Mutex::new(Inner {
                day: today,
                counts: restored,
            }),
        })
    }

    /// Executions recorded today for an action type.
    pub fn count(&self, action_type: ActionType) -> u32 {
        #[allow(clippy::unwrap_used)] // poisoned counter lock is unrecoverable
        let mut inner = self.inner.lock().unwrap();
        self.roll_if_needed(&mut inner);
        inner.counts.get(&action_type).copied().unwrap_or(0)
    }

    /// Budget state for an action type against its runbook maximum.
    pub fn state(&self, action_type: ActionType, max_per_day: u32) -> RateLimitState {
        let count = self.count(action_type);
        if count >= max_per_day {
            RateLimitState::Exhausted
        } else if f64::from(count)
            >= crate::config::defaults::RATE_LIMIT_WARN_FRACTION * f64::from(max_per_day)
        {
            RateLimitState::Approaching
        } else {
            RateLimitState::Clear
        }
    }

    /// Atomic check-and-increment for the auto-execution path.
    ///
    /// Two concurrently approved incidents race here; the loser sees the
    /// budget exhausted and surfaces `rate_limited`.
    pub fn try_increment(
        &self,
        action_type: ActionType,
        max_per_day: u32,
    ) -> Result<u32, PipelineError> {
        #[allow(clippy::unwrap_used)]
        let mut inner = self.inner.lock().unwrap();
        self.roll_if_needed(&mut inner);
        let entry = inner.counts.entry(action_type).or_insert(0);
        if *entry >= max_per_day {
            return Err(PipelineError::RateLimited {
                action_type: action_type.to_string(),
            });
        }
        *entry += 1;
        Ok(*entry)
    }

    /// Record an operator-approved execution (not budget-checked; the budget
    /// governs the auto path).
    pub fn record(&self, action_type: ActionType) -> u32 {
        #[allow(clippy::unwrap_used)]
        let mut inner = self.inner.lock().unwrap();
        self.roll_if_needed(&mut inner);
        let entry = inner.counts.entry(action_type).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Persist the current snapshot (graceful shutdown, day boundary).
    pub fn persist(&self) {
        let Some(ref tree) = self.tree else { return };
        #[allow(clippy::unwrap_used)]
        let inner = self.inner.lock().unwrap();
        let snapshot = PersistedCounters {
            day: inner.day,
            counts: inner.counts.clone(),
        };
        match serde_json::to_vec(&snapshot) {
            Ok(bytes) => {
                if let Err(e) = tree.insert(PERSIST_KEY, bytes) {
                    tracing::warn!(error = %e, "daily counter persist failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "daily counter serialize failed"),
        }
    }

    /// Reset at the UTC midnight boundary; persists the fresh day marker.
    fn roll_if_needed(&self, inner: &mut Inner) {
        let today = Utc::now().date_naive();
        if inner.day == today {
            return;
        }
        tracing::info!(
            from = %inner.day,
            to = %today,
            "daily execution counters rolling at UTC boundary"
        );
        inner.day = today;
        inner.counts.clear();
        if let Some(ref tree) = self.tree {
            let snapshot = PersistedCounters {
                day: today,
                counts: HashMap::new(),
            };
            if let Ok(bytes) = serde_json::to_vec(&snapshot) {
                let _ = tree.insert(PERSIST_KEY, bytes);
            }
        }
    }
}
