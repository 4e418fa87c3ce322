//! Pipeline orchestration.
//!
//! One process hosts three scheduled loops (perception polls, the
//! approval-SLA sweeper, the outcome flusher) plus per-incident analysis
//! tasks on a bounded worker pool. Stages 1-5 for a given incident run
//! sequentially on one worker because they share the growing incident;
//! parallelism is across incidents.

mod coordinator;
mod ingest;

pub use coordinator::{
    analyze_incident, approve_action, escalate_incident, reject_action, spawn_analysis,
};
pub use ingest::run_ingest_loop;

#[cfg(test)]
pub(crate) use coordinator::test_support::make_context as coordinator_test_context;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::approval::DailyCounters;
use crate::dedup::DedupTable;
use crate::execution::Executor;
use crate::graph::GraphHandle;
use crate::learning::LearningStore;
use crate::perception::MetricsBackend;
use crate::reasoning::ReasoningAdapter;
use crate::runbook::RunbookHandle;
use crate::store::IncidentStore;

/// Monotonic counters for the stats surface and shutdown summary.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub incidents_created: AtomicU64,
    pub incidents_merged: AtomicU64,
    pub hypotheses_scored: AtomicU64,
    pub actions_proposed: AtomicU64,
    pub actions_auto_approved: AtomicU64,
    pub actions_executed: AtomicU64,
    pub incidents_escalated: AtomicU64,
    pub outcomes_recorded: AtomicU64,
}

impl PipelineStats {
    pub fn bump(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "incidents_created": self.incidents_created.load(Ordering::Relaxed),
            "incidents_merged": self.incidents_merged.load(Ordering::Relaxed),
            "hypotheses_scored": self.hypotheses_scored.load(Ordering::Relaxed),
            "actions_proposed": self.actions_proposed.load(Ordering::Relaxed),
            "actions_auto_approved": self.actions_auto_approved.load(Ordering::Relaxed),
            "actions_executed": self.actions_executed.load(Ordering::Relaxed),
            "incidents_escalated": self.incidents_escalated.load(Ordering::Relaxed),
            "outcomes_recorded": self.outcomes_recorded.load(Ordering::Relaxed),
        })
    }
}

/// Shared handles threaded through every pipeline stage and API handler.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn IncidentStore>,
    pub learning: Arc<LearningStore>,
    pub graph: GraphHandle,
    pub runbooks: RunbookHandle,
    pub counters: Arc<DailyCounters>,
    pub reasoning: Arc<ReasoningAdapter>,
    pub executor: Arc<Executor>,
    pub metrics: Arc<dyn MetricsBackend>,
    pub dedup: Arc<DedupTable>,
    pub stats: Arc<PipelineStats>,
    /// Bounded concurrency for incident analysis.
    pub analysis_permits: Arc<Semaphore>,
    pub cancel: CancellationToken,
}
