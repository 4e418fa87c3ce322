//! End-to-end pipeline scenarios.
//!
//! Drives the full reasoning-and-control loop against mock backends:
//! detection through correlation, hypothesis scoring, action selection, the
//! approval gate, execution, verification, and outcome recording.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use airra::actions::KNOWN_PREDICATES;
use airra::approval::DailyCounters;
use airra::correlation::Correlator;
use airra::dedup::DedupTable;
use airra::execution::{AttemptStatus, Effector, ExecutionReceipt, Executor, Verifier};
use airra::graph::{DependencyGraph, GraphHandle};
use airra::learning::LearningStore;
use airra::perception::{AnomalyDetector, MetricsBackend, TimeSeries};
use airra::pipeline::{analyze_incident, approve_action, PipelineContext, PipelineStats};
use airra::reasoning::{
    GenerateRequest, GenerateResponse, ReasoningAdapter, ReasoningBackend,
};
use airra::runbook::{RunbookHandle, RunbookSet};
use airra::store::{IncidentStore, MemoryStore};
use airra::types::{
    ActionStatus, ActionType, ExecutionMode, Incident, IncidentStatus, Severity, Signal,
    SignalSource, VerificationOutcome,
};
use airra::PipelineError;

// ============================================================================
// Mock backends
// ============================================================================

/// Metrics backend with scripted per-metric value sequences (consumed one
/// call at a time, last value repeats).
struct ScriptedMetrics {
    values: Mutex<BTreeMap<String, Vec<f64>>>,
}

impl ScriptedMetrics {
    fn new(entries: &[(&str, &[f64])]) -> Arc<Self> {
        Arc::new(Self {
            values: Mutex::new(
                entries
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), v.to_vec()))
                    .collect(),
            ),
        })
    }
}

#[async_trait]
impl MetricsBackend for ScriptedMetrics {
    async fn query_range(
        &self,
        _query: &str,
        _start: chrono::DateTime<Utc>,
        _end: chrono::DateTime<Utc>,
        _step: Duration,
    ) -> Result<Vec<TimeSeries>, PipelineError> {
        Ok(Vec::new())
    }

    async fn current_value(
        &self,
        _service: &str,
        metric: &str,
    ) -> Result<Option<f64>, PipelineError> {
        let mut values = self.values.lock().unwrap();
        Ok(values.get_mut(metric).map(|v| {
            if v.len() > 1 {
                v.remove(0)
            } else {
                v[0]
            }
        }))
    }
}

struct MockEffector {
    attempts: AtomicU64,
    calls: Mutex<Vec<(ActionType, ExecutionMode)>>,
}

impl MockEffector {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicU64::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Effector for MockEffector {
    async fn execute(
        &self,
        action_type: ActionType,
        _parameters: &BTreeMap<String, serde_json::Value>,
        mode: ExecutionMode,
    ) -> Result<ExecutionReceipt, PipelineError> {
        self.calls.lock().unwrap().push((action_type, mode));
        Ok(ExecutionReceipt {
            status: "started".to_string(),
            attempt_id: self.attempts.fetch_add(1, Ordering::SeqCst) + 1,
            error: None,
        })
    }

    async fn status(&self, _attempt_id: u64) -> Result<AttemptStatus, PipelineError> {
        Ok(AttemptStatus::Succeeded)
    }

    async fn cancel(&self, _attempt_id: u64) -> Result<(), PipelineError> {
        Ok(())
    }
}

struct CannedReasoning {
    text: String,
}

#[async_trait]
impl ReasoningBackend for CannedReasoning {
    async fn generate(&self, _req: &GenerateRequest) -> Result<GenerateResponse, PipelineError> {
        Ok(GenerateResponse {
            text: self.text.clone(),
            usage: None,
        })
    }
}

struct SlowReasoning;

#[async_trait]
impl ReasoningBackend for SlowReasoning {
    async fn generate(&self, _req: &GenerateRequest) -> Result<GenerateResponse, PipelineError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(GenerateResponse {
            text: String::new(),
            usage: None,
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// payment-service feeds ten downstream services so blast reaches HIGH when
/// traffic is present; worker-service is a quieter MEDIUM-blast target.
fn graph_yaml() -> String {
    let mut yaml = String::from(
        r"payment-service:
  depends_on: []
  tier: tier-1
  team: payments
  criticality: critical
api-gateway:
  depends_on: [payment-service]
  tier: tier-0
  team: edge
  criticality: critical
worker-service:
  depends_on: []
  tier: tier-2
  team: batch
  criticality: high
worker-client-a:
  depends_on: [worker-service]
  tier: tier-2
  team: batch
  criticality: medium
worker-client-b:
  depends_on: [worker-service]
  tier: tier-2
  team: batch
  criticality: medium
",
    );
    for i in 0..10 {
        yaml.push_str(&format!(
            "consumer-{i}:\n  depends_on: [payment-service]\n  tier: tier-2\n  team: misc\n  criticality: medium\n"
        ));
    }
    yaml
}

const RUNBOOKS_YAML: &str = r"
- id: rb-memory-leak
  category: memory_leak
  allowed_actions:
    - action_type: restart_pod
      description: restart the leaking pod
      approval_required: true
      risk_level: medium
      max_auto_executions_per_day: 5
- id: rb-cpu-spike
  category: cpu_spike
  allowed_actions:
    - action_type: scale_up
      description: scale out to absorb load
      approval_required: false
      risk_level: low
      max_auto_executions_per_day: 10
      inverse_action_type: scale_down
- id: rb-error-spike
  category: error_spike
  allowed_actions:
    - action_type: scale_up
      description: add capacity
      approval_required: true
      risk_level: low
      max_auto_executions_per_day: 10
";

fn make_context(
    reasoning: Arc<dyn ReasoningBackend>,
    metrics: Arc<dyn MetricsBackend>,
    effector: Arc<dyn Effector>,
    reasoning_timeout: Duration,
) -> PipelineContext {
    let dir = std::env::temp_dir().join(format!("airra-e2e-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();

    PipelineContext {
        store: Arc::new(MemoryStore::new()),
        learning: Arc::new(LearningStore::open(&dir).unwrap()),
        graph: GraphHandle::new(DependencyGraph::from_yaml_str(&graph_yaml()).unwrap()),
        runbooks: RunbookHandle::new(
            RunbookSet::from_yaml_str(RUNBOOKS_YAML, KNOWN_PREDICATES).unwrap(),
        ),
        counters: Arc::new(DailyCounters::in_memory()),
        reasoning: Arc::new(ReasoningAdapter::new(
            reasoning,
            None,
            "test-model".to_string(),
            0.2,
            reasoning_timeout,
        )),
        executor: Arc::new(Executor::new(
            effector,
            Verifier::new(metrics.clone(), Duration::from_millis(30), 0.20, 0.30),
        )),
        metrics,
        dedup: Arc::new(
            DedupTable::new(Duration::from_secs(300), 1000, "^(instance|pod_hash)$").unwrap(),
        ),
        stats: Arc::new(PipelineStats::default()),
        analysis_permits: Arc::new(tokio::sync::Semaphore::new(4)),
        cancel: tokio_util::sync::CancellationToken::new(),
    }
}

fn make_signal(service: &str, metric: &str, sigma: f64, value: f64, source: SignalSource) -> Signal {
    Signal {
        service: service.to_string(),
        metric_name: metric.to_string(),
        value,
        baseline: value / 4.0,
        deviation_sigma: sigma,
        timestamp: Utc::now(),
        source,
        labels: BTreeMap::new(),
    }
}

fn seed_incident(store: &dyn IncidentStore, service: &str, signals: &[Signal]) -> Uuid {
    let incident = Incident {
        id: Uuid::new_v4(),
        service: service.to_string(),
        severity: signals
            .iter()
            .map(Signal::severity)
            .max()
            .unwrap_or(Severity::Low),
        status: IncidentStatus::Detected,
        detected_at: Utc::now(),
        resolved_at: None,
        detection_source: "correlation".to_string(),
        affected_components: signals.iter().map(|s| s.metric_name.clone()).collect(),
        metrics_snapshot: signals
            .iter()
            .map(|s| (s.metric_name.clone(), s.value))
            .collect(),
        context: BTreeMap::new(),
        fingerprint: Uuid::new_v4().to_string(),
        duplicate_count: 0,
        reasoning_degraded: false,
        terminal_cause: None,
        timeline: Vec::new(),
    };
    let id = incident.id;
    store.create_incident(incident).unwrap();
    id
}

/// Poll the store until the predicate holds or the deadline passes.
async fn wait_for(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

// ============================================================================
// Perception-to-correlation front end
// ============================================================================

/// Memory climbing from a noisy 2 GB baseline to 8 GB lands in the high
/// severity band and survives dedup + correlation into one candidate.
#[test]
fn memory_spike_detects_and_correlates() {
    let detector = AnomalyDetector::new(3.0);

    // 19 baseline points around 2e9 with ~1.1e9 spread, current 8e9.
    let mut points: Vec<(chrono::DateTime<Utc>, f64)> = (0..19)
        .map(|i| {
            let v = if i % 2 == 0 { 0.9e9 } else { 3.1e9 };
            (
                Utc::now() - chrono::Duration::seconds(60 * (20 - i)),
                v,
            )
        })
        .collect();
    points.push((Utc::now(), 8.0e9));

    let signal = detector
        .observe(
            "payment-service",
            "container_memory_usage_bytes",
            SignalSource::Metric,
            &BTreeMap::new(),
            &points,
        )
        .expect("8 GB against a 2 GB baseline must emit");
    assert_eq!(signal.severity(), Severity::High, "z = {}", signal.deviation_sigma);

    // Dedup admits the first sighting, swallows the repeat.
    let dedup = DedupTable::new(Duration::from_secs(300), 1000, "^instance$").unwrap();
    let admitted = dedup.admit(signal.clone()).expect("first sighting admitted");
    assert!(dedup.admit(signal.clone()).is_none());

    // Metric + log in the same window correlates into one candidate.
    let mut correlator = Correlator::new(Duration::from_secs(300), 2, 2);
    assert!(correlator.ingest(admitted).is_none());
    let candidate = correlator
        .ingest(make_signal(
            "payment-service",
            "log_error_count",
            4.2,
            120.0,
            SignalSource::Log,
        ))
        .expect("diverse evidence should correlate");
    assert_eq!(candidate.service, "payment-service");
    assert_eq!(candidate.severity, Severity::High);
    assert!(candidate
        .affected_components
        .contains("container_memory_usage_bytes"));
}

// ============================================================================
// Scenario: memory leak, approved restart
// ============================================================================

#[tokio::test]
async fn memory_leak_restart_approved_and_verified() {
    let reasoning = Arc::new(CannedReasoning {
        text: r#"{"hypotheses": [
            {"description": "Unbounded heap growth in payment workers",
             "category": "memory_leak",
             "evidence_refs": ["container_memory_usage_bytes"],
             "reasoning": "Memory climbs while request rate is flat."},
            {"description": "Connection pool hoarding rows in memory",
             "category": "database_issue",
             "evidence_refs": ["request_rate"],
             "reasoning": "Possible but the growth does not track query volume."}
        ]}"#
        .to_string(),
    });
    // error_rate improves 0.40 -> 0.10 after the restart and holds.
    let metrics = ScriptedMetrics::new(&[
        ("error_rate", &[0.40, 0.10, 0.10, 0.10]),
        ("request_rate", &[200.0]),
    ]);
    let effector = MockEffector::new();
    let ctx = make_context(
        reasoning,
        metrics,
        effector.clone(),
        Duration::from_secs(5),
    );

    let signals = vec![make_signal(
        "payment-service",
        "container_memory_usage_bytes",
        5.2,
        8.0e9,
        SignalSource::Metric,
    )];
    let mut incident_signals = signals.clone();
    incident_signals.push(make_signal(
        "payment-service",
        "request_rate",
        3.5,
        200.0,
        SignalSource::Metric,
    ));
    let incident_id = seed_incident(ctx.store.as_ref(), "payment-service", &incident_signals);
    // Enrichment the monitoring layer supplies alongside the anomalous
    // metrics: spare replicas exist, so a restart is eligible.
    ctx.store
        .update_incident(incident_id, &mut |i| {
            i.metrics_snapshot.insert("available_replicas".to_string(), 3.0);
            Ok(())
        })
        .unwrap();

    analyze_incident(&ctx, incident_id, signals).await;

    // Hypothesis: memory_leak on top, confidence in the expected band, no
    // dependency boost.
    let hypotheses = ctx.store.hypotheses(incident_id);
    assert!(!hypotheses.is_empty());
    let top = &hypotheses[0];
    assert_eq!(top.rank, 1);
    assert_eq!(top.category, airra::HypothesisCategory::MemoryLeak);
    assert!(
        (0.70..=0.85).contains(&top.confidence),
        "confidence {} outside expected band",
        top.confidence
    );
    assert_eq!(top.dependency_boost, 0.0);

    // restart_pod proposed and waiting on the runbook's approval policy.
    let actions = ctx.store.actions_for(incident_id);
    assert_eq!(actions.len(), 1);
    let action = &actions[0];
    assert_eq!(action.action_type, ActionType::RestartPod);
    assert_eq!(action.status, ActionStatus::PendingApproval);
    assert!(action.approval_required);
    assert_eq!(
        ctx.store.get_incident(incident_id).unwrap().status,
        IncidentStatus::PendingApproval
    );
    assert!(effector.calls.lock().unwrap().is_empty(), "nothing executes before approval");

    // Operator approves a dry run; execution and verification follow.
    let approved = approve_action(&ctx, action.id, "alice", ExecutionMode::DryRun)
        .await
        .unwrap();
    assert_eq!(approved.approved_by.as_deref(), Some("alice"));

    // The incident resolves only after execution, verification, and outcome
    // recording have all completed in the background worker.
    let action_id = action.id;
    let store = ctx.store.clone();
    let settled = wait_for(Duration::from_secs(5), || {
        store
            .get_incident(incident_id)
            .is_some_and(|i| i.status == IncidentStatus::Resolved)
    })
    .await;
    assert!(settled, "incident should resolve after verified execution");

    let action = ctx.store.get_action(action_id).unwrap();
    assert_eq!(action.status, ActionStatus::Succeeded);
    let report = action.verification.expect("verification report attached");
    assert_eq!(report.outcome, VerificationOutcome::Success);

    let incident = ctx.store.get_incident(incident_id).unwrap();
    assert!(incident.resolved_at.is_some());
    assert_eq!(incident.terminal_cause.as_deref(), Some("remediation_verified"));

    // Exactly one calibration record, and the dry-run mode reached the
    // effector.
    assert_eq!(ctx.learning.read_outcomes().len(), 1);
    let calls = effector.calls.lock().unwrap();
    assert_eq!(calls.as_slice(), &[(ActionType::RestartPod, ExecutionMode::DryRun)]);
}

// ============================================================================
// Scenario: upstream failure boost
// ============================================================================

#[tokio::test]
async fn upstream_incident_boosts_gateway_hypothesis() {
    let doc = r#"{"hypotheses": [
        {"description": "Upstream dependency failing",
         "category": "dependency_failure",
         "evidence_refs": ["error_rate"],
         "reasoning": "Errors track the payment backend."},
        {"description": "Gateway regression",
         "category": "deployment_regression",
         "evidence_refs": ["error_rate"],
         "reasoning": "Possible but no deploy on record."}
    ]}"#;

    let run = |with_upstream_incident: bool| async move {
        let ctx = make_context(
            Arc::new(CannedReasoning { text: doc.to_string() }),
            ScriptedMetrics::new(&[("error_rate", &[0.2])]),
            MockEffector::new(),
            Duration::from_secs(5),
        );

        if with_upstream_incident {
            // Live incident on payment-service, the gateway's direct upstream.
            seed_incident(
                ctx.store.as_ref(),
                "payment-service",
                &[make_signal(
                    "payment-service",
                    "error_rate",
                    5.0,
                    0.5,
                    SignalSource::Metric,
                )],
            );
        }

        let signals = vec![make_signal(
            "api-gateway",
            "error_rate",
            4.0,
            0.2,
            SignalSource::Metric,
        )];
        let incident_id = seed_incident(ctx.store.as_ref(), "api-gateway", &signals);
        analyze_incident(&ctx, incident_id, signals).await;
        ctx.store.hypotheses(incident_id)[0].clone()
    };

    let boosted = run(true).await;
    let plain = run(false).await;

    assert_eq!(boosted.dependency_boost, 0.15);
    assert_eq!(plain.dependency_boost, 0.0);
    assert!(
        boosted.confidence > plain.confidence,
        "boosted {} must exceed plain {}",
        boosted.confidence,
        plain.confidence
    );
}

// ============================================================================
// Scenario: rate-limited auto action
// ============================================================================

#[tokio::test]
async fn tenth_auto_execution_runs_eleventh_needs_approval() {
    let doc = r#"{"hypotheses": [
        {"description": "CPU saturation from load",
         "category": "cpu_spike",
         "evidence_refs": ["container_cpu_usage_percent", "log_error_count"],
         "reasoning": "CPU tracks traffic and error logs agree."},
        {"description": "Runaway worker",
         "category": "resource_exhaustion",
         "evidence_refs": ["container_cpu_usage_percent"],
         "reasoning": "Could also be a stuck loop."}
    ]}"#;

    let run_incident = |ctx: PipelineContext| async move {
        let signals = vec![
            make_signal(
                "worker-service",
                "container_cpu_usage_percent",
                6.5,
                97.0,
                SignalSource::Metric,
            ),
            make_signal(
                "worker-service",
                "log_error_count",
                6.5,
                250.0,
                SignalSource::Log,
            ),
            make_signal("worker-service", "request_rate", 3.5, 100.0, SignalSource::Metric),
        ];
        let incident_id = seed_incident(ctx.store.as_ref(), "worker-service", &signals);
        analyze_incident(&ctx, incident_id, signals).await;
        incident_id
    };

    let effector = MockEffector::new();
    let ctx = make_context(
        Arc::new(CannedReasoning { text: doc.to_string() }),
        ScriptedMetrics::new(&[("error_rate", &[0.30, 0.10, 0.10, 0.10])]),
        effector.clone(),
        Duration::from_secs(5),
    );

    // Nine auto executions already burned today.
    for _ in 0..9 {
        ctx.counters.try_increment(ActionType::ScaleUp, 10).unwrap();
    }

    // Tenth: still auto — executes without an operator.
    let tenth = run_incident(ctx.clone()).await;
    let tenth_actions = ctx.store.actions_for(tenth);
    assert_eq!(tenth_actions.len(), 1);
    assert_eq!(tenth_actions[0].approved_by.as_deref(), Some("auto"));
    assert!(matches!(
        tenth_actions[0].status,
        ActionStatus::Succeeded | ActionStatus::Executing | ActionStatus::Failed
    ));
    assert_eq!(ctx.counters.count(ActionType::ScaleUp), 10);

    // Eleventh: budget consumed — forced through the approval gate.
    let eleventh = run_incident(ctx.clone()).await;
    let eleventh_actions = ctx.store.actions_for(eleventh);
    assert_eq!(eleventh_actions.len(), 1);
    assert_eq!(eleventh_actions[0].status, ActionStatus::PendingApproval);
    assert!(eleventh_actions[0].approval_required);
    assert_eq!(
        eleventh_actions[0].approval_reason.as_deref(),
        Some("rate_limited_approaching")
    );
    // The budget did not move.
    assert_eq!(ctx.counters.count(ActionType::ScaleUp), 10);
}

// ============================================================================
// Scenario: degraded outcome enqueues the declared inverse
// ============================================================================

#[tokio::test]
async fn degraded_verification_enqueues_rollback() {
    let doc = r#"{"hypotheses": [
        {"description": "CPU saturation from load",
         "category": "cpu_spike",
         "evidence_refs": ["container_cpu_usage_percent", "log_error_count"],
         "reasoning": "CPU tracks traffic and error logs agree."},
        {"description": "Runaway worker",
         "category": "resource_exhaustion",
         "evidence_refs": ["container_cpu_usage_percent"],
         "reasoning": "Could also be a stuck loop."}
    ]}"#;

    // error_rate worsens 40% after the action: 0.10 -> 0.14.
    let ctx = make_context(
        Arc::new(CannedReasoning { text: doc.to_string() }),
        ScriptedMetrics::new(&[("error_rate", &[0.10, 0.14, 0.14, 0.14])]),
        MockEffector::new(),
        Duration::from_secs(5),
    );

    let signals = vec![
        make_signal(
            "worker-service",
            "container_cpu_usage_percent",
            6.5,
            97.0,
            SignalSource::Metric,
        ),
        make_signal(
            "worker-service",
            "log_error_count",
            6.5,
            250.0,
            SignalSource::Log,
        ),
        make_signal("worker-service", "request_rate", 3.5, 100.0, SignalSource::Metric),
    ];
    let incident_id = seed_incident(ctx.store.as_ref(), "worker-service", &signals);
    analyze_incident(&ctx, incident_id, signals).await;

    let actions = ctx.store.actions_for(incident_id);
    assert_eq!(actions.len(), 2, "original plus enqueued inverse");

    let original = actions
        .iter()
        .find(|a| a.action_type == ActionType::ScaleUp)
        .expect("original scale_up");
    assert_eq!(original.status, ActionStatus::Succeeded);
    let report = original.verification.as_ref().expect("verification ran");
    assert_eq!(report.outcome, VerificationOutcome::Degraded);
    assert_eq!(report.recommendation, airra::Recommendation::Rollback);

    let inverse = actions
        .iter()
        .find(|a| a.action_type == ActionType::ScaleDown)
        .expect("declared inverse enqueued");
    assert_eq!(inverse.status, ActionStatus::PendingApproval);
    assert_eq!(inverse.approval_reason.as_deref(), Some("degraded_rollback"));

    // The incident stays live for the rollback decision.
    assert!(!ctx.store.get_incident(incident_id).unwrap().status.is_terminal());
}

// ============================================================================
// Scenario: reasoning timeout degrades, pipeline continues
// ============================================================================

#[tokio::test]
async fn reasoning_timeout_falls_back_and_continues() {
    let ctx = make_context(
        Arc::new(SlowReasoning),
        ScriptedMetrics::new(&[("error_rate", &[0.2])]),
        MockEffector::new(),
        Duration::from_millis(50),
    );

    let signals = vec![
        make_signal("payment-service", "error_rate", 5.0, 0.4, SignalSource::Metric),
        make_signal(
            "payment-service",
            "log_error_count",
            4.0,
            80.0,
            SignalSource::Log,
        ),
    ];
    let incident_id = seed_incident(ctx.store.as_ref(), "payment-service", &signals);
    analyze_incident(&ctx, incident_id, signals).await;

    let incident = ctx.store.get_incident(incident_id).unwrap();
    assert!(incident.reasoning_degraded);

    let hypotheses = ctx.store.hypotheses(incident_id);
    assert_eq!(hypotheses.len(), 1);
    assert_eq!(hypotheses[0].category, airra::HypothesisCategory::Other);
    assert!(!hypotheses[0].supporting_signals.is_empty());

    // No runbook for `other`: the incident escalates rather than acting on a
    // category that maps to nothing.
    assert_eq!(incident.status, IncidentStatus::Escalated);
    assert!(ctx.store.actions_for(incident_id).is_empty());
}
