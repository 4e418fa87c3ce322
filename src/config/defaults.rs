//! System-wide default constants.
//!
//! Centralises tunables so every subsystem pulls from one place. Grouped by
//! pipeline stage.

// ============================================================================
// Perception
// ============================================================================

/// Minimum |z| for a signal to be emitted.
pub const ANOMALY_THRESHOLD_SIGMA: f64 = 3.0;

/// Interval between metric polls per service (seconds).
pub const POLL_INTERVAL_SECONDS: u64 = 60;

/// Points requested per poll; 1..N-1 form the baseline, N is current.
pub const BASELINE_WINDOW_POINTS: usize = 20;

/// Per-query timeout against the metrics backend (seconds).
pub const METRICS_QUERY_TIMEOUT_SECONDS: u64 = 10;

/// Metrics polled for every service in the dependency graph.
pub const MONITORED_METRICS: [&str; 7] = [
    "error_rate",
    "latency_p95",
    "latency_p99",
    "availability",
    "request_rate",
    "container_memory_usage_bytes",
    "container_cpu_usage_percent",
];

// ============================================================================
// Deduplication
// ============================================================================

/// Window within which a repeated fingerprint is suppressed (seconds).
pub const DEDUP_WINDOW_SECONDS: u64 = 300;

/// Dedup table capacity before LRU eviction kicks in.
pub const DEDUP_MAX_ENTRIES: usize = 10_000;

/// Lock shards for the dedup table.
pub const DEDUP_SHARDS: usize = 16;

/// Labels matching this pattern are dropped before fingerprinting.
pub const VOLATILE_LABEL_PATTERN: &str = "^(pod_hash|instance|replica|hostname|pod_ip)$";

// ============================================================================
// Correlation
// ============================================================================

/// Sliding window per service (seconds).
pub const CORRELATION_WINDOW_SECONDS: u64 = 300;

/// Minimum signals before an incident candidate is considered.
pub const MIN_SIGNAL_COUNT: usize = 2;

/// Minimum distinct signal sources (metric/log/trace).
pub const MIN_SIGNAL_TYPE_DIVERSITY: usize = 2;

/// Composite confidence floor for emitting a candidate.
pub const CORRELATION_CONFIDENCE_FLOOR: f64 = 0.6;

/// Composite blend weights (distinct from hypothesis scoring weights).
pub const CORRELATION_WEIGHT_METRIC: f64 = 0.4;
pub const CORRELATION_WEIGHT_LOG: f64 = 0.3;
pub const CORRELATION_WEIGHT_TRACE: f64 = 0.3;
pub const CORRELATION_DIVERSITY_BONUS: f64 = 0.1;

// ============================================================================
// Reasoning
// ============================================================================

/// Per-call deadline for the reasoning model (seconds).
pub const REASONING_TIMEOUT_SECONDS: u64 = 60;

/// Response cache TTL (seconds). Absorbs retries for a day.
pub const REASONING_CACHE_TTL_SECONDS: u64 = 86_400;

/// Hypothesis count bounds accepted from the model.
pub const MIN_HYPOTHESES: usize = 2;
pub const MAX_HYPOTHESES: usize = 5;

/// Signals used to populate the fallback hypothesis on degraded reasoning.
pub const FALLBACK_EVIDENCE_SIGNALS: usize = 3;

// ============================================================================
// Scoring
// ============================================================================

/// Confidence component weights: base / evidence / anomaly.
pub const SCORING_WEIGHT_BASE: f64 = 0.40;
pub const SCORING_WEIGHT_EVIDENCE: f64 = 0.35;
pub const SCORING_WEIGHT_ANOMALY: f64 = 0.25;

/// Dependency-graph adjustments.
pub const DEP_BOOST_DIRECT_UPSTREAM: f64 = 0.15;
pub const DEP_BOOST_TRANSITIVE_UPSTREAM: f64 = 0.08;
pub const DEP_PENALTY_DOWNSTREAM_ONLY: f64 = -0.05;

/// Final confidence clipping range.
pub const CONFIDENCE_MIN: f64 = 0.01;
pub const CONFIDENCE_MAX: f64 = 0.99;

/// Outcomes required in a category before its learned prior overrides the
/// default.
pub const PRIOR_OVERRIDE_MIN_OUTCOMES: usize = 50;

// ============================================================================
// Action selection & approval
// ============================================================================

/// Minimum hypothesis confidence for action selection.
pub const CONFIDENCE_FLOOR: f64 = 0.60;

/// Risk discount per urgency point above 1.0.
pub const URGENCY_RISK_DISCOUNT: f64 = 0.05;

/// Fraction of the daily auto budget at which a warning is recorded.
pub const RATE_LIMIT_WARN_FRACTION: f64 = 0.8;

/// SLA for operator approval (minutes).
pub const APPROVAL_SLA_MINUTES: u64 = 120;

/// Approval-SLA sweep cadence (seconds).
pub const SLA_SWEEP_INTERVAL_SECONDS: u64 = 60;

// ============================================================================
// Execution & verification
// ============================================================================

/// Wait between execution and post-metric capture (seconds).
pub const STABILIZATION_WINDOW_SECONDS: u64 = 120;

/// Sub-window samples taken inside the stabilization window.
pub const STABILIZATION_SUBWINDOWS: usize = 3;

/// Overall improvement required for SUCCESS.
pub const IMPROVEMENT_THRESHOLD: f64 = 0.20;

/// Relative stddev across sub-windows above which the outcome is UNSTABLE.
pub const UNSTABLE_THRESHOLD: f64 = 0.30;

/// Effector status poll cadence (seconds).
pub const EFFECTOR_POLL_INTERVAL_SECONDS: u64 = 2;

/// Per-call timeout against the effector (seconds).
pub const EFFECTOR_TIMEOUT_SECONDS: u64 = 30;

/// Metrics compared before/after every action.
pub const VERIFICATION_METRICS: [&str; 5] = [
    "error_rate",
    "latency_p95",
    "latency_p99",
    "availability",
    "request_rate",
];

/// Metrics where lower is better; the rest of the verification set improves
/// upward.
pub const LOWER_IS_BETTER_METRICS: [&str; 3] = ["error_rate", "latency_p95", "latency_p99"];

// ============================================================================
// Workers & learning store
// ============================================================================

/// Concurrent incident analyses.
pub const WORKER_CONCURRENCY: usize = 4;

/// Confidence-outcome flusher cadence (seconds).
pub const OUTCOME_FLUSH_INTERVAL_SECONDS: u64 = 5;

/// JSONL rotation threshold (bytes).
pub const LEARNING_ROTATE_BYTES: u64 = 64 * 1024 * 1024;

/// Calibration aggregates are recomputed after this many new records.
pub const CALIBRATION_CACHE_RECORDS: usize = 100;

// ============================================================================
// Registry watchers
// ============================================================================

/// Interval between registry file mtime checks (seconds).
pub const WATCH_POLL_INTERVAL_SECONDS: u64 = 2;

/// Debounce after detecting a change, to ride out partial writes (ms).
pub const WATCH_DEBOUNCE_MS: u64 = 500;
