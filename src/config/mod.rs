//! Runtime settings.
//!
//! Every tunable is an `AIRRA_`-prefixed environment variable with a default
//! from [`defaults`]. Settings are loaded once at startup into a global
//! snapshot; registries (dependency graph, runbooks) are the only hot-reloaded
//! configuration.
//!
//! ## Usage
//!
//! ```ignore
//! // In main():
//! config::init(Settings::from_env()?);
//!
//! // Anywhere in the codebase:
//! let window = config::get().dedup_window;
//! ```

pub mod defaults;

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::PipelineError;

/// Immutable runtime settings snapshot.
#[derive(Debug, Clone)]
pub struct Settings {
    // Perception
    pub anomaly_threshold_sigma: f64,
    pub poll_interval: Duration,
    pub baseline_window_points: usize,
    pub metrics_query_timeout: Duration,
    pub monitored_metrics: Vec<String>,

    // Deduplication
    pub dedup_window: Duration,
    pub dedup_max_entries: usize,
    pub volatile_label_pattern: String,

    // Correlation
    pub correlation_window: Duration,
    pub min_signal_count: usize,
    pub min_signal_type_diversity: usize,

    // Reasoning
    pub reasoning_url: String,
    pub reasoning_api_key: String,
    pub reasoning_model: String,
    pub reasoning_temperature: f64,
    pub reasoning_timeout: Duration,

    // Selection & approval
    pub confidence_floor: f64,
    pub approval_sla: Duration,

    // Execution & verification
    pub stabilization_window: Duration,
    pub improvement_threshold: f64,
    pub unstable_threshold: f64,
    pub dry_run_mode: bool,

    // Backends
    pub metrics_url: String,
    pub logs_url: Option<String>,
    pub effector_url: String,

    // Registries & storage
    pub dependency_config: PathBuf,
    pub runbooks_config: PathBuf,
    pub data_dir: PathBuf,

    // Workers
    pub worker_concurrency: usize,

    // Inbound API
    pub listen_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            anomaly_threshold_sigma: defaults::ANOMALY_THRESHOLD_SIGMA,
            poll_interval: Duration::from_secs(defaults::POLL_INTERVAL_SECONDS),
            baseline_window_points: defaults::BASELINE_WINDOW_POINTS,
            metrics_query_timeout: Duration::from_secs(defaults::METRICS_QUERY_TIMEOUT_SECONDS),
            monitored_metrics: defaults::MONITORED_METRICS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            dedup_window: Duration::from_secs(defaults::DEDUP_WINDOW_SECONDS),
            dedup_max_entries: defaults::DEDUP_MAX_ENTRIES,
            volatile_label_pattern: defaults::VOLATILE_LABEL_PATTERN.to_string(),
            correlation_window: Duration::from_secs(defaults::CORRELATION_WINDOW_SECONDS),
            min_signal_count: defaults::MIN_SIGNAL_COUNT,
            min_signal_type_diversity: defaults::MIN_SIGNAL_TYPE_DIVERSITY,
            reasoning_url: "http://localhost:8091".to_string(),
            reasoning_api_key: String::new(),
            reasoning_model: "reasoner-large".to_string(),
            reasoning_temperature: 0.2,
            reasoning_timeout: Duration::from_secs(defaults::REASONING_TIMEOUT_SECONDS),
            confidence_floor: defaults::CONFIDENCE_FLOOR,
            approval_sla: Duration::from_secs(defaults::APPROVAL_SLA_MINUTES * 60),
            stabilization_window: Duration::from_secs(defaults::STABILIZATION_WINDOW_SECONDS),
            improvement_threshold: defaults::IMPROVEMENT_THRESHOLD,
            unstable_threshold: defaults::UNSTABLE_THRESHOLD,
            dry_run_mode: true,
            metrics_url: "http://localhost:9090".to_string(),
            logs_url: None,
            effector_url: "http://localhost:8092".to_string(),
            dependency_config: PathBuf::from("service_dependencies.yaml"),
            runbooks_config: PathBuf::from("runbooks.yaml"),
            data_dir: PathBuf::from("data"),
            worker_concurrency: defaults::WORKER_CONCURRENCY,
            listen_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `AIRRA_*` environment variables.
    ///
    /// Malformed values are configuration errors, not silently defaulted;
    /// a missing reasoning key is tolerated only in dry-run mode.
    pub fn from_env() -> Result<Self, PipelineError> {
        let mut s = Self::default();

        if let Some(v) = read_f64("AIRRA_ANOMALY_THRESHOLD_SIGMA")? {
            s.anomaly_threshold_sigma = v;
        }
        if let Some(v) = read_u64("AIRRA_POLL_INTERVAL_SECONDS")? {
            s.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = read_u64("AIRRA_BASELINE_WINDOW_POINTS")? {
            s.baseline_window_points = v as usize;
        }
        if let Some(v) = read_u64("AIRRA_CORRELATION_WINDOW_SECONDS")? {
            s.correlation_window = Duration::from_secs(v);
        }
        if let Some(v) = read_u64("AIRRA_DEDUP_WINDOW_SECONDS")? {
            s.dedup_window = Duration::from_secs(v);
        }
        if let Some(v) = read_u64("AIRRA_STABILIZATION_WINDOW_SECONDS")? {
            s.stabilization_window = Duration::from_secs(v);
        }
        if let Some(v) = read_f64("AIRRA_IMPROVEMENT_THRESHOLD")? {
            s.improvement_threshold = v;
        }
        if let Some(v) = read_u64("AIRRA_APPROVAL_SLA_MINUTES")? {
            s.approval_sla = Duration::from_secs(v * 60);
        }
        if let Some(v) = read_f64("AIRRA_CONFIDENCE_FLOOR")? {
            s.confidence_floor = v;
        }
        if let Some(v) = read_u64("AIRRA_REASONING_TIMEOUT_SECONDS")? {
            s.reasoning_timeout = Duration::from_secs(v);
        }
        if let Some(v) = read_u64("AIRRA_METRICS_QUERY_TIMEOUT_SECONDS")? {
            s.metrics_query_timeout = Duration::from_secs(v);
        }
        if let Some(v) = read_bool("AIRRA_DRY_RUN_MODE")? {
            s.dry_run_mode = v;
        }
        if let Some(v) = read_u64("AIRRA_WORKER_CONCURRENCY")? {
            s.worker_concurrency = (v as usize).max(1);
        }

        if let Ok(v) = std::env::var("AIRRA_DEPENDENCY_CONFIG") {
            s.dependency_config = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("AIRRA_RUNBOOKS_CONFIG") {
            s.runbooks_config = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("AIRRA_DATA_DIR") {
            s.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("AIRRA_METRICS_URL") {
            s.metrics_url = v;
        }
        if let Ok(v) = std::env::var("AIRRA_LOGS_URL") {
            s.logs_url = Some(v);
        }
        if let Ok(v) = std::env::var("AIRRA_EFFECTOR_URL") {
            s.effector_url = v;
        }
        if let Ok(v) = std::env::var("AIRRA_REASONING_URL") {
            s.reasoning_url = v;
        }
        if let Ok(v) = std::env::var("AIRRA_REASONING_MODEL") {
            s.reasoning_model = v;
        }
        if let Ok(v) = std::env::var("AIRRA_REASONING_API_KEY") {
            s.reasoning_api_key = v;
        }
        if let Ok(v) = std::env::var("AIRRA_LISTEN_ADDR") {
            s.listen_addr = v;
        }
        if let Ok(v) = std::env::var("AIRRA_MONITORED_METRICS") {
            s.monitored_metrics = v
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
        }

        if s.reasoning_api_key.is_empty() && !s.dry_run_mode {
            return Err(PipelineError::Configuration(
                "AIRRA_REASONING_API_KEY is required outside dry-run mode".to_string(),
            ));
        }

        Ok(s)
    }
}

fn read_f64(key: &str) -> Result<Option<f64>, PipelineError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<f64>()
            .map(Some)
            .map_err(|_| PipelineError::Configuration(format!("{key}: not a number: {raw:?}"))),
        Err(_) => Ok(None),
    }
}

fn read_u64(key: &str) -> Result<Option<u64>, PipelineError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|_| PipelineError::Configuration(format!("{key}: not an integer: {raw:?}"))),
        Err(_) => Ok(None),
    }
}

fn read_bool(key: &str) -> Result<Option<bool>, PipelineError> {
    match std::env::var(key) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(PipelineError::Configuration(format!(
                "{key}: not a boolean: {raw:?}"
            ))),
        },
        Err(_) => Ok(None),
    }
}

/// Global settings, initialized once at startup.
static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Install the global settings snapshot.
///
/// A second call is ignored with a warning (tests initialize eagerly).
pub fn init(settings: Settings) {
    if SETTINGS.set(settings).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get the global settings snapshot.
///
/// Falls back to defaults when `init()` was never called, which only happens
/// in unit tests exercising a single subsystem.
pub fn get() -> &'static Settings {
    SETTINGS.get_or_init(Settings::default)
}
