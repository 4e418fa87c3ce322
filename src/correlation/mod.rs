//! Correlation: group admitted signals into incident candidates.
//!
//! Signals accumulate in a sliding per-service window. A candidate is emitted
//! once three gates pass: enough signals, enough source diversity, and a
//! composite confidence over the floor. The composite blend (0.4 metric /
//! 0.3 log / 0.3 trace + 0.1 diversity bonus) is deliberately different from
//! the hypothesis-scoring weights and must not be conflated with them.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use crate::config::defaults::{
    CORRELATION_CONFIDENCE_FLOOR, CORRELATION_DIVERSITY_BONUS, CORRELATION_WEIGHT_LOG,
    CORRELATION_WEIGHT_METRIC, CORRELATION_WEIGHT_TRACE,
};
use crate::types::{Severity, Signal, SignalSource};

/// An incident candidate produced by correlation, before persistence.
///
/// The store either creates a new incident from this or merges it into an
/// existing non-terminal incident with the same fingerprint.
#[derive(Debug, Clone)]
pub struct IncidentCandidate {
    pub service: String,
    /// Max severity across contributing signals.
    pub severity: Severity,
    pub composite_confidence: f64,
    /// Cross-incident dedup key.
    pub fingerprint: String,
    pub affected_components: BTreeSet<String>,
    /// Metric -> latest observed value among contributing signals.
    pub metrics_snapshot: BTreeMap<String, f64>,
    pub signals: Vec<Signal>,
}

/// Sliding-window signal correlator. Single-owner; driven by the ingest task.
pub struct Correlator {
    window: Duration,
    min_signal_count: usize,
    min_type_diversity: usize,
    by_service: HashMap<String, VecDeque<Signal>>,
}

impl Correlator {
    pub fn new(window: Duration, min_signal_count: usize, min_type_diversity: usize) -> Self {
        Self {
            window,
            min_signal_count,
            min_type_diversity,
            by_service: HashMap::new(),
        }
    }

    /// Ingest one signal in arrival order; emits a candidate when the gates
    /// pass. Contributing signals are consumed by the emission.
    pub fn ingest(&mut self, signal: Signal) -> Option<IncidentCandidate> {
        let service = signal.service.clone();
        let window = self.window;
        let buffer = self.by_service.entry(service.clone()).or_default();

        // Expire by signal timestamp: perception guarantees per-service order.
        let horizon = signal.timestamp
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::minutes(5));
        while buffer.front().is_some_and(|s| s.timestamp < horizon) {
            buffer.pop_front();
        }
        buffer.push_back(signal);

        if buffer.len() < self.min_signal_count {
            return None;
        }
        let diversity = buffer
            .iter()
            .map(|s| s.source)
            .collect::<BTreeSet<_>>()
            .len();
        if diversity < self.min_type_diversity {
            return None;
        }
        let confidence = composite_confidence(buffer.iter());
        if confidence < CORRELATION_CONFIDENCE_FLOOR {
            return None;
        }

        // All three gates passed: drain the window into a candidate.
        let signals: Vec<Signal> = buffer.drain(..).collect();
        Some(build_candidate(service, confidence, signals))
    }

    /// Ingest a batch, emitting candidates in service-name lexicographic
    /// order (the same-tick tie rule).
    pub fn ingest_batch(&mut self, signals: Vec<Signal>) -> Vec<IncidentCandidate> {
        let mut candidates: Vec<IncidentCandidate> =
            signals.into_iter().filter_map(|s| self.ingest(s)).collect();
        candidates.sort_by(|a, b| a.service.cmp(&b.service));
        candidates
    }

    /// Signals currently buffered for a service (diagnostics).
    pub fn pending(&self, service: &str) -> usize {
        self.by_service.get(service).map_or(0, VecDeque::len)
    }
}

/// Composite confidence over a set of signals.
///
/// Each source's weight counts in full once that source has contributed at
/// least one signal, plus a diversity bonus per extra source type, capped at
/// 1.0. A metric+log window scores 0.4 + 0.3 + 0.1 = 0.8.
fn composite_confidence<'a>(signals: impl Iterator<Item = &'a Signal> + Clone) -> f64 {
    let has = |source: SignalSource| signals.clone().any(|s| s.source == source);
    let present = [
        (has(SignalSource::Metric), CORRELATION_WEIGHT_METRIC),
        (has(SignalSource::Log), CORRELATION_WEIGHT_LOG),
        (has(SignalSource::Trace), CORRELATION_WEIGHT_TRACE),
    ];
    let types = present.iter().filter(|(p, _)| *p).count();
    if types == 0 {
        return 0.0;
    }

    let score: f64 = present
        .iter()
        .filter(|(p, _)| *p)
        .map(|(_, w)| w)
        .sum::<f64>()
        + CORRELATION_DIVERSITY_BONUS * (types - 1) as f64;
    score.min(1.0)
}

fn build_candidate(
    service: String,
    composite_confidence: f64,
    signals: Vec<Signal>,
) -> IncidentCandidate {
    let severity = signals
        .iter()
        .map(Signal::severity)
        .max()
        .unwrap_or(Severity::Low);

    let affected_components: BTreeSet<String> =
        signals.iter().map(|s| s.metric_name.clone()).collect();

    // Later signals win per metric; input is time-ordered.
    let mut metrics_snapshot = BTreeMap::new();
    for s in &signals {
        metrics_snapshot.insert(s.metric_name.clone(), s.value);
    }

    let sources: BTreeSet<String> = signals.iter().map(|s| s.source.to_string()).collect();
    let canonical = format!(
        "{service}|{}|{}",
        sources.iter().cloned().collect::<Vec<_>>().join(","),
        affected_components
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(",")
    );

    IncidentCandidate {
        service,
        severity,
        composite_confidence,
        fingerprint: format!("{:x}", md5::compute(canonical.as_bytes())),
        affected_components,
        metrics_snapshot,
        signals,
    }
}
