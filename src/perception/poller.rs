//! Per-service perception poll loop.
//!
//! Every `poll_interval` the loop range-queries each monitored metric,
//! runs the z-score detector on the returned window, and forwards emitted
//! signals downstream. When a log backend is configured, error-line counts
//! are accumulated into a client-side series and detected the same way,
//! producing log-source signals for correlation diversity.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::types::{Signal, SignalSource};

use super::backend::{selector, LogBackend, MetricsBackend};
use super::AnomalyDetector;

/// Metric name used for log-derived signals.
pub const LOG_ERROR_COUNT_METRIC: &str = "log_error_count";

/// Static inputs for one service's poll loop.
pub struct PerceptionConfig {
    pub service: String,
    pub metrics: Vec<String>,
    pub poll_interval: Duration,
    pub baseline_points: usize,
    pub detector: AnomalyDetector,
}

/// Run the poll loop for one service until cancelled.
///
/// Backend errors are logged and the cycle is skipped — a broken metrics
/// backend is not itself an incident.
pub async fn run_perception_loop(
    cfg: PerceptionConfig,
    metrics_backend: Arc<dyn MetricsBackend>,
    log_backend: Option<Arc<dyn LogBackend>>,
    tx: mpsc::Sender<Signal>,
    cancel: CancellationToken,
) {
    debug!(service = %cfg.service, metrics = cfg.metrics.len(), "perception loop started");

    let mut ticker = tokio::time::interval(cfg.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // Client-side history of error-line counts for the log detector.
    let mut log_counts: VecDeque<(chrono::DateTime<Utc>, f64)> =
        VecDeque::with_capacity(cfg.baseline_points);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(service = %cfg.service, "perception loop stopping");
                return;
            }
            _ = ticker.tick() => {}
        }

        for metric in &cfg.metrics {
            let end = Utc::now();
            let start = end
                - chrono::Duration::from_std(cfg.poll_interval * cfg.baseline_points as u32)
                    .unwrap_or_else(|_| chrono::Duration::minutes(20));

            let series = match metrics_backend
                .query_range(&selector(&cfg.service, metric), start, end, cfg.poll_interval)
                .await
            {
                Ok(series) => series,
                Err(e) => {
                    warn!(
                        service = %cfg.service,
                        metric,
                        error = %e,
                        "metrics poll failed — skipping until next cycle"
                    );
                    continue;
                }
            };

            let Some(first) = series.first() else {
                continue;
            };

            if let Some(signal) = cfg.detector.observe(
                &cfg.service,
                metric,
                SignalSource::Metric,
                &first.labels,
                &first.points,
            ) {
                debug!(
                    service = %cfg.service,
                    metric,
                    sigma = signal.deviation_sigma,
                    "anomaly signal emitted"
                );
                if tx.send(signal).await.is_err() {
                    return; // pipeline shut down
                }
            }
        }

        if let Some(ref logs) = log_backend {
            if let Some(signal) =
                poll_log_errors(&cfg, logs.as_ref(), &mut log_counts).await
            {
                if tx.send(signal).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Count error-level lines in the last poll interval and z-score the count
/// series accumulated so far.
async fn poll_log_errors(
    cfg: &PerceptionConfig,
    logs: &dyn LogBackend,
    history: &mut VecDeque<(chrono::DateTime<Utc>, f64)>,
) -> Option<Signal> {
    let end = Utc::now();
    let start = end - chrono::Duration::from_std(cfg.poll_interval).ok()?;

    let lines = match logs.query(&cfg.service, start, end, 1000).await {
        Ok(lines) => lines,
        Err(e) => {
            warn!(service = %cfg.service, error = %e, "log poll failed — skipping");
            return None;
        }
    };

    let errors = lines
        .iter()
        .filter(|l| l.level.eq_ignore_ascii_case("error"))
        .count() as f64;

    if history.len() >= cfg.baseline_points {
        history.pop_front();
    }
    history.push_back((end, errors));

    let points: Vec<(chrono::DateTime<Utc>, f64)> = history.iter().copied().collect();
    cfg.detector.observe(
        &cfg.service,
        LOG_ERROR_COUNT_METRIC,
        SignalSource::Log,
        &BTreeMap::new(),
        &points,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::perception::backend::TimeSeries;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};

    /// Backend returning a fixed window with a spike at the end.
    struct SpikeBackend;

    #[async_trait]
    impl MetricsBackend for SpikeBackend {
        async fn query_range(
            &self,
            _query: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _step: Duration,
        ) -> Result<Vec<TimeSeries>, PipelineError> {
            let points = (0..20)
                .map(|i| {
                    let v = if i == 19 { 8e9 } else { 2e9 + (i % 3) as f64 * 2e7 };
                    (Utc.timestamp_opt(1_710_000_000 + i * 60, 0).unwrap(), v)
                })
                .collect();
            Ok(vec![TimeSeries {
                labels: BTreeMap::new(),
                points,
            }])
        }
    }

    #[tokio::test]
    async fn poll_loop_emits_signal_for_spike() {
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let cfg = PerceptionConfig {
            service: "payment-service".to_string(),
            metrics: vec!["container_memory_usage_bytes".to_string()],
            poll_interval: Duration::from_millis(10),
            baseline_points: 20,
            detector: AnomalyDetector::new(3.0),
        };

        let handle = tokio::spawn(run_perception_loop(
            cfg,
            Arc::new(SpikeBackend),
            None,
            tx,
            cancel.clone(),
        ));

        let signal = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("signal within poll window")
            .expect("channel open");
        assert_eq!(signal.service, "payment-service");
        assert_eq!(signal.metric_name, "container_memory_usage_bytes");
        assert!(signal.deviation_sigma >= 3.0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
