//! Metrics and log backend clients.
//!
//! The pipeline talks to backends through traits so tests and the daemon can
//! swap implementations. The HTTP clients consume the standard
//! `query_range` vector/matrix response shape and the log backend's
//! `/logs` listing.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::PipelineError;

/// One time series returned by the metrics backend.
#[derive(Debug, Clone)]
pub struct TimeSeries {
    pub labels: BTreeMap<String, String>,
    /// (timestamp, value) pairs in backend order.
    pub points: Vec<(DateTime<Utc>, f64)>,
}

/// Read access to the metrics backend.
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Range query; the implementation applies the per-query timeout.
    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<TimeSeries>, PipelineError>;

    /// Latest value for one (service, metric), None when the series is empty.
    async fn current_value(
        &self,
        service: &str,
        metric: &str,
    ) -> Result<Option<f64>, PipelineError> {
        let end = Utc::now();
        let start = end - chrono::Duration::minutes(5);
        let series = self
            .query_range(
                &selector(service, metric),
                start,
                end,
                Duration::from_secs(60),
            )
            .await?;
        Ok(series
            .first()
            .and_then(|s| s.points.last())
            .map(|(_, v)| *v))
    }
}

/// Selector expression for one (service, metric) pair.
pub fn selector(service: &str, metric: &str) -> String {
    format!("{metric}{{service=\"{service}\"}}")
}

// ============================================================================
// HTTP metrics client
// ============================================================================

#[derive(Debug, Deserialize)]
struct RangeResponse {
    status: String,
    #[serde(default)]
    data: Option<RangeData>,
}

#[derive(Debug, Deserialize)]
struct RangeData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<RangeResult>,
}

#[derive(Debug, Deserialize)]
struct RangeResult {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    /// Matrix shape: [[ts, "value"], ...]
    #[serde(default)]
    values: Vec<(f64, String)>,
    /// Vector shape: [ts, "value"]
    #[serde(default)]
    value: Option<(f64, String)>,
}

/// HTTP client for the metrics backend.
#[derive(Clone)]
pub struct HttpMetricsBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpMetricsBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Configuration(format!("metrics client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MetricsBackend for HttpMetricsBackend {
    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<TimeSeries>, PipelineError> {
        let resp = self
            .http
            .get(format!("{}/query_range", self.base_url))
            .query(&[
                ("query", query),
                ("start", &start.timestamp().to_string()),
                ("end", &end.timestamp().to_string()),
                ("step", &step.as_secs().to_string()),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::ExternalUnavailable {
                backend: "metrics",
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(PipelineError::ExternalUnavailable {
                backend: "metrics",
                message: format!("status {}", resp.status()),
            });
        }

        let body: RangeResponse =
            resp.json()
                .await
                .map_err(|e| PipelineError::ExternalUnavailable {
                    backend: "metrics",
                    message: format!("malformed body: {e}"),
                })?;

        if body.status != "success" {
            return Err(PipelineError::ExternalUnavailable {
                backend: "metrics",
                message: format!("backend status {}", body.status),
            });
        }

        let data = match body.data {
            Some(d) => d,
            None => return Ok(Vec::new()),
        };
        // Only vector/matrix shapes are consumed.
        if data.result_type != "matrix" && data.result_type != "vector" {
            return Err(PipelineError::ExternalUnavailable {
                backend: "metrics",
                message: format!("unsupported resultType {}", data.result_type),
            });
        }

        Ok(data
            .result
            .into_iter()
            .map(|r| {
                let mut points: Vec<(DateTime<Utc>, f64)> = r
                    .values
                    .iter()
                    .filter_map(|(ts, v)| parse_point(*ts, v))
                    .collect();
                if let Some((ts, v)) = r.value {
                    if let Some(p) = parse_point(ts, &v) {
                        points.push(p);
                    }
                }
                TimeSeries {
                    labels: r.metric,
                    points,
                }
            })
            .collect())
    }
}

fn parse_point(ts: f64, raw: &str) -> Option<(DateTime<Utc>, f64)> {
    let value: f64 = raw.parse().ok()?;
    let when = Utc.timestamp_opt(ts as i64, 0).single()?;
    Some((when, value))
}

// ============================================================================
// Log backend (optional)
// ============================================================================

/// One log line from the log backend.
#[derive(Debug, Clone, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Read access to the optional log backend.
#[async_trait]
pub trait LogBackend: Send + Sync {
    async fn query(
        &self,
        service: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LogLine>, PipelineError>;
}

#[derive(Debug, Deserialize)]
struct LogsResponse {
    #[serde(default)]
    items: Vec<LogLine>,
}

/// HTTP client for the log backend.
#[derive(Clone)]
pub struct HttpLogBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpLogBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Configuration(format!("log client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LogBackend for HttpLogBackend {
    async fn query(
        &self,
        service: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LogLine>, PipelineError> {
        let resp = self
            .http
            .get(format!("{}/logs", self.base_url))
            .query(&[
                ("service", service),
                ("start", &start.timestamp().to_string()),
                ("end", &end.timestamp().to_string()),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::ExternalUnavailable {
                backend: "logs",
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(PipelineError::ExternalUnavailable {
                backend: "logs",
                message: format!("status {}", resp.status()),
            });
        }

        let body: LogsResponse =
            resp.json()
                .await
                .map_err(|e| PipelineError::ExternalUnavailable {
                    backend: "logs",
                    message: format!("malformed body: {e}"),
                })?;
        Ok(body.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_formats_label_match() {
        assert_eq!(
            selector("payment-service", "error_rate"),
            "error_rate{service=\"payment-service\"}"
        );
    }

    #[test]
    fn matrix_response_parses() {
        let raw = r#"{
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [
                    {
                        "metric": {"service": "payment-service"},
                        "values": [[1710000000, "2.5"], [1710000060, "3.0"]]
                    }
                ]
            }
        }"#;
        let body: RangeResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(body.status, "success");
        let data = body.data.unwrap();
        assert_eq!(data.result_type, "matrix");
        assert_eq!(data.result[0].values.len(), 2);
        assert_eq!(data.result[0].values[1].1, "3.0");
    }

    #[test]
    fn vector_response_parses() {
        let raw = r#"{
            "status": "success",
            "data": {
                "resultType": "vector",
                "result": [
                    {"metric": {}, "value": [1710000000, "0.42"]}
                ]
            }
        }"#;
        let body: RangeResponse = serde_json::from_str(raw).unwrap();
        let data = body.data.unwrap();
        assert_eq!(data.result[0].value.as_ref().unwrap().1, "0.42");
    }
}
