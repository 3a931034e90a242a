//! Metrics collection and statistics.

use crate::session::RequestEvent;
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Collects metrics during load test execution.
pub struct MetricsCollector {
    histogram: Histogram<u64>,
    requests_total: u64,
    requests_success: u64,
    requests_failed: u64,
    bytes_total: u64,
    endpoints: BTreeMap<String, EndpointCounter>,
    failures: BTreeMap<(String, String), u64>,
}

#[derive(Default)]
struct EndpointCounter {
    requests: u64,
    failures: u64,
    success_latency_us: u64,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            histogram: Histogram::new(3).expect("3 significant figures is a valid precision"),
            requests_total: 0,
            requests_success: 0,
            requests_failed: 0,
            bytes_total: 0,
            endpoints: BTreeMap::new(),
            failures: BTreeMap::new(),
        }
    }

    /// Record the outcome of one request.
    pub fn record(&mut self, event: &RequestEvent) {
        self.requests_total += 1;
        let endpoint = self.endpoints.entry(event.endpoint()).or_default();
        endpoint.requests += 1;

        match &event.error {
            None => {
                self.requests_success += 1;
                self.bytes_total += event.bytes as u64;
                self.histogram.saturating_record(event.latency_us);
                endpoint.success_latency_us += event.latency_us;
            }
            Some(err) => {
                self.requests_failed += 1;
                endpoint.failures += 1;
                *self
                    .failures
                    .entry((event.endpoint(), err.to_string()))
                    .or_insert(0) += 1;
            }
        }
    }

    /// Discard everything recorded so far.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn total_requests(&self) -> u64 {
        self.requests_total
    }

    pub fn failed_requests(&self) -> u64 {
        self.requests_failed
    }

    /// Generate final test results for a test phase that lasted `duration`.
    pub fn results(
        &self,
        scenario_name: String,
        host: String,
        users: u32,
        duration: Duration,
    ) -> TestResults {
        let duration_secs = duration.as_secs_f64();
        let per_second = |count: u64| {
            if duration_secs > 0.0 {
                count as f64 / duration_secs
            } else {
                0.0
            }
        };

        let ms = |us: u64| us as f64 / 1000.0;
        let empty = self.histogram.is_empty();
        let percentile = |p: f64| {
            if empty {
                0.0
            } else {
                ms(self.histogram.value_at_percentile(p))
            }
        };

        let endpoints = self
            .endpoints
            .iter()
            .map(|(name, c)| {
                let successes = c.requests - c.failures;
                EndpointStats {
                    name: name.clone(),
                    requests: c.requests,
                    failures: c.failures,
                    avg_latency_ms: if successes > 0 {
                        ms(c.success_latency_us) / successes as f64
                    } else {
                        0.0
                    },
                    requests_per_second: per_second(c.requests),
                }
            })
            .collect();

        let failures = self
            .failures
            .iter()
            .map(|((endpoint, error), occurrences)| FailureStats {
                endpoint: endpoint.clone(),
                error: error.clone(),
                occurrences: *occurrences,
            })
            .collect();

        TestResults {
            timestamp: chrono::Utc::now().to_rfc3339(),
            scenario_name,
            host,
            users,
            duration_secs,
            total_requests: self.requests_total,
            successful_requests: self.requests_success,
            failed_requests: self.requests_failed,
            requests_per_second: per_second(self.requests_total),
            latency_p50: percentile(50.0),
            latency_p75: percentile(75.0),
            latency_p90: percentile(90.0),
            latency_p95: percentile(95.0),
            latency_p99: percentile(99.0),
            latency_min: if empty { 0.0 } else { ms(self.histogram.min()) },
            latency_max: if empty { 0.0 } else { ms(self.histogram.max()) },
            latency_avg: if empty { 0.0 } else { self.histogram.mean() / 1000.0 },
            bytes_per_second: per_second(self.bytes_total),
            endpoints,
            failures,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared sink for request events: metrics plus an optional JSONL request log.
pub struct Recorder {
    started: Instant,
    metrics: Mutex<MetricsCollector>,
    log: Option<Mutex<BufWriter<File>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            metrics: Mutex::new(MetricsCollector::new()),
            log: None,
        }
    }

    /// Recorder that also appends every request as one JSON line to `path`.
    pub fn with_log(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            log: Some(Mutex::new(BufWriter::new(file))),
            ..Self::new()
        })
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub async fn record(&self, event: &RequestEvent) {
        self.metrics.lock().await.record(event);

        if let Some(ref log) = self.log {
            match serde_json::to_string(event) {
                Ok(json) => {
                    let mut writer = log.lock().await;
                    if let Err(e) = writeln!(writer, "{}", json) {
                        tracing::warn!(error = %e, "Failed to write request log entry");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Failed to serialize request log entry"),
            }
        }
    }

    /// Drop everything recorded so far (end of warmup).
    pub async fn reset(&self) {
        self.metrics.lock().await.reset();
    }

    pub async fn total_requests(&self) -> u64 {
        self.metrics.lock().await.total_requests()
    }

    pub async fn flush(&self) {
        if let Some(ref log) = self.log {
            if let Err(e) = log.lock().await.flush() {
                tracing::warn!(error = %e, "Failed to flush request log");
            }
        }
    }

    pub async fn results(
        &self,
        scenario_name: String,
        host: String,
        users: u32,
        duration: Duration,
    ) -> TestResults {
        self.metrics
            .lock()
            .await
            .results(scenario_name, host, users, duration)
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Final test results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResults {
    pub timestamp: String,
    pub scenario_name: String,
    pub host: String,
    pub users: u32,
    pub duration_secs: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub requests_per_second: f64,

    // Latency percentiles of successful requests (ms)
    pub latency_p50: f64,
    pub latency_p75: f64,
    pub latency_p90: f64,
    pub latency_p95: f64,
    pub latency_p99: f64,
    pub latency_min: f64,
    pub latency_max: f64,
    pub latency_avg: f64,

    pub bytes_per_second: f64,

    pub endpoints: Vec<EndpointStats>,
    pub failures: Vec<FailureStats>,
}

impl TestResults {
    /// Share of requests that succeeded, in percent.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        (self.successful_requests as f64 / self.total_requests as f64) * 100.0
    }
}

/// Per-endpoint request counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointStats {
    pub name: String,
    pub requests: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
    pub requests_per_second: f64,
}

/// How often a given error occurred on an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureStats {
    pub endpoint: String,
    pub error: String,
    pub occurrences: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RequestError;

    fn event(latency_us: u64, error: Option<RequestError>) -> RequestEvent {
        RequestEvent {
            method: "GET".to_string(),
            name: "/query".to_string(),
            url: "http://example.com/query".to_string(),
            status: match &error {
                Some(RequestError::Status(code)) => *code,
                Some(_) => 0,
                None => 200,
            },
            latency_us,
            bytes: 100,
            error,
            elapsed_ms: 0,
        }
    }

    #[test]
    fn test_record_success_and_failure() {
        let mut m = MetricsCollector::new();
        m.record(&event(1_000, None));
        m.record(&event(3_000, None));
        m.record(&event(50_000, Some(RequestError::Status(500))));
        m.record(&event(10, Some(RequestError::Timeout)));

        let r = m.results("s".into(), "h".into(), 1, Duration::from_secs(2));
        assert_eq!(r.total_requests, 4);
        assert_eq!(r.successful_requests, 2);
        assert_eq!(r.failed_requests, 2);
        assert_eq!(r.requests_per_second, 2.0);
        assert_eq!(r.bytes_per_second, 100.0);
        assert_eq!(r.success_rate(), 50.0);

        // Only successful latencies land in the histogram
        assert!(r.latency_max < 10.0);
        assert!((r.latency_min - 1.0).abs() < 0.01);

        assert_eq!(r.endpoints.len(), 1);
        assert_eq!(r.endpoints[0].name, "GET /query");
        assert_eq!(r.endpoints[0].requests, 4);
        assert_eq!(r.endpoints[0].failures, 2);
        assert!((r.endpoints[0].avg_latency_ms - 2.0).abs() < 1e-9);

        assert_eq!(r.failures.len(), 2);
        assert!(r
            .failures
            .iter()
            .any(|f| f.error == "HTTP 500" && f.occurrences == 1));
    }

    #[test]
    fn test_empty_results_are_zero() {
        let m = MetricsCollector::new();
        let r = m.results("s".into(), "h".into(), 1, Duration::ZERO);
        assert_eq!(r.total_requests, 0);
        assert_eq!(r.requests_per_second, 0.0);
        assert_eq!(r.latency_p99, 0.0);
        assert_eq!(r.latency_min, 0.0);
        assert_eq!(r.success_rate(), 0.0);
    }

    #[test]
    fn test_reset_discards_counts() {
        let mut m = MetricsCollector::new();
        m.record(&event(1_000, None));
        m.reset();
        assert_eq!(m.total_requests(), 0);
        assert_eq!(m.failed_requests(), 0);
    }

    #[tokio::test]
    async fn test_recorder_writes_request_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.jsonl");
        let recorder = Recorder::with_log(&path).unwrap();

        recorder.record(&event(1_000, None)).await;
        recorder
            .record(&event(1_000, Some(RequestError::Status(404))))
            .await;
        recorder.flush().await;

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["status"], 404);
        assert_eq!(second["error"]["kind"], "status");
        assert_eq!(recorder.total_requests().await, 2);
    }
}
