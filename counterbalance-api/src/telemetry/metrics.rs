//! Prometheus Metrics Definitions
//!
//! Defines all counterbalance metrics with appropriate labels and types.
//! Exposes a /metrics endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Allocation latency buckets (seconds), lock wait included
const ALLOCATION_LATENCY_BUCKETS: &[f64] =
    &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<CounterbalanceMetrics>> = Lazy::new(CounterbalanceMetrics::new);

/// Container for all counterbalance metrics.
#[derive(Clone)]
pub struct CounterbalanceMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Assignments handed out - labels: group, source (new/reclaimed)
    pub assignments_allocated_total: CounterVec,

    /// Time spent inside the balancer transaction
    pub allocation_duration_seconds: Histogram,

    /// Completion attempts - labels: outcome
    pub completions_total: CounterVec,

    /// Records swept by the abandonment reaper - labels: policy
    pub reaper_records_total: CounterVec,

    /// Reaper sweeps - labels: status (success/error)
    pub reaper_sweeps_total: CounterVec,
}

impl CounterbalanceMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "counterbalance_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "counterbalance_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            assignments_allocated_total: register_counter_vec!(
                "counterbalance_assignments_allocated_total",
                "Total assignments handed out",
                &["group", "source"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register assignments_allocated_total: {}", e)))?,

            allocation_duration_seconds: register_histogram!(
                "counterbalance_allocation_duration_seconds",
                "Time from opening the balancer transaction to commit",
                ALLOCATION_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register allocation_duration_seconds: {}", e)))?,

            completions_total: register_counter_vec!(
                "counterbalance_completions_total",
                "Total completion attempts by outcome",
                &["outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register completions_total: {}", e)))?,

            reaper_records_total: register_counter_vec!(
                "counterbalance_reaper_records_total",
                "Stale assignments swept by the reaper",
                &["policy"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register reaper_records_total: {}", e)))?,

            reaper_sweeps_total: register_counter_vec!(
                "counterbalance_reaper_sweeps_total",
                "Reaper sweeps by status",
                &["status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register reaper_sweeps_total: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, status_str.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record a committed allocation.
    pub fn record_allocation(&self, group: &str, reclaimed: bool, duration_secs: f64) {
        let source = if reclaimed { "reclaimed" } else { "new" };
        self.assignments_allocated_total
            .with_label_values(&[group, source])
            .inc();
        self.allocation_duration_seconds.observe(duration_secs);
    }

    /// Record a completion attempt.
    pub fn record_completion(&self, outcome: &str) {
        self.completions_total.with_label_values(&[outcome]).inc();
    }

    /// Record one reaper sweep.
    pub fn record_reaper_sweep(&self, policy: &str, reaped: Option<usize>) {
        match reaped {
            Some(count) => {
                self.reaper_sweeps_total.with_label_values(&["success"]).inc();
                self.reaper_records_total
                    .with_label_values(&[policy])
                    .inc_by(count as f64);
            }
            None => self.reaper_sweeps_total.with_label_values(&["error"]).inc(),
        }
    }
}

/// Run `f` against the global metrics if they registered successfully.
pub fn with_metrics(f: impl FnOnce(&CounterbalanceMetrics)) {
    match METRICS.as_ref() {
        Ok(metrics) => f(metrics),
        Err(e) => tracing::warn!(error = %e.message, "Metrics unavailable"),
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Observability",
    responses(
        (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
)]
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::core::Collector;

    #[test]
    fn test_metrics_creation() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        assert!(!metrics.http_requests_total.desc().is_empty());
        Ok(())
    }

    #[test]
    fn test_record_allocation() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        let before = metrics
            .assignments_allocated_total
            .with_label_values(&["MetricsTestGroup", "reclaimed"])
            .get();
        metrics.record_allocation("MetricsTestGroup", true, 0.002);
        let after = metrics
            .assignments_allocated_total
            .with_label_values(&["MetricsTestGroup", "reclaimed"])
            .get();
        assert_eq!(after - before, 1.0);
        Ok(())
    }

    #[test]
    fn test_record_reaper_sweep() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        let before = metrics.reaper_records_total.with_label_values(&["delete"]).get();
        metrics.record_reaper_sweep("delete", Some(3));
        metrics.record_reaper_sweep("delete", None);
        let after = metrics.reaper_records_total.with_label_values(&["delete"]).get();
        assert_eq!(after - before, 3.0);
        Ok(())
    }
}
