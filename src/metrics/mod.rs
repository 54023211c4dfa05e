use crate::error::{LimiterError, Result};
use axum::{
    body::Body,
    extract::State,
    http::{header, Response, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global Prometheus recorder.
    ///
    /// Only one recorder can be installed per process.
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            LimiterError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        describe_counter!(
            "sparkle_ratelimit_decisions_total",
            "Rate limit decisions by outcome and answering store"
        );
        describe_counter!(
            "sparkle_ratelimit_store_failovers_total",
            "Calls answered by the local fallback because the primary store failed"
        );
        describe_histogram!(
            "sparkle_ratelimit_store_duration_seconds",
            "Primary store round-trip latencies in seconds"
        );
        describe_gauge!(
            "sparkle_ratelimit_local_entries",
            "Entries held by the local fallback store"
        );
        describe_counter!(
            "sparkle_ratelimit_sweeps_total",
            "Maintenance sweeps run over the local fallback store"
        );
        describe_counter!(
            "sparkle_ratelimit_rejected_requests_total",
            "HTTP requests rejected with 429 by the rate limit middleware"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    let metrics = service.render();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(metrics))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Record a rate limit decision
pub fn record_decision(store: &'static str, outcome: &'static str) {
    let labels = [("store", store), ("outcome", outcome)];
    counter!("sparkle_ratelimit_decisions_total", &labels).increment(1);
}

/// Record a failover to the local store
pub fn record_failover(reason: &'static str) {
    let labels = [("reason", reason)];
    counter!("sparkle_ratelimit_store_failovers_total", &labels).increment(1);
}

/// Record a primary store round-trip
pub fn record_store_duration(store: &'static str, duration: f64) {
    let labels = [("store", store)];
    histogram!("sparkle_ratelimit_store_duration_seconds", &labels).record(duration);
}

/// Record the outcome of a local store sweep
pub fn record_sweep(remaining_entries: u64) {
    counter!("sparkle_ratelimit_sweeps_total").increment(1);
    gauge!("sparkle_ratelimit_local_entries").set(remaining_entries as f64);
}

/// Record a request rejected by the middleware
pub fn record_rejected_request(namespace: &str, path: &str) {
    let labels = [
        ("namespace", namespace.to_string()),
        ("path", sanitize_path(path)),
    ];
    counter!("sparkle_ratelimit_rejected_requests_total", &labels).increment(1);
}

/// Sanitize path for metrics to avoid cardinality explosion
/// Replaces path parameters with placeholders
fn sanitize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| if is_likely_id(seg) { ":id" } else { seg })
        .collect::<Vec<_>>()
        .join("/")
}

/// Check if a path segment is likely an ID (numeric, UUID, etc.)
fn is_likely_id(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }

    if segment.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }

    // UUIDs
    if segment.len() >= 32 && segment.contains('-') {
        return segment.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
    }

    // Long mixed alphanumerics (object ids, hashes)
    segment.len() > 10
        && segment.chars().all(|c| c.is_ascii_alphanumeric())
        && segment.chars().any(|c| c.is_ascii_digit())
        && segment.chars().any(|c| c.is_ascii_alphabetic())
}
