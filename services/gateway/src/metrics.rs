//! Prometheus metrics for the API Gateway
//!
//! Covers inbound requests, authentication failures, rate-limit rejections,
//! backend calls and limiter memory. The recorder is process-global; every
//! `record_*` call is a no-op until [`install_recorder`] has run.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();
static START_TIME: OnceLock<i64> = OnceLock::new();

/// Install the Prometheus recorder once per process and return its handle.
///
/// Returns `None` if another recorder already owns the global slot.
pub fn install_recorder() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                register_metrics();
                START_TIME.get_or_init(|| Utc::now().timestamp());
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, "Prometheus recorder unavailable; metrics disabled");
                None
            }
        })
        .clone()
}

/// Register all metrics with descriptions
fn register_metrics() {
    // HTTP Request Metrics
    describe_counter!(
        "api_gateway_http_requests_total",
        "Total number of HTTP requests by route and status"
    );
    describe_histogram!(
        "api_gateway_http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    // Authentication Metrics
    describe_counter!(
        "api_gateway_auth_failures_total",
        "Total authentication failures by reason"
    );

    // Rate Limiting Metrics
    describe_counter!(
        "api_gateway_rate_limit_exceeded_total",
        "Total rate limit violations"
    );
    describe_gauge!(
        "api_gateway_rate_limit_tracked_keys",
        "Rate limit counters currently held in memory"
    );

    // Backend Metrics
    describe_counter!(
        "api_gateway_backend_requests_total",
        "Total requests forwarded to backend services"
    );
    describe_histogram!(
        "api_gateway_backend_request_duration_seconds",
        "Backend request duration in seconds"
    );

    describe_gauge!("api_gateway_uptime_seconds", "Gateway uptime in seconds");
}

/// Record one handled request. `route` is the rule name, or `unmatched`.
pub fn record_request(method: &str, route: &str, status: u16, duration: Duration) {
    counter!("api_gateway_http_requests_total",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status_code" => status.to_string()
    )
    .increment(1);

    histogram!("api_gateway_http_request_duration_seconds",
        "method" => method.to_string(),
        "route" => route.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record an authentication failure by error code
pub fn record_auth_failure(reason: &'static str) {
    counter!("api_gateway_auth_failures_total", "reason" => reason).increment(1);
}

/// Record rate limit exceeded
pub fn record_rate_limited(route: &str) {
    counter!("api_gateway_rate_limit_exceeded_total",
        "route" => route.to_string()
    )
    .increment(1);
}

/// Record one backend call; `outcome` is the status code, `timeout` or `error`
pub fn record_backend_call(backend: &'static str, outcome: &str, elapsed: Duration) {
    counter!("api_gateway_backend_requests_total",
        "backend" => backend,
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!("api_gateway_backend_request_duration_seconds",
        "backend" => backend
    )
    .record(elapsed.as_secs_f64());
}

/// Update limiter and uptime gauges
pub fn update_system_metrics(tracked_keys: usize) {
    // SAFETY: Key count safely converts to f64 for metrics
    #[allow(clippy::cast_precision_loss)]
    gauge!("api_gateway_rate_limit_tracked_keys").set(tracked_keys as f64);

    if let Some(start) = START_TIME.get() {
        let uptime = (Utc::now().timestamp() - start).max(0);
        // SAFETY: Uptime seconds safely converts to f64 for metrics
        #[allow(clippy::cast_precision_loss)]
        gauge!("api_gateway_uptime_seconds").set(uptime as f64);
    }
}
