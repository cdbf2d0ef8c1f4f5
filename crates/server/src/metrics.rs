//! Prometheus metrics for the HTTP surface.
//!
//! Request metrics live here; engine metrics come from
//! `reelfetch_core::metrics` and are registered into the same registry.
//! Pool and credential gauges are refreshed on each scrape.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "reelfetch_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reelfetch_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "reelfetch_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Collected on scrape
// =============================================================================

/// Egress routes by state.
pub static EGRESS_ROUTES: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("reelfetch_egress_routes", "Egress routes by state"),
        &["state"],
    )
    .unwrap()
});

pub static CREDENTIALS_VALID: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "reelfetch_credentials_valid",
        "1 when a validated credential set is cached",
    )
    .unwrap()
});

pub static DURABILITY_DEGRADED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "reelfetch_durability_degraded",
        "1 while job writes are failing to reach the durable tier",
    )
    .unwrap()
});

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Scrape-time gauges
    registry.register(Box::new(EGRESS_ROUTES.clone())).unwrap();
    registry
        .register(Box::new(CREDENTIALS_VALID.clone()))
        .unwrap();
    registry
        .register(Box::new(DURABILITY_DEGRADED.clone()))
        .unwrap();

    // Core metrics (attempts, jobs, routes, credentials)
    for metric in reelfetch_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Refresh gauges that mirror current state.
pub fn collect_dynamic_metrics(state: &AppState) {
    let stats = state.egress().stats();
    EGRESS_ROUTES
        .with_label_values(&["available"])
        .set(stats.available as i64);
    EGRESS_ROUTES
        .with_label_values(&["banned"])
        .set(stats.banned as i64);
    EGRESS_ROUTES
        .with_label_values(&["awaiting_probe"])
        .set(stats.awaiting_probe as i64);

    CREDENTIALS_VALID.set(if state.credentials().status().validated { 1 } else { 0 });
    DURABILITY_DEGRADED.set(if state.jobs().is_degraded() { 1 } else { 0 });
}

/// Normalize path for metrics labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let uuid_regex = regex_lite::Regex::new(
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
    )
    .unwrap();
    let numeric_regex = regex_lite::Regex::new(r"/\d+(/|$)").unwrap();

    let result = uuid_regex.replace_all(path, "{id}");
    let result = numeric_regex.replace_all(&result, "/{id}$1");
    result.to_string()
}
