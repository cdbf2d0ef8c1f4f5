//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Acquisition (attempts, strategy skips, job outcomes, admission)
//! - Job store (durable write failures, retention sweeps)
//! - Egress (bans, probes)
//! - Credentials (refreshes)

use once_cell::sync::Lazy;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
};

// =============================================================================
// Acquisition
// =============================================================================

/// Strategy attempts by strategy and outcome.
pub static ATTEMPTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reelfetch_attempts_total", "Total acquisition attempts"),
        &["strategy", "outcome"],
    )
    .unwrap()
});

/// Attempt duration in seconds.
pub static ATTEMPT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "reelfetch_attempt_duration_seconds",
            "Duration of a single strategy attempt",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["strategy"],
    )
    .unwrap()
});

/// Strategies skipped for lack of credentials.
pub static STRATEGIES_SKIPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reelfetch_strategies_skipped_total",
            "Strategies skipped because their prerequisites were missing",
        ),
        &["strategy"],
    )
    .unwrap()
});

/// Jobs reaching a terminal state.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reelfetch_jobs_finished_total", "Jobs reaching a terminal state"),
        &["status"], // "completed", "failed", "cancelled"
    )
    .unwrap()
});

/// Jobs currently being acquired.
pub static JOBS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("reelfetch_jobs_active", "Jobs currently being acquired").unwrap()
});

/// Jobs waiting for an admission slot.
pub static JOBS_WAITING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("reelfetch_jobs_waiting", "Jobs waiting for an admission slot").unwrap()
});

// =============================================================================
// Job Store
// =============================================================================

pub static DURABLE_WRITE_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "reelfetch_durable_write_failures_total",
        "Job writes that did not reach the durable tier",
    )
    .unwrap()
});

pub static JOBS_SWEPT: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "reelfetch_jobs_swept_total",
        "Jobs removed by the retention sweep",
    )
    .unwrap()
});

// =============================================================================
// Egress
// =============================================================================

pub static ROUTE_BANS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("reelfetch_route_bans_total", "Egress routes banned").unwrap()
});

/// Reinstatement probes by result.
pub static ROUTE_PROBES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reelfetch_route_probes_total", "Egress route probes"),
        &["result"], // "success", "failure"
    )
    .unwrap()
});

// =============================================================================
// Credentials
// =============================================================================

pub static CREDENTIAL_REFRESHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reelfetch_credential_refreshes_total",
            "Credential reloads by result",
        ),
        &["result"], // "success", "invalid", "missing", "error"
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Acquisition
        Box::new(ATTEMPTS_TOTAL.clone()),
        Box::new(ATTEMPT_DURATION.clone()),
        Box::new(STRATEGIES_SKIPPED.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(JOBS_ACTIVE.clone()),
        Box::new(JOBS_WAITING.clone()),
        // Job store
        Box::new(DURABLE_WRITE_FAILURES.clone()),
        Box::new(JOBS_SWEPT.clone()),
        // Egress
        Box::new(ROUTE_BANS.clone()),
        Box::new(ROUTE_PROBES.clone()),
        // Credentials
        Box::new(CREDENTIAL_REFRESHES.clone()),
    ]
}
