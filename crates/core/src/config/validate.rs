use std::collections::HashSet;

use super::{types::Config, ConfigError};
use crate::egress::parse_route;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Acquisition limits, strategy list and backoff bounds
/// - Egress thresholds, cooldown bounds and route syntax
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let fail = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

    // Server validation
    if config.server.port == 0 {
        return fail("server.port cannot be 0");
    }

    // Acquisition validation
    let acquisition = &config.acquisition;
    if acquisition.max_concurrent_jobs == 0 {
        return fail("acquisition.max_concurrent_jobs must be at least 1");
    }
    if acquisition.attempt_timeout_secs == 0 {
        return fail("acquisition.attempt_timeout_secs cannot be 0");
    }
    if acquisition.strategies.is_empty() {
        return fail("acquisition.strategies cannot be empty");
    }
    let mut seen = HashSet::new();
    for strategy in &acquisition.strategies {
        if !seen.insert(strategy) {
            return Err(ConfigError::ValidationError(format!(
                "acquisition.strategies lists '{}' more than once",
                strategy
            )));
        }
    }
    if acquisition.backoff.initial_backoff_ms > acquisition.backoff.max_backoff_ms {
        return fail("acquisition.backoff.initial_backoff_ms exceeds max_backoff_ms");
    }
    if acquisition.backoff.multiplier < 1.0 {
        return fail("acquisition.backoff.multiplier must be at least 1.0");
    }

    // Egress validation
    let egress = &config.egress;
    if egress.failure_threshold == 0 {
        return fail("egress.failure_threshold cannot be 0");
    }
    if egress.base_cooldown_secs > egress.max_cooldown_secs {
        return fail("egress.base_cooldown_secs exceeds max_cooldown_secs");
    }
    if egress.probe_concurrency == 0 {
        return fail("egress.probe_concurrency must be at least 1");
    }
    for route in &egress.routes {
        parse_route(route).map_err(|e| ConfigError::ValidationError(e.to_string()))?;
    }

    // Jobs validation
    if config.jobs.sweep_interval_secs == 0 {
        return fail("jobs.sweep_interval_secs cannot be 0");
    }

    Ok(())
}
