use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EgressError {
    #[error("invalid route '{input}': {reason}")]
    InvalidRoute { input: String, reason: String },

    #[error("unknown route: {0}")]
    UnknownRoute(String),

    #[error("failed to read routes file {path}: {source}")]
    RoutesFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A candidate network egress point (proxy).
#[derive(Debug, Clone, PartialEq)]
pub struct EgressRoute {
    /// `scheme://host:port`, without credentials.
    pub id: String,
    /// Full proxy URL handed to clients, credentials included.
    pub url: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub banned_until: Option<DateTime<Utc>>,
    /// Bans since the last acquisition success; drives cooldown escalation.
    pub ban_count: u32,
    pub last_tested_at: Option<DateTime<Utc>>,
}

impl EgressRoute {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            banned_until: None,
            ban_count: 0,
            last_tested_at: None,
        }
    }

    /// Health score derived from the counters: `s / (s + f + 1)`.
    pub fn score(&self) -> f64 {
        let s = self.success_count as f64;
        let f = self.failure_count as f64;
        s / (s + f + 1.0)
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> RouteState {
        match self.banned_until {
            None => RouteState::Active,
            Some(until) if until > now => RouteState::Banned,
            Some(_) => RouteState::AwaitingProbe,
        }
    }
}

/// Where a route stands with respect to bans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteState {
    Active,
    Banned,
    /// Cooldown elapsed; waiting for a probe to confirm it works.
    AwaitingProbe,
}

/// Read-only view of a route, safe to expose (no credentials).
#[derive(Debug, Clone, Serialize)]
pub struct RouteSnapshot {
    pub id: String,
    pub state: RouteState,
    pub score: f64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub banned_until: Option<DateTime<Utc>>,
    pub last_tested_at: Option<DateTime<Utc>>,
}

/// Aggregate pool health.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
    pub banned: usize,
    pub awaiting_probe: usize,
    pub average_score: f64,
}
