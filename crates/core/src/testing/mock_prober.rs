//! Mock route prober for testing.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::egress::{EgressRoute, RouteProber};

/// Mock implementation of [`RouteProber`].
///
/// Probes succeed unless a route has been told otherwise.
#[derive(Debug, Default)]
pub struct MockRouteProber {
    results: Mutex<HashMap<String, bool>>,
    probes: Mutex<HashMap<String, usize>>,
}

impl MockRouteProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the probe result for a route id.
    pub fn set_result(&self, route_id: &str, ok: bool) {
        self.results
            .lock()
            .unwrap()
            .insert(route_id.to_string(), ok);
    }

    /// Number of probes run against a route id.
    pub fn probe_count(&self, route_id: &str) -> usize {
        self.probes
            .lock()
            .unwrap()
            .get(route_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl RouteProber for MockRouteProber {
    async fn probe(&self, route: &EgressRoute) -> bool {
        *self
            .probes
            .lock()
            .unwrap()
            .entry(route.id.clone())
            .or_insert(0) += 1;
        self.results
            .lock()
            .unwrap()
            .get(&route.id)
            .copied()
            .unwrap_or(true)
    }
}
