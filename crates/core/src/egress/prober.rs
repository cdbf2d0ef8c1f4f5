//! Out-of-band route connectivity probes.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::EgressRoute;

/// Checks whether a route can reach a known-good target.
#[async_trait]
pub trait RouteProber: Send + Sync {
    async fn probe(&self, route: &EgressRoute) -> bool;
}

/// Probes by fetching a URL through the route with `reqwest`.
pub struct HttpRouteProber {
    probe_url: String,
    timeout: Duration,
}

impl HttpRouteProber {
    pub fn new(probe_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            probe_url: probe_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl RouteProber for HttpRouteProber {
    async fn probe(&self, route: &EgressRoute) -> bool {
        let proxy = match reqwest::Proxy::all(&route.url) {
            Ok(proxy) => proxy,
            Err(e) => {
                debug!("Route {} has an unusable proxy URL: {}", route.id, e);
                return false;
            }
        };

        let client = match reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                debug!("Failed to build probe client for {}: {}", route.id, e);
                return false;
            }
        };

        match client.get(&self.probe_url).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                debug!("Probe via {} returned {}", route.id, resp.status());
                false
            }
            Err(e) => {
                debug!("Probe via {} failed: {}", route.id, e);
                false
            }
        }
    }
}
