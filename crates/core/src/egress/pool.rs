//! Egress route pool with health scoring and bans.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::parse::{parse_route, read_routes_file};
use super::{
    EgressConfig, EgressError, EgressRoute, PoolStats, RouteProber, RouteSnapshot, RouteState,
};
use crate::metrics;

/// Shared table of egress routes keyed by route id.
///
/// All counter mutation goes through [`EgressPool::record_outcome`] and
/// [`EgressPool::test_route`] under the table lock, so concurrent jobs never
/// lose updates.
pub struct EgressPool {
    routes: Mutex<HashMap<String, EgressRoute>>,
    config: EgressConfig,
    prober: Arc<dyn RouteProber>,
}

impl EgressPool {
    /// Empty pool.
    pub fn new(config: EgressConfig, prober: Arc<dyn RouteProber>) -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            config,
            prober,
        }
    }

    /// Pool seeded from `config.routes` and `config.routes_file`.
    pub fn from_config(
        config: EgressConfig,
        prober: Arc<dyn RouteProber>,
    ) -> Result<Self, EgressError> {
        let mut sources = config.routes.clone();
        if let Some(path) = &config.routes_file {
            sources.extend(read_routes_file(path)?);
        }

        let pool = Self::new(config, prober);
        for source in &sources {
            pool.add_route(source)?;
        }
        info!("Egress pool loaded with {} routes", pool.len());
        Ok(pool)
    }

    /// Add a route; returns its id. Re-adding an existing id keeps its history.
    pub fn add_route(&self, input: &str) -> Result<String, EgressError> {
        let parsed = parse_route(input)?;
        let mut routes = self.routes.lock().unwrap();
        routes
            .entry(parsed.id.clone())
            .or_insert_with(|| EgressRoute::new(parsed.id.clone(), parsed.url));
        Ok(parsed.id)
    }

    pub fn remove_route(&self, route_id: &str) -> bool {
        self.routes.lock().unwrap().remove(route_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.routes.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best non-banned route not in `excluding`, or `None`.
    pub fn select_route(&self, excluding: &HashSet<String>) -> Option<EgressRoute> {
        self.select_route_at(excluding, Utc::now())
    }

    pub fn select_route_at(
        &self,
        excluding: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Option<EgressRoute> {
        let routes = self.routes.lock().unwrap();
        routes
            .values()
            .filter(|route| !excluding.contains(&route.id))
            .filter(|route| self.is_selectable(route, now))
            .max_by(|a, b| compare_for_selection(a, b))
            .cloned()
    }

    fn is_selectable(&self, route: &EgressRoute, now: DateTime<Utc>) -> bool {
        match route.state_at(now) {
            RouteState::Active => true,
            RouteState::Banned => false,
            RouteState::AwaitingProbe => !self.config.probe_before_reinstate,
        }
    }

    /// Record the result of an acquisition attempt made through `route_id`.
    pub fn record_outcome(&self, route_id: &str, success: bool) -> Result<(), EgressError> {
        self.record_outcome_at(route_id, success, Utc::now())
    }

    pub fn record_outcome_at(
        &self,
        route_id: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<(), EgressError> {
        let mut routes = self.routes.lock().unwrap();
        let route = routes
            .get_mut(route_id)
            .ok_or_else(|| EgressError::UnknownRoute(route_id.to_string()))?;

        route.last_tested_at = Some(now);
        let state = route.state_at(now);

        if success {
            route.success_count += 1;
            route.consecutive_failures = 0;
            if state != RouteState::Banned {
                route.banned_until = None;
                route.ban_count = 0;
            }
            return Ok(());
        }

        route.failure_count += 1;
        if state == RouteState::Banned {
            // Late result from an attempt started before the ban.
            return Ok(());
        }

        route.consecutive_failures += 1;
        if route.consecutive_failures >= self.config.failure_threshold {
            self.ban(route, now);
        }
        Ok(())
    }

    fn ban(&self, route: &mut EgressRoute, now: DateTime<Utc>) {
        route.ban_count += 1;
        let cooldown = cooldown_for(
            route.ban_count,
            self.config.base_cooldown_secs,
            self.config.max_cooldown_secs,
        );
        route.banned_until = Some(now + cooldown);
        route.consecutive_failures = 0;
        metrics::ROUTE_BANS.inc();
        warn!(
            "Banned route {} for {}s (ban #{})",
            route.id,
            cooldown.num_seconds(),
            route.ban_count
        );
    }

    /// Probe a route out of band.
    ///
    /// A route awaiting reinstatement is returned to the pool on success and
    /// banned again (next cooldown step) on failure. Counters are not touched.
    pub async fn test_route(&self, route_id: &str) -> Result<bool, EgressError> {
        let route = self
            .routes
            .lock()
            .unwrap()
            .get(route_id)
            .cloned()
            .ok_or_else(|| EgressError::UnknownRoute(route_id.to_string()))?;

        let ok = self.prober.probe(&route).await;
        metrics::ROUTE_PROBES
            .with_label_values(&[if ok { "success" } else { "failure" }])
            .inc();

        let now = Utc::now();
        let mut routes = self.routes.lock().unwrap();
        // The route may have been removed while the probe was in flight.
        let Some(route) = routes.get_mut(route_id) else {
            return Ok(ok);
        };
        route.last_tested_at = Some(now);

        if route.state_at(now) == RouteState::AwaitingProbe {
            if ok {
                route.banned_until = None;
                route.consecutive_failures = 0;
                info!("Route {} reinstated after probe", route.id);
            } else {
                self.ban(route, now);
            }
        }
        debug!("Probed route {}: {}", route_id, if ok { "ok" } else { "failed" });
        Ok(ok)
    }

    /// Probe every route whose cooldown has elapsed. Returns how many were reinstated.
    pub async fn probe_due_routes(&self) -> usize {
        let now = Utc::now();
        let due: Vec<String> = self
            .routes
            .lock()
            .unwrap()
            .values()
            .filter(|route| route.state_at(now) == RouteState::AwaitingProbe)
            .map(|route| route.id.clone())
            .collect();
        if due.is_empty() {
            return 0;
        }

        debug!("Probing {} routes awaiting reinstatement", due.len());
        let results: Vec<bool> = stream::iter(due)
            .map(|id| async move { matches!(self.test_route(&id).await, Ok(true)) })
            .buffer_unordered(self.config.probe_concurrency.max(1))
            .collect()
            .await;
        results.into_iter().filter(|ok| *ok).count()
    }

    /// Run [`probe_due_routes`](Self::probe_due_routes) periodically until shutdown.
    pub fn spawn_probe_loop(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        let interval = StdDuration::from_secs(self.config.probe_interval_secs.max(1));
        tokio::spawn(async move {
            info!("Route probe loop started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Route probe loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        let reinstated = pool.probe_due_routes().await;
                        if reinstated > 0 {
                            info!("Reinstated {} routes", reinstated);
                        }
                    }
                }
            }
            info!("Route probe loop stopped");
        })
    }

    pub fn snapshot(&self) -> Vec<RouteSnapshot> {
        let now = Utc::now();
        let routes = self.routes.lock().unwrap();
        let mut snapshot: Vec<RouteSnapshot> = routes
            .values()
            .map(|route| RouteSnapshot {
                id: route.id.clone(),
                state: route.state_at(now),
                score: route.score(),
                success_count: route.success_count,
                failure_count: route.failure_count,
                consecutive_failures: route.consecutive_failures,
                banned_until: route.banned_until,
                last_tested_at: route.last_tested_at,
            })
            .collect();
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot
    }

    pub fn stats(&self) -> PoolStats {
        let now = Utc::now();
        let routes = self.routes.lock().unwrap();
        let mut stats = PoolStats {
            total: routes.len(),
            ..Default::default()
        };
        for route in routes.values() {
            match route.state_at(now) {
                RouteState::Active => stats.available += 1,
                RouteState::Banned => stats.banned += 1,
                RouteState::AwaitingProbe => stats.awaiting_probe += 1,
            }
        }
        if !routes.is_empty() {
            stats.average_score =
                routes.values().map(EgressRoute::score).sum::<f64>() / routes.len() as f64;
        }
        stats
    }

    #[cfg(test)]
    fn route(&self, route_id: &str) -> Option<EgressRoute> {
        self.routes.lock().unwrap().get(route_id).cloned()
    }

    #[cfg(test)]
    fn force_ban_expiry(&self, route_id: &str) {
        if let Some(route) = self.routes.lock().unwrap().get_mut(route_id) {
            route.banned_until = Some(Utc::now() - Duration::seconds(1));
        }
    }
}

/// Higher score wins; on a tie the least recently tested route wins (never-tested first).
fn compare_for_selection(a: &EgressRoute, b: &EgressRoute) -> Ordering {
    a.score()
        .partial_cmp(&b.score())
        .unwrap_or(Ordering::Equal)
        .then_with(|| match (a.last_tested_at, b.last_tested_at) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => y.cmp(&x),
        })
        .then_with(|| b.id.cmp(&a.id))
}

/// `base * 2^(ban_count - 1)`, capped at `max`.
fn cooldown_for(ban_count: u32, base_secs: u64, max_secs: u64) -> Duration {
    let exponent = ban_count.saturating_sub(1).min(32);
    let secs = base_secs.saturating_mul(1u64 << exponent).min(max_secs);
    Duration::seconds(secs as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRouteProber;

    fn create_test_pool(routes: &[&str]) -> (EgressPool, Arc<MockRouteProber>) {
        let prober = Arc::new(MockRouteProber::new());
        let config = EgressConfig {
            routes: routes.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        };
        let pool = EgressPool::from_config(config, prober.clone()).unwrap();
        (pool, prober)
    }

    fn none() -> HashSet<String> {
        HashSet::new()
    }

    #[test]
    fn test_empty_pool_selects_nothing() {
        let (pool, _) = create_test_pool(&[]);
        assert!(pool.select_route(&none()).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_selects_highest_score() {
        let (pool, _) = create_test_pool(&["http://a:1", "http://b:1"]);
        pool.record_outcome("http://b:1", true).unwrap();
        pool.record_outcome("http://a:1", false).unwrap();

        assert_eq!(pool.select_route(&none()).unwrap().id, "http://b:1");
    }

    #[test]
    fn test_tie_prefers_least_recently_tested() {
        let (pool, _) = create_test_pool(&["http://a:1", "http://b:1"]);
        let earlier = Utc::now() - Duration::minutes(10);
        pool.record_outcome_at("http://a:1", true, earlier).unwrap();
        pool.record_outcome_at("http://b:1", true, Utc::now()).unwrap();

        assert_eq!(pool.select_route(&none()).unwrap().id, "http://a:1");
    }

    #[test]
    fn test_excluding_skips_route() {
        let (pool, _) = create_test_pool(&["http://a:1", "http://b:1"]);
        pool.record_outcome("http://a:1", true).unwrap();

        let excluding: HashSet<String> = ["http://a:1".to_string()].into();
        assert_eq!(pool.select_route(&excluding).unwrap().id, "http://b:1");

        let excluding: HashSet<String> =
            ["http://a:1".to_string(), "http://b:1".to_string()].into();
        assert!(pool.select_route(&excluding).is_none());
    }

    #[test]
    fn test_three_failures_ban_until_cooldown() {
        let (pool, _) = create_test_pool(&["http://a:1"]);
        let now = Utc::now();
        for _ in 0..3 {
            pool.record_outcome_at("http://a:1", false, now).unwrap();
        }

        let route = pool.route("http://a:1").unwrap();
        assert_eq!(route.consecutive_failures, 0);
        assert_eq!(route.banned_until, Some(now + Duration::minutes(30)));

        assert!(pool.select_route_at(&none(), now).is_none());
        assert!(pool
            .select_route_at(&none(), now + Duration::minutes(29))
            .is_none());
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let (pool, _) = create_test_pool(&["http://a:1"]);
        pool.record_outcome("http://a:1", false).unwrap();
        pool.record_outcome("http://a:1", false).unwrap();
        assert_eq!(pool.route("http://a:1").unwrap().consecutive_failures, 2);

        pool.record_outcome("http://a:1", true).unwrap();
        let route = pool.route("http://a:1").unwrap();
        assert_eq!(route.consecutive_failures, 0);
        assert!(route.banned_until.is_none());
        assert_eq!(route.failure_count, 2);
    }

    #[test]
    fn test_elapsed_ban_needs_probe_when_configured() {
        let (pool, _) = create_test_pool(&["http://a:1"]);
        let now = Utc::now();
        for _ in 0..3 {
            pool.record_outcome_at("http://a:1", false, now).unwrap();
        }
        let after = now + Duration::minutes(31);
        assert!(pool.select_route_at(&none(), after).is_none());
    }

    #[test]
    fn test_elapsed_ban_reinstates_without_probe() {
        let prober = Arc::new(MockRouteProber::new());
        let config = EgressConfig {
            routes: vec!["http://a:1".to_string()],
            probe_before_reinstate: false,
            ..Default::default()
        };
        let pool = EgressPool::from_config(config, prober).unwrap();
        let now = Utc::now();
        for _ in 0..3 {
            pool.record_outcome_at("http://a:1", false, now).unwrap();
        }
        assert!(pool.select_route_at(&none(), now).is_none());
        assert!(pool
            .select_route_at(&none(), now + Duration::minutes(31))
            .is_some());
    }

    #[test]
    fn test_repeated_bans_double_cooldown_up_to_cap() {
        assert_eq!(cooldown_for(1, 1800, 14400), Duration::seconds(1800));
        assert_eq!(cooldown_for(2, 1800, 14400), Duration::seconds(3600));
        assert_eq!(cooldown_for(3, 1800, 14400), Duration::seconds(7200));
        assert_eq!(cooldown_for(4, 1800, 14400), Duration::seconds(14400));
        assert_eq!(cooldown_for(40, 1800, 14400), Duration::seconds(14400));
    }

    #[test]
    fn test_failures_while_banned_do_not_extend_ban() {
        let (pool, _) = create_test_pool(&["http://a:1"]);
        let now = Utc::now();
        for _ in 0..3 {
            pool.record_outcome_at("http://a:1", false, now).unwrap();
        }
        let banned_until = pool.route("http://a:1").unwrap().banned_until;
        for _ in 0..5 {
            pool.record_outcome_at("http://a:1", false, now).unwrap();
        }
        let route = pool.route("http://a:1").unwrap();
        assert_eq!(route.banned_until, banned_until);
        assert_eq!(route.ban_count, 1);
        assert_eq!(route.failure_count, 8);
    }

    #[test]
    fn test_concurrent_failures_are_not_lost() {
        let (pool, _) = create_test_pool(&["http://a:1"]);
        let pool = Arc::new(pool);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        pool.record_outcome("http://a:1", true).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.route("http://a:1").unwrap().success_count, 100);
    }

    #[test]
    fn test_unknown_route_is_error() {
        let (pool, _) = create_test_pool(&[]);
        assert!(matches!(
            pool.record_outcome("http://ghost:1", true),
            Err(EgressError::UnknownRoute(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_reinstates_elapsed_route() {
        let (pool, prober) = create_test_pool(&["http://a:1"]);
        for _ in 0..3 {
            pool.record_outcome("http://a:1", false).unwrap();
        }
        pool.force_ban_expiry("http://a:1");
        assert!(pool.select_route(&none()).is_none());

        assert_eq!(pool.probe_due_routes().await, 1);
        assert_eq!(prober.probe_count("http://a:1"), 1);
        assert_eq!(pool.select_route(&none()).unwrap().id, "http://a:1");
    }

    #[tokio::test]
    async fn test_failed_probe_rebans_with_longer_cooldown() {
        let (pool, prober) = create_test_pool(&["http://a:1"]);
        prober.set_result("http://a:1", false);
        for _ in 0..3 {
            pool.record_outcome("http://a:1", false).unwrap();
        }
        pool.force_ban_expiry("http://a:1");

        assert_eq!(pool.probe_due_routes().await, 0);
        let route = pool.route("http://a:1").unwrap();
        assert_eq!(route.ban_count, 2);
        assert!(route.banned_until.unwrap() > Utc::now() + Duration::minutes(59));
    }

    #[tokio::test]
    async fn test_probe_leaves_counts_alone() {
        let (pool, _) = create_test_pool(&["http://a:1"]);
        assert!(pool.test_route("http://a:1").await.unwrap());
        let route = pool.route("http://a:1").unwrap();
        assert_eq!(route.success_count, 0);
        assert!(route.last_tested_at.is_some());
    }

    #[test]
    fn test_stats_counts_states() {
        let (pool, _) = create_test_pool(&["http://a:1", "http://b:1", "http://c:1"]);
        for _ in 0..3 {
            pool.record_outcome("http://a:1", false).unwrap();
        }
        pool.record_outcome("http://b:1", true).unwrap();
        pool.force_ban_expiry("http://c:1");

        let stats = pool.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.banned, 1);
        assert_eq!(stats.awaiting_probe, 1);
        assert_eq!(stats.available, 1);
        assert_eq!(pool.snapshot().len(), 3);
    }
}
