//! Credential store with single-flight refresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::netscape::parse_netscape;
use super::{CredentialConfig, CredentialLoader, CredentialSet, CredentialStatus, RawCredentials};
use crate::metrics;

pub struct CredentialStore {
    config: CredentialConfig,
    loader: Arc<dyn CredentialLoader>,
    current: RwLock<Option<CredentialSet>>,
    /// Held for the duration of a refresh; waiters reuse its result.
    refresh_lock: AsyncMutex<()>,
    /// Bumped when a refresh finishes.
    generation: AtomicU64,
    refresh_count: AtomicU64,
}

impl CredentialStore {
    pub fn new(config: CredentialConfig, loader: Arc<dyn CredentialLoader>) -> Self {
        Self {
            config,
            loader,
            current: RwLock::new(None),
            refresh_lock: AsyncMutex::new(()),
            generation: AtomicU64::new(0),
            refresh_count: AtomicU64::new(0),
        }
    }

    /// Current set if validated and unexpired, otherwise the result of a refresh.
    pub async fn get_valid(&self) -> Option<CredentialSet> {
        // Read the generation first so a refresh finishing between this and
        // the check below is not repeated.
        let seen = self.generation.load(Ordering::SeqCst);
        if let Some(set) = self.usable() {
            return Some(set);
        }
        self.refresh_after(seen).await
    }

    /// Reload from the configured sources and re-validate.
    ///
    /// Concurrent callers share a single reload.
    pub async fn refresh(&self) -> Option<CredentialSet> {
        let seen = self.generation.load(Ordering::SeqCst);
        self.refresh_after(seen).await
    }

    async fn refresh_after(&self, seen: u64) -> Option<CredentialSet> {
        let _guard = self.refresh_lock.lock().await;
        if self.generation.load(Ordering::SeqCst) != seen {
            debug!("Reusing credentials refreshed by a concurrent caller");
            return self.usable();
        }

        self.refresh_count.fetch_add(1, Ordering::SeqCst);
        let refreshed = match self.loader.load().await {
            Ok(Some(raw)) => Some(self.build_set(raw)),
            Ok(None) => {
                warn!("No credential source available");
                metrics::CREDENTIAL_REFRESHES
                    .with_label_values(&["missing"])
                    .inc();
                None
            }
            Err(e) => {
                warn!("Credential refresh failed: {}", e);
                metrics::CREDENTIAL_REFRESHES.with_label_values(&["error"]).inc();
                None
            }
        };

        if let Some(set) = &refreshed {
            let result = if set.validated { "success" } else { "invalid" };
            metrics::CREDENTIAL_REFRESHES.with_label_values(&[result]).inc();
            if set.validated {
                info!(
                    "Credentials refreshed from {} ({} cookies)",
                    set.source,
                    set.cookies.len()
                );
            } else {
                warn!("Credentials from {} failed validation", set.source);
            }
        }

        *self.current.write().unwrap() = refreshed;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.usable()
    }

    fn build_set(&self, raw: RawCredentials) -> CredentialSet {
        let now = Utc::now();
        let cookies = parse_netscape(&raw.content);
        let expires_at = cookies
            .iter()
            .filter(|c| self.is_relevant(c))
            .filter_map(|c| c.expires)
            .min();

        let mut set = CredentialSet {
            source: raw.source,
            cookie_file: raw.cookie_file,
            cookies,
            loaded_at: now,
            expires_at,
            validated: false,
        };
        set.validated = self.validate_at(&set, now);
        set
    }

    /// Whether `set` has the required cookies and none of them has expired.
    pub fn validate(&self, set: &CredentialSet) -> bool {
        self.validate_at(set, Utc::now())
    }

    pub fn validate_at(&self, set: &CredentialSet, now: DateTime<Utc>) -> bool {
        let relevant: Vec<_> = set.cookies.iter().filter(|c| self.is_relevant(c)).collect();
        if relevant.is_empty() {
            debug!("Credential set from {} has no relevant cookies", set.source);
            return false;
        }

        for name in &self.config.required_cookies {
            if !relevant.iter().any(|c| &c.name == name) {
                debug!("Credential set from {} is missing cookie {}", set.source, name);
                return false;
            }
        }

        if let Some(expired) = relevant
            .iter()
            .find(|c| c.expires.is_some_and(|at| at <= now))
        {
            debug!("Cookie {} from {} has expired", expired.name, set.source);
            return false;
        }

        if let Some(expires_at) = set.expires_at {
            let warning = Duration::hours(self.config.expiry_warning_hours as i64);
            if expires_at - now < warning {
                warn!(
                    "Credentials from {} expire soon ({})",
                    set.source,
                    expires_at.to_rfc3339()
                );
            }
        }
        true
    }

    fn is_relevant(&self, cookie: &super::Cookie) -> bool {
        self.config.domains.iter().any(|d| cookie.matches_domain(d))
    }

    /// Mark the current set unusable, e.g. after the remote rejected it.
    pub fn invalidate(&self) {
        if let Some(set) = self.current.write().unwrap().as_mut() {
            if set.validated {
                info!("Invalidating credentials from {}", set.source);
            }
            set.validated = false;
        }
    }

    /// Start a refresh without waiting for it.
    pub fn refresh_in_background(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            store.refresh().await;
        })
    }

    /// Refresh every `refresh_interval_secs` until shutdown.
    pub fn spawn_refresh_loop(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let interval = StdDuration::from_secs(self.config.refresh_interval_secs.max(1));
        tokio::spawn(async move {
            info!("Credential refresh loop started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Credential refresh loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        store.refresh().await;
                    }
                }
            }
            info!("Credential refresh loop stopped");
        })
    }

    /// Number of reloads actually performed.
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> CredentialStatus {
        let current = self.current.read().unwrap();
        CredentialStatus {
            present: current.is_some(),
            source: current.as_ref().map(|s| s.source.clone()),
            loaded_at: current.as_ref().map(|s| s.loaded_at),
            expires_at: current.as_ref().and_then(|s| s.expires_at),
            validated: current.as_ref().is_some_and(|s| s.validated),
            cookie_count: current.as_ref().map_or(0, |s| s.cookies.len()),
            refresh_count: self.refresh_count(),
        }
    }

    fn usable(&self) -> Option<CredentialSet> {
        let now = Utc::now();
        self.current
            .read()
            .unwrap()
            .as_ref()
            .filter(|set| set.is_usable_at(now))
            .cloned()
    }
}
