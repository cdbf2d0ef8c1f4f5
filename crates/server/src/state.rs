use std::sync::Arc;

use reelfetch_core::{
    Config, CredentialStore, EgressPool, JobScheduler, JobStore, SanitizedConfig,
};

/// Shared application state
pub struct AppState {
    config: Config,
    jobs: Arc<JobStore>,
    scheduler: Arc<JobScheduler>,
    egress: Arc<EgressPool>,
    credentials: Arc<CredentialStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        jobs: Arc<JobStore>,
        scheduler: Arc<JobScheduler>,
        egress: Arc<EgressPool>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            config,
            jobs,
            scheduler,
            egress,
            credentials,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn jobs(&self) -> &JobStore {
        self.jobs.as_ref()
    }

    pub fn scheduler(&self) -> &JobScheduler {
        self.scheduler.as_ref()
    }

    pub fn egress(&self) -> &EgressPool {
        self.egress.as_ref()
    }

    pub fn credentials(&self) -> &CredentialStore {
        self.credentials.as_ref()
    }
}
