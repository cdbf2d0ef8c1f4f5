pub mod acquisition;
pub mod config;
pub mod credentials;
pub mod egress;
pub mod job;
pub mod metrics;
pub mod testing;

pub use acquisition::{
    classify_failure, AcquisitionBackend, AcquisitionConfig, AcquisitionError,
    AcquisitionOrchestrator, AttemptFailure, AttemptRequest, BackoffConfig, JobScheduler,
    SchedulerStatus, Strategy, YtDlpBackend,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig,
    JobsConfig, SanitizedConfig, ServerConfig,
};
pub use credentials::{
    CredentialConfig, CredentialLoader, CredentialSet, CredentialStatus, CredentialStore,
    FsCredentialLoader,
};
pub use egress::{
    EgressConfig, EgressError, EgressPool, EgressRoute, HttpRouteProber, PoolStats,
    RouteProber, RouteSnapshot,
};
pub use job::{
    spawn_sweeper, AttemptOutcome, AttemptRecord, DurableTier, Job, JobError, JobStatus,
    JobStatusView, JobStore, JobStoreError, JobUpdate, SqliteDurableTier,
};
