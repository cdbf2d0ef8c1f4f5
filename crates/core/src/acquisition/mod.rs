//! Resilient acquisition.
//!
//! The [`AcquisitionOrchestrator`] walks a job through an ordered list of
//! [`Strategy`] values. Each attempt runs on an [`AcquisitionBackend`] under
//! a hard deadline, optionally through an egress route and with credentials.
//! Transient failures back off and retry; blocks and auth errors move on to
//! the next strategy. The [`JobScheduler`] admits jobs in FIFO order under a
//! concurrency limit and owns their cancellation.

mod attempt;
mod backend;
mod config;
mod error;
mod orchestrator;
mod scheduler;
mod strategy;
mod ytdlp;

pub use attempt::{AttemptState, NextStep};
pub use backend::{AcquisitionBackend, AttemptFailure, AttemptRequest};
pub use config::{AcquisitionConfig, BackoffConfig, DownloaderConfig};
pub use error::AcquisitionError;
pub use orchestrator::AcquisitionOrchestrator;
pub use scheduler::{is_valid_target, JobScheduler, SchedulerStatus};
pub use strategy::{CredentialNeed, Strategy};
pub use ytdlp::{classify_failure, parse_progress, YtDlpBackend};
