//! Job storage errors and the durable tier contract.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{Job, JobStatus};

/// Errors raised by a durable tier backend.
#[derive(Debug, Error)]
pub enum DurableTierError {
    /// The backing store could not be reached or refused the operation.
    #[error("durable tier unavailable: {0}")]
    Unavailable(String),
    /// A stored record could not be decoded.
    #[error("corrupt job record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl From<rusqlite::Error> for DurableTierError {
    fn from(e: rusqlite::Error) -> Self {
        DurableTierError::Unavailable(e.to_string())
    }
}

/// Errors returned by `JobStore`.
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("illegal transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("invalid update for job {job_id}: {reason}")]
    InvalidUpdate { job_id: String, reason: String },

    /// The fast tier missed and the durable tier could not answer.
    #[error(transparent)]
    Durable(#[from] DurableTierError),
}

/// Persistent tier of the job store.
///
/// Holds the full job document keyed by id. Implementations are synchronous;
/// one call corresponds to one durable write or read.
pub trait DurableTier: Send + Sync {
    /// Insert or replace the job document.
    fn put(&self, job: &Job) -> Result<(), DurableTierError>;

    /// Fetch a job document by id.
    fn get(&self, id: &str) -> Result<Option<Job>, DurableTierError>;

    /// Delete every job last updated before `cutoff`, returning the removed ids.
    fn delete_updated_before(&self, cutoff: DateTime<Utc>)
        -> Result<Vec<String>, DurableTierError>;

    /// Jobs still queued or running.
    fn list_unfinished(&self) -> Result<Vec<Job>, DurableTierError>;
}
