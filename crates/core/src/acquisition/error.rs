use thiserror::Error;

use crate::job::{JobStatus, JobStoreError};

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("job {0} was cancelled")]
    Cancelled(String),

    #[error("job {job_id} cannot be acquired while {status}")]
    NotRunnable { job_id: String, status: JobStatus },

    #[error("invalid target '{0}': expected an http(s) URL")]
    InvalidTarget(String),

    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Store(#[from] JobStoreError),
}
