//! Durable job tracking.
//!
//! A [`Job`] is a forward-only state machine (`queued -> running ->
//! completed | failed`) with an append-only attempt log. [`JobStore`] keeps
//! jobs in memory for fast reads and writes every change through to a
//! [`DurableTier`] so they survive restarts.

mod dual_tier;
mod sqlite_tier;
mod store;
mod sweeper;
mod types;

pub use dual_tier::{JobStore, DEFAULT_RETENTION_HOURS};
pub use sqlite_tier::SqliteDurableTier;
pub use store::{DurableTier, DurableTierError, JobStoreError};
pub use sweeper::spawn_sweeper;
pub use types::{
    AttemptOutcome, AttemptRecord, ErrorKind, Job, JobError, JobStatus, JobStatusView, JobUpdate,
};
