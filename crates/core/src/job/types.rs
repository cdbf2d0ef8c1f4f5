//! Job data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether this is a terminal state (no further mutation allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` respects the forward-only lifecycle.
    ///
    /// Staying in `Running` is allowed so progress and attempts can be
    /// recorded; `Queued -> Failed` covers cancellation before admission.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Queued)
                | (Queued, Running)
                | (Queued, Failed)
                | (Running, Running)
                | (Running, Completed)
                | (Running, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified result of a single strategy execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    TransientError,
    AuthError,
    Blocked,
    Timeout,
}

impl AttemptOutcome {
    /// Transient failures and timeouts may be retried after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AttemptOutcome::TransientError | AttemptOutcome::Timeout)
    }

    /// Failures that count against the egress route used.
    pub fn penalizes_route(&self) -> bool {
        matches!(self, AttemptOutcome::AuthError | AttemptOutcome::Blocked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::TransientError => "transient_error",
            AttemptOutcome::AuthError => "auth_error",
            AttemptOutcome::Blocked => "blocked",
            AttemptOutcome::Timeout => "timeout",
        }
    }
}

/// One strategy execution, appended to a job's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub strategy_name: String,
    /// Egress route used, if any.
    pub egress_route_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: AttemptOutcome,
    pub error_detail: Option<String>,
}

/// Kind of failure recorded on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientError,
    Timeout,
    AuthError,
    Blocked,
    /// Every strategy in the chain failed.
    Exhausted,
    /// The job was aborted from outside.
    Cancelled,
}

impl From<AttemptOutcome> for ErrorKind {
    fn from(outcome: AttemptOutcome) -> Self {
        match outcome {
            // Success never reaches a JobError.
            AttemptOutcome::Success | AttemptOutcome::TransientError => ErrorKind::TransientError,
            AttemptOutcome::Timeout => ErrorKind::Timeout,
            AttemptOutcome::AuthError => ErrorKind::AuthError,
            AttemptOutcome::Blocked => ErrorKind::Blocked,
        }
    }
}

/// Structured failure reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    /// Strategy that produced the error, when it came from an attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    /// Last classified attempt outcome, for `Exhausted`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<AttemptOutcome>,
}

impl JobError {
    pub fn from_attempt(record: &AttemptRecord) -> Self {
        Self {
            kind: record.outcome.into(),
            message: record
                .error_detail
                .clone()
                .unwrap_or_else(|| record.outcome.as_str().to_string()),
            strategy: Some(record.strategy_name.clone()),
            cause: None,
        }
    }

    pub fn exhausted(strategies_tried: usize, last: Option<&AttemptRecord>) -> Self {
        let message = match last {
            Some(record) => format!(
                "all {} strategies failed; last: {} ({})",
                strategies_tried,
                record.strategy_name,
                record.error_detail.as_deref().unwrap_or(record.outcome.as_str())
            ),
            None => "no strategy could be attempted".to_string(),
        };
        Self {
            kind: ErrorKind::Exhausted,
            message,
            strategy: last.map(|r| r.strategy_name.clone()),
            cause: last.map(|r| r.outcome),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            message: "cancelled".to_string(),
            strategy: None,
            cause: None,
        }
    }
}

/// A unit of requested acquisition work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Remote-video reference this job acquires.
    pub target: String,
    pub status: JobStatus,
    /// 0..=100, never decreases.
    pub progress: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Path of the acquired artifact. Set only on completion.
    pub result_ref: Option<String>,
    pub last_error: Option<JobError>,
    pub attempts: Vec<AttemptRecord>,
    /// Set when the last write could not reach the durable tier.
    pub durability_degraded: bool,
}

impl Job {
    pub fn new(target: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target: target.into(),
            status: JobStatus::Queued,
            progress: 0.0,
            created_at: now,
            updated_at: now,
            result_ref: None,
            last_error: None,
            attempts: Vec::new(),
            durability_degraded: false,
        }
    }

    /// Compact view handed to the request layer.
    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            result_ref: self.result_ref.clone(),
            last_error: self.last_error.clone(),
            attempts: self.attempts.clone(),
            durability_degraded: self.durability_degraded,
        }
    }
}

/// What `getJobStatus` returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub id: String,
    pub status: JobStatus,
    pub progress: f32,
    pub result_ref: Option<String>,
    pub last_error: Option<JobError>,
    /// Every attempt so far, oldest first.
    pub attempts: Vec<AttemptRecord>,
    pub durability_degraded: bool,
}

/// A mutation applied through `JobStore::update_job`.
///
/// Fields left as `None` are untouched.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<f32>,
    pub append_attempt: Option<AttemptRecord>,
    pub result_ref: Option<String>,
    pub last_error: Option<JobError>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: f32) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn attempt(record: AttemptRecord) -> Self {
        Self {
            append_attempt: Some(record),
            ..Default::default()
        }
    }

    pub fn complete(result_ref: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100.0),
            result_ref: Some(result_ref.into()),
            ..Default::default()
        }
    }

    pub fn fail(error: JobError) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            last_error: Some(error),
            ..Default::default()
        }
    }

    pub fn with_attempt(mut self, record: AttemptRecord) -> Self {
        self.append_attempt = Some(record);
        self
    }

    pub fn with_error(mut self, error: JobError) -> Self {
        self.last_error = Some(error);
        self
    }
}
