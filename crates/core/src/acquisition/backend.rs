//! The execute capability behind every strategy.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::Strategy;
use crate::job::AttemptOutcome;

/// Everything one attempt needs.
#[derive(Debug, Clone)]
pub struct AttemptRequest {
    pub job_id: String,
    pub target: String,
    pub strategy: Strategy,
    /// Proxy URL (credentials included) when the attempt goes through a route.
    pub proxy_url: Option<String>,
    /// Cookie file when credentials are used.
    pub cookie_file: Option<PathBuf>,
}

/// A classified attempt failure.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure {
    /// Never `Success`.
    pub outcome: AttemptOutcome,
    pub detail: String,
}

impl AttemptFailure {
    pub fn new(outcome: AttemptOutcome, detail: impl Into<String>) -> Self {
        Self {
            outcome,
            detail: detail.into(),
        }
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self::new(AttemptOutcome::TransientError, detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(AttemptOutcome::Timeout, detail)
    }
}

/// Runs a strategy against a target.
///
/// Implementations report progress (0..=100) on `progress` and must stop
/// promptly once `cancel` fires. On success they return the result reference
/// of the acquired artifact.
#[async_trait]
pub trait AcquisitionBackend: Send + Sync {
    async fn execute(
        &self,
        request: AttemptRequest,
        progress: mpsc::Sender<f32>,
        cancel: CancellationToken,
    ) -> Result<String, AttemptFailure>;
}
