//! Mock acquisition backend for testing.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::acquisition::{AcquisitionBackend, AttemptFailure, AttemptRequest, Strategy};
use crate::job::AttemptOutcome;

/// What the mock does for one call.
#[derive(Debug, Clone)]
pub enum MockStep {
    Succeed(String),
    Fail {
        outcome: AttemptOutcome,
        detail: String,
    },
    /// Report each progress value, then fail.
    ProgressThenFail {
        progress: Vec<f32>,
        outcome: AttemptOutcome,
        detail: String,
    },
    /// Sleep, then succeed. Cancellation ends the sleep early.
    SucceedAfter(Duration, String),
    /// Never finish on its own; returns once cancelled.
    Hang,
}

impl MockStep {
    pub fn succeed(result_ref: &str) -> Self {
        MockStep::Succeed(result_ref.to_string())
    }

    pub fn fail(outcome: AttemptOutcome, detail: &str) -> Self {
        MockStep::Fail {
            outcome,
            detail: detail.to_string(),
        }
    }

    pub fn progress_then_fail(progress: Vec<f32>, outcome: AttemptOutcome, detail: &str) -> Self {
        MockStep::ProgressThenFail {
            progress,
            outcome,
            detail: detail.to_string(),
        }
    }

    pub fn succeed_after(delay: Duration, result_ref: &str) -> Self {
        MockStep::SucceedAfter(delay, result_ref.to_string())
    }
}

/// A recorded call for test assertions.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub job_id: String,
    pub strategy: Strategy,
    pub proxy_url: Option<String>,
    pub cookie_file: Option<PathBuf>,
    pub started: Instant,
    cancel: CancellationToken,
}

impl MockCall {
    /// Whether the attempt's cancellation token has fired.
    pub fn was_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Mock implementation of [`AcquisitionBackend`].
///
/// Each strategy plays back a script of [`MockStep`]s, one per call. A
/// strategy with nothing scripted fails with a transient error.
///
/// # Example
///
/// ```rust,ignore
/// use reelfetch_core::testing::{MockAcquisitionBackend, MockStep};
///
/// let backend = MockAcquisitionBackend::new();
/// backend.script(Strategy::Direct, vec![
///     MockStep::fail(AttemptOutcome::Blocked, "HTTP Error 429"),
///     MockStep::succeed("/downloads/a.mp4"),
/// ]);
/// ```
#[derive(Debug, Default)]
pub struct MockAcquisitionBackend {
    scripts: Mutex<HashMap<Strategy, VecDeque<MockStep>>>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockAcquisitionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append steps to a strategy's script.
    pub fn script(&self, strategy: Strategy, steps: Vec<MockStep>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(strategy)
            .or_default()
            .extend(steps);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, strategy: Strategy) -> Vec<MockCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.strategy == strategy)
            .collect()
    }

    fn next_step(&self, strategy: Strategy) -> Option<MockStep> {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&strategy)
            .and_then(|steps| steps.pop_front())
    }
}

#[async_trait]
impl AcquisitionBackend for MockAcquisitionBackend {
    async fn execute(
        &self,
        request: AttemptRequest,
        progress: mpsc::Sender<f32>,
        cancel: CancellationToken,
    ) -> Result<String, AttemptFailure> {
        self.calls.lock().unwrap().push(MockCall {
            job_id: request.job_id.clone(),
            strategy: request.strategy,
            proxy_url: request.proxy_url.clone(),
            cookie_file: request.cookie_file.clone(),
            started: Instant::now(),
            cancel: cancel.clone(),
        });

        match self.next_step(request.strategy) {
            Some(MockStep::Succeed(result_ref)) => Ok(result_ref),
            Some(MockStep::Fail { outcome, detail }) => Err(AttemptFailure::new(outcome, detail)),
            Some(MockStep::ProgressThenFail {
                progress: values,
                outcome,
                detail,
            }) => {
                for pct in values {
                    let _ = progress.send(pct).await;
                }
                Err(AttemptFailure::new(outcome, detail))
            }
            Some(MockStep::SucceedAfter(delay, result_ref)) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(AttemptFailure::transient("cancelled")),
                    _ = tokio::time::sleep(delay) => Ok(result_ref),
                }
            }
            Some(MockStep::Hang) => {
                cancel.cancelled().await;
                Err(AttemptFailure::transient("cancelled"))
            }
            None => Err(AttemptFailure::transient(format!(
                "no scripted step for {}",
                request.strategy
            ))),
        }
    }
}
