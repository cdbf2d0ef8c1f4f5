//! Attempt state machine.
//!
//! ```text
//! Pending -> InFlight -> Succeeded
//!                     -> RetryableFailure   (transient error, timeout)
//!                     -> TerminalFailure    (auth error, blocked)
//! ```
//!
//! [`AttemptState::next_step`] turns a settled attempt into the orchestrator's
//! next move, so the retry policy can be tested without running anything.

use std::time::Duration;

use tokio::time::Instant;

use super::{AttemptFailure, BackoffConfig};
use crate::job::AttemptOutcome;

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptState {
    Pending,
    InFlight { started: Instant },
    Succeeded { result_ref: String },
    RetryableFailure(AttemptFailure),
    TerminalFailure(AttemptFailure),
}

/// What to do after an attempt settles.
#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    /// Acquisition done.
    Finish { result_ref: String },
    /// Run the same strategy again after the delay.
    RetrySame { delay: Duration },
    /// Move to the next strategy, after the delay if any.
    Advance { delay: Option<Duration> },
}

impl AttemptState {
    /// `Pending -> InFlight`. Other states are returned unchanged.
    pub fn begin(self) -> Self {
        match self {
            AttemptState::Pending => AttemptState::InFlight {
                started: Instant::now(),
            },
            other => other,
        }
    }

    /// `InFlight -> settled`, classifying the backend result.
    pub fn settle(self, result: Result<String, AttemptFailure>) -> Self {
        match self {
            AttemptState::InFlight { .. } => match result {
                Ok(result_ref) => AttemptState::Succeeded { result_ref },
                Err(failure) if failure.outcome.is_retryable() => {
                    AttemptState::RetryableFailure(failure)
                }
                Err(failure) => AttemptState::TerminalFailure(failure),
            },
            other => other,
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, AttemptState::Pending | AttemptState::InFlight { .. })
    }

    pub fn outcome(&self) -> Option<AttemptOutcome> {
        match self {
            AttemptState::Succeeded { .. } => Some(AttemptOutcome::Success),
            AttemptState::RetryableFailure(f) | AttemptState::TerminalFailure(f) => {
                Some(f.outcome)
            }
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&AttemptFailure> {
        match self {
            AttemptState::RetryableFailure(f) | AttemptState::TerminalFailure(f) => Some(f),
            _ => None,
        }
    }

    /// Decide the next move for a settled attempt.
    ///
    /// `retries_used` counts earlier retries of the same strategy. Returns
    /// `None` while the attempt has not settled.
    pub fn next_step(
        &self,
        retries_used: u32,
        max_retries: u32,
        backoff: &BackoffConfig,
    ) -> Option<NextStep> {
        match self {
            AttemptState::Pending | AttemptState::InFlight { .. } => None,
            AttemptState::Succeeded { result_ref } => Some(NextStep::Finish {
                result_ref: result_ref.clone(),
            }),
            AttemptState::RetryableFailure(_) => {
                let delay = backoff.delay_for_retry(retries_used);
                if retries_used < max_retries {
                    Some(NextStep::RetrySame { delay })
                } else {
                    Some(NextStep::Advance { delay: Some(delay) })
                }
            }
            // Blocked and auth errors never retry the same strategy, but the next
            // one still waits so a rate-limited target is not hit again at once.
            AttemptState::TerminalFailure(_) => Some(NextStep::Advance {
                delay: Some(backoff.delay_for_retry(0)),
            }),
        }
    }
}
