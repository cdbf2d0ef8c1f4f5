//! Strategy chain execution for a single job.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    AcquisitionBackend, AcquisitionConfig, AcquisitionError, AttemptFailure, AttemptRequest,
    AttemptState, CredentialNeed, NextStep, Strategy,
};
use crate::credentials::{CredentialSet, CredentialStore};
use crate::egress::{EgressPool, EgressRoute};
use crate::job::{
    AttemptOutcome, AttemptRecord, Job, JobError, JobStatus, JobStore, JobStoreError, JobUpdate,
};
use crate::metrics;

/// Progress shown while a strategy is still running; 100 is reserved for completion.
const MAX_IN_FLIGHT_PROGRESS: f32 = 99.0;

/// Drives one job through the strategy chain.
///
/// Holds no state of its own: job state lives in the [`JobStore`], route
/// health in the [`EgressPool`] and credentials in the [`CredentialStore`].
pub struct AcquisitionOrchestrator {
    jobs: Arc<JobStore>,
    egress: Arc<EgressPool>,
    credentials: Arc<CredentialStore>,
    backend: Arc<dyn AcquisitionBackend>,
    config: AcquisitionConfig,
}

/// Outcome of running one attempt to completion.
struct SettledAttempt {
    state: AttemptState,
    record: AttemptRecord,
}

impl AcquisitionOrchestrator {
    pub fn new(
        jobs: Arc<JobStore>,
        egress: Arc<EgressPool>,
        credentials: Arc<CredentialStore>,
        backend: Arc<dyn AcquisitionBackend>,
        config: AcquisitionConfig,
    ) -> Self {
        Self {
            jobs,
            egress,
            credentials,
            backend,
            config,
        }
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Acquire `job.target`, leaving the job `completed` or `failed`.
    ///
    /// Returns the final job. `Err` is reserved for cancellation and store
    /// failures; an exhausted strategy chain is a normal `failed` job.
    pub async fn acquire(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<Job, AcquisitionError> {
        let job_id = job.id.as_str();
        if cancel.is_cancelled() {
            return Err(self.mark_cancelled(job_id));
        }

        match job.status {
            JobStatus::Queued => {
                self.jobs
                    .update_job(job_id, JobUpdate::status(JobStatus::Running))
                    .map_err(|e| self.store_error(job_id, e, cancel))?;
            }
            JobStatus::Running => info!("Resuming job {}", job_id),
            status => {
                return Err(AcquisitionError::NotRunnable {
                    job_id: job_id.to_string(),
                    status,
                })
            }
        }
        info!("Acquiring {} for job {}", job.target, job_id);

        let mut excluded: HashSet<String> = HashSet::new();
        let mut last_failure: Option<AttemptRecord> = None;
        let mut strategies_tried = 0usize;
        let strategy_count = self.config.strategies.len();

        for (idx, &strategy) in self.config.strategies.iter().enumerate() {
            let is_last = idx + 1 == strategy_count;
            let mut retries_used = 0u32;
            let mut counted = false;

            loop {
                if cancel.is_cancelled() {
                    return Err(self.mark_cancelled(job_id));
                }

                let credentials = match self.credentials_for(strategy).await {
                    Ok(credentials) => credentials,
                    Err(()) => {
                        warn!(
                            "Skipping strategy {} for job {}: no valid credentials",
                            strategy, job_id
                        );
                        metrics::STRATEGIES_SKIPPED
                            .with_label_values(&[strategy.name()])
                            .inc();
                        break;
                    }
                };

                let route = if strategy.uses_route() {
                    let route = self.egress.select_route(&excluded);
                    if route.is_none() && !self.egress.is_empty() {
                        debug!("No healthy route for {}, going direct", strategy);
                    }
                    route
                } else {
                    None
                };

                // Last check before network I/O.
                if cancel.is_cancelled() {
                    return Err(self.mark_cancelled(job_id));
                }
                if !counted {
                    strategies_tried += 1;
                    counted = true;
                }

                let settled = self
                    .run_attempt(job, strategy, route.as_ref(), credentials.as_ref(), cancel)
                    .await?;
                let outcome = settled.record.outcome;

                if let Some(route) = &route {
                    self.record_route_outcome(route, outcome, &mut excluded);
                }
                if outcome == AttemptOutcome::AuthError && credentials.is_some() {
                    info!("Credentials rejected during job {}, refreshing", job_id);
                    self.credentials.invalidate();
                    self.credentials.refresh_in_background();
                }

                let step = settled
                    .state
                    .next_step(retries_used, self.config.same_strategy_retries, &self.config.backoff)
                    .unwrap_or(NextStep::Advance { delay: None });

                match step {
                    NextStep::Finish { result_ref } => {
                        let done = self
                            .jobs
                            .update_job(
                                job_id,
                                JobUpdate::complete(result_ref).with_attempt(settled.record),
                            )
                            .map_err(|e| self.store_error(job_id, e, cancel))?;
                        metrics::JOBS_FINISHED.with_label_values(&["completed"]).inc();
                        info!("Job {} completed via {}", job_id, strategy);
                        return Ok(done);
                    }
                    NextStep::RetrySame { delay } => {
                        self.record_failure(job_id, &settled.record, cancel)?;
                        last_failure = Some(settled.record);
                        retries_used += 1;
                        debug!("Retrying {} for job {} in {:?}", strategy, job_id, delay);
                        self.backoff(delay, job_id, cancel).await?;
                    }
                    NextStep::Advance { delay } => {
                        self.record_failure(job_id, &settled.record, cancel)?;
                        last_failure = Some(settled.record);
                        if let (Some(delay), false) = (delay, is_last) {
                            debug!("Advancing job {} past {} in {:?}", job_id, strategy, delay);
                            self.backoff(delay, job_id, cancel).await?;
                        }
                        break;
                    }
                }
            }
        }

        let error = JobError::exhausted(strategies_tried, last_failure.as_ref());
        warn!("Job {} failed: {}", job_id, error.message);
        let failed = self
            .jobs
            .update_job(job_id, JobUpdate::fail(error))
            .map_err(|e| self.store_error(job_id, e, cancel))?;
        metrics::JOBS_FINISHED.with_label_values(&["failed"]).inc();
        Ok(failed)
    }

    /// Append a failed attempt and surface its error on the job.
    fn record_failure(
        &self,
        job_id: &str,
        record: &AttemptRecord,
        cancel: &CancellationToken,
    ) -> Result<(), AcquisitionError> {
        let update = JobUpdate::attempt(record.clone()).with_error(JobError::from_attempt(record));
        self.jobs
            .update_job(job_id, update)
            .map_err(|e| self.store_error(job_id, e, cancel))?;
        Ok(())
    }

    /// `Ok(None)` runs without credentials; `Err(())` means the strategy must be skipped.
    async fn credentials_for(&self, strategy: Strategy) -> Result<Option<CredentialSet>, ()> {
        match strategy.credential_need() {
            CredentialNeed::Unused => Ok(None),
            CredentialNeed::Optional => Ok(self.credentials.get_valid().await),
            CredentialNeed::Required => self.credentials.get_valid().await.map(Some).ok_or(()),
        }
    }

    async fn run_attempt(
        &self,
        job: &Job,
        strategy: Strategy,
        route: Option<&EgressRoute>,
        credentials: Option<&CredentialSet>,
        cancel: &CancellationToken,
    ) -> Result<SettledAttempt, AcquisitionError> {
        let request = AttemptRequest {
            job_id: job.id.clone(),
            target: job.target.clone(),
            strategy,
            proxy_url: route.map(|r| r.url.clone()),
            cookie_file: credentials.map(|c| c.cookie_file.clone()),
        };
        let attempt_cancel = cancel.child_token();
        let (progress_tx, mut progress_rx) = mpsc::channel(32);

        debug!(
            "Job {}: attempting {} via {}",
            job.id,
            strategy,
            route.map(|r| r.id.as_str()).unwrap_or("no route")
        );

        let started_at = Utc::now();
        let state = AttemptState::Pending.begin();
        let started = match &state {
            AttemptState::InFlight { started } => *started,
            _ => tokio::time::Instant::now(),
        };

        let timeout = self.config.attempt_timeout();
        let execution = self
            .backend
            .execute(request, progress_tx, attempt_cancel.clone());
        tokio::pin!(execution);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    attempt_cancel.cancel();
                    return Err(self.mark_cancelled(&job.id));
                }
                _ = &mut deadline => {
                    attempt_cancel.cancel();
                    break Err(AttemptFailure::timeout(format!(
                        "attempt exceeded {}s deadline",
                        timeout.as_secs()
                    )));
                }
                result = &mut execution => break result,
                Some(pct) = progress_rx.recv() => self.report_progress(&job.id, pct),
            }
        };
        while let Ok(pct) = progress_rx.try_recv() {
            self.report_progress(&job.id, pct);
        }

        let state = state.settle(result);
        let duration = started.elapsed();
        let outcome = state.outcome().unwrap_or(AttemptOutcome::TransientError);

        metrics::ATTEMPTS_TOTAL
            .with_label_values(&[strategy.name(), outcome.as_str()])
            .inc();
        metrics::ATTEMPT_DURATION
            .with_label_values(&[strategy.name()])
            .observe(duration.as_secs_f64());

        let record = AttemptRecord {
            strategy_name: strategy.name().to_string(),
            egress_route_id: route.map(|r| r.id.clone()),
            started_at,
            duration_ms: duration.as_millis() as u64,
            outcome,
            error_detail: state.failure().map(|f| f.detail.clone()),
        };
        if let Some(failure) = state.failure() {
            info!(
                "Job {}: {} failed ({}): {}",
                job.id,
                strategy,
                outcome.as_str(),
                failure.detail
            );
        }

        Ok(SettledAttempt { state, record })
    }

    fn record_route_outcome(
        &self,
        route: &EgressRoute,
        outcome: AttemptOutcome,
        excluded: &mut HashSet<String>,
    ) {
        let result = match outcome {
            AttemptOutcome::Success => self.egress.record_outcome(&route.id, true),
            o if o.penalizes_route() => {
                excluded.insert(route.id.clone());
                self.egress.record_outcome(&route.id, false)
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            // Route removed from the pool while the attempt ran.
            debug!("Could not record outcome for {}: {}", route.id, e);
        }
    }

    fn report_progress(&self, job_id: &str, pct: f32) {
        let pct = pct.clamp(0.0, MAX_IN_FLIGHT_PROGRESS);
        match self.jobs.get_job(job_id) {
            Ok(job) if pct > job.progress => {
                if let Err(e) = self.jobs.update_job(job_id, JobUpdate::progress(pct)) {
                    debug!("Dropped progress update for job {}: {}", job_id, e);
                }
            }
            Ok(_) => {}
            Err(e) => debug!("Dropped progress update for job {}: {}", job_id, e),
        }
    }

    async fn backoff(
        &self,
        delay: std::time::Duration,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), AcquisitionError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(self.mark_cancelled(job_id)),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Fail the job as cancelled unless someone already moved it to a terminal state.
    fn mark_cancelled(&self, job_id: &str) -> AcquisitionError {
        match self
            .jobs
            .update_job(job_id, JobUpdate::fail(JobError::cancelled()))
        {
            Ok(_) => {
                metrics::JOBS_FINISHED.with_label_values(&["cancelled"]).inc();
                info!("Job {} cancelled", job_id);
            }
            Err(JobStoreError::InvalidTransition { .. } | JobStoreError::InvalidUpdate { .. }) => {}
            Err(e) => warn!("Could not mark job {} cancelled: {}", job_id, e),
        }
        AcquisitionError::Cancelled(job_id.to_string())
    }

    /// A store rejection after cancellation means the cancel won the race.
    fn store_error(
        &self,
        job_id: &str,
        error: JobStoreError,
        cancel: &CancellationToken,
    ) -> AcquisitionError {
        if cancel.is_cancelled() {
            return AcquisitionError::Cancelled(job_id.to_string());
        }
        error.into()
    }
}
