//! Job admission and lifecycle.
//!
//! Submitted jobs go into a queue drained by a single dispatcher task. The
//! dispatcher takes a permit from a semaphore sized to the admission limit
//! before spawning each job, so jobs start in the order they were submitted
//! and never more than `max_concurrent_jobs` run at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{AcquisitionError, AcquisitionOrchestrator};
use crate::job::{Job, JobError, JobStatusView, JobStore, JobStoreError, JobUpdate};
use crate::metrics;

static TARGET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://[A-Za-z0-9.-]+(:\d+)?(/\S*)?$").expect("valid target regex")
});

/// Whether `target` looks like something the downloader can fetch.
pub fn is_valid_target(target: &str) -> bool {
    TARGET_PATTERN.is_match(target.trim())
}

/// Admission snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub max_concurrent_jobs: usize,
    pub active_jobs: usize,
    pub waiting_jobs: usize,
}

pub struct JobScheduler {
    jobs: Arc<JobStore>,
    orchestrator: Arc<AcquisitionOrchestrator>,
    permits: Arc<Semaphore>,
    max_concurrent_jobs: usize,
    queue_tx: mpsc::UnboundedSender<Job>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    /// Cancellation handle for every job submitted and not yet finished.
    tokens: Arc<Mutex<HashMap<String, CancellationToken>>>,
    active: Arc<AtomicUsize>,
    waiting: Arc<AtomicUsize>,
    started: AtomicBool,
    shutdown: CancellationToken,
}

impl JobScheduler {
    pub fn new(jobs: Arc<JobStore>, orchestrator: Arc<AcquisitionOrchestrator>) -> Self {
        let max_concurrent_jobs = orchestrator.config().max_concurrent_jobs.max(1);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            jobs,
            orchestrator,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs)),
            max_concurrent_jobs,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            tokens: Arc::new(Mutex::new(HashMap::new())),
            active: Arc::new(AtomicUsize::new(0)),
            waiting: Arc::new(AtomicUsize::new(0)),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start the dispatcher. Jobs submitted earlier wait until this runs.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Job scheduler already started");
            return None;
        }
        let Some(mut queue_rx) = self.queue_rx.lock().unwrap().take() else {
            return None;
        };

        let jobs = Arc::clone(&self.jobs);
        let orchestrator = Arc::clone(&self.orchestrator);
        let permits = Arc::clone(&self.permits);
        let tokens = Arc::clone(&self.tokens);
        let active = Arc::clone(&self.active);
        let waiting = Arc::clone(&self.waiting);
        let shutdown = self.shutdown.clone();

        info!(
            "Starting job scheduler (max {} concurrent jobs)",
            self.max_concurrent_jobs
        );
        Some(tokio::spawn(async move {
            loop {
                let job = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    job = queue_rx.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                };

                let permit = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = Arc::clone(&permits).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                waiting.fetch_sub(1, Ordering::SeqCst);
                metrics::JOBS_WAITING.dec();

                let token = tokens.lock().unwrap().get(&job.id).cloned();
                let Some(token) = token else {
                    debug!("Job {} was cancelled while waiting", job.id);
                    continue;
                };

                let jobs = Arc::clone(&jobs);
                let orchestrator = Arc::clone(&orchestrator);
                let tokens = Arc::clone(&tokens);
                let active = Arc::clone(&active);
                let shutdown = shutdown.clone();
                active.fetch_add(1, Ordering::SeqCst);
                metrics::JOBS_ACTIVE.inc();

                tokio::spawn(async move {
                    let _permit = permit;
                    // Re-read so a cancel that landed while queued is seen.
                    let result = match jobs.get_job(&job.id) {
                        Ok(current) => tokio::select! {
                            _ = shutdown.cancelled() => {
                                info!("Job {} interrupted by shutdown", job.id);
                                None
                            }
                            result = orchestrator.acquire(&current, &token) => Some(result),
                        },
                        Err(e) => Some(Err(e.into())),
                    };
                    match result {
                        Some(Ok(done)) => debug!("Job {} finished as {}", done.id, done.status),
                        Some(Err(AcquisitionError::Cancelled(_)))
                        | Some(Err(AcquisitionError::NotRunnable { .. })) => {}
                        Some(Err(e)) => error!("Job {} aborted: {}", job.id, e),
                        None => {}
                    }
                    tokens.lock().unwrap().remove(&job.id);
                    active.fetch_sub(1, Ordering::SeqCst);
                    metrics::JOBS_ACTIVE.dec();
                });
            }
            info!("Job scheduler stopped");
        }))
    }

    /// Stop dispatching. Jobs in flight are dropped and stay `running` in the
    /// durable tier, to be resumed on the next start.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Validate `target`, create a queued job and enqueue it.
    pub fn submit(&self, target: &str) -> Result<Job, AcquisitionError> {
        let target = target.trim();
        if !is_valid_target(target) {
            return Err(AcquisitionError::InvalidTarget(target.to_string()));
        }
        if self.shutdown.is_cancelled() {
            return Err(AcquisitionError::ShuttingDown);
        }
        let job = self.jobs.create_job(target);
        self.enqueue(job.clone())?;
        Ok(job)
    }

    /// Re-enqueue jobs left queued or running by a previous process.
    pub fn resume_unfinished(&self) -> Result<usize, AcquisitionError> {
        let jobs = self.jobs.list_unfinished()?;
        let count = jobs.len();
        for job in jobs {
            self.enqueue(job)?;
        }
        if count > 0 {
            info!("Resumed {} unfinished jobs", count);
        }
        Ok(count)
    }

    fn enqueue(&self, job: Job) -> Result<(), AcquisitionError> {
        let id = job.id.clone();
        self.tokens
            .lock()
            .unwrap()
            .insert(id.clone(), CancellationToken::new());
        self.waiting.fetch_add(1, Ordering::SeqCst);
        metrics::JOBS_WAITING.inc();

        if self.queue_tx.send(job).is_err() {
            self.tokens.lock().unwrap().remove(&id);
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            metrics::JOBS_WAITING.dec();
            return Err(AcquisitionError::ShuttingDown);
        }
        Ok(())
    }

    /// Abort a job: it moves straight to `failed` and any attempt in flight is cancelled.
    pub fn cancel(&self, job_id: &str) -> Result<Job, AcquisitionError> {
        let failed = self
            .jobs
            .update_job(job_id, JobUpdate::fail(JobError::cancelled()))?;
        metrics::JOBS_FINISHED.with_label_values(&["cancelled"]).inc();
        info!("Cancelled job {}", job_id);

        if let Some(token) = self.tokens.lock().unwrap().remove(job_id) {
            token.cancel();
        }
        Ok(failed)
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.started.load(Ordering::SeqCst) && !self.shutdown.is_cancelled(),
            max_concurrent_jobs: self.max_concurrent_jobs,
            active_jobs: self.active.load(Ordering::SeqCst),
            waiting_jobs: self.waiting.load(Ordering::SeqCst),
        }
    }

    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.jobs
    }

    /// Current status of a job, as exposed to the request layer.
    pub fn job_status(&self, job_id: &str) -> Result<JobStatusView, JobStoreError> {
        self.jobs.get_job(job_id).map(|job| job.status_view())
    }
}
