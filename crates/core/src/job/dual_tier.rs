//! Two-tier job store: in-memory fast tier in front of a durable tier.
//!
//! Write-through: every create/update is written to the durable tier first and
//! only then made visible in the fast tier. Read-through: a fast-tier miss is
//! answered from the durable tier and the fast tier is repopulated.
//!
//! If the durable tier rejects a write, the job is still committed to the fast
//! tier with `durability_degraded` set; the store keeps running in fast-tier-only
//! mode until a durable write succeeds again.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::{DurableTier, Job, JobStatus, JobStoreError, JobUpdate};
use crate::metrics;

/// Default retention window, measured from `updated_at`.
pub const DEFAULT_RETENTION_HOURS: u64 = 168;

/// Each job lives behind its own mutex; holding it serializes updates to that id.
type Slot = Arc<Mutex<Job>>;

pub struct JobStore {
    fast: RwLock<HashMap<String, Slot>>,
    durable: Arc<dyn DurableTier>,
    retention: Duration,
    degraded: AtomicBool,
}

impl JobStore {
    pub fn new(durable: Arc<dyn DurableTier>) -> Self {
        Self::with_retention(durable, Duration::hours(DEFAULT_RETENTION_HOURS as i64))
    }

    pub fn with_retention(durable: Arc<dyn DurableTier>, retention: Duration) -> Self {
        Self {
            fast: RwLock::new(HashMap::new()),
            durable,
            retention,
            degraded: AtomicBool::new(false),
        }
    }

    /// Whether the most recent durable write failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Create a queued job for `target`.
    pub fn create_job(&self, target: &str) -> Job {
        let mut job = Job::new(target);
        self.persist(&mut job);

        self.fast
            .write()
            .unwrap()
            .insert(job.id.clone(), Arc::new(Mutex::new(job.clone())));

        info!("Created job {} for {}", job.id, job.target);
        job
    }

    /// Fetch a job, falling back to the durable tier on a fast-tier miss.
    pub fn get_job(&self, id: &str) -> Result<Job, JobStoreError> {
        let slot = self.slot(id)?;
        let job = slot.lock().unwrap().clone();
        Ok(job)
    }

    /// Apply `update` to the job atomically with respect to other updates of the same id.
    ///
    /// The update is validated against a copy first; an illegal update leaves
    /// the stored job untouched.
    pub fn update_job(&self, id: &str, update: JobUpdate) -> Result<Job, JobStoreError> {
        let slot = self.slot(id)?;
        let mut current = slot.lock().unwrap();

        let mut next = current.clone();
        apply_update(&mut next, update)?;
        next.updated_at = Utc::now().max(current.updated_at);

        self.persist(&mut next);
        *current = next.clone();
        Ok(next)
    }

    /// Delete jobs whose `updated_at` is older than the retention window.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let mut removed: HashSet<String> = HashSet::new();

        {
            let mut fast = self.fast.write().unwrap();
            fast.retain(|id, slot| {
                let expired = slot.lock().unwrap().updated_at < cutoff;
                if expired {
                    removed.insert(id.clone());
                }
                !expired
            });
        }

        match self.durable.delete_updated_before(cutoff) {
            Ok(ids) => removed.extend(ids),
            Err(e) => warn!(
                "Job sweep running in fast-tier-only mode, durable tier unavailable: {}",
                e
            ),
        }

        if !removed.is_empty() {
            info!("Swept {} expired jobs", removed.len());
            metrics::JOBS_SWEPT.inc_by(removed.len() as u64);
        }
        removed.len()
    }

    /// Jobs left queued or running in the durable tier, oldest first.
    ///
    /// Used on startup to resume work interrupted by a restart.
    pub fn list_unfinished(&self) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.durable.list_unfinished()?;
        Ok(jobs)
    }

    /// Drop the fast tier, as a process restart would.
    pub fn clear_fast_tier(&self) {
        self.fast.write().unwrap().clear();
    }

    /// Number of jobs currently cached in the fast tier.
    pub fn cached_len(&self) -> usize {
        self.fast.read().unwrap().len()
    }

    fn slot(&self, id: &str) -> Result<Slot, JobStoreError> {
        if let Some(slot) = self.fast.read().unwrap().get(id) {
            return Ok(Arc::clone(slot));
        }

        let loaded = match self.durable.get(id) {
            Ok(Some(job)) => job,
            Ok(None) => return Err(JobStoreError::NotFound(id.to_string())),
            Err(e) => {
                warn!("Read-through for job {} failed: {}", id, e);
                return Err(e.into());
            }
        };

        debug!("Repopulated fast tier with job {}", id);
        let mut fast = self.fast.write().unwrap();
        // Another reader may have repopulated the slot meanwhile; keep theirs.
        let slot = fast
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(loaded)));
        Ok(Arc::clone(slot))
    }

    /// Write the job to the durable tier, flagging it on failure.
    fn persist(&self, job: &mut Job) {
        job.durability_degraded = false;
        match self.durable.put(job) {
            Ok(()) => {
                if self.degraded.swap(false, Ordering::SeqCst) {
                    info!("Durable tier reachable again");
                }
            }
            Err(e) => {
                job.durability_degraded = true;
                metrics::DURABLE_WRITE_FAILURES.inc();
                if !self.degraded.swap(true, Ordering::SeqCst) {
                    warn!("Durable tier unavailable, continuing in fast-tier-only mode: {}", e);
                }
                warn!("Job {} not durably persisted: {}", job.id, e);
            }
        }
    }
}

fn apply_update(job: &mut Job, update: JobUpdate) -> Result<(), JobStoreError> {
    if job.status.is_terminal() {
        return Err(match update.status {
            Some(to) => JobStoreError::InvalidTransition {
                job_id: job.id.clone(),
                from: job.status,
                to,
            },
            None => JobStoreError::InvalidUpdate {
                job_id: job.id.clone(),
                reason: format!("job is already {}", job.status),
            },
        });
    }

    if let Some(to) = update.status {
        if !job.status.can_transition_to(to) {
            return Err(JobStoreError::InvalidTransition {
                job_id: job.id.clone(),
                from: job.status,
                to,
            });
        }
    }

    let target_status = update.status.unwrap_or(job.status);

    if let Some(progress) = update.progress {
        if !(0.0..=100.0).contains(&progress) {
            return Err(JobStoreError::InvalidUpdate {
                job_id: job.id.clone(),
                reason: format!("progress {} outside 0..=100", progress),
            });
        }
        if progress < job.progress {
            return Err(JobStoreError::InvalidUpdate {
                job_id: job.id.clone(),
                reason: format!("progress may not decrease ({} -> {})", job.progress, progress),
            });
        }
        job.progress = progress;
    }

    match (target_status, &update.result_ref) {
        (JobStatus::Completed, None) if job.result_ref.is_none() => {
            return Err(JobStoreError::InvalidUpdate {
                job_id: job.id.clone(),
                reason: "completion requires a result reference".to_string(),
            });
        }
        (status, Some(_)) if status != JobStatus::Completed => {
            return Err(JobStoreError::InvalidUpdate {
                job_id: job.id.clone(),
                reason: "result reference is only set on completion".to_string(),
            });
        }
        _ => {}
    }

    if let Some(record) = update.append_attempt {
        job.attempts.push(record);
    }
    if update.result_ref.is_some() {
        job.result_ref = update.result_ref;
    }
    if update.last_error.is_some() {
        job.last_error = update.last_error;
    }
    job.status = target_status;
    Ok(())
}
