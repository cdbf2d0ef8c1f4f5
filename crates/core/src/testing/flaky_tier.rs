//! In-memory durable tier that can be switched off.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::job::{DurableTier, DurableTierError, Job};

/// A [`DurableTier`] kept in a map, with a switch to simulate an outage.
#[derive(Debug, Default)]
pub struct FlakyDurableTier {
    jobs: Mutex<HashMap<String, Job>>,
    unreachable: AtomicBool,
}

impl FlakyDurableTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with [`DurableTierError::Unavailable`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// What was last written for `id`, bypassing the outage switch.
    pub fn stored(&self, id: &str) -> Option<Job> {
        self.jobs.lock().unwrap().get(id).cloned()
    }

    fn check(&self) -> Result<(), DurableTierError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(DurableTierError::Unavailable(
                "simulated outage".to_string(),
            ));
        }
        Ok(())
    }
}

impl DurableTier for FlakyDurableTier {
    fn put(&self, job: &Job) -> Result<(), DurableTierError> {
        self.check()?;
        self.jobs
            .lock()
            .unwrap()
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Job>, DurableTierError> {
        self.check()?;
        Ok(self.stored(id))
    }

    fn delete_updated_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, DurableTierError> {
        self.check()?;
        let mut jobs = self.jobs.lock().unwrap();
        let expired: Vec<String> = jobs
            .values()
            .filter(|job| job.updated_at < cutoff)
            .map(|job| job.id.clone())
            .collect();
        for id in &expired {
            jobs.remove(id);
        }
        Ok(expired)
    }

    fn list_unfinished(&self) -> Result<Vec<Job>, DurableTierError> {
        self.check()?;
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|job| !job.status.is_terminal())
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }
}
