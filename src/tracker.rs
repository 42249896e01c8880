use std::{
  collections::HashMap,
  sync::{Arc, PoisonError, RwLock},
  time::Duration,
};

use chrono::Utc;
use tracing::debug;

use crate::{
  job::{Job, JobId, JobUpdate},
  Error, Result,
};

// one record per submitted job. the lock is only held for the length of a
// single field merge or clone, never across an await.
#[derive(Debug, Default, Clone)]
pub struct JobTracker {
  jobs: Arc<RwLock<HashMap<JobId, Job>>>,
}

impl JobTracker {
  pub fn new() -> Self {
    Self::default()
  }

  // a duplicate id is a programming error, the existing record is kept.
  pub fn create(&self, id: JobId) -> Result<()> {
    let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
    if jobs.contains_key(&id) {
      return Err(Error::DuplicateJob(id));
    }

    jobs.insert(id, Job::new(id));
    Ok(())
  }

  pub fn update(&self, id: JobId, update: JobUpdate) {
    let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);

    // the job may have been reaped already
    let Some(job) = jobs.get_mut(&id) else {
      debug!(%id, "update for unknown job ignored");
      return;
    };

    if job.status.is_terminal() {
      debug!(%id, status = ?job.status, "update after terminal state ignored");
      return;
    }

    job.apply(update);
  }

  pub fn get(&self, id: JobId) -> Option<Job> {
    let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
    jobs.get(&id).cloned()
  }

  pub fn remove(&self, id: JobId) {
    let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
    jobs.remove(&id);
  }

  // terminal jobs nobody touched within `retention`
  pub fn expired(&self, retention: Duration) -> Vec<JobId> {
    let now = Utc::now();
    let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);

    jobs
      .values()
      .filter(|job| job.status.is_terminal())
      .filter(|job| {
        now
          .signed_duration_since(job.updated_at)
          .to_std()
          .map_or(false, |age| age >= retention)
      })
      .map(|job| job.id)
      .collect()
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
  }
}
