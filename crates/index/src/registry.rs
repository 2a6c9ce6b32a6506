//! Jobs currently eligible for work.
//!
//! One per runner, shared by its workers and every thread submitting to it.
//! Workers iterate a snapshot, so jobs can come and go while a pass is in progress.

use std::sync::{
  Arc,
  atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use tracing::trace;

use crate::job::IndexingJob;

#[derive(Debug, Default)]
pub struct JobRegistry {
  jobs: DashMap<u64, Arc<IndexingJob>>,
  next_id: AtomicU64,
}

impl JobRegistry {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn next_job_id(&self) -> u64 {
    self.next_id.fetch_add(1, Ordering::Relaxed) + 1
  }

  /// Register `job` until the returned guard is dropped.
  pub fn register(&self, job: Arc<IndexingJob>) -> Registration<'_> {
    let id = job.id();
    trace!(job = id, project = %job.project(), "Registering indexing job");
    self.jobs.insert(id, job);
    Registration { registry: self, id }
  }

  /// Drop a job from the registry. Removing an absent job is a no-op.
  pub fn remove(&self, id: u64) {
    if self.jobs.remove(&id).is_some() {
      trace!(job = id, "Deregistered indexing job");
    }
  }

  pub fn contains(&self, id: u64) -> bool {
    self.jobs.contains_key(&id)
  }

  pub fn is_empty(&self) -> bool {
    self.jobs.is_empty()
  }

  pub fn len(&self) -> usize {
    self.jobs.len()
  }

  /// Registered jobs ordered by registration.
  pub fn snapshot(&self) -> Vec<Arc<IndexingJob>> {
    let mut jobs: Vec<_> = self.jobs.iter().map(|entry| Arc::clone(entry.value())).collect();
    jobs.sort_by_key(|job| job.id());
    jobs
  }
}

/// Keeps a job registered; deregisters it on drop.
#[must_use]
pub struct Registration<'a> {
  registry: &'a JobRegistry,
  id: u64,
}

impl Drop for Registration<'_> {
  fn drop(&mut self) {
    self.registry.remove(self.id);
  }
}
