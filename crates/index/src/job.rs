//! One caller's batch of files.
//!
//! ```text
//! Active ──queue empty──▶ Draining ──remaining == 0──▶ Completed
//!    │                        │
//!    └──── error / cancel ────┴──▶ Failed | Cancelled
//! ```
//!
//! Files move between three places: the pending queue, in-flight claims held
//! by workers, and the processed count. `remaining == queued + in_flight` at all
//! times, so a claim has to be either completed or put back; a [`Claim`]
//! dropped without either is requeued.

use std::{
  collections::{HashMap, HashSet, VecDeque},
  sync::{
    Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use indexer_core::{FileRef, FileSet, Project};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
  progress::{self, ProgressSink},
  stats::{FileOutcome, FileSetStatistics, IndexingReport},
};

/// Job-level failure. Stored once (first wins) and re-raised to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobFailure {
  #[error("Indexing cancelled")]
  Cancelled,
  #[error("Project was disposed")]
  OwnerDisposed,
  /// Something in the scheduling machinery itself broke.
  #[error("{0}")]
  Infrastructure(String),
}

impl JobFailure {
  /// Cancellation-like failures hand undone files back to the caller instead of failing.
  pub fn is_cancellation(&self) -> bool {
    matches!(self, Self::Cancelled | Self::OwnerDisposed)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
  /// Files are waiting in the queue.
  Active,
  /// Queue is empty; claimed files are still being processed.
  Draining,
  Completed,
  Failed,
  Cancelled,
}

#[derive(Debug, Default)]
struct PendingQueue {
  files: VecDeque<FileRef>,
  in_flight: usize,
  /// Set once the submitting call stops waiting. Nothing can be claimed afterwards.
  closed: bool,
}

pub struct IndexingJob {
  id: u64,
  project: Arc<Project>,
  file_to_set: HashMap<FileRef, usize>,
  statistics: Vec<Mutex<FileSetStatistics>>,
  queue: Mutex<PendingQueue>,
  claims_settled: Condvar,
  total_files: usize,
  remaining: Mutex<usize>,
  all_processed: Condvar,
  no_more_files: AtomicBool,
  error: OnceLock<JobFailure>,
  cancel: CancellationToken,
  progress: Arc<dyn ProgressSink>,
}

impl IndexingJob {
  /// Build a job over `file_sets`.
  ///
  /// A file listed in several sets is indexed once and attributed to the last set
  /// listing it; duplicates inside a set are ignored.
  pub fn new(
    id: u64,
    project: Arc<Project>,
    file_sets: &[FileSet],
    cancel: CancellationToken,
    progress: Arc<dyn ProgressSink>,
  ) -> Self {
    let mut file_to_set = HashMap::new();
    for (index, set) in file_sets.iter().enumerate() {
      for file in &set.files {
        file_to_set.insert(file.clone(), index);
      }
    }

    let mut queued = HashSet::with_capacity(file_to_set.len());
    let mut files = VecDeque::with_capacity(file_to_set.len());
    for (index, set) in file_sets.iter().enumerate() {
      for file in &set.files {
        if file_to_set.get(file) == Some(&index) && queued.insert(file.clone()) {
          files.push_back(file.clone());
        }
      }
    }

    let total_files = files.len();
    Self {
      id,
      project,
      file_to_set,
      statistics: file_sets
        .iter()
        .map(|set| Mutex::new(FileSetStatistics::new(set.name.clone())))
        .collect(),
      queue: Mutex::new(PendingQueue {
        files,
        ..Default::default()
      }),
      claims_settled: Condvar::new(),
      total_files,
      remaining: Mutex::new(total_files),
      all_processed: Condvar::new(),
      no_more_files: AtomicBool::new(total_files == 0),
      error: OnceLock::new(),
      cancel: cancel.child_token(),
      progress,
    }
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn project(&self) -> &Arc<Project> {
    &self.project
  }

  /// Cancelled by the caller's token or by the first failure of this job.
  pub fn cancel_token(&self) -> &CancellationToken {
    &self.cancel
  }

  pub fn progress(&self) -> &dyn ProgressSink {
    self.progress.as_ref()
  }

  pub fn total_files(&self) -> usize {
    self.total_files
  }

  pub fn remaining_files(&self) -> usize {
    *lock(&self.remaining)
  }

  pub fn processed_files(&self) -> usize {
    self.total_files - self.remaining_files()
  }

  pub fn queued_files(&self) -> usize {
    lock(&self.queue).files.len()
  }

  pub fn in_flight(&self) -> usize {
    lock(&self.queue).in_flight
  }

  pub fn are_all_files_processed(&self) -> bool {
    self.remaining_files() == 0
  }

  pub fn no_more_files_in_queue(&self) -> bool {
    self.no_more_files.load(Ordering::Acquire)
  }

  pub fn failure(&self) -> Option<&JobFailure> {
    self.error.get()
  }

  /// Jobs that workers should drop from the registry.
  pub fn is_retired(&self) -> bool {
    self.project.is_disposed()
      || self.no_more_files_in_queue()
      || self.cancel.is_cancelled()
      || self.error.get().is_some()
      || lock(&self.queue).closed
  }

  pub fn state(&self) -> JobState {
    if let Some(failure) = self.error.get() {
      return if failure.is_cancellation() {
        JobState::Cancelled
      } else {
        JobState::Failed
      };
    }
    if self.cancel.is_cancelled() {
      return JobState::Cancelled;
    }
    if self.are_all_files_processed() {
      return JobState::Completed;
    }
    if self.queued_files() == 0 {
      JobState::Draining
    } else {
      JobState::Active
    }
  }

  /// Take the next file, if the job still hands out work.
  ///
  /// Returns `None` once the queue is empty (and marks the job as having no more
  /// files), or when the job is closed, cancelled or failed.
  pub fn claim(&self) -> Option<Claim<'_>> {
    let mut queue = lock(&self.queue);
    if queue.closed || self.cancel.is_cancelled() || self.error.get().is_some() {
      return None;
    }
    match queue.files.pop_front() {
      Some(file) => {
        queue.in_flight += 1;
        Some(Claim {
          job: self,
          file,
          settled: false,
        })
      }
      None => {
        self.no_more_files.store(true, Ordering::Release);
        None
      }
    }
  }

  /// Record the first job-level failure. Later failures are ignored.
  pub fn fail(&self, failure: JobFailure) {
    match self.error.set(failure) {
      Ok(()) => {
        debug!(project = %self.project, job = self.id, failure = ?self.error.get(), "Indexing job failed");
        // Unblocks workers waiting on budget or inside a load for this job.
        self.cancel.cancel();
        // Wake the submitting thread instead of letting it sleep out its poll.
        let _guard = lock(&self.remaining);
        self.all_processed.notify_all();
      }
      Err(ignored) => {
        debug!(project = %self.project, job = self.id, ?ignored, "Job already failed, ignoring later failure");
      }
    }
  }

  /// Stop handing out files. Claims already out still finish.
  pub fn close(&self) {
    lock(&self.queue).closed = true;
  }

  /// Block until no claim is in flight.
  pub fn wait_claims_settled(&self) {
    let queue = lock(&self.queue);
    let _queue = self
      .claims_settled
      .wait_while(queue, |q| q.in_flight > 0)
      .unwrap_or_else(PoisonError::into_inner);
  }

  /// Wait up to `timeout` for the countdown to reach zero. Returns early on failure.
  pub fn await_all_files_processed(&self, timeout: Duration) -> bool {
    let remaining = lock(&self.remaining);
    let (remaining, _) = self
      .all_processed
      .wait_timeout_while(remaining, timeout, |r| *r > 0 && self.error.get().is_none())
      .unwrap_or_else(PoisonError::into_inner);
    *remaining == 0
  }

  /// Snapshot of per-set statistics, in submission order.
  pub fn statistics(&self) -> Vec<FileSetStatistics> {
    self.statistics.iter().map(|s| lock(s).clone()).collect()
  }

  pub fn report(&self, visible_time: Duration) -> IndexingReport {
    IndexingReport {
      project: self.project.name().to_string(),
      total_files: self.total_files,
      file_sets: self.statistics(),
      visible_time,
    }
  }

  /// Remove and return every still-queued file, grouped back into its file set.
  ///
  /// Only meaningful after `close` + `wait_claims_settled`.
  pub fn drain_pending(&self) -> Vec<FileSet> {
    let files: Vec<FileRef> = lock(&self.queue).files.drain(..).collect();
    let mut grouped: Vec<Vec<FileRef>> = vec![Vec::new(); self.statistics.len()];
    for file in files {
      if let Some(&index) = self.file_to_set.get(&file) {
        grouped[index].push(file);
      }
    }
    grouped
      .into_iter()
      .zip(&self.statistics)
      .filter(|(files, _)| !files.is_empty())
      .map(|(files, stats)| FileSet {
        name: lock(stats).name.clone(),
        files,
      })
      .collect()
  }

  fn requeue(&self, file: FileRef) {
    let mut queue = lock(&self.queue);
    queue.files.push_front(file);
    queue.in_flight -= 1;
    self.no_more_files.store(false, Ordering::Release);
    if queue.in_flight == 0 {
      self.claims_settled.notify_all();
    }
  }

  fn complete(&self, file: FileRef, outcome: FileOutcome) {
    let outcome = match outcome {
      FileOutcome::Fatal(failure) => {
        self.requeue(file);
        self.fail(failure);
        return;
      }
      outcome @ (FileOutcome::Success(_)
      | FileOutcome::TooLarge
      | FileOutcome::LoadFailed(_)
      | FileOutcome::ProcessingError(_)) => outcome,
    };

    match self.file_to_set.get(&file) {
      Some(&index) => lock(&self.statistics[index]).record(&file, &outcome),
      None => warn!(project = %self.project, file = %file, "Completed file does not belong to any file set"),
    }

    let remaining = {
      let mut remaining = lock(&self.remaining);
      *remaining -= 1;
      if *remaining == 0 {
        self.all_processed.notify_all();
      }
      *remaining
    };

    {
      let mut queue = lock(&self.queue);
      queue.in_flight -= 1;
      if queue.in_flight == 0 {
        self.claims_settled.notify_all();
      }
    }

    let fraction = 1.0 - remaining as f64 / self.total_files as f64;
    progress::report(|| self.progress.set_fraction(fraction));
  }
}

impl std::fmt::Debug for IndexingJob {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("IndexingJob")
      .field("id", &self.id)
      .field("project", &self.project.name())
      .field("total_files", &self.total_files)
      .field("remaining", &self.remaining_files())
      .field("error", &self.error.get())
      .finish()
  }
}

/// A file taken from a job's queue by one worker.
#[must_use = "a dropped claim puts its file back in the queue"]
pub struct Claim<'a> {
  job: &'a IndexingJob,
  file: FileRef,
  settled: bool,
}

impl Claim<'_> {
  pub fn file(&self) -> &FileRef {
    &self.file
  }

  /// Count the file as processed (or, for `FileOutcome::Fatal`, requeue it and fail the job).
  pub fn complete(mut self, outcome: FileOutcome) {
    self.settled = true;
    self.job.complete(self.file.clone(), outcome);
  }

  /// Put the file back at the front of the queue.
  pub fn requeue(mut self) {
    self.settled = true;
    self.job.requeue(self.file.clone());
  }
}

impl Drop for Claim<'_> {
  fn drop(&mut self) {
    if !self.settled {
      self.job.requeue(self.file.clone());
    }
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
