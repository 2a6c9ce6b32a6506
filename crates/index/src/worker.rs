//! Worker side of the runner.
//!
//! Each worker walks a snapshot of the registry and indexes at most one file per
//! job per pass, so a job with five files finishes long before a job with a
//! thousand even when both share the pool. A worker exits when the registry is
//! empty or every registered job is suspended; the submitting thread spawns a
//! replacement on its next poll.

use std::{
  any::Any,
  panic::{AssertUnwindSafe, catch_unwind},
  sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
  },
  time::Instant,
};

use indexer_core::FileRef;
use tracing::{debug, error, info, trace};

use crate::{
  budget::{BudgetError, BudgetReservation, ByteBudget},
  job::{IndexingJob, JobFailure},
  loader::{ContentLoader, LoadError, LoadFailure, LoadedContent, SizePredicate},
  processor::{FileProcessor, ProcessingError},
  progress,
  registry::JobRegistry,
  stats::{FileOutcome, IndexedFile},
  suspend::SuspensionGate,
};

/// Successful files between two trace lines of the attempt/success counters.
const TRACE_EVERY: u64 = 10_000;

/// Collaborators shared by every worker of one runner.
pub(crate) struct WorkerContext {
  pub(crate) budget: Arc<ByteBudget>,
  pub(crate) registry: Arc<JobRegistry>,
  pub(crate) loader: Arc<dyn ContentLoader>,
  pub(crate) processor: Arc<dyn FileProcessor>,
  pub(crate) size_predicate: Arc<dyn SizePredicate>,
  pub(crate) gate: Arc<dyn SuspensionGate>,
  attempts: AtomicU64,
  successes: AtomicU64,
  next_worker_id: AtomicUsize,
}

/// Content held in memory, with the budget it is charged against.
struct ReservedContent {
  content: LoadedContent,
  _reservation: BudgetReservation,
}

impl WorkerContext {
  pub(crate) fn new(
    budget: Arc<ByteBudget>,
    registry: Arc<JobRegistry>,
    loader: Arc<dyn ContentLoader>,
    processor: Arc<dyn FileProcessor>,
    size_predicate: Arc<dyn SizePredicate>,
    gate: Arc<dyn SuspensionGate>,
  ) -> Self {
    Self {
      budget,
      registry,
      loader,
      processor,
      size_predicate,
      gate,
      attempts: AtomicU64::new(0),
      successes: AtomicU64::new(0),
      next_worker_id: AtomicUsize::new(0),
    }
  }

  pub(crate) fn next_worker_id(&self) -> usize {
    self.next_worker_id.fetch_add(1, Ordering::Relaxed)
  }

  /// Files handed to the processor so far.
  pub(crate) fn attempts(&self) -> u64 {
    self.attempts.load(Ordering::Relaxed)
  }

  /// Files the processor indexed without error.
  pub(crate) fn successes(&self) -> u64 {
    self.successes.load(Ordering::Relaxed)
  }

  /// Worker body: round-robin over registered jobs until there is nothing left to do.
  pub(crate) fn index_jobs_fairly(&self, worker_id: usize) {
    trace!(worker_id, "Indexing worker started");
    let mut passes = 0usize;

    while !self.registry.is_empty() {
      passes += 1;
      let mut all_suspended = true;

      for job in self.registry.snapshot() {
        if job.is_retired() {
          self.registry.remove(job.id());
          all_suspended = false;
          continue;
        }
        if self.gate.is_suspended(job.project()) {
          continue;
        }
        all_suspended = false;

        let result = catch_unwind(AssertUnwindSafe(|| self.index_one_file(&job)));
        let failure = match result {
          Ok(Ok(())) => continue,
          Ok(Err(failure)) => failure,
          Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(worker_id, project = %job.project(), error = %message, "Indexing worker panicked");
            JobFailure::Infrastructure(message)
          }
        };
        job.fail(failure);
        self.registry.remove(job.id());
      }

      if all_suspended {
        trace!(worker_id, "Every registered job is suspended, worker exiting");
        break;
      }
    }

    trace!(worker_id, passes, "Indexing worker finished");
  }

  /// Claim, load and process one file of `job`.
  ///
  /// Per-file problems are recorded on the job and return `Ok`. `Err` means the
  /// whole job has to stop; the claimed file is already back in the queue.
  pub(crate) fn index_one_file(&self, job: &IndexingJob) -> Result<(), JobFailure> {
    let started = Instant::now();
    let Some(claim) = job.claim() else {
      return Ok(());
    };
    let file = claim.file().clone();

    let loaded = match self.load_next_content(job, &file) {
      Ok(loaded) => loaded,
      Err(outcome) => {
        let fatal = fatal_of(&outcome);
        claim.complete(outcome);
        return fatal.map_or(Ok(()), Err);
      }
    };
    let content_loading_time = started.elapsed();

    let location = job.project().presentable_location(&file);
    progress::report(|| job.progress().set_location(&location));

    let type_hint = file.extension();
    self.attempts.fetch_add(1, Ordering::Relaxed);
    let result = catch_unwind(AssertUnwindSafe(|| {
      self.processor.process(job.project(), &loaded.content, type_hint)
    }));

    let outcome = match result {
      Ok(Ok(applied)) => {
        let successes = self.successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes % TRACE_EVERY == 0 {
          trace!(attempts = self.attempts(), successes, "Indexing counters");
        }
        FileOutcome::Success(IndexedFile {
          bytes: loaded.content.len() as u64,
          entries: applied.entries,
          type_hint: type_hint.map(str::to_string),
          processing_time: started.elapsed(),
          content_loading_time,
          apply_time: applied.apply_time,
        })
      }
      Ok(Err(ProcessingError::Cancelled)) => {
        debug!(file = %location, "Processing cancelled, file goes back to the queue");
        FileOutcome::Fatal(JobFailure::Cancelled)
      }
      Ok(Err(ProcessingError::Failed(message))) => {
        error!(file = %location, error = %message, "Error while indexing file");
        FileOutcome::ProcessingError(message)
      }
      Err(panic) => {
        let message = panic_message(panic.as_ref());
        error!(file = %location, error = %message, "Processor panicked while indexing file");
        FileOutcome::ProcessingError(message)
      }
    };

    let fatal = fatal_of(&outcome);
    claim.complete(outcome);
    drop(loaded);
    fatal.map_or(Ok(()), Err)
  }

  /// Length check, size filter, budget reservation, then the read.
  ///
  /// Every early return is the outcome the claimed file should be completed with.
  fn load_next_content(&self, job: &IndexingJob, file: &FileRef) -> Result<ReservedContent, FileOutcome> {
    let length = self.loader.file_length(file).map_err(|e| load_error_outcome(job, e))?;

    if self.size_predicate.is_too_large(file, length) {
      info!(file = %file, length, "File is too large for indexing");
      return Err(FileOutcome::TooLarge);
    }

    let reservation = self.budget.reserve(length, job.cancel_token()).map_err(|e| match e {
      BudgetError::Cancelled => FileOutcome::Fatal(JobFailure::Cancelled),
      BudgetError::Poisoned => FileOutcome::Fatal(JobFailure::Infrastructure(e.to_string())),
    })?;

    let content = self
      .loader
      .load_content(file, job.cancel_token())
      .map_err(|e| load_error_outcome(job, e))?;

    Ok(ReservedContent {
      content,
      _reservation: reservation,
    })
  }
}

fn load_error_outcome(job: &IndexingJob, err: LoadError) -> FileOutcome {
  match err {
    LoadError::TooLarge(file) => {
      info!(file = %file, "File is too large for indexing");
      FileOutcome::TooLarge
    }
    LoadError::Failed(failure) => {
      log_load_failure(job, &failure);
      FileOutcome::LoadFailed(failure)
    }
    LoadError::Cancelled => FileOutcome::Fatal(JobFailure::Cancelled),
  }
}

fn log_load_failure(job: &IndexingJob, failure: &LoadFailure) {
  let location = job.project().presentable_location(&failure.file);
  let level = failure.kind.log_level();
  if level == tracing::Level::DEBUG {
    debug!(file = %location, error = %failure.message, "File vanished before it could be loaded");
  } else if level == tracing::Level::INFO {
    info!(file = %location, error = %failure.message, "Unable to read file content");
  } else {
    error!(file = %location, error = %failure.message, "Failed to load file content");
  }
}

fn fatal_of(outcome: &FileOutcome) -> Option<JobFailure> {
  match outcome {
    FileOutcome::Fatal(failure) => Some(failure.clone()),
    _ => None,
  }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = panic.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic".to_string()
  }
}
