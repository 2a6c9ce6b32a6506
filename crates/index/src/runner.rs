//! Entry point: submit a batch of file sets and block until it is indexed.
//!
//! The submitting thread registers an [`IndexingJob`], keeps the worker pool
//! topped up, and waits on the job's countdown in short polls so it can notice
//! cancellation and disposal. Once it stops waiting it closes the job, waits
//! for in-flight claims, and turns the job into a report or an error.

use std::{
  panic::{AssertUnwindSafe, catch_unwind},
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::{Duration, Instant},
};

use indexer_core::{FileSet, Project, RunnerConfig, config::DEFAULT_MAX_BYTES_IN_MEMORY};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
  budget::ByteBudget,
  job::{IndexingJob, JobFailure},
  loader::{ContentLoader, SizeLimit, SizePredicate},
  processor::FileProcessor,
  progress::{NoopProgress, ProgressSink},
  registry::JobRegistry,
  stats::{FileSetStatistics, IndexingReport},
  suspend::{NeverSuspended, SuspensionGate},
  worker::{WorkerContext, panic_message},
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
  #[error("Failed to build indexing thread pool: {0}")]
  ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Why `index_files` returned without indexing every file.
#[derive(Debug, thiserror::Error)]
pub enum IndexingError {
  /// Cancelled (or the project was disposed). `pending` holds the files that were
  /// never processed, grouped by the file set they were submitted in.
  #[error("Indexing of {} was cancelled with {} file(s) pending", .report.project, pending_count(.pending))]
  Cancelled {
    report: IndexingReport,
    pending: Vec<FileSet>,
  },
  #[error("Indexing of {} has failed: {source}", .report.project)]
  Failed {
    report: IndexingReport,
    pending: Vec<FileSet>,
    #[source]
    source: JobFailure,
  },
}

impl IndexingError {
  pub fn report(&self) -> &IndexingReport {
    match self {
      Self::Cancelled { report, .. } | Self::Failed { report, .. } => report,
    }
  }

  /// Files the caller has to resubmit.
  pub fn pending(&self) -> &[FileSet] {
    match self {
      Self::Cancelled { pending, .. } | Self::Failed { pending, .. } => pending,
    }
  }

  pub fn is_cancellation(&self) -> bool {
    matches!(self, Self::Cancelled { .. })
  }
}

fn pending_count(pending: &[FileSet]) -> usize {
  pending.iter().map(FileSet::len).sum()
}

/// One call's input.
pub struct IndexRequest {
  pub project: Arc<Project>,
  pub file_sets: Vec<FileSet>,
  pub cancel: CancellationToken,
  pub progress: Arc<dyn ProgressSink>,
  /// When false the whole job runs on the calling thread, without touching the pool.
  pub can_dispatch_to_workers: bool,
}

impl IndexRequest {
  pub fn new(project: Arc<Project>, file_sets: Vec<FileSet>) -> Self {
    Self {
      project,
      file_sets,
      cancel: CancellationToken::new(),
      progress: Arc::new(NoopProgress),
      can_dispatch_to_workers: true,
    }
  }

  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
    self.progress = progress;
    self
  }

  pub fn in_caller_thread(mut self) -> Self {
    self.can_dispatch_to_workers = false;
    self
  }
}

pub struct IndexRunnerBuilder {
  loader: Arc<dyn ContentLoader>,
  processor: Arc<dyn FileProcessor>,
  budget: Option<Arc<ByteBudget>>,
  size_predicate: Arc<dyn SizePredicate>,
  gate: Arc<dyn SuspensionGate>,
  threads: usize,
  poll_interval: Duration,
}

impl IndexRunnerBuilder {
  /// Share a budget between runners. Defaults to a private 20 MiB budget.
  pub fn budget(mut self, budget: Arc<ByteBudget>) -> Self {
    self.budget = Some(budget);
    self
  }

  pub fn size_predicate(mut self, size_predicate: Arc<dyn SizePredicate>) -> Self {
    self.size_predicate = size_predicate;
    self
  }

  pub fn suspension_gate(mut self, gate: Arc<dyn SuspensionGate>) -> Self {
    self.gate = gate;
    self
  }

  pub fn threads(mut self, threads: usize) -> Self {
    self.threads = threads.max(1);
    self
  }

  pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
    self.poll_interval = poll_interval;
    self
  }

  pub fn build(self) -> Result<IndexRunner, RunnerError> {
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(self.threads)
      .thread_name(|i| format!("index-worker-{i}"))
      .panic_handler(|panic| {
        error!(error = %panic_message(panic.as_ref()), "Panic escaped an indexing worker");
      })
      .build()?;

    let context = WorkerContext::new(
      self.budget.unwrap_or_else(|| ByteBudget::new(DEFAULT_MAX_BYTES_IN_MEMORY)),
      JobRegistry::new(),
      self.loader,
      self.processor,
      self.size_predicate,
      self.gate,
    );

    debug!(threads = self.threads, ceiling = context.budget.ceiling(), "Index runner ready");
    Ok(IndexRunner {
      context: Arc::new(context),
      pool,
      running_workers: Arc::new(AtomicUsize::new(0)),
      threads: self.threads,
      poll_interval: self.poll_interval,
    })
  }
}

/// Bounded-memory, multi-worker file indexer.
pub struct IndexRunner {
  context: Arc<WorkerContext>,
  pool: rayon::ThreadPool,
  /// Workers alive in `pool`, shared by every concurrent `index_files` call.
  running_workers: Arc<AtomicUsize>,
  threads: usize,
  poll_interval: Duration,
}

impl IndexRunner {
  pub fn builder(loader: Arc<dyn ContentLoader>, processor: Arc<dyn FileProcessor>) -> IndexRunnerBuilder {
    IndexRunnerBuilder {
      loader,
      processor,
      budget: None,
      size_predicate: Arc::new(SizeLimit::unlimited()),
      gate: Arc::new(NeverSuspended),
      threads: num_cpus::get().max(1),
      poll_interval: DEFAULT_POLL_INTERVAL,
    }
  }

  /// Builder preconfigured from `[runner]` settings: budget, threads, poll interval, size limit.
  pub fn from_config(
    config: &RunnerConfig,
    loader: Arc<dyn ContentLoader>,
    processor: Arc<dyn FileProcessor>,
  ) -> IndexRunnerBuilder {
    Self::builder(loader, processor)
      .budget(ByteBudget::with_wait_interval(
        config.max_bytes_in_memory,
        config.budget_wait(),
      ))
      .size_predicate(Arc::new(SizeLimit::from_config(config)))
      .threads(config.worker_threads())
      .poll_interval(config.poll_interval())
  }

  pub fn threads(&self) -> usize {
    self.threads
  }

  pub fn budget(&self) -> &Arc<ByteBudget> {
    &self.context.budget
  }

  /// Jobs currently submitted to this runner's workers.
  pub fn registry(&self) -> &Arc<JobRegistry> {
    &self.context.registry
  }

  /// Files handed to the processor over the runner's lifetime.
  pub fn attempts(&self) -> u64 {
    self.context.attempts()
  }

  pub fn successes(&self) -> u64 {
    self.context.successes()
  }

  /// Index every file of `request`, blocking until done, cancelled or failed.
  pub fn index_files(&self, request: IndexRequest) -> Result<IndexingReport, IndexingError> {
    let started = Instant::now();
    let IndexRequest {
      project,
      file_sets,
      cancel,
      progress,
      can_dispatch_to_workers,
    } = request;

    if file_sets.iter().all(FileSet::is_empty) {
      return Ok(IndexingReport {
        project: project.name().to_string(),
        total_files: 0,
        file_sets: file_sets.iter().map(|s| FileSetStatistics::new(s.name.clone())).collect(),
        visible_time: started.elapsed(),
      });
    }

    if cancel.is_cancelled() {
      return Err(IndexingError::Cancelled {
        report: IndexingReport {
          project: project.name().to_string(),
          total_files: file_sets.iter().map(FileSet::len).sum(),
          file_sets: file_sets.iter().map(|s| FileSetStatistics::new(s.name.clone())).collect(),
          visible_time: started.elapsed(),
        },
        pending: file_sets,
      });
    }

    let job = Arc::new(IndexingJob::new(
      self.context.registry.next_job_id(),
      project,
      &file_sets,
      cancel,
      progress,
    ));
    info!(
      project = %job.project(),
      job = job.id(),
      files = job.total_files(),
      sets = file_sets.len(),
      on_workers = can_dispatch_to_workers,
      "Starting indexing"
    );

    if can_dispatch_to_workers {
      self.run_on_workers(&job);
    } else {
      self.run_in_caller_thread(&job);
    }

    job.close();
    job.wait_claims_settled();
    let report = job.report(started.elapsed());

    match job.failure().cloned() {
      None => {
        info!(
          project = %report.project,
          processed = report.processed_files(),
          indexed = report.indexed_files(),
          too_large = report.too_large_files(),
          load_failed = report.load_failed_files(),
          failed = report.failed_files(),
          visible_ms = report.visible_time.as_millis() as u64,
          ratio = report.visible_to_all_threads_time_ratio(),
          "Indexing finished"
        );
        Ok(report)
      }
      Some(failure) if failure.is_cancellation() => {
        let pending = job.drain_pending();
        info!(
          project = %report.project,
          processed = report.processed_files(),
          pending = pending_count(&pending),
          reason = %failure,
          "Indexing cancelled"
        );
        Err(IndexingError::Cancelled { report, pending })
      }
      Some(failure) => {
        let pending = job.drain_pending();
        error!(project = %report.project, error = %failure, "Indexing failed");
        Err(IndexingError::Failed {
          report,
          pending,
          source: failure,
        })
      }
    }
  }

  fn run_on_workers(&self, job: &Arc<IndexingJob>) {
    let _registration = self.context.registry.register(Arc::clone(job));

    loop {
      if let Some(failure) = stop_reason(job) {
        job.fail(failure);
        break;
      }
      if job.failure().is_some() {
        break;
      }
      // Workers exit when everything is suspended; bring them back each poll.
      self.top_up_workers();
      if job.await_all_files_processed(self.poll_interval) {
        break;
      }
    }
  }

  fn top_up_workers(&self) {
    let missing = self.threads.saturating_sub(self.running_workers.load(Ordering::Acquire));
    for _ in 0..missing {
      self.running_workers.fetch_add(1, Ordering::AcqRel);
      let context = Arc::clone(&self.context);
      let running = Arc::clone(&self.running_workers);
      let worker_id = context.next_worker_id();
      self.pool.spawn(move || {
        let _running = RunningWorker(running);
        context.index_jobs_fairly(worker_id);
      });
    }
  }

  fn run_in_caller_thread(&self, job: &Arc<IndexingJob>) {
    while !job.are_all_files_processed() {
      if let Some(failure) = stop_reason(job) {
        job.fail(failure);
        break;
      }
      if job.failure().is_some() {
        break;
      }
      let result = catch_unwind(AssertUnwindSafe(|| self.context.index_one_file(job)));
      match result {
        Ok(Ok(())) => {}
        Ok(Err(failure)) => {
          job.fail(failure);
          break;
        }
        Err(panic) => {
          let message = panic_message(panic.as_ref());
          error!(project = %job.project(), error = %message, "Indexing panicked on the calling thread");
          job.fail(JobFailure::Infrastructure(message));
          break;
        }
      }
    }
  }
}

/// Decrements the running-worker count when a worker ends, panicking or not.
struct RunningWorker(Arc<AtomicUsize>);

impl Drop for RunningWorker {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::AcqRel);
  }
}

fn stop_reason(job: &IndexingJob) -> Option<JobFailure> {
  if job.project().is_disposed() {
    Some(JobFailure::OwnerDisposed)
  } else if job.cancel_token().is_cancelled() {
    Some(JobFailure::Cancelled)
  } else {
    None
  }
}
