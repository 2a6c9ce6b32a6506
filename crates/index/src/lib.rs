//! Bounded-memory, multi-worker file indexing.
//!
//! Callers hand an [`IndexRunner`] named sets of files; workers load each file
//! within a shared [`ByteBudget`], feed it to a [`FileProcessor`], and report
//! per-set statistics. Jobs from different callers share the worker pool
//! round-robin, one file per job per pass.

pub mod budget;
pub mod job;
pub mod loader;
pub mod processor;
pub mod progress;
pub mod registry;
pub mod runner;
pub mod stats;
pub mod suspend;
mod worker;

#[cfg(test)]
mod __tests__;

pub use budget::{BudgetError, BudgetReservation, ByteBudget};
pub use job::{IndexingJob, JobFailure, JobState};
pub use loader::{
  ContentLoader, FsContentLoader, LoadError, LoadFailure, LoadFailureKind, LoadedContent, SizeLimit, SizePredicate,
};
pub use processor::{AppliedResult, FileProcessor, ProcessingError};
pub use progress::{NoopProgress, ProgressSink};
pub use registry::JobRegistry;
pub use runner::{IndexRequest, IndexRunner, IndexRunnerBuilder, IndexingError, RunnerError};
pub use stats::{FileOutcome, FileSetStatistics, IndexedFile, IndexingReport, TypeStatistics};
pub use suspend::{NeverSuspended, ProjectSuspender, SuspensionGate};
