//! The content-to-index contract the runner drives.

use std::time::Duration;

use indexer_core::Project;

use crate::loader::LoadedContent;

/// What a processor reports back after applying one file's index data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedResult {
  /// Number of index entries produced for the file.
  pub entries: usize,
  /// Time spent writing the values, when the processor applied them as a separate step.
  pub apply_time: Option<Duration>,
}

impl AppliedResult {
  pub fn with_entries(entries: usize) -> Self {
    Self {
      entries,
      apply_time: None,
    }
  }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessingError {
  /// The processor gave up because it was cancelled. The file goes back to the queue
  /// and the job is cancelled.
  #[error("Processing cancelled")]
  Cancelled,
  /// Indexing this one file failed. Logged and counted; the job continues.
  #[error("{0}")]
  Failed(String),
}

impl ProcessingError {
  pub fn failed(message: impl Into<String>) -> Self {
    Self::Failed(message.into())
  }
}

/// Turns loaded file content into applied index data.
///
/// Called concurrently from every worker thread. `type_hint` is the file's
/// extension, when it has one.
pub trait FileProcessor: Send + Sync {
  fn process(
    &self,
    project: &Project,
    content: &LoadedContent,
    type_hint: Option<&str>,
  ) -> Result<AppliedResult, ProcessingError>;
}

impl<F> FileProcessor for F
where
  F: Fn(&Project, &LoadedContent, Option<&str>) -> Result<AppliedResult, ProcessingError> + Send + Sync,
{
  fn process(
    &self,
    project: &Project,
    content: &LoadedContent,
    type_hint: Option<&str>,
  ) -> Result<AppliedResult, ProcessingError> {
    self(project, content, type_hint)
  }
}
