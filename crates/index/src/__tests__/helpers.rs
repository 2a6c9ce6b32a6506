//! Test doubles for runner scenarios.
//!
//! `MemoryLoader` serves files from a map and counts every call; `TestProcessor`
//! records what it indexed and can be told to sleep, fail, panic or cancel on
//! specific files.

use std::{
  collections::{HashMap, HashSet},
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  thread::ThreadId,
  time::Duration,
};

use indexer_core::{FileRef, FileSet, Project};
use tokio_util::sync::CancellationToken;

use crate::{
  AppliedResult, ContentLoader, FileProcessor, IndexRunner, IndexRunnerBuilder, LoadError, LoadFailure,
  LoadFailureKind, LoadedContent, ProcessingError, ProgressSink, ProjectSuspender, SuspensionGate,
};

/// Short poll so suspension and cancellation tests don't sit out 100ms ticks.
pub const TEST_POLL: Duration = Duration::from_millis(20);

#[derive(Default)]
pub struct MemoryLoader {
  files: HashMap<FileRef, Vec<u8>>,
  panic_on: HashSet<FileRef>,
  length_calls: AtomicUsize,
  loaded: Mutex<Vec<FileRef>>,
}

impl MemoryLoader {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_file(mut self, path: &str, content: &str) -> Self {
    self.files.insert(FileRef::new(path), content.as_bytes().to_vec());
    self
  }

  pub fn with_sized(mut self, path: &str, size: usize) -> Self {
    self.files.insert(FileRef::new(path), vec![b'x'; size]);
    self
  }

  /// `count` files named `{prefix}{i}.txt`, each `size` bytes.
  pub fn with_many(mut self, prefix: &str, count: usize, size: usize) -> Self {
    for path in numbered(prefix, count) {
      self.files.insert(FileRef::new(path), vec![b'x'; size]);
    }
    self
  }

  pub fn panicking_on(mut self, path: &str) -> Self {
    self.panic_on.insert(FileRef::new(path));
    self
  }

  pub fn length_calls(&self) -> usize {
    self.length_calls.load(Ordering::SeqCst)
  }

  pub fn loads(&self) -> usize {
    self.loaded.lock().unwrap().len()
  }

  pub fn was_loaded(&self, path: &str) -> bool {
    self.loaded.lock().unwrap().contains(&FileRef::new(path))
  }
}

impl ContentLoader for MemoryLoader {
  fn file_length(&self, file: &FileRef) -> Result<u64, LoadError> {
    self.length_calls.fetch_add(1, Ordering::SeqCst);
    match self.files.get(file) {
      Some(content) => Ok(content.len() as u64),
      None => Err(LoadFailure::new(file.clone(), LoadFailureKind::NotFound, "no such file").into()),
    }
  }

  fn load_content(&self, file: &FileRef, cancel: &CancellationToken) -> Result<LoadedContent, LoadError> {
    if self.panic_on.contains(file) {
      panic!("loader exploded on {file}");
    }
    if cancel.is_cancelled() {
      return Err(LoadError::Cancelled);
    }
    let content = self
      .files
      .get(file)
      .ok_or_else(|| LoadFailure::new(file.clone(), LoadFailureKind::NotFound, "no such file"))?;
    self.loaded.lock().unwrap().push(file.clone());
    Ok(LoadedContent::new(file.clone(), content.clone()))
  }
}

#[derive(Debug, Clone)]
pub struct Processed {
  pub project: String,
  pub file: FileRef,
  pub type_hint: Option<String>,
  pub thread: ThreadId,
}

#[derive(Default)]
pub struct TestProcessor {
  delay: Duration,
  fail_on: HashSet<FileRef>,
  panic_on: HashSet<FileRef>,
  cancel_on: HashSet<FileRef>,
  /// Cancel this token once `n` files have been processed.
  cancel_after: Option<(usize, CancellationToken)>,
  /// Dispose this project once `n` files have been processed.
  dispose_after: Option<(usize, Arc<Project>)>,
  calls: AtomicUsize,
  processed: Mutex<Vec<Processed>>,
}

impl TestProcessor {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn failing_on(mut self, path: &str) -> Self {
    self.fail_on.insert(FileRef::new(path));
    self
  }

  pub fn panicking_on(mut self, path: &str) -> Self {
    self.panic_on.insert(FileRef::new(path));
    self
  }

  pub fn cancelling_on(mut self, path: &str) -> Self {
    self.cancel_on.insert(FileRef::new(path));
    self
  }

  pub fn cancel_after(mut self, files: usize, cancel: CancellationToken) -> Self {
    self.cancel_after = Some((files, cancel));
    self
  }

  pub fn dispose_after(mut self, files: usize, project: Arc<Project>) -> Self {
    self.dispose_after = Some((files, project));
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn processed(&self) -> Vec<Processed> {
    self.processed.lock().unwrap().clone()
  }

  pub fn processed_for(&self, project: &str) -> usize {
    self.processed.lock().unwrap().iter().filter(|p| p.project == project).count()
  }

  pub fn processed_files(&self) -> HashSet<FileRef> {
    self.processed.lock().unwrap().iter().map(|p| p.file.clone()).collect()
  }
}

impl FileProcessor for TestProcessor {
  fn process(
    &self,
    project: &Project,
    content: &LoadedContent,
    type_hint: Option<&str>,
  ) -> Result<AppliedResult, ProcessingError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let file = content.file();
    if !self.delay.is_zero() {
      std::thread::sleep(self.delay);
    }
    if self.panic_on.contains(file) {
      panic!("processor exploded on {file}");
    }
    if self.fail_on.contains(file) {
      return Err(ProcessingError::failed(format!("cannot index {file}")));
    }
    if self.cancel_on.contains(file) {
      return Err(ProcessingError::Cancelled);
    }

    let done = {
      let mut processed = self.processed.lock().unwrap();
      processed.push(Processed {
        project: project.name().to_string(),
        file: file.clone(),
        type_hint: type_hint.map(str::to_string),
        thread: std::thread::current().id(),
      });
      processed.len()
    };
    if let Some((after, cancel)) = &self.cancel_after
      && done >= *after
    {
      cancel.cancel();
    }
    if let Some((after, project)) = &self.dispose_after
      && done >= *after
    {
      project.dispose();
    }

    Ok(AppliedResult::with_entries(content.len()))
  }
}

#[derive(Default)]
pub struct RecordingProgress {
  pub fractions: Mutex<Vec<f64>>,
  pub locations: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingProgress {
  fn set_fraction(&self, fraction: f64) {
    self.fractions.lock().unwrap().push(fraction);
  }

  fn set_location(&self, location: &str) {
    self.locations.lock().unwrap().push(location.to_string());
  }
}

/// Sink that panics on every call.
pub struct PanickingProgress;

impl ProgressSink for PanickingProgress {
  fn set_fraction(&self, _fraction: f64) {
    panic!("progress sink is broken");
  }

  fn set_location(&self, _location: &str) {
    panic!("progress sink is broken");
  }
}

/// `ProjectSuspender` that counts how often workers ask it.
#[derive(Default)]
pub struct CountingGate {
  pub suspender: ProjectSuspender,
  polls: AtomicUsize,
}

impl CountingGate {
  pub fn polls(&self) -> usize {
    self.polls.load(Ordering::SeqCst)
  }
}

impl SuspensionGate for CountingGate {
  fn is_suspended(&self, project: &Project) -> bool {
    self.polls.fetch_add(1, Ordering::SeqCst);
    self.suspender.is_suspended(project)
  }
}

pub fn numbered(prefix: &str, count: usize) -> Vec<String> {
  (0..count).map(|i| format!("{prefix}{i}.txt")).collect()
}

pub fn file_set(name: &str, paths: &[String]) -> FileSet {
  FileSet::new(name, paths.iter().map(String::as_str))
}

pub fn builder(loader: &Arc<MemoryLoader>, processor: &Arc<TestProcessor>) -> IndexRunnerBuilder {
  IndexRunner::builder(loader.clone(), processor.clone()).poll_interval(TEST_POLL)
}

pub fn pending_files(pending: &[FileSet]) -> usize {
  pending.iter().map(FileSet::len).sum()
}
