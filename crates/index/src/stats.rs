//! Per-file-set statistics and the report handed back to callers.

use std::{collections::BTreeMap, time::Duration};

use indexer_core::FileRef;
use serde::Serialize;

use crate::{job::JobFailure, loader::LoadFailure};

/// How one claimed file ended. Every variant except `Fatal` counts the file as processed.
#[derive(Debug, Clone)]
pub enum FileOutcome {
  Success(IndexedFile),
  /// Rejected by the size predicate; never loaded.
  TooLarge,
  LoadFailed(LoadFailure),
  /// The processor failed (or panicked) on this file.
  ProcessingError(String),
  /// Infrastructure failure or cancellation. The file is requeued and the job stops.
  Fatal(JobFailure),
}

/// Measurements for a successfully indexed file.
#[derive(Debug, Clone, Default)]
pub struct IndexedFile {
  pub bytes: u64,
  pub entries: usize,
  pub type_hint: Option<String>,
  /// Load plus processing, measured from the claim.
  pub processing_time: Duration,
  pub content_loading_time: Duration,
  pub apply_time: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TypeStatistics {
  pub files: usize,
  pub bytes: u64,
  pub processing_time: Duration,
}

/// Statistics of one named file set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileSetStatistics {
  pub name: String,
  /// Files that reached a final outcome, whatever it was.
  pub processed_files: usize,
  pub indexed_files: usize,
  pub too_large_files: Vec<FileRef>,
  pub load_failed_files: Vec<FileRef>,
  pub failed_files: Vec<FileRef>,
  pub indexed_bytes: u64,
  pub entries: usize,
  pub processing_time: Duration,
  pub content_loading_time: Duration,
  pub apply_time: Duration,
  pub separately_applied_files: usize,
  pub by_type: BTreeMap<String, TypeStatistics>,
}

impl FileSetStatistics {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Default::default()
    }
  }

  /// Merge one file's outcome. `Fatal` outcomes are not counted here.
  pub fn record(&mut self, file: &FileRef, outcome: &FileOutcome) {
    match outcome {
      FileOutcome::Success(indexed) => {
        self.processed_files += 1;
        self.indexed_files += 1;
        self.indexed_bytes += indexed.bytes;
        self.entries += indexed.entries;
        self.processing_time += indexed.processing_time;
        self.content_loading_time += indexed.content_loading_time;
        if let Some(apply_time) = indexed.apply_time {
          self.apply_time += apply_time;
          self.separately_applied_files += 1;
        }
        let type_name = indexed.type_hint.as_deref().unwrap_or("<none>").to_string();
        let by_type = self.by_type.entry(type_name).or_default();
        by_type.files += 1;
        by_type.bytes += indexed.bytes;
        by_type.processing_time += indexed.processing_time;
      }
      FileOutcome::TooLarge => {
        self.processed_files += 1;
        self.too_large_files.push(file.clone());
      }
      FileOutcome::LoadFailed(_) => {
        self.processed_files += 1;
        self.load_failed_files.push(file.clone());
      }
      FileOutcome::ProcessingError(_) => {
        self.processed_files += 1;
        self.failed_files.push(file.clone());
      }
      FileOutcome::Fatal(_) => {}
    }
  }
}

/// Result of one `index_files` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexingReport {
  pub project: String,
  pub total_files: usize,
  pub file_sets: Vec<FileSetStatistics>,
  /// Wall-clock time of the call.
  pub visible_time: Duration,
}

impl IndexingReport {
  pub fn processed_files(&self) -> usize {
    self.file_sets.iter().map(|s| s.processed_files).sum()
  }

  pub fn indexed_files(&self) -> usize {
    self.file_sets.iter().map(|s| s.indexed_files).sum()
  }

  pub fn too_large_files(&self) -> usize {
    self.file_sets.iter().map(|s| s.too_large_files.len()).sum()
  }

  pub fn load_failed_files(&self) -> usize {
    self.file_sets.iter().map(|s| s.load_failed_files.len()).sum()
  }

  pub fn failed_files(&self) -> usize {
    self.file_sets.iter().map(|s| s.failed_files.len()).sum()
  }

  /// Processing time summed over every worker thread.
  pub fn processing_time_in_all_threads(&self) -> Duration {
    self.file_sets.iter().map(|s| s.processing_time).sum()
  }

  /// Wall-clock time divided by total worker time; 0 when nothing was processed.
  /// Values well below 1 mean the workers ran in parallel.
  pub fn visible_to_all_threads_time_ratio(&self) -> f64 {
    let all_threads = self.processing_time_in_all_threads();
    if all_threads.is_zero() {
      0.0
    } else {
      self.visible_time.as_secs_f64() / all_threads.as_secs_f64()
    }
  }

  pub fn file_set(&self, name: &str) -> Option<&FileSetStatistics> {
    self.file_sets.iter().find(|s| s.name == name)
  }
}
