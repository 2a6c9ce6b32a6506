//! Outcomes, statistics and memory bounds of single jobs.

use std::{
  fs,
  sync::Arc,
  time::{Duration, Instant},
};

use indexer_core::{FileRef, FileSet, Project, RunnerConfig};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use super::helpers::*;
use crate::{
  ByteBudget, FsContentLoader, IndexRequest, IndexRunner, IndexingError, JobFailure, ProgressSink, SizeLimit,
};

#[test]
fn test_mixed_outcomes_count_every_file() {
  let loader = Arc::new(
    MemoryLoader::new()
      .with_sized("/p/a.bin", 5_000)
      .with_file("/p/c.rs", "fn main() {}"),
  );
  let processor = Arc::new(TestProcessor::new());
  let runner = builder(&loader, &processor)
    .size_predicate(Arc::new(SizeLimit::new(1_000)))
    .threads(2)
    .build()
    .unwrap();

  let request = IndexRequest::new(
    Project::new("p"),
    vec![FileSet::new("src", ["/p/a.bin", "/p/b.rs", "/p/c.rs"])],
  );
  let report = runner.index_files(request).unwrap();

  let stats = report.file_set("src").unwrap();
  assert_eq!(report.total_files, 3);
  assert_eq!(stats.processed_files, 3);
  assert_eq!(stats.indexed_files, 1);
  assert_eq!(stats.too_large_files, vec![FileRef::new("/p/a.bin")]);
  assert_eq!(stats.load_failed_files, vec![FileRef::new("/p/b.rs")]);
  assert!(stats.failed_files.is_empty());
  assert_eq!(stats.by_type["rs"].files, 1);

  assert!(!loader.was_loaded("/p/a.bin"), "oversized files are never loaded");
  assert!(loader.was_loaded("/p/c.rs"));
  assert_eq!(processor.calls(), 1);
  assert_eq!(runner.budget().reserved(), 0);
}

#[test]
fn test_processed_counts_sum_to_total_across_sets() {
  let loader = Arc::new(
    MemoryLoader::new()
      .with_many("/p/a", 10, 10)
      .with_many("/p/b", 10, 10),
  );
  let processor = Arc::new(TestProcessor::new());
  let runner = builder(&loader, &processor).threads(4).build().unwrap();

  let a = numbered("/p/a", 10);
  let mut b = numbered("/p/b", 10);
  // Listed twice: indexed once, attributed to the last set.
  b.push(a[0].clone());

  let report = runner
    .index_files(IndexRequest::new(
      Project::new("p"),
      vec![file_set("a", &a), file_set("b", &b)],
    ))
    .unwrap();

  assert_eq!(report.total_files, 20);
  assert_eq!(report.processed_files(), 20);
  assert_eq!(report.file_set("a").unwrap().processed_files, 9);
  assert_eq!(report.file_set("b").unwrap().processed_files, 11);
  assert_eq!(processor.calls(), 20);
  assert_eq!(processor.processed_files().len(), 20);
}

#[test]
fn test_processor_failures_and_panics_do_not_stop_the_job() {
  let loader = Arc::new(
    MemoryLoader::new()
      .with_file("/p/ok.rs", "ok")
      .with_file("/p/bad.rs", "bad")
      .with_file("/p/boom.rs", "boom"),
  );
  let processor = Arc::new(TestProcessor::new().failing_on("/p/bad.rs").panicking_on("/p/boom.rs"));
  let runner = builder(&loader, &processor).threads(2).build().unwrap();

  let report = runner
    .index_files(IndexRequest::new(
      Project::new("p"),
      vec![FileSet::new("src", ["/p/ok.rs", "/p/bad.rs", "/p/boom.rs"])],
    ))
    .unwrap();

  let stats = report.file_set("src").unwrap();
  assert_eq!(stats.processed_files, 3);
  assert_eq!(stats.indexed_files, 1);
  let mut failed = stats.failed_files.clone();
  failed.sort();
  assert_eq!(failed, vec![FileRef::new("/p/bad.rs"), FileRef::new("/p/boom.rs")]);
  assert_eq!(runner.attempts(), 3);
  assert_eq!(runner.successes(), 1);
}

#[test]
fn test_loader_panic_fails_the_job_and_keeps_the_file() {
  let loader = Arc::new(
    MemoryLoader::new()
      .with_file("/p/a.rs", "a")
      .with_file("/p/b.rs", "b")
      .panicking_on("/p/b.rs"),
  );
  let processor = Arc::new(TestProcessor::new());
  let runner = builder(&loader, &processor).threads(1).build().unwrap();

  let err = runner
    .index_files(IndexRequest::new(
      Project::new("broken"),
      vec![FileSet::new("src", ["/p/a.rs", "/p/b.rs"])],
    ))
    .unwrap_err();

  match &err {
    IndexingError::Failed { source, pending, report } => {
      assert!(matches!(source, JobFailure::Infrastructure(message) if message.contains("loader exploded")));
      assert_eq!(pending_files(pending), 1);
      assert_eq!(pending[0].files, vec![FileRef::new("/p/b.rs")]);
      assert_eq!(report.processed_files(), 1);
    }
    other => panic!("expected failure, got {other:?}"),
  }
  assert!(err.to_string().starts_with("Indexing of broken has failed"));
  assert_eq!(runner.budget().reserved(), 0, "budget released after the panic");
  assert!(runner.registry().is_empty());
}

#[test]
fn test_loader_panic_with_busy_workers_drains_every_claim() {
  let mut paths = numbered("/p/f", 20);
  paths.insert(2, "/p/boom.txt".to_string());
  let loader = Arc::new(
    MemoryLoader::new()
      .with_many("/p/f", 20, 40)
      .with_sized("/p/boom.txt", 40)
      .panicking_on("/p/boom.txt"),
  );
  let processor = Arc::new(TestProcessor::new().with_delay(Duration::from_millis(20)));
  // Two 40-byte files fit under the ceiling, so the other workers queue on the budget.
  let budget = ByteBudget::with_wait_interval(60, Duration::from_millis(5));
  let runner = builder(&loader, &processor)
    .budget(Arc::clone(&budget))
    .threads(4)
    .build()
    .unwrap();

  let started = Instant::now();
  let err = runner
    .index_files(IndexRequest::new(Project::new("broken"), vec![file_set("all", &paths)]))
    .unwrap_err();
  let elapsed = started.elapsed();

  let IndexingError::Failed { source, pending, report } = &err else {
    panic!("expected failure, got {err:?}");
  };
  assert!(matches!(source, JobFailure::Infrastructure(message) if message.contains("loader exploded")));
  assert!(elapsed < Duration::from_secs(2), "failed job took {elapsed:?} to drain");
  assert_eq!(report.processed_files() + pending_files(pending), 21);
  assert!(pending[0].files.contains(&FileRef::new("/p/boom.txt")));
  assert!(!processor.processed_files().contains(&FileRef::new("/p/boom.txt")));
  assert_eq!(budget.reserved(), 0);
  assert!(runner.registry().is_empty());
}

#[test]
fn test_empty_request_returns_immediately() {
  let loader = Arc::new(MemoryLoader::new());
  let processor = Arc::new(TestProcessor::new());
  let runner = builder(&loader, &processor).build().unwrap();

  let report = runner
    .index_files(IndexRequest::new(
      Project::new("p"),
      vec![FileSet::new("a", Vec::<&str>::new()), FileSet::new("b", Vec::<&str>::new())],
    ))
    .unwrap();

  assert_eq!(report.total_files, 0);
  assert_eq!(report.file_sets.len(), 2);
  assert_eq!(report.file_sets[1].name, "b");
  assert_eq!(loader.length_calls(), 0);
}

#[test]
fn test_memory_stays_under_ceiling_plus_one_file() {
  const CEILING: u64 = 1_000;
  const FILE_SIZE: usize = 300;

  let loader = Arc::new(MemoryLoader::new().with_many("/p/f", 60, FILE_SIZE));
  let processor = Arc::new(TestProcessor::new().with_delay(Duration::from_millis(2)));
  let budget = ByteBudget::with_wait_interval(CEILING, Duration::from_millis(5));
  let runner = builder(&loader, &processor)
    .budget(Arc::clone(&budget))
    .threads(8)
    .build()
    .unwrap();

  let report = runner
    .index_files(IndexRequest::new(
      Project::new("p"),
      vec![file_set("all", &numbered("/p/f", 60))],
    ))
    .unwrap();

  assert_eq!(report.indexed_files(), 60);
  assert!(budget.peak() >= FILE_SIZE as u64);
  assert!(
    budget.peak() < CEILING + FILE_SIZE as u64,
    "peak {} exceeded ceiling plus one file",
    budget.peak()
  );
  assert_eq!(budget.reserved(), 0);
}

#[test]
fn test_progress_reaches_one_with_presentable_locations() {
  let loader = Arc::new(
    MemoryLoader::new()
      .with_file("/work/proj/a.rs", "a")
      .with_file("/work/proj/b.rs", "b"),
  );
  let processor = Arc::new(TestProcessor::new());
  let runner = builder(&loader, &processor).threads(1).build().unwrap();
  let progress = Arc::new(RecordingProgress::default());

  runner
    .index_files(
      IndexRequest::new(
        Project::with_base_path("proj", "/work/proj"),
        vec![FileSet::new("src", ["/work/proj/a.rs", "/work/proj/b.rs"])],
      )
      .with_progress(progress.clone()),
    )
    .unwrap();

  assert_eq!(progress.fractions.lock().unwrap().last().copied(), Some(1.0));
  let mut locations = progress.locations.lock().unwrap().clone();
  locations.sort();
  assert_eq!(locations, vec!["proj/a.rs".to_string(), "proj/b.rs".to_string()]);
}

#[test]
fn test_panicking_progress_sink_is_ignored() {
  let loader = Arc::new(MemoryLoader::new().with_many("/p/f", 5, 10));
  let processor = Arc::new(TestProcessor::new());
  let runner = builder(&loader, &processor).threads(2).build().unwrap();
  let progress: Arc<dyn ProgressSink> = Arc::new(PanickingProgress);

  let report = runner
    .index_files(
      IndexRequest::new(Project::new("p"), vec![file_set("s", &numbered("/p/f", 5))]).with_progress(progress),
    )
    .unwrap();

  assert_eq!(report.indexed_files(), 5);
}

#[test]
fn test_filesystem_run_from_config() {
  let dir = TempDir::new().unwrap();
  fs::write(dir.path().join("small.txt"), "one\ntwo\n").unwrap();
  fs::write(dir.path().join("big.log"), vec![b'x'; 4_096]).unwrap();
  fs::write(dir.path().join("huge.txt"), vec![b'y'; 4_096]).unwrap();

  let config = RunnerConfig {
    indexing_threads: 2,
    max_file_size: 1_024,
    unlimited_extensions: vec!["log".to_string()],
    ..Default::default()
  };
  let processor = Arc::new(TestProcessor::new());
  let runner = IndexRunner::from_config(&config, Arc::new(FsContentLoader::from_config(&config)), processor.clone())
    .poll_interval(TEST_POLL)
    .build()
    .unwrap();
  assert_eq!(runner.threads(), 2);
  assert_eq!(runner.budget().ceiling(), config.max_bytes_in_memory);

  let files = ["small.txt", "big.log", "huge.txt", "missing.txt"].map(|name| dir.path().join(name));
  let report = runner
    .index_files(IndexRequest::new(
      Project::with_base_path("tmp", dir.path()),
      vec![FileSet::new("dir", files)],
    ))
    .unwrap();

  let stats = report.file_set("dir").unwrap();
  assert_eq!(stats.processed_files, 4);
  assert_eq!(stats.indexed_files, 2);
  assert_eq!(stats.indexed_bytes, 8 + 4_096);
  assert_eq!(stats.too_large_files, vec![FileRef::new(dir.path().join("huge.txt"))]);
  assert_eq!(stats.load_failed_files, vec![FileRef::new(dir.path().join("missing.txt"))]);

  let mut hints: Vec<_> = processor.processed().into_iter().filter_map(|p| p.type_hint).collect();
  hints.sort();
  assert_eq!(hints, vec!["log".to_string(), "txt".to_string()]);
}
