//! `indexer run`: index files given on the command line

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
};

use anyhow::{Context, Result};
use index::{
  AppliedResult, FileProcessor, FsContentLoader, IndexRequest, IndexRunner, IndexingError, IndexingReport,
  LoadedContent, ProcessingError, ProgressSink,
};
use indexer_core::{Config, FileSet, Project};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct RunOptions {
  pub threads: Option<usize>,
  pub max_bytes: Option<u64>,
  pub json: bool,
}

/// Counts lines; one index entry per line.
#[derive(Debug, Default)]
pub struct LineCountProcessor {
  lines: AtomicU64,
}

impl LineCountProcessor {
  pub fn total_lines(&self) -> u64 {
    self.lines.load(Ordering::Relaxed)
  }
}

impl FileProcessor for LineCountProcessor {
  fn process(
    &self,
    _project: &Project,
    content: &LoadedContent,
    _type_hint: Option<&str>,
  ) -> Result<AppliedResult, ProcessingError> {
    if content.bytes().contains(&0) {
      return Err(ProcessingError::failed("binary content"));
    }
    let bytes = content.bytes();
    let mut lines = bytes.iter().filter(|b| **b == b'\n').count();
    if bytes.last().is_some_and(|b| *b != b'\n') {
      lines += 1;
    }
    self.lines.fetch_add(lines as u64, Ordering::Relaxed);
    Ok(AppliedResult::with_entries(lines))
  }
}

/// Progress sink that logs the file being indexed.
struct LogProgress;

impl ProgressSink for LogProgress {
  fn set_fraction(&self, fraction: f64) {
    debug!(percent = (fraction * 100.0).round() as u64, "Indexing progress");
  }

  fn set_location(&self, location: &str) {
    debug!(file = location, "Indexing");
  }
}

/// Group files into one file set per parent directory, in path order.
fn group_by_parent(cwd: &Path, files: &[PathBuf]) -> Vec<FileSet> {
  let mut groups: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
  for file in files {
    let file = if file.is_absolute() { file.clone() } else { cwd.join(file) };
    let parent = file.parent().map(Path::to_path_buf).unwrap_or_default();
    groups.entry(parent).or_default().push(file);
  }

  groups
    .into_iter()
    .map(|(parent, files)| {
      let name = parent
        .strip_prefix(cwd)
        .ok()
        .filter(|rel| !rel.as_os_str().is_empty())
        .map(|rel| rel.display().to_string())
        .unwrap_or_else(|| {
          if parent == cwd {
            ".".to_string()
          } else {
            parent.display().to_string()
          }
        });
      FileSet::new(name, files)
    })
    .collect()
}

pub async fn cmd_run(mut config: Config, options: RunOptions, files: Vec<PathBuf>) -> Result<()> {
  if let Some(threads) = options.threads {
    config.runner.indexing_threads = threads;
  }
  if let Some(max_bytes) = options.max_bytes {
    config.runner.max_bytes_in_memory = max_bytes;
  }
  config.runner.validate()?;

  let cwd = std::env::current_dir().context("reading current directory")?;
  let name = cwd
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| "indexer".to_string());
  let project = Project::with_base_path(name, &cwd);
  let file_sets = group_by_parent(&cwd, &files);

  let processor = Arc::new(LineCountProcessor::default());
  let runner = IndexRunner::from_config(
    &config.runner,
    Arc::new(FsContentLoader::from_config(&config.runner)),
    processor.clone(),
  )
  .build()?;

  let cancel = CancellationToken::new();
  let ctrl_c = {
    let cancel = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupted, cancelling indexing");
        cancel.cancel();
      }
    })
  };

  let request = IndexRequest::new(project, file_sets)
    .with_cancel(cancel)
    .with_progress(Arc::new(LogProgress));
  let result = tokio::task::spawn_blocking(move || runner.index_files(request))
    .await
    .context("indexing task panicked")?;
  ctrl_c.abort();

  match result {
    Ok(report) => print_report(&report, processor.total_lines(), options.json),
    Err(err) => {
      print_report(err.report(), processor.total_lines(), options.json)?;
      if let IndexingError::Cancelled { pending, .. } = &err {
        let pending: usize = pending.iter().map(FileSet::len).sum();
        eprintln!("{pending} file(s) were not indexed");
      }
      Err(err.into())
    }
  }
}

fn print_report(report: &IndexingReport, lines: u64, json: bool) -> Result<()> {
  if json {
    println!("{}", serde_json::to_string_pretty(report)?);
    return Ok(());
  }

  println!(
    "Indexed {}/{} files ({} lines) in {} ms",
    report.indexed_files(),
    report.total_files,
    lines,
    report.visible_time.as_millis()
  );
  for set in &report.file_sets {
    println!(
      "  {}: {} processed, {} indexed, {} too large, {} unreadable, {} failed, {} bytes",
      set.name,
      set.processed_files,
      set.indexed_files,
      set.too_large_files.len(),
      set.load_failed_files.len(),
      set.failed_files.len(),
      set.indexed_bytes
    );
  }
  let ratio = report.visible_to_all_threads_time_ratio();
  if ratio > 0.0 {
    println!("Wall clock / worker time: {ratio:.2}");
  }
  Ok(())
}
