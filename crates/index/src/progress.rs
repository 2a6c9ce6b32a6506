//! Best-effort progress reporting.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::debug;

/// Receives job progress. Called from worker threads.
pub trait ProgressSink: Send + Sync {
  /// Fraction of the job's files processed, in `0.0..=1.0`.
  fn set_fraction(&self, fraction: f64);

  /// Presentable location of the file currently being indexed.
  fn set_location(&self, location: &str);
}

/// Sink that drops every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
  fn set_fraction(&self, _fraction: f64) {}
  fn set_location(&self, _location: &str) {}
}

/// Run a sink call, swallowing panics. A misbehaving sink must not break indexing.
pub(crate) fn report(f: impl FnOnce()) {
  if catch_unwind(AssertUnwindSafe(f)).is_err() {
    debug!("Progress sink panicked, ignoring");
  }
}
