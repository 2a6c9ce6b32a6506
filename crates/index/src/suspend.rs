//! Externally toggled pause of a project's indexing.

use dashmap::DashSet;
use indexer_core::Project;
use tracing::info;

/// Polled by workers before they take a file from a job. Never pushed.
pub trait SuspensionGate: Send + Sync {
  fn is_suspended(&self, project: &Project) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NeverSuspended;

impl SuspensionGate for NeverSuspended {
  fn is_suspended(&self, _project: &Project) -> bool {
    false
  }
}

/// Suspension flags keyed by project name.
#[derive(Debug, Default)]
pub struct ProjectSuspender {
  suspended: DashSet<String>,
}

impl ProjectSuspender {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn suspend(&self, project: &Project) {
    if self.suspended.insert(project.name().to_string()) {
      info!(project = %project, "Indexing suspended");
    }
  }

  pub fn resume(&self, project: &Project) {
    if self.suspended.remove(project.name()).is_some() {
      info!(project = %project, "Indexing resumed");
    }
  }
}

impl SuspensionGate for ProjectSuspender {
  fn is_suspended(&self, project: &Project) -> bool {
    self.suspended.contains(project.name())
  }
}
