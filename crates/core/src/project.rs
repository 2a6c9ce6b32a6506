//! Owner and file model shared by the runner and its callers.

use serde::{Serialize, Serializer};
use std::{
  fmt,
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

/// Cheap, hashable handle to a file queued for indexing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileRef(Arc<Path>);

impl FileRef {
  pub fn new(path: impl AsRef<Path>) -> Self {
    Self(Arc::from(path.as_ref()))
  }

  pub fn path(&self) -> &Path {
    &self.0
  }

  /// Extension without the dot, used as the processor's type hint.
  pub fn extension(&self) -> Option<&str> {
    self.0.extension().and_then(|e| e.to_str())
  }

  pub fn file_name(&self) -> Option<&str> {
    self.0.file_name().and_then(|n| n.to_str())
  }
}

impl fmt::Display for FileRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.display())
  }
}

impl From<&Path> for FileRef {
  fn from(path: &Path) -> Self {
    Self::new(path)
  }
}

impl From<PathBuf> for FileRef {
  fn from(path: PathBuf) -> Self {
    Self(Arc::from(path))
  }
}

impl From<&str> for FileRef {
  fn from(path: &str) -> Self {
    Self::new(path)
  }
}

impl Serialize for FileRef {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&self.0.display())
  }
}

/// A named subset of a job's files, used only for attributing statistics.
#[derive(Debug, Clone)]
pub struct FileSet {
  pub name: String,
  pub files: Vec<FileRef>,
}

impl FileSet {
  pub fn new<I, F>(name: impl Into<String>, files: I) -> Self
  where
    I: IntoIterator<Item = F>,
    F: Into<FileRef>,
  {
    Self {
      name: name.into(),
      files: files.into_iter().map(Into::into).collect(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }
}

/// The owner of an indexing job.
///
/// The runner only needs a name for logs, an optional base path for presentable
/// locations, and a disposal flag: a disposed project stops its running jobs.
#[derive(Debug)]
pub struct Project {
  name: String,
  base_path: Option<PathBuf>,
  disposed: AtomicBool,
}

impl Project {
  pub fn new(name: impl Into<String>) -> Arc<Self> {
    Arc::new(Self {
      name: name.into(),
      base_path: None,
      disposed: AtomicBool::new(false),
    })
  }

  pub fn with_base_path(name: impl Into<String>, base_path: impl Into<PathBuf>) -> Arc<Self> {
    Arc::new(Self {
      name: name.into(),
      base_path: Some(base_path.into()),
      disposed: AtomicBool::new(false),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn base_path(&self) -> Option<&Path> {
    self.base_path.as_deref()
  }

  pub fn is_disposed(&self) -> bool {
    self.disposed.load(Ordering::Acquire)
  }

  pub fn dispose(&self) {
    self.disposed.store(true, Ordering::Release);
  }

  /// Location shown while a file is being indexed.
  ///
  /// Files strictly under the base path render as `<base dir name>/<relative path>`,
  /// anything else as its full path.
  pub fn presentable_location(&self, file: &FileRef) -> String {
    let path = file.path();
    if let Some(base) = self.base_path()
      && let Ok(relative) = path.strip_prefix(base)
      && !relative.as_os_str().is_empty()
      && let Some(dir_name) = base.file_name()
    {
      return Path::new(dir_name).join(relative).display().to_string();
    }
    if path == Path::new("/") {
      return file.file_name().unwrap_or("/").to_string();
    }
    path.display().to_string()
  }
}

impl fmt::Display for Project {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name)
  }
}
