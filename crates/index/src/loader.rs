//! Loading file content for indexing.
//!
//! The runner asks a [`ContentLoader`] for a file's length, checks it against a
//! [`SizePredicate`], reserves that many bytes from the budget and only then
//! reads the content. Oversized files therefore never reach `load_content`.

use std::{collections::HashSet, fs::File, io::Read};

use indexer_core::{FileRef, RunnerConfig};
use tokio_util::sync::CancellationToken;

/// Bytes of one file, held until the processor is done with them.
#[derive(Debug, Clone)]
pub struct LoadedContent {
  file: FileRef,
  bytes: Vec<u8>,
}

impl LoadedContent {
  pub fn new(file: FileRef, bytes: Vec<u8>) -> Self {
    Self { file, bytes }
  }

  pub fn file(&self) -> &FileRef {
    &self.file
  }

  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }

  pub fn len(&self) -> usize {
    self.bytes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }
}

/// Cause category of a failed load. Decides the log level, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFailureKind {
  /// The file vanished; expected while the filesystem is still changing.
  NotFound,
  /// Stale handle, directory, out-of-range read.
  InvalidHandle,
  /// Anything else.
  Other,
}

impl LoadFailureKind {
  pub fn from_io(kind: std::io::ErrorKind) -> Self {
    use std::io::ErrorKind;
    match kind {
      ErrorKind::NotFound => Self::NotFound,
      ErrorKind::InvalidInput | ErrorKind::InvalidData | ErrorKind::UnexpectedEof | ErrorKind::IsADirectory => {
        Self::InvalidHandle
      }
      _ => Self::Other,
    }
  }

  pub fn log_level(self) -> tracing::Level {
    match self {
      Self::NotFound => tracing::Level::DEBUG,
      Self::InvalidHandle => tracing::Level::INFO,
      Self::Other => tracing::Level::ERROR,
    }
  }
}

/// A per-file load failure. The file counts as processed and the job goes on.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Failed to load {file}: {message}")]
pub struct LoadFailure {
  pub file: FileRef,
  pub kind: LoadFailureKind,
  pub message: String,
}

impl LoadFailure {
  pub fn new(file: FileRef, kind: LoadFailureKind, message: impl Into<String>) -> Self {
    Self {
      file,
      kind,
      message: message.into(),
    }
  }

  pub fn from_io(file: &FileRef, err: &std::io::Error) -> Self {
    Self::new(file.clone(), LoadFailureKind::from_io(err.kind()), err.to_string())
  }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
  #[error("File is too large for indexing: {0}")]
  TooLarge(FileRef),
  #[error(transparent)]
  Failed(#[from] LoadFailure),
  /// The load observed cancellation; the file must go back to the queue.
  #[error("Content loading cancelled")]
  Cancelled,
}

/// Source of file bytes.
pub trait ContentLoader: Send + Sync {
  /// Length of the file, without reading it.
  fn file_length(&self, file: &FileRef) -> Result<u64, LoadError>;

  /// Read the whole file. Long reads should return `LoadError::Cancelled` once `cancel` fires.
  fn load_content(&self, file: &FileRef, cancel: &CancellationToken) -> Result<LoadedContent, LoadError>;
}

/// Decides which files are too large to be indexed at all.
pub trait SizePredicate: Send + Sync {
  fn is_too_large(&self, file: &FileRef, length: u64) -> bool;
}

/// Size limit with per-extension exemptions.
#[derive(Debug, Clone, Default)]
pub struct SizeLimit {
  max_file_size: Option<u64>,
  unlimited_suffixes: HashSet<String>,
}

impl SizeLimit {
  pub fn new(max_file_size: u64) -> Self {
    Self {
      max_file_size: Some(max_file_size),
      unlimited_suffixes: HashSet::new(),
    }
  }

  /// No file is ever too large.
  pub fn unlimited() -> Self {
    Self::default()
  }

  pub fn from_config(config: &RunnerConfig) -> Self {
    config
      .unlimited_extensions
      .iter()
      .fold(Self::new(config.max_file_size), |limit, ext| limit.with_unlimited_extension(ext))
  }

  /// Exempt files whose name ends with `.<ext>` (e.g. `"min.js"`, `"json"`).
  pub fn with_unlimited_extension(mut self, ext: &str) -> Self {
    self
      .unlimited_suffixes
      .insert(format!(".{}", ext.trim_start_matches('.').to_lowercase()));
    self
  }

  fn is_exempt(&self, file: &FileRef) -> bool {
    let Some(name) = file.file_name() else {
      return false;
    };
    let name = name.to_lowercase();
    self.unlimited_suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()))
  }
}

impl SizePredicate for SizeLimit {
  fn is_too_large(&self, file: &FileRef, length: u64) -> bool {
    match self.max_file_size {
      Some(max) => length > max && !self.is_exempt(file),
      None => false,
    }
  }
}

/// Loader reading straight from the local filesystem in fixed-size blocks.
#[derive(Debug, Clone)]
pub struct FsContentLoader {
  block_size: usize,
}

impl Default for FsContentLoader {
  fn default() -> Self {
    Self { block_size: 64 * 1024 }
  }
}

impl FsContentLoader {
  pub fn new(block_size: usize) -> Self {
    Self {
      block_size: block_size.max(1),
    }
  }

  pub fn from_config(config: &RunnerConfig) -> Self {
    Self::new(config.read_block_size)
  }
}

impl ContentLoader for FsContentLoader {
  fn file_length(&self, file: &FileRef) -> Result<u64, LoadError> {
    let metadata = std::fs::metadata(file.path()).map_err(|e| LoadFailure::from_io(file, &e))?;
    if metadata.is_dir() {
      return Err(LoadFailure::new(file.clone(), LoadFailureKind::InvalidHandle, "is a directory").into());
    }
    Ok(metadata.len())
  }

  fn load_content(&self, file: &FileRef, cancel: &CancellationToken) -> Result<LoadedContent, LoadError> {
    let mut handle = File::open(file.path()).map_err(|e| LoadFailure::from_io(file, &e))?;
    let expected = handle.metadata().map(|m| m.len() as usize).unwrap_or(0);

    let mut bytes = Vec::with_capacity(expected);
    let mut block = vec![0u8; self.block_size];
    loop {
      if cancel.is_cancelled() {
        return Err(LoadError::Cancelled);
      }
      match handle.read(&mut block) {
        Ok(0) => break,
        Ok(n) => bytes.extend_from_slice(&block[..n]),
        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
        Err(e) => return Err(LoadFailure::from_io(file, &e).into()),
      }
    }

    Ok(LoadedContent::new(file.clone(), bytes))
  }
}
