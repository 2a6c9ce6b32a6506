//! Configuration for the indexing runner with per-project overrides.
//!
//! Config priority: project-relative (.indexer/config.toml) > user (~/.config/indexer/config.toml) > defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised when an explicitly requested config file can't be used.
///
/// Implicit lookups (`load_for_project`) never fail; they fall back to defaults.
#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Failed to read config {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
  #[error("Invalid config: {0}")]
  Invalid(String),
}

// ============================================================================
// Runner Configuration
// ============================================================================

/// Soft ceiling on bytes of file content held in memory at once (20 MiB).
pub const DEFAULT_MAX_BYTES_IN_MEMORY: u64 = 20 * 1024 * 1024;

/// Files above this size are skipped unless their extension is exempt (2.5 MB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2_500_000;

/// Indexing runner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
  /// Soft ceiling on loaded file bytes across all running jobs (default: 20 MiB).
  /// One file is allowed to push usage past the ceiling.
  pub max_bytes_in_memory: u64,

  /// Number of worker threads (default: 0 = number of CPUs minus one, at least 1)
  pub indexing_threads: usize,

  /// How often the submitting thread re-checks cancellation and worker liveness (default: 100)
  pub poll_interval_ms: u64,

  /// Upper bound on a single budget wait before cancellation is re-checked (default: 100)
  pub budget_wait_ms: u64,

  /// Files larger than this are reported as too large and never loaded (default: 2.5 MB)
  pub max_file_size: u64,

  /// Extensions (without dot) exempt from `max_file_size`
  pub unlimited_extensions: Vec<String>,

  /// Block size used by the filesystem loader between cancellation checks (default: 64 KiB)
  pub read_block_size: usize,
}

impl Default for RunnerConfig {
  fn default() -> Self {
    Self {
      max_bytes_in_memory: DEFAULT_MAX_BYTES_IN_MEMORY,
      indexing_threads: 0,
      poll_interval_ms: 100,
      budget_wait_ms: 100,
      max_file_size: DEFAULT_MAX_FILE_SIZE,
      unlimited_extensions: Vec::new(),
      read_block_size: 64 * 1024,
    }
  }
}

impl RunnerConfig {
  /// Resolved worker count. `0` means "all but one CPU".
  pub fn worker_threads(&self) -> usize {
    if self.indexing_threads == 0 {
      num_cpus::get().saturating_sub(1).max(1)
    } else {
      self.indexing_threads
    }
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms.max(1))
  }

  pub fn budget_wait(&self) -> Duration {
    Duration::from_millis(self.budget_wait_ms.max(1))
  }

  /// Reject values the runner can't work with.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.max_bytes_in_memory == 0 {
      return Err(ConfigError::Invalid("runner.max_bytes_in_memory must be > 0".into()));
    }
    if self.read_block_size == 0 {
      return Err(ConfigError::Invalid("runner.read_block_size must be > 0".into()));
    }
    Ok(())
  }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  /// Default: "info"
  pub level: String,

  /// Include the module target in log lines (default: true)
  pub with_target: bool,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      with_target: true,
    }
  }
}

// ============================================================================
// Main Configuration
// ============================================================================

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
  /// Indexing runner settings
  #[serde(default)]
  pub runner: RunnerConfig,

  /// Logging settings
  #[serde(default)]
  pub logging: LoggingConfig,
}

impl Config {
  /// Load config for a project, with fallback to user config
  pub fn load_for_project(project_path: &Path) -> Self {
    // Try project-relative first
    let project_config = Self::project_config_path(project_path);
    if project_config.exists()
      && let Ok(content) = std::fs::read_to_string(&project_config)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    // Fall back to user config
    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(content) = std::fs::read_to_string(&user_config_path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    Self::default()
  }

  /// Load an explicitly named config file. Unlike `load_for_project`, errors are reported.
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    config.runner.validate()?;
    Ok(config)
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("indexer").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("indexer").join("config.toml"))
  }

  /// Get the project-relative config path
  pub fn project_config_path(project_path: &Path) -> PathBuf {
    project_path.join(".indexer").join("config.toml")
  }

  /// Serialize to a TOML document, as written by `indexer config show`.
  pub fn to_toml(&self) -> String {
    toml::to_string_pretty(self).unwrap_or_default()
  }
}
