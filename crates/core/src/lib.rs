pub mod config;
pub mod project;

pub use config::{Config, ConfigError, LoggingConfig, RunnerConfig};
pub use project::{FileRef, FileSet, Project};
