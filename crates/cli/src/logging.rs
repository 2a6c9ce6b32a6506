//! Logging setup for the CLI

use indexer_core::LoggingConfig;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Initialize console logging with defaults (info, `RUST_LOG` respected)
pub fn init_cli_logging() {
  init_logging(&LoggingConfig::default());
}

/// Initialize console logging from the `[logging]` config section.
///
/// Logs go to stderr so `--json` output on stdout stays machine-readable.
pub fn init_logging(config: &LoggingConfig) {
  let env_filter = EnvFilter::builder()
    .with_default_directive(parse_log_level(&config.level).into())
    .from_env_lossy();

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(config.with_target)
    .with_writer(std::io::stderr)
    .init();
}

/// Parse log level from config string
fn parse_log_level(level: &str) -> LevelFilter {
  match level.to_lowercase().as_str() {
    "off" => LevelFilter::OFF,
    "error" => LevelFilter::ERROR,
    "warn" => LevelFilter::WARN,
    "info" => LevelFilter::INFO,
    "debug" => LevelFilter::DEBUG,
    "trace" => LevelFilter::TRACE,
    _ => LevelFilter::INFO,
  }
}
