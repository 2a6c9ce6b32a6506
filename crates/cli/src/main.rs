//! indexer CLI - bounded-memory file indexing

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod logging;

use commands::{RunOptions, cmd_config_show, cmd_run, load_config};
use logging::{init_cli_logging, init_logging};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Index files on a worker pool without holding more than a fixed amount of content in memory")]
#[command(after_help = "\
EXAMPLES:
  indexer run src/*.rs                  # Index files, grouped by directory
  indexer run --threads 2 --json a b c  # Two workers, JSON report
  indexer config show                   # Print the effective configuration")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `indexer config`
#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Show the effective configuration
  Show {
    /// Config file to load instead of the project/user lookup
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
  },
}

#[derive(Subcommand)]
enum Commands {
  /// Index the given files
  Run {
    /// Config file to load instead of the project/user lookup
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Worker threads (overrides runner.indexing_threads)
    #[arg(short, long)]
    threads: Option<usize>,
    /// Memory budget in bytes (overrides runner.max_bytes_in_memory)
    #[arg(long, value_name = "BYTES")]
    max_bytes: Option<u64>,
    /// Output the report as JSON
    #[arg(long)]
    json: bool,
    /// Files to index
    #[arg(required = true)]
    files: Vec<PathBuf>,
  },
  /// Configuration management
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  match cli.command {
    Commands::Run {
      config,
      threads,
      max_bytes,
      json,
      files,
    } => {
      let config = load_config(config.as_deref())?;
      init_logging(&config.logging);
      cmd_run(
        config,
        RunOptions {
          threads,
          max_bytes,
          json,
        },
        files,
      )
      .await
    }
    Commands::Config { command } => {
      init_cli_logging();
      match command {
        ConfigCommand::Show { config } => cmd_config_show(config.as_deref()),
      }
    }
  }
}
