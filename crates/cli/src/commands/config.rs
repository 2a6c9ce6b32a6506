//! `indexer config` commands

use std::path::Path;

use anyhow::{Context, Result};
use indexer_core::Config;

/// Load an explicit config file, or fall back to the project/user lookup from the current directory.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
  match path {
    Some(path) => Config::load_from(path).with_context(|| format!("loading config from {}", path.display())),
    None => {
      let cwd = std::env::current_dir().context("reading current directory")?;
      Ok(Config::load_for_project(&cwd))
    }
  }
}

pub fn cmd_config_show(path: Option<&Path>) -> Result<()> {
  let cwd = std::env::current_dir()?;
  let config = load_config(path)?;

  if let Some(path) = path {
    println!("Using config file: {:?}", path);
  } else {
    // Check which config file is being used
    let project_config = Config::project_config_path(&cwd);
    let user_config = Config::user_config_path();

    println!("Effective configuration for: {:?}", cwd);
    if project_config.exists() {
      println!("Using project config: {:?}", project_config);
    } else if let Some(user_path) = user_config.filter(|p| p.exists()) {
      println!("Using user config: {:?}", user_path);
    } else {
      println!("Using default configuration (no config file found)");
    }
  }
  println!();

  println!("{}", config.to_toml());
  println!(
    "# resolved: {} worker thread(s), {} byte memory budget",
    config.runner.worker_threads(),
    config.runner.max_bytes_in_memory
  );

  Ok(())
}
