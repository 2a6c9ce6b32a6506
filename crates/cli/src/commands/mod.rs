//! CLI command implementations

mod config;
mod run;

pub use config::{cmd_config_show, load_config};
pub use run::{RunOptions, cmd_run};
