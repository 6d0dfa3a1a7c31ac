//! Command handlers for `cpd`.
//!
//! Each handler returns the process exit code; `main` only dispatches.

pub mod config;
pub mod run;
pub mod state;

use anyhow::Result;
use cpd_config::LoadedConfig;
use tracing_subscriber::EnvFilter;

/// Load the layered config without validating it.
pub fn load(config_paths: &[String]) -> Result<LoadedConfig> {
    cpd_config::load_layered_yaml(config_paths)
}

/// Initialize tracing once. `CPD_LOG` overrides the configured level.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_env("CPD_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
