//! CLI command implementations

mod config;
mod plan;
mod ssh;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use pl_core::api::ManagementClient;
use pl_core::config::{self as core_config, PeerlinkConfig};

pub use config::{config_get, config_init, config_show};
pub use plan::{plan_command, PlanProtocol};
pub use ssh::{ssh_command, SshOptions};

/// Config file to use: the `--config` flag or the default location
pub fn resolve_config_path(flag: Option<&PathBuf>) -> PathBuf {
    flag.cloned().unwrap_or_else(core_config::default_config_path)
}

/// Load settings, using defaults when no file exists
pub fn load_settings(path: &Path) -> Result<PeerlinkConfig> {
    core_config::load_or_default(path)
        .with_context(|| format!("Failed to load config from {:?}", path))
}

/// Management API client with the token from the flag or environment
fn api_client(config: &PeerlinkConfig, token: Option<String>) -> Result<Arc<ManagementClient>> {
    let client = ManagementClient::new(&config.api)
        .context("Failed to create management API client")?
        .with_token(token);
    Ok(Arc::new(client))
}
