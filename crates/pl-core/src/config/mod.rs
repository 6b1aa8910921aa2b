//! Configuration management for peerlink

mod api;
mod session;
pub mod serde_utils;

pub use api::ApiConfig;
pub use session::{BackoffConfig, BridgeConfig, ProtocolConfig, TunnelConfig};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Complete peerlink configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerlinkConfig {
    /// Management API settings
    pub api: ApiConfig,
    /// Tunnel (access grant) settings
    pub tunnel: TunnelConfig,
    /// Protocol session settings
    pub protocol: ProtocolConfig,
    /// I/O bridge settings
    pub bridge: BridgeConfig,
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("peerlink")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Load configuration, falling back to defaults when the file is absent
pub fn load_or_default(path: &Path) -> Result<PeerlinkConfig, ConfigError> {
    match load_config(path) {
        Ok(config) => Ok(config),
        Err(ConfigError::NotFound(_)) => {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(PeerlinkConfig::default())
        }
        Err(e) => Err(e),
    }
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_save_and_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = PeerlinkConfig::default();
        config.api.base_url = "https://api.example.net/api".to_string();
        config.tunnel.open_timeout = Duration::from_secs(20);
        save_config(&path, &config).unwrap();

        let loaded: PeerlinkConfig = load_config(&path).unwrap();
        assert_eq!(loaded.api.base_url, "https://api.example.net/api");
        assert_eq!(loaded.tunnel.open_timeout, Duration::from_secs(20));
        assert_eq!(loaded.protocol.desktop_port, 3389);
    }

    #[test]
    fn test_load_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(matches!(
            load_config::<PeerlinkConfig>(&path),
            Err(ConfigError::NotFound(_))
        ));
        let config = load_or_default(&path).unwrap();
        assert_eq!(config.protocol.native_ssh_port, 22022);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: PeerlinkConfig = toml::from_str(
            r#"
            [bridge]
            resize_debounce = 300
            "#,
        )
        .unwrap();
        assert_eq!(config.bridge.resize_debounce, Duration::from_millis(300));
        assert_eq!(config.tunnel.open_timeout, Duration::from_secs(15));
    }
}
