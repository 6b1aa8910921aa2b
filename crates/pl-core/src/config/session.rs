//! Session layer configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::types::PeerVersion;

/// Tunnel (ephemeral access grant) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// How long to wait for the access grant to be confirmed
    #[serde(with = "duration_secs")]
    pub open_timeout: Duration,

    /// Maximum number of revoke attempts before giving up
    pub revoke_attempts: u32,

    /// Backoff between best-effort revoke attempts
    pub revoke_backoff: BackoffConfig,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(15),
            revoke_attempts: 3,
            revoke_backoff: BackoffConfig::default(),
        }
    }
}

/// Protocol session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// How long a protocol connect may take (time spent waiting for a
    /// certificate decision is not counted)
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Default desktop-protocol port
    pub desktop_port: u16,

    /// Port the access rule uses for peers with native terminal support
    pub native_ssh_port: u16,

    /// Default terminal-protocol port
    pub default_ssh_port: u16,

    /// Minimum peer version with native terminal support
    pub native_ssh_min_version: String,

    /// Private key used for terminal-protocol authentication
    pub private_key_path: PathBuf,

    /// Default remote username for terminal sessions
    pub default_username: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            desktop_port: 3389,
            native_ssh_port: 22022,
            default_ssh_port: 22,
            native_ssh_min_version: "0.60.0".to_string(),
            private_key_path: dirs::home_dir()
                .unwrap_or_default()
                .join(".ssh")
                .join("id_ed25519"),
            default_username: whoami::username(),
        }
    }
}

impl ProtocolConfig {
    /// Parsed minimum version for native terminal support.
    ///
    /// An unparseable value disables native support rather than failing.
    pub fn native_min_version(&self) -> PeerVersion {
        PeerVersion::parse(&self.native_ssh_min_version).unwrap_or_else(|| {
            tracing::warn!(
                "Invalid native_ssh_min_version '{}', treating released peers as legacy",
                self.native_ssh_min_version
            );
            PeerVersion::Development
        })
    }
}

/// Interactive I/O bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Quiet period after the last resize before it is forwarded
    #[serde(with = "duration_millis")]
    pub resize_debounce: Duration,

    /// Capacity of the incoming-data event buffer per handle
    pub event_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            resize_debounce: Duration::from_millis(150),
            event_capacity: 256,
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_millis")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_millis")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_defaults_match_port_conventions() {
        let config = ProtocolConfig::default();
        assert_eq!(config.desktop_port, 3389);
        assert_eq!(config.native_ssh_port, 22022);
        assert_eq!(config.default_ssh_port, 22);
    }

    #[test]
    fn test_native_min_version_fallback() {
        let mut config = ProtocolConfig::default();
        assert_eq!(config.native_min_version(), PeerVersion::release(0, 60, 0));

        config.native_ssh_min_version = "not-a-version".to_string();
        assert_eq!(config.native_min_version(), PeerVersion::Development);
    }
}
