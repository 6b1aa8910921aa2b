//! Management API configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Where and how to reach the management API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the management API (e.g., `https://api.example.net/api`)
    pub base_url: String,

    /// Personal access token sent as a bearer token.
    ///
    /// Prefer the `PEERLINK_TOKEN` environment variable over storing the
    /// token in the config file.
    pub token: Option<String>,

    /// Per-request timeout
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:33073/api".to_string(),
            token: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}
