//! Authenticated HTTP client for the management API

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::ApiConfig;
use crate::error::{ConfigError, DirectoryError};
use crate::traits::PeerDirectory;
use crate::types::{PeerId, TargetPeer};

/// Peer record as returned by `GET /peers/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct PeerRecord {
    pub id: String,
    pub ip: String,
    pub name: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub version: String,
}

impl From<PeerRecord> for TargetPeer {
    fn from(record: PeerRecord) -> Self {
        let hostname = record
            .hostname
            .filter(|h| !h.is_empty())
            .unwrap_or(record.name);
        TargetPeer {
            id: PeerId::new(record.id),
            address: record.ip,
            hostname,
            version: record.version,
        }
    }
}

/// Client for the management REST API
#[derive(Debug, Clone)]
pub struct ManagementClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ManagementClient {
    /// Create a client from configuration
    pub fn new(config: &ApiConfig) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    /// Override the bearer token (e.g., from the environment)
    pub fn with_token(mut self, token: Option<String>) -> Self {
        if token.is_some() {
            self.token = token;
        }
        self
    }

    /// Absolute URL for an API path
    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Start a request with authentication applied
    pub(crate) fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl PeerDirectory for ManagementClient {
    async fn get_peer(&self, peer_id: &PeerId) -> Result<TargetPeer, DirectoryError> {
        let response = self
            .request(reqwest::Method::GET, &format!("peers/{}", peer_id))
            .send()
            .await
            .map_err(|e| DirectoryError::Http(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DirectoryError::NotFound(peer_id.clone()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Http(format!("{}: {}", status, body.trim())));
        }

        let record: PeerRecord = response
            .json()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))?;

        tracing::debug!(peer = %record.id, version = %record.version, "Fetched peer");
        Ok(record.into())
    }
}
