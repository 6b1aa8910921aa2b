//! Temporary access grants through the management API

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;

use super::ManagementClient;
use crate::error::AccessError;
use crate::traits::AccessControl;
use crate::types::PeerId;

#[derive(Serialize)]
struct TemporaryAccessRequest<'a> {
    rules: &'a [String],
}

/// Access control backed by `POST/DELETE /peers/{id}/temporary-access`.
///
/// Holds no state of its own: a revoke always names the peer, so it still
/// reaches the server after an open whose response was never seen.
pub struct TemporaryAccess {
    client: Arc<ManagementClient>,
}

impl TemporaryAccess {
    /// Create a new temporary access controller
    pub fn new(client: Arc<ManagementClient>) -> Self {
        Self { client }
    }

    fn resource(peer_id: &PeerId) -> String {
        format!("peers/{}/temporary-access", peer_id)
    }
}

#[async_trait]
impl AccessControl for TemporaryAccess {
    async fn connect_temporary(
        &self,
        peer_id: &PeerId,
        rules: &[String],
    ) -> Result<(), AccessError> {
        let response = self
            .client
            .request(reqwest::Method::POST, &Self::resource(peer_id))
            .json(&TemporaryAccessRequest { rules })
            .send()
            .await
            .map_err(|e| AccessError::Http(e.to_string()))?;

        let status = response.status();
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                let body = response.text().await.unwrap_or_default();
                Err(AccessError::Denied(body.trim().to_string()))
            }
            StatusCode::NOT_FOUND => Err(AccessError::PeerNotFound(peer_id.clone())),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(AccessError::Http(format!("{}: {}", status, body.trim())))
            }
        }
    }

    async fn disconnect(&self, peer_id: &PeerId) -> Result<(), AccessError> {
        let response = self
            .client
            .request(reqwest::Method::DELETE, &Self::resource(peer_id))
            .send()
            .await
            .map_err(|e| AccessError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(AccessError::Http(format!("revoke returned {}", status)))
        }
    }
}
