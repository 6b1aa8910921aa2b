//! Access-control trait

use async_trait::async_trait;

use crate::error::AccessError;
use crate::types::PeerId;

/// Installs and removes temporary, rule-scoped access into the overlay
/// network.
#[async_trait]
pub trait AccessControl: Send + Sync {
    /// Allow traffic to `peer_id` for the given `"protocol/port"` rules
    async fn connect_temporary(&self, peer_id: &PeerId, rules: &[String])
        -> Result<(), AccessError>;

    /// Remove the temporary access to `peer_id`.
    ///
    /// Must succeed when no access is installed, since a revoke may follow
    /// an open whose outcome was never observed.
    async fn disconnect(&self, peer_id: &PeerId) -> Result<(), AccessError>;
}
