//! Peer directory trait

use async_trait::async_trait;

use crate::error::DirectoryError;
use crate::types::{PeerId, TargetPeer};

/// Read-only lookup of peers known to the management service
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    /// Fetch a single peer by ID
    async fn get_peer(&self, peer_id: &PeerId) -> Result<TargetPeer, DirectoryError>;
}
