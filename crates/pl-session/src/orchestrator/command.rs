//! Messages handled by the orchestrator task

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use pl_core::{
    CertificateTrustRequest, DirectoryError, ProtocolCredentials, ProtocolError, SurfaceSize,
    TargetPeer, TunnelError,
};

use crate::bridge::{BridgeEvent, DisplaySurface, SurfaceEvent};
use crate::protocol::ProtocolSessionHandle;
use crate::tunnel::EphemeralAccessGrant;

/// Requests from the UI
pub(crate) enum Command {
    Submit {
        credentials: ProtocolCredentials,
        initial_size: Option<SurfaceSize>,
    },
    Retry,
    AcceptTrust,
    RejectTrust,
    Cancel,
    Disconnect,
    Reconnect,
    TunnelStatusChanged,
    AttachSurface {
        surface: Arc<dyn DisplaySurface>,
        events: mpsc::Receiver<SurfaceEvent>,
    },
    DetachSurface,
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Completions of work the orchestrator started.
///
/// Attempt numbers identify which connect attempt a completion belongs to;
/// completions of abandoned attempts are ignored.
pub(crate) enum Internal {
    PeerLoaded(Result<TargetPeer, DirectoryError>),
    TunnelSettled {
        attempt: u64,
        result: Result<EphemeralAccessGrant, TunnelError>,
    },
    TrustRequested {
        attempt: u64,
        request: CertificateTrustRequest,
    },
    ProtocolSettled {
        attempt: u64,
        result: Result<Arc<ProtocolSessionHandle>, ProtocolError>,
    },
    HandleClosed {
        connection: u64,
        reason: Option<String>,
    },
    Bridge { attachment: u64, event: BridgeEvent },
}
