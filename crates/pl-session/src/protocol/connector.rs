//! Protocol connector seam

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use pl_core::{
    CertificateTrustRequest, ProtocolCredentials, ProtocolError, ProtocolKind, SurfaceSize,
    TrustDecision,
};

use super::link::RemoteLink;

/// Parameters of a single protocol connect attempt
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Overlay address of the target peer
    pub address: String,
    /// Port to dial (may differ from the access-rule port)
    pub port: u16,
    /// Variant-specific credentials
    pub credentials: ProtocolCredentials,
    /// Initial surface size; required for desktop sessions
    pub initial_size: Option<SurfaceSize>,
}

impl ConnectRequest {
    /// Protocol the request is for
    pub fn kind(&self) -> ProtocolKind {
        self.credentials.kind()
    }
}

/// A pending certificate decision
#[derive(Debug)]
pub(crate) struct TrustPrompt {
    pub request: CertificateTrustRequest,
    pub respond: oneshot::Sender<TrustDecision>,
}

/// Lets a connector pause for a user decision on an unverified certificate
#[derive(Debug, Clone)]
pub struct TrustGate {
    prompts: mpsc::Sender<TrustPrompt>,
}

impl TrustGate {
    pub(crate) fn channel() -> (Self, mpsc::Receiver<TrustPrompt>) {
        let (prompts, rx) = mpsc::channel(1);
        (Self { prompts }, rx)
    }

    /// Ask the user whether to trust `request`.
    ///
    /// Returns `Err(TrustRejected)` if the user rejects it or the attempt is
    /// abandoned while waiting.
    pub async fn request(&self, request: CertificateTrustRequest) -> Result<(), ProtocolError> {
        let (respond, decision) = oneshot::channel();
        self.prompts
            .send(TrustPrompt { request, respond })
            .await
            .map_err(|_| ProtocolError::TrustRejected)?;

        match decision.await {
            Ok(TrustDecision::Accept) => Ok(()),
            Ok(TrustDecision::Reject) | Err(_) => Err(ProtocolError::TrustRejected),
        }
    }
}

/// Establishes the protocol-level channel to a remote host.
///
/// Implementations perform the transport handshake and authentication. A
/// desktop connector that meets an unverified certificate calls
/// [`TrustGate::request`] and waits for the answer.
#[async_trait]
pub trait ProtocolConnector: Send + Sync {
    /// Protocol this connector speaks
    fn kind(&self) -> ProtocolKind;

    /// Connect and authenticate, returning the live link
    async fn connect(
        &self,
        request: ConnectRequest,
        trust: TrustGate,
    ) -> Result<RemoteLink, ProtocolError>;
}
