//! Orchestrator-level session state

use std::fmt;

use pl_core::{CertificateTrustRequest, ErrorCategory, SessionError};

use crate::protocol::ProtocolState;
use crate::tunnel::TunnelState;

/// An error as shown to the user.
///
/// `message` is the friendly primary text; `detail` keeps the raw error
/// string for troubleshooting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfacedError {
    pub category: ErrorCategory,
    pub message: String,
    pub detail: String,
}

impl From<&SessionError> for SurfacedError {
    fn from(error: &SessionError) -> Self {
        Self {
            category: error.category(),
            message: error.user_message().to_string(),
            detail: error.to_string(),
        }
    }
}

impl fmt::Display for SurfacedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.detail)
    }
}

/// What a reconnect from `Disconnected` does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectMode {
    /// Terminal sessions reconnect with the parameters that last connected
    SameParameters,
    /// Desktop secrets are gone, so the user re-enters credentials
    ReenterCredentials,
}

/// State of one remote-access session.
///
/// Each variant corresponds to a combination of tunnel and protocol states,
/// see [`SessionState::layers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Looking up the target peer
    Idle,
    /// Waiting for the user to submit credentials
    AwaitingCredentials {
        error: Option<SurfacedError>,
        /// Whether retrying with the same credentials is offered
        can_retry: bool,
    },
    /// Requesting the access grant
    TunnelConnecting,
    /// Tunnel up, protocol session connecting
    ProtocolConnecting,
    /// Waiting for a certificate decision
    PendingTrust { request: CertificateTrustRequest },
    /// Interactive session live
    Connected { resizing: bool },
    /// The live session ended
    Disconnected {
        error: Option<SurfacedError>,
        reconnect: ReconnectMode,
    },
    /// The session cannot proceed (e.g., the peer does not exist)
    Failed { error: SurfacedError },
}

impl SessionState {
    /// Tunnel and protocol states this session state stands for
    pub fn layers(&self) -> (TunnelState, ProtocolState) {
        match self {
            SessionState::TunnelConnecting => (TunnelState::Connecting, ProtocolState::Disconnected),
            SessionState::ProtocolConnecting => (TunnelState::Connected, ProtocolState::Connecting),
            SessionState::PendingTrust { .. } => {
                (TunnelState::Connected, ProtocolState::PendingTrust)
            }
            SessionState::Connected { .. } => (TunnelState::Connected, ProtocolState::Connected),
            SessionState::Idle
            | SessionState::AwaitingCredentials { .. }
            | SessionState::Disconnected { .. }
            | SessionState::Failed { .. } => {
                (TunnelState::Disconnected, ProtocolState::Disconnected)
            }
        }
    }

    /// Which view the UI shows for this state
    pub fn presentation(&self) -> Presentation {
        match self {
            SessionState::Idle => Presentation::Loading,
            SessionState::AwaitingCredentials { .. }
            | SessionState::TunnelConnecting
            | SessionState::ProtocolConnecting
            | SessionState::PendingTrust { .. } => Presentation::CredentialForm,
            SessionState::Connected { .. } => Presentation::InteractiveSurface,
            SessionState::Disconnected { .. } => Presentation::DisconnectedView,
            SessionState::Failed { .. } => Presentation::FailureView,
        }
    }

    /// Whether a connect attempt is in flight
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            SessionState::TunnelConnecting
                | SessionState::ProtocolConnecting
                | SessionState::PendingTrust { .. }
        )
    }

    /// The error to show, if any
    pub fn error(&self) -> Option<&SurfacedError> {
        match self {
            SessionState::AwaitingCredentials { error, .. }
            | SessionState::Disconnected { error, .. } => error.as_ref(),
            SessionState::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Short name for logs
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingCredentials { .. } => "awaiting-credentials",
            SessionState::TunnelConnecting => "tunnel-connecting",
            SessionState::ProtocolConnecting => "protocol-connecting",
            SessionState::PendingTrust { .. } => "pending-trust",
            SessionState::Connected { .. } => "connected",
            SessionState::Disconnected { .. } => "disconnected",
            SessionState::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The view the UI shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Presentation {
    Loading,
    CredentialForm,
    InteractiveSurface,
    DisconnectedView,
    FailureView,
}

/// Notifications for the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    /// The view to show changed
    PresentationChanged(Presentation),
    /// A certificate needs the user's decision
    TrustRequested(CertificateTrustRequest),
    /// An error should be surfaced
    Error(SurfacedError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pl_core::{ProtocolError, TunnelError};
    use std::time::Duration;

    #[test]
    fn test_surfaced_error_keeps_raw_detail() {
        let error = SessionError::from(ProtocolError::TransportError(
            "connection reset by peer".to_string(),
        ));
        let surfaced = SurfacedError::from(&error);

        assert_eq!(surfaced.category, ErrorCategory::Network);
        assert_eq!(surfaced.message, "Could not connect to the peer");
        assert!(surfaced.detail.contains("connection reset by peer"));
    }

    #[test]
    fn test_layers_never_connect_protocol_without_tunnel() {
        let states = [
            SessionState::Idle,
            SessionState::AwaitingCredentials {
                error: None,
                can_retry: false,
            },
            SessionState::TunnelConnecting,
            SessionState::ProtocolConnecting,
            SessionState::Connected { resizing: false },
            SessionState::Disconnected {
                error: None,
                reconnect: ReconnectMode::SameParameters,
            },
            SessionState::Failed {
                error: SurfacedError::from(&SessionError::from(TunnelError::Timeout(
                    Duration::from_secs(15),
                ))),
            },
        ];

        for state in states {
            let (tunnel, protocol) = state.layers();
            if protocol != ProtocolState::Disconnected {
                assert_eq!(tunnel, TunnelState::Connected, "{}", state);
            }
        }
    }

    #[test]
    fn test_presentation_mapping() {
        assert_eq!(
            SessionState::PendingTrust {
                request: CertificateTrustRequest::from_der("h", "CN=h", None, b"der"),
            }
            .presentation(),
            Presentation::CredentialForm
        );
        assert_eq!(
            SessionState::Connected { resizing: true }.presentation(),
            Presentation::InteractiveSurface
        );
    }
}
