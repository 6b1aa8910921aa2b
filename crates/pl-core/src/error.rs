//! Core error types for peerlink

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::PeerId;

/// Top-level error of a remote-access session.
///
/// Wraps the sub-machine errors so the orchestrator can classify them into
/// a small set of user-facing categories.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Tunnel (access grant) error
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Protocol session error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Peer directory error
    #[error("Peer directory error: {0}")]
    Directory(#[from] DirectoryError),
}

/// User-facing error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The peer could not be reached or the connection dropped
    Network,
    /// The remote host refused the supplied credentials
    Credentials,
    /// The user declined the remote host's certificate
    Trust,
    /// A sequencing or programming error
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Credentials => write!(f, "credentials"),
            ErrorCategory::Trust => write!(f, "trust"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

impl SessionError {
    /// Classify this error into a user-facing category
    pub fn category(&self) -> ErrorCategory {
        match self {
            SessionError::Tunnel(TunnelError::AlreadyConnecting)
            | SessionError::Tunnel(TunnelError::AlreadyConnected { .. }) => ErrorCategory::Internal,
            SessionError::Tunnel(_) => ErrorCategory::Network,
            SessionError::Protocol(ProtocolError::AuthFailed) => ErrorCategory::Credentials,
            SessionError::Protocol(ProtocolError::TrustRejected) => ErrorCategory::Trust,
            SessionError::Protocol(ProtocolError::InvalidParameters(_)) => {
                ErrorCategory::Credentials
            }
            SessionError::Protocol(ProtocolError::TransportError(_))
            | SessionError::Protocol(ProtocolError::Timeout(_))
            | SessionError::Protocol(ProtocolError::Cancelled) => ErrorCategory::Network,
            SessionError::Protocol(_) => ErrorCategory::Internal,
            SessionError::Directory(_) => ErrorCategory::Network,
        }
    }

    /// Primary message shown to the user.
    ///
    /// The raw error string is shown separately as supplementary detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionError::Tunnel(TunnelError::GrantDenied { .. }) => {
                "Access to this peer is not allowed by your policies"
            }
            SessionError::Tunnel(TunnelError::Timeout(_)) => {
                "Timed out while opening a connection to the peer"
            }
            SessionError::Protocol(ProtocolError::AuthFailed) => {
                "Authentication failed, check your username and password"
            }
            SessionError::Protocol(ProtocolError::TrustRejected) => {
                "The remote host's certificate was not trusted"
            }
            SessionError::Protocol(ProtocolError::InvalidParameters(_)) => {
                "The connection details are incomplete or invalid"
            }
            SessionError::Protocol(ProtocolError::Timeout(_)) => {
                "Timed out while connecting to the remote session"
            }
            SessionError::Directory(DirectoryError::NotFound(_)) => "The peer no longer exists",
            _ => match self.category() {
                ErrorCategory::Network => "Could not connect to the peer",
                ErrorCategory::Credentials => "The credentials were rejected",
                ErrorCategory::Trust => "The remote host's certificate was not trusted",
                ErrorCategory::Internal => "Unexpected error, please try again",
            },
        }
    }

    /// Whether a retry with the same credentials makes sense.
    ///
    /// Credential, trust and policy failures require the user to re-enter
    /// credentials instead.
    pub fn retry_with_same_credentials(&self) -> bool {
        match self {
            SessionError::Tunnel(e) => e.is_retryable(),
            SessionError::Protocol(e) => e.is_retryable(),
            SessionError::Directory(_) => false,
        }
    }
}

/// Errors of the tunnel (ephemeral access grant) layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TunnelError {
    /// Policy forbids access to the peer/ports
    #[error("Access to peer {peer} denied: {reason}")]
    GrantDenied { peer: PeerId, reason: String },

    /// The grant was not confirmed in time
    #[error("Access grant not confirmed within {0:?}")]
    Timeout(Duration),

    /// A previous open has not settled yet
    #[error("Tunnel open already in progress")]
    AlreadyConnecting,

    /// The tunnel is open toward a different peer or rule set
    #[error("Tunnel already connected to {peer}")]
    AlreadyConnected { peer: PeerId },

    /// The open was cancelled by a close
    #[error("Tunnel open cancelled")]
    Cancelled,

    /// Best-effort remote revoke failed
    #[error("Failed to revoke access grant: {0}")]
    RevokeFailed(String),

    /// Unexpected access-control failure
    #[error("Access control request failed: {0}")]
    Api(String),
}

impl TunnelError {
    /// Whether re-invoking open may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, TunnelError::Timeout(_) | TunnelError::Api(_))
    }
}

/// Errors of the protocol session layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The remote host rejected the credentials
    #[error("Authentication failed")]
    AuthFailed,

    /// The user declined the remote certificate
    #[error("Certificate rejected by user")]
    TrustRejected,

    /// The connection failed or dropped
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Connect was invoked before the tunnel reported connected
    #[error("Peer not reachable: tunnel is not connected")]
    NotReachable,

    /// The connect did not complete in time
    #[error("Protocol connect timed out after {0:?}")]
    Timeout(Duration),

    /// A previous connect has not settled yet
    #[error("Protocol connect already in progress")]
    AlreadyConnecting,

    /// The session is already connected
    #[error("Protocol session already connected")]
    AlreadyConnected,

    /// Parameters do not fit the protocol variant
    #[error("Invalid connection parameters: {0}")]
    InvalidParameters(String),

    /// The connect was cancelled by a disconnect
    #[error("Protocol connect cancelled")]
    Cancelled,
}

impl ProtocolError {
    /// Whether a retry with the same credentials may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProtocolError::TransportError(_) | ProtocolError::Timeout(_)
        )
    }
}

/// Errors returned by the access-control collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Policy refused the request
    #[error("Access denied: {0}")]
    Denied(String),

    /// The peer does not exist
    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),

    /// Transport or server failure
    #[error("Request failed: {0}")]
    Http(String),
}

/// Errors returned by the peer directory
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The peer does not exist
    #[error("Peer not found: {0}")]
    NotFound(PeerId),

    /// Transport or server failure
    #[error("Request failed: {0}")]
    Http(String),

    /// The response could not be decoded
    #[error("Invalid peer record: {0}")]
    Decode(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
