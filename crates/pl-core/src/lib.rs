//! pl-core: Core abstractions and configuration for peerlink
//!
//! This crate provides the shared domain types, error taxonomy, collaborator
//! traits and configuration structures used by the session orchestrator and
//! the CLI.

pub mod api;
pub mod config;
pub mod credentials;
pub mod error;
pub mod time;
pub mod traits;
pub mod trust;
pub mod types;

pub use credentials::{DesktopCredentials, ProtocolCredentials, TerminalCredentials};
pub use error::{
    AccessError, ConfigError, DirectoryError, ErrorCategory, ProtocolError, SessionError,
    TunnelError,
};
pub use trust::{CertificateTrustRequest, TrustDecision};
pub use types::{AccessRule, PeerId, PeerVersion, ProtocolKind, SurfaceSize, TargetPeer, Transport};
