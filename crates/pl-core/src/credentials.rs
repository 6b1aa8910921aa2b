//! Protocol credentials
//!
//! Credentials are supplied once by the user and held only in memory. They
//! are deliberately not `Serialize`, and their `Debug` output redacts
//! secrets so they cannot leak into logs.

use std::fmt;

use crate::types::ProtocolKind;

/// Credentials for a terminal-protocol (SSH) session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalCredentials {
    /// Remote username
    pub username: String,
    /// Port the protocol session connects to (commonly 22)
    pub port: u16,
}

/// Credentials for a desktop-protocol (RDP) session
#[derive(Clone, PartialEq, Eq)]
pub struct DesktopCredentials {
    /// Remote username
    pub username: String,
    /// Password (never logged, never persisted)
    pub password: String,
    /// Optional Windows domain
    pub domain: Option<String>,
    /// Port the protocol session connects to (default 3389)
    pub port: u16,
}

impl fmt::Debug for DesktopCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DesktopCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .field("port", &self.port)
            .finish()
    }
}

/// Variant-specific credentials for a protocol session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolCredentials {
    Terminal(TerminalCredentials),
    Desktop(DesktopCredentials),
}

impl ProtocolCredentials {
    /// The protocol these credentials belong to
    pub fn kind(&self) -> ProtocolKind {
        match self {
            ProtocolCredentials::Terminal(_) => ProtocolKind::Terminal,
            ProtocolCredentials::Desktop(_) => ProtocolKind::Desktop,
        }
    }

    /// Remote username
    pub fn username(&self) -> &str {
        match self {
            ProtocolCredentials::Terminal(c) => &c.username,
            ProtocolCredentials::Desktop(c) => &c.username,
        }
    }

    /// User-supplied connection port
    pub fn port(&self) -> u16 {
        match self {
            ProtocolCredentials::Terminal(c) => c.port,
            ProtocolCredentials::Desktop(c) => c.port,
        }
    }

    /// Whether these credentials carry a secret that must not outlive the
    /// connection attempt
    pub fn has_secret(&self) -> bool {
        matches!(self, ProtocolCredentials::Desktop(_))
    }
}
