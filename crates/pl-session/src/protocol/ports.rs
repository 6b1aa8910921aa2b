//! Access-rule and dial-port planning
//!
//! Peers whose agent runs a native terminal server accept SSH on a
//! dedicated port: the access rule names that port while the session still
//! dials the user-supplied port. Older peers use the user-supplied port for
//! both.

use pl_core::config::ProtocolConfig;
use pl_core::{AccessRule, ProtocolCredentials, ProtocolKind, TargetPeer};

/// Which port the access rule allows and which port the session dials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPlan {
    /// Port named in the access rule
    pub rule_port: u16,
    /// Port the protocol session connects to
    pub connect_port: u16,
}

impl PortPlan {
    /// Plan ports for a terminal session
    pub fn terminal(peer: &TargetPeer, user_port: u16, config: &ProtocolConfig) -> Self {
        let connect_port = if user_port == 0 {
            config.default_ssh_port
        } else {
            user_port
        };

        if peer.supports_native_terminal(config.native_min_version()) {
            tracing::debug!(
                "Peer {} (version {}) has native SSH, allowing port {}",
                peer.id,
                peer.version,
                config.native_ssh_port
            );
            Self {
                rule_port: config.native_ssh_port,
                connect_port,
            }
        } else {
            Self {
                rule_port: connect_port,
                connect_port,
            }
        }
    }

    /// Plan ports for a desktop session
    pub fn desktop(user_port: u16, config: &ProtocolConfig) -> Self {
        let port = if user_port == 0 {
            config.desktop_port
        } else {
            user_port
        };
        Self {
            rule_port: port,
            connect_port: port,
        }
    }

    /// Plan ports for the given credentials
    pub fn for_credentials(
        peer: &TargetPeer,
        credentials: &ProtocolCredentials,
        config: &ProtocolConfig,
    ) -> Self {
        match credentials.kind() {
            ProtocolKind::Terminal => Self::terminal(peer, credentials.port(), config),
            ProtocolKind::Desktop => Self::desktop(credentials.port(), config),
        }
    }

    /// Access rules the tunnel must be opened with
    pub fn rules(&self) -> Vec<AccessRule> {
        vec![AccessRule::tcp(self.rule_port)]
    }
}
