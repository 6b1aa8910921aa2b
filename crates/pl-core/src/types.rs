//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a peer in the overlay network
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    /// Create a new peer ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A peer that a remote-access session targets.
///
/// Fetched once from the peer directory and never mutated while a session
/// is alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPeer {
    /// Peer identifier
    pub id: PeerId,
    /// Overlay network address (e.g., "100.92.14.7")
    pub address: String,
    /// Hostname as reported by the peer
    pub hostname: String,
    /// Version marker reported by the peer's agent
    pub version: String,
}

impl TargetPeer {
    /// Parsed version marker, if it can be understood
    pub fn parsed_version(&self) -> Option<PeerVersion> {
        PeerVersion::parse(&self.version)
    }

    /// Whether the peer runs a native terminal-protocol server.
    ///
    /// Peers with an unparseable version are treated as legacy.
    pub fn supports_native_terminal(&self, minimum: PeerVersion) -> bool {
        self.parsed_version()
            .map(|version| version >= minimum)
            .unwrap_or(false)
    }
}

/// Agent version reported by a peer.
///
/// Release versions order numerically; development builds order after every
/// release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeerVersion {
    /// A numbered release (`major.minor.patch`)
    Release { major: u32, minor: u32, patch: u32 },
    /// A development build
    Development,
}

impl PeerVersion {
    /// Create a release version
    pub const fn release(major: u32, minor: u32, patch: u32) -> Self {
        Self::Release {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version marker such as `0.61.2`, `v0.60.0` or `0.60.0-dev`.
    ///
    /// Missing minor/patch components default to zero. Returns None when the
    /// major component has no leading digits.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case("development") {
            return Some(Self::Development);
        }

        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        let mut parts = trimmed.splitn(3, '.');
        let major = leading_number(parts.next()?)?;
        let minor = parts.next().and_then(leading_number).unwrap_or(0);
        let patch = parts.next().and_then(leading_number).unwrap_or(0);

        Some(Self::release(major, minor, patch))
    }
}

/// Parse the leading run of ASCII digits of a version component
fn leading_number(component: &str) -> Option<u32> {
    let digits: String = component.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

impl fmt::Display for PeerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerVersion::Release {
                major,
                minor,
                patch,
            } => write!(f, "{}.{}.{}", major, minor, patch),
            PeerVersion::Development => write!(f, "development"),
        }
    }
}

/// Transport protocol of an access rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Udp => write!(f, "udp"),
        }
    }
}

/// A single `protocol/port` allow-rule of a temporary access grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccessRule {
    /// Transport protocol
    pub transport: Transport,
    /// Destination port on the target peer
    pub port: u16,
}

impl AccessRule {
    /// Create a TCP rule for the given port
    pub fn tcp(port: u16) -> Self {
        Self {
            transport: Transport::Tcp,
            port,
        }
    }

    /// Create a UDP rule for the given port
    pub fn udp(port: u16) -> Self {
        Self {
            transport: Transport::Udp,
            port,
        }
    }
}

impl fmt::Display for AccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.transport, self.port)
    }
}

impl FromStr for AccessRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (transport, port) = s
            .split_once('/')
            .ok_or_else(|| format!("invalid access rule '{}': expected protocol/port", s))?;

        let transport = match transport.to_ascii_lowercase().as_str() {
            "tcp" => Transport::Tcp,
            "udp" => Transport::Udp,
            other => return Err(format!("unsupported protocol '{}' in rule '{}'", other, s)),
        };

        let port = port
            .parse::<u16>()
            .map_err(|_| format!("invalid port in rule '{}'", s))?;

        Ok(Self { transport, port })
    }
}

/// Dimensions of a display surface.
///
/// Interpreted as columns x rows for terminal sessions and as pixels for
/// desktop sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceSize {
    /// Columns (terminal) or pixel width (desktop)
    pub width: u16,
    /// Rows (terminal) or pixel height (desktop)
    pub height: u16,
}

impl SurfaceSize {
    /// Create a new surface size
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// Default terminal size (80x24)
    pub fn default_terminal() -> Self {
        Self {
            width: 80,
            height: 24,
        }
    }

    /// Whether either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for SurfaceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Which remote-control protocol a session speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// Interactive terminal (SSH)
    Terminal,
    /// Graphical desktop (RDP)
    Desktop,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Terminal => write!(f, "ssh"),
            ProtocolKind::Desktop => write!(f, "rdp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer_with_version(version: &str) -> TargetPeer {
        TargetPeer {
            id: PeerId::new("peer-1"),
            address: "100.64.0.10".to_string(),
            hostname: "lab-server".to_string(),
            version: version.to_string(),
        }
    }

    #[test]
    fn test_peer_version_parse() {
        assert_eq!(
            PeerVersion::parse("0.61.2"),
            Some(PeerVersion::release(0, 61, 2))
        );
        assert_eq!(
            PeerVersion::parse("v0.60.0"),
            Some(PeerVersion::release(0, 60, 0))
        );
        assert_eq!(
            PeerVersion::parse("0.60.0-dev"),
            Some(PeerVersion::release(0, 60, 0))
        );
        assert_eq!(PeerVersion::parse("1.2"), Some(PeerVersion::release(1, 2, 0)));
        assert_eq!(PeerVersion::parse("development"), Some(PeerVersion::Development));
        assert_eq!(PeerVersion::parse(""), None);
        assert_eq!(PeerVersion::parse("unknown"), None);
    }

    #[test]
    fn test_peer_version_ordering() {
        assert!(PeerVersion::release(0, 60, 1) > PeerVersion::release(0, 60, 0));
        assert!(PeerVersion::release(1, 0, 0) > PeerVersion::release(0, 99, 99));
        assert!(PeerVersion::Development > PeerVersion::release(9, 9, 9));
    }

    #[test]
    fn test_native_terminal_support() {
        let minimum = PeerVersion::release(0, 60, 0);
        assert!(peer_with_version("0.60.0").supports_native_terminal(minimum));
        assert!(peer_with_version("development").supports_native_terminal(minimum));
        assert!(!peer_with_version("0.59.13").supports_native_terminal(minimum));
        assert!(!peer_with_version("garbage").supports_native_terminal(minimum));
    }

    #[test]
    fn test_access_rule_display_and_parse() {
        assert_eq!(AccessRule::tcp(3389).to_string(), "tcp/3389");
        assert_eq!(AccessRule::udp(53).to_string(), "udp/53");
        assert_eq!("tcp/22022".parse::<AccessRule>(), Ok(AccessRule::tcp(22022)));
        assert_eq!("UDP/53".parse::<AccessRule>(), Ok(AccessRule::udp(53)));
        assert!("tcp".parse::<AccessRule>().is_err());
        assert!("icmp/1".parse::<AccessRule>().is_err());
        assert!("tcp/70000".parse::<AccessRule>().is_err());
    }

    #[test]
    fn test_protocol_kind_display() {
        assert_eq!(format!("{}", ProtocolKind::Terminal), "ssh");
        assert_eq!(format!("{}", ProtocolKind::Desktop), "rdp");
    }

    #[test]
    fn test_surface_size_empty() {
        assert!(SurfaceSize::new(0, 24).is_empty());
        assert!(!SurfaceSize::default_terminal().is_empty());
    }
}
