//! pl-session: Remote-access session orchestration for peerlink
//!
//! Opening an interactive session to a peer takes two layers: an ephemeral
//! access grant into the overlay network ([`tunnel`]) and a remote-control
//! protocol session on top of it ([`protocol`]). The [`bridge`] relays the
//! session's bytes to a display surface, and the [`orchestrator`] sequences
//! all of it behind a single state machine.

pub mod bridge;
pub mod orchestrator;
pub mod protocol;
pub mod tunnel;

pub use bridge::{Attachment, BridgeEvent, DisplaySurface, IoBridge, SurfaceEvent};
pub use orchestrator::{
    OrchestratorEvent, Presentation, ReconnectMode, SessionDeps, SessionOrchestrator,
    SessionState, SurfacedError,
};
pub use protocol::{
    ConnectRequest, PortPlan, ProtocolConnector, ProtocolSession, ProtocolSessionHandle,
    ProtocolState, SshConnector, TrustGate,
};
pub use tunnel::{EphemeralAccessGrant, Reachability, TunnelSession, TunnelState};
