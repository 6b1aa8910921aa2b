//! Protocol layer: remote-control sessions running over an open tunnel
//!
//! A [`ProtocolSession`] drives one connect attempt at a time through a
//! [`ProtocolConnector`]. A successful connect yields a
//! [`ProtocolSessionHandle`], the live channel the I/O bridge attaches to.

mod connector;
mod handle;
mod link;
mod ports;
mod session;
mod ssh;

pub use connector::{ConnectRequest, ProtocolConnector, TrustGate};
pub use handle::{HandleEvent, ProtocolSessionHandle};
pub use link::{link_pair, LinkCommand, LinkEndpoint, LinkEvent, RemoteLink};
pub use ports::PortPlan;
pub use session::{ProtocolSession, ProtocolState};
pub use ssh::SshConnector;
