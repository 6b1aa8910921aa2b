//! Tunnel layer: ephemeral, rule-scoped access into the overlay network
//!
//! A [`TunnelSession`] owns at most one [`EphemeralAccessGrant`]. Opening
//! installs the grant through the access-control collaborator; closing
//! revokes it best-effort in the background.

mod revoke;
mod session;

pub use revoke::ExponentialBackoff;
pub use session::{EphemeralAccessGrant, Reachability, TunnelSession, TunnelState};
