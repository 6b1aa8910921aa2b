//! Management API client
//!
//! HTTP implementations of the [`PeerDirectory`](crate::traits::PeerDirectory)
//! and [`AccessControl`](crate::traits::AccessControl) collaborators.

mod access;
mod client;

pub use access::TemporaryAccess;
pub use client::{ManagementClient, PeerRecord};
