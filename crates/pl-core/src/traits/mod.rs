//! Collaborator traits
//!
//! The surrounding dashboard supplies these; the session crate only depends
//! on the traits.

mod access;
mod directory;

pub use access::AccessControl;
pub use directory::PeerDirectory;
