//! pl-cli: Command-line interface for peerlink
//!
//! Provides the `peerlink` binary for opening terminal sessions to overlay
//! peers and managing the local configuration.

pub mod commands;
pub mod output;
pub mod terminal;
