//! Plan command implementation

use anyhow::{Context, Result};
use clap::ValueEnum;

use crate::output::format_plan;
use pl_core::config::PeerlinkConfig;
use pl_core::traits::PeerDirectory;
use pl_core::PeerId;
use pl_session::PortPlan;

/// Protocol selector for `peerlink plan`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlanProtocol {
    Ssh,
    Rdp,
}

/// Look up a peer and print the access rule and port a session would use
pub async fn plan_command(
    config: &PeerlinkConfig,
    token: Option<String>,
    peer: &str,
    protocol: PlanProtocol,
    port: Option<u16>,
) -> Result<()> {
    let client = super::api_client(config, token)?;
    let peer = client
        .get_peer(&PeerId::new(peer))
        .await
        .with_context(|| format!("Failed to look up peer '{}'", peer))?;

    let requested = port.unwrap_or(0);
    let plan = match protocol {
        PlanProtocol::Ssh => PortPlan::terminal(&peer, requested, &config.protocol),
        PlanProtocol::Rdp => PortPlan::desktop(requested, &config.protocol),
    };

    println!("{}", format_plan(&peer, &plan));
    Ok(())
}
