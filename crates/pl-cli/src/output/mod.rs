//! Output formatting utilities for the CLI
//!
//! Tables for session plans, certificate prompts, and colored status
//! messages.

use std::io::Write;

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use tabled::{settings::Style, Table, Tabled};

use pl_core::{CertificateTrustRequest, TargetPeer};
use pl_session::PortPlan;

/// Format the access rule and dial port for a peer as a table
pub fn format_plan(peer: &TargetPeer, plan: &PortPlan) -> String {
    #[derive(Tabled)]
    struct PlanRow {
        #[tabled(rename = "PEER")]
        peer: String,
        #[tabled(rename = "ADDRESS")]
        address: String,
        #[tabled(rename = "VERSION")]
        version: String,
        #[tabled(rename = "ACCESS RULES")]
        rules: String,
        #[tabled(rename = "CONNECT PORT")]
        port: u16,
    }

    let rules = plan
        .rules()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    let row = PlanRow {
        peer: format!("{} ({})", peer.hostname, peer.id),
        address: peer.address.clone(),
        version: if peer.version.is_empty() {
            "-".to_string()
        } else {
            peer.version.clone()
        },
        rules,
        port: plan.connect_port,
    };

    Table::new([row]).with(Style::rounded()).to_string()
}

/// Describe a certificate awaiting a trust decision
pub fn format_trust_request(request: &CertificateTrustRequest) -> String {
    let mut lines = vec![
        format!("The certificate presented by {} is not trusted.", request.host),
        format!("  Subject:     {}", request.subject),
    ];
    if let Some(issuer) = &request.issuer {
        lines.push(format!("  Issuer:      {}", issuer));
    }
    lines.push(format!("  Fingerprint: {}", request.fingerprint));
    lines.join("\n")
}

fn print_marked(mut out: impl Write, color: Color, mark: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(mark),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_marked(std::io::stdout(), Color::Green, "✓ ", msg);
}

/// Print an error message to stderr in red
pub fn print_error(msg: &str) {
    print_marked(std::io::stderr(), Color::Red, "✗ ", msg);
}

/// Print a warning message to stderr in yellow
pub fn print_warning(msg: &str) {
    print_marked(std::io::stderr(), Color::Yellow, "⚠ ", msg);
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    print_marked(std::io::stdout(), Color::Cyan, "ℹ ", msg);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pl_core::PeerId;

    fn peer() -> TargetPeer {
        TargetPeer {
            id: PeerId::new("peer-lab"),
            address: "100.64.0.10".to_string(),
            hostname: "lab-server".to_string(),
            version: "0.61.0".to_string(),
        }
    }

    #[test]
    fn test_format_plan() {
        let plan = PortPlan {
            rule_port: 22022,
            connect_port: 22,
        };
        let table = format_plan(&peer(), &plan);
        assert!(table.contains("ACCESS RULES"));
        assert!(table.contains("lab-server (peer-lab)"));
        assert!(table.contains("tcp/22022"));
        assert!(table.contains("100.64.0.10"));
    }

    #[test]
    fn test_format_trust_request() {
        let request = CertificateTrustRequest::from_der(
            "100.64.0.20",
            "CN=win-desktop",
            Some("CN=corp-ca".to_string()),
            b"der",
        );
        let text = format_trust_request(&request);
        assert!(text.contains("100.64.0.20"));
        assert!(text.contains("Issuer:      CN=corp-ca"));
        assert!(text.contains(&request.fingerprint));
    }
}
