//! SSH command implementation

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::output::{format_trust_request, print_error, print_info, print_success, print_warning};
use crate::terminal::{current_size, run_terminal};
use pl_core::api::TemporaryAccess;
use pl_core::config::PeerlinkConfig;
use pl_core::{PeerId, ProtocolCredentials, TerminalCredentials};
use pl_session::{ReconnectMode, SessionDeps, SessionOrchestrator, SessionState, SshConnector};

/// Arguments of `peerlink ssh`
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub peer: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity: Option<PathBuf>,
}

/// Open an interactive terminal session to a peer
pub async fn ssh_command(
    config: &PeerlinkConfig,
    token: Option<String>,
    options: SshOptions,
) -> Result<()> {
    let key_path = options
        .identity
        .unwrap_or_else(|| config.protocol.private_key_path.clone());
    let connector = SshConnector::from_key_file(&key_path)
        .with_context(|| format!("Failed to load private key {:?}", key_path))?;

    let client = super::api_client(config, token)?;
    let deps = SessionDeps {
        directory: client.clone(),
        access: Arc::new(TemporaryAccess::new(client)),
        connector: Arc::new(connector),
    };

    let credentials = ProtocolCredentials::Terminal(TerminalCredentials {
        username: options
            .user
            .unwrap_or_else(|| config.protocol.default_username.clone()),
        port: options.port.unwrap_or(0),
    });

    print_info(&format!("Connecting to peer '{}'...", options.peer));
    let orchestrator = SessionOrchestrator::spawn(PeerId::new(&options.peer), deps, config);
    let result = drive_session(&orchestrator, credentials).await;
    orchestrator.shutdown().await;
    result
}

/// Follow the orchestrator through one or more connects until the user is
/// done
async fn drive_session(
    orchestrator: &SessionOrchestrator,
    credentials: ProtocolCredentials,
) -> Result<()> {
    let mut state = orchestrator.watch();
    let mut submitted = false;
    let mut live = false;

    loop {
        let current = state.borrow_and_update().clone();
        if !matches!(current, SessionState::Connected { .. }) {
            live = false;
        }

        match current {
            SessionState::Idle => {}
            SessionState::AwaitingCredentials { error: None, .. } => {
                if !submitted {
                    submitted = true;
                    orchestrator.submit_credentials(credentials.clone(), Some(current_size()));
                }
            }
            SessionState::AwaitingCredentials {
                error: Some(error),
                can_retry,
            } => {
                print_error(&error.message);
                print_info(&error.detail);
                if can_retry && confirm("Retry?").await? {
                    orchestrator.retry();
                } else {
                    anyhow::bail!("{}", error.message);
                }
            }
            SessionState::TunnelConnecting => print_info("Requesting access to peer..."),
            SessionState::ProtocolConnecting => print_info("Opening session..."),
            SessionState::PendingTrust { request } => {
                println!("{}", format_trust_request(&request));
                if confirm("Trust this certificate?").await? {
                    orchestrator.accept_trust();
                } else {
                    orchestrator.reject_trust();
                }
            }
            SessionState::Connected { .. } => {
                if !live {
                    live = true;
                    print_success("Connected (press Ctrl+] to detach)");
                    if run_terminal(orchestrator).await? {
                        orchestrator.disconnect();
                    }
                }
            }
            SessionState::Disconnected { error, reconnect } => {
                match error {
                    Some(error) => print_warning(&format!("Session ended: {}", error)),
                    None => print_success("Disconnected"),
                }
                if !confirm("Reconnect?").await? {
                    return Ok(());
                }
                if reconnect == ReconnectMode::ReenterCredentials {
                    submitted = false;
                }
                orchestrator.reconnect();
            }
            SessionState::Failed { error } => {
                print_error(&error.message);
                anyhow::bail!("{}", error.detail);
            }
        }

        if state.changed().await.is_err() {
            anyhow::bail!("Session orchestrator stopped unexpectedly");
        }
    }
}

/// Ask a yes/no question on the controlling terminal
async fn confirm(question: &str) -> Result<bool> {
    let question = question.to_string();
    tokio::task::spawn_blocking(move || -> Result<bool> {
        let mut stdout = std::io::stdout();
        write!(stdout, "{} [y/N] ", question)?;
        stdout.flush()?;

        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        Ok(matches!(
            answer.trim().to_ascii_lowercase().as_str(),
            "y" | "yes"
        ))
    })
    .await?
}
