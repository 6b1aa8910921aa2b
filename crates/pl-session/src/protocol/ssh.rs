//! Terminal-protocol connector over SSH
//!
//! Dials the peer's overlay address, authenticates with a local private key
//! and opens an interactive shell on a PTY sized to the surface.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};

use pl_core::{ProtocolCredentials, ProtocolError, ProtocolKind, SurfaceSize};

use super::connector::{ConnectRequest, ProtocolConnector, TrustGate};
use super::link::{link_pair, LinkCommand, LinkEndpoint, LinkEvent, RemoteLink};

/// Buffer between the SSH channel driver and the session handle.
///
/// Sized for bursts of shell output while the display surface catches up.
const LINK_CHANNEL_CAPACITY: usize = 256;

/// Terminal type requested for the remote PTY
const TERM: &str = "xterm-256color";

/// Connects terminal sessions with public-key authentication
pub struct SshConnector {
    key: Arc<KeyPair>,
}

impl SshConnector {
    /// Create a connector from an already loaded key pair
    pub fn new(key: KeyPair) -> Self {
        Self { key: Arc::new(key) }
    }

    /// Load the private key at `path`
    pub fn from_key_file(path: &Path) -> Result<Self, ProtocolError> {
        let key = russh_keys::load_secret_key(path, None).map_err(|e| {
            ProtocolError::InvalidParameters(format!(
                "failed to load private key {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self::new(key))
    }
}

#[async_trait]
impl ProtocolConnector for SshConnector {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Terminal
    }

    async fn connect(
        &self,
        request: ConnectRequest,
        _trust: TrustGate,
    ) -> Result<RemoteLink, ProtocolError> {
        let ProtocolCredentials::Terminal(credentials) = &request.credentials else {
            return Err(ProtocolError::InvalidParameters(
                "SSH sessions need terminal credentials".to_string(),
            ));
        };

        let config = Arc::new(Config::default());
        let mut session = client::connect(
            config,
            (request.address.as_str(), request.port),
            ClientHandler,
        )
        .await
        .map_err(|e| {
            ProtocolError::TransportError(format!(
                "failed to connect to {}:{}: {}",
                request.address, request.port, e
            ))
        })?;

        tracing::debug!("Authenticating as user '{}'", credentials.username);
        let authenticated = session
            .authenticate_publickey(&credentials.username, Arc::clone(&self.key))
            .await
            .map_err(|e| ProtocolError::TransportError(format!("authentication error: {}", e)))?;

        if !authenticated {
            let _ = session
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(ProtocolError::AuthFailed);
        }

        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| transport("failed to open session channel", e))?;

        let size = request
            .initial_size
            .filter(|size| !size.is_empty())
            .unwrap_or_else(SurfaceSize::default_terminal);
        channel
            .request_pty(
                false,
                TERM,
                u32::from(size.width),
                u32::from(size.height),
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| transport("PTY request failed", e))?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| transport("shell request failed", e))?;

        tracing::debug!("Shell opened on {} ({})", request.address, size);

        let (link, endpoint) = link_pair(LINK_CHANNEL_CAPACITY);
        tokio::spawn(drive_channel(session, channel, endpoint));
        Ok(link)
    }
}

enum Step {
    Remote(Option<ChannelMsg>),
    Local(Option<LinkCommand>),
}

/// Relay between the SSH channel and the link until either side closes
async fn drive_channel(
    session: Handle<ClientHandler>,
    mut channel: Channel<Msg>,
    mut endpoint: LinkEndpoint,
) {
    let mut reason = None;

    loop {
        let step = tokio::select! {
            msg = channel.wait() => Step::Remote(msg),
            cmd = endpoint.commands.recv() => Step::Local(cmd),
        };

        match step {
            Step::Remote(Some(ChannelMsg::Data { data }))
            | Step::Remote(Some(ChannelMsg::ExtendedData { data, .. })) => {
                let event = LinkEvent::Data(Bytes::copy_from_slice(&data));
                if endpoint.events.send(event).await.is_err() {
                    break;
                }
            }
            Step::Remote(Some(ChannelMsg::ExitStatus { exit_status })) => {
                tracing::debug!("Remote shell exited with status {}", exit_status);
                if exit_status != 0 {
                    reason = Some(format!("remote shell exited with status {}", exit_status));
                }
            }
            Step::Remote(Some(ChannelMsg::Close)) | Step::Remote(None) => break,
            Step::Remote(Some(_)) => {}
            Step::Local(Some(LinkCommand::Write(data))) => {
                if let Err(e) = channel.data(&data[..]).await {
                    reason = Some(format!("write failed: {}", e));
                    break;
                }
            }
            Step::Local(Some(LinkCommand::Resize { size, done })) => {
                let result = channel
                    .window_change(u32::from(size.width), u32::from(size.height), 0, 0)
                    .await
                    .map_err(|e| transport("window change failed", e));
                let _ = done.send(result);
            }
            Step::Local(Some(LinkCommand::Close)) | Step::Local(None) => {
                tracing::debug!("Closing SSH channel");
                let _ = channel.eof().await;
                break;
            }
        }
    }

    if let Err(e) = session
        .disconnect(Disconnect::ByApplication, "session closed", "en")
        .await
    {
        tracing::debug!("SSH disconnect: {}", e);
    }
    let _ = endpoint.events.send(LinkEvent::Closed { reason }).await;
}

fn transport(context: &str, error: russh::Error) -> ProtocolError {
    ProtocolError::TransportError(format!("{}: {}", context, error))
}

/// SSH client handler
struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    /// The overlay network authenticates the peer, so any host key is
    /// accepted. The fingerprint is logged for troubleshooting.
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!("Server host key: {}", server_public_key.fingerprint());
        Ok(true)
    }
}
