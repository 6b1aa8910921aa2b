//! Test doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use pl_core::config::PeerlinkConfig;
use pl_core::traits::{AccessControl, PeerDirectory};
use pl_core::{
    AccessError, CertificateTrustRequest, DesktopCredentials, DirectoryError, PeerId,
    ProtocolCredentials, ProtocolError, ProtocolKind, SurfaceSize, TargetPeer,
    TerminalCredentials,
};
use pl_session::protocol::{link_pair, LinkCommand, LinkEndpoint, LinkEvent, RemoteLink};
use pl_session::{
    ConnectRequest, DisplaySurface, ProtocolConnector, SessionDeps, SessionOrchestrator,
    SessionState, TrustGate,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pl_session=debug")
        .with_test_writer()
        .try_init();
}

/// Ordered record of side effects across all fakes
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }

    pub fn last_position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().rposition(|e| e.starts_with(prefix))
    }
}

pub struct FakeDirectory {
    peer: Option<TargetPeer>,
}

impl FakeDirectory {
    pub fn with_peer(peer: TargetPeer) -> Arc<Self> {
        Arc::new(Self { peer: Some(peer) })
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self { peer: None })
    }
}

#[async_trait]
impl PeerDirectory for FakeDirectory {
    async fn get_peer(&self, peer_id: &PeerId) -> Result<TargetPeer, DirectoryError> {
        self.peer
            .clone()
            .filter(|peer| &peer.id == peer_id)
            .ok_or_else(|| DirectoryError::NotFound(peer_id.clone()))
    }
}

pub struct FakeAccess {
    journal: Journal,
    deny: bool,
    delay: Option<Duration>,
    revoke_delay: Option<Duration>,
}

impl FakeAccess {
    pub fn new(journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            journal: journal.clone(),
            deny: false,
            delay: None,
            revoke_delay: None,
        })
    }

    pub fn denying(journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            journal: journal.clone(),
            deny: true,
            delay: None,
            revoke_delay: None,
        })
    }

    pub fn slow(journal: &Journal, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            journal: journal.clone(),
            deny: false,
            delay: Some(delay),
            revoke_delay: None,
        })
    }

    /// Revokes land only after `delay`
    pub fn slow_revoke(journal: &Journal, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            journal: journal.clone(),
            deny: false,
            delay: None,
            revoke_delay: Some(delay),
        })
    }
}

#[async_trait]
impl AccessControl for FakeAccess {
    async fn connect_temporary(&self, peer_id: &PeerId, rules: &[String]) -> Result<(), AccessError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.deny {
            self.journal.record(format!("denied:{}", peer_id));
            return Err(AccessError::Denied("blocked by policy".to_string()));
        }
        self.journal
            .record(format!("grant:{}:{}", peer_id, rules.join(",")));
        Ok(())
    }

    async fn disconnect(&self, peer_id: &PeerId) -> Result<(), AccessError> {
        if let Some(delay) = self.revoke_delay {
            tokio::time::sleep(delay).await;
        }
        self.journal.record(format!("revoke:{}", peer_id));
        Ok(())
    }
}

/// How the fake connector answers one connect call
#[derive(Debug, Clone)]
pub enum Script {
    Connect,
    AuthFail,
    TransportFail,
    /// Present a certificate, then connect if accepted
    Certificate,
}

/// The remote end of a fake protocol connection
pub struct FakeRemote {
    pub events: mpsc::Sender<LinkEvent>,
}

impl FakeRemote {
    pub async fn send(&self, data: &'static [u8]) {
        let _ = self.events.send(LinkEvent::Data(Bytes::from_static(data))).await;
    }

    pub async fn drop_connection(&self, reason: &str) {
        let _ = self
            .events
            .send(LinkEvent::Closed {
                reason: Some(reason.to_string()),
            })
            .await;
    }
}

pub struct FakeConnector {
    kind: ProtocolKind,
    journal: Journal,
    scripts: Mutex<VecDeque<Script>>,
    remotes: mpsc::UnboundedSender<FakeRemote>,
}

impl FakeConnector {
    pub fn new(
        kind: ProtocolKind,
        journal: &Journal,
        scripts: Vec<Script>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeRemote>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            kind,
            journal: journal.clone(),
            scripts: Mutex::new(scripts.into()),
            remotes,
        });
        (connector, rx)
    }

    fn open_link(&self) -> RemoteLink {
        let (link, endpoint) = link_pair(64);
        let LinkEndpoint { commands, events } = endpoint;
        tokio::spawn(drive(commands, self.journal.clone()));
        let _ = self.remotes.send(FakeRemote { events });
        link
    }
}

async fn drive(mut commands: mpsc::Receiver<LinkCommand>, journal: Journal) {
    while let Some(command) = commands.recv().await {
        match command {
            LinkCommand::Write(data) => {
                journal.record(format!("write:{}", String::from_utf8_lossy(&data)))
            }
            LinkCommand::Resize { size, done } => {
                journal.record(format!("resize:{}", size));
                let _ = done.send(Ok(()));
            }
            LinkCommand::Close => {
                journal.record("close");
                break;
            }
        }
    }
}

#[async_trait]
impl ProtocolConnector for FakeConnector {
    fn kind(&self) -> ProtocolKind {
        self.kind
    }

    async fn connect(
        &self,
        request: ConnectRequest,
        trust: TrustGate,
    ) -> Result<RemoteLink, ProtocolError> {
        self.journal.record(format!(
            "connect:{}@{}:{}",
            request.credentials.username(),
            request.address,
            request.port
        ));

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Connect);

        match script {
            Script::Connect => Ok(self.open_link()),
            Script::AuthFail => Err(ProtocolError::AuthFailed),
            Script::TransportFail => Err(ProtocolError::TransportError(
                "connection refused".to_string(),
            )),
            Script::Certificate => {
                trust
                    .request(CertificateTrustRequest::from_der(
                        request.address.clone(),
                        "CN=win-desktop",
                        Some("CN=win-desktop".to_string()),
                        b"self-signed",
                    ))
                    .await?;
                Ok(self.open_link())
            }
        }
    }
}

#[derive(Default)]
pub struct RecordingSurface {
    rendered: Mutex<Vec<u8>>,
}

impl RecordingSurface {
    pub fn rendered(&self) -> String {
        String::from_utf8_lossy(&self.rendered.lock().unwrap()).into_owned()
    }
}

impl DisplaySurface for RecordingSurface {
    fn render(&self, data: &[u8]) {
        self.rendered.lock().unwrap().extend_from_slice(data);
    }
}

pub fn native_peer() -> TargetPeer {
    TargetPeer {
        id: PeerId::new("peer-lab"),
        address: "100.64.0.10".to_string(),
        hostname: "lab-server".to_string(),
        version: "0.61.0".to_string(),
    }
}

pub fn desktop_peer() -> TargetPeer {
    TargetPeer {
        id: PeerId::new("peer-win"),
        address: "100.64.0.20".to_string(),
        hostname: "win-desktop".to_string(),
        version: "0.58.0".to_string(),
    }
}

pub fn terminal_credentials() -> ProtocolCredentials {
    ProtocolCredentials::Terminal(TerminalCredentials {
        username: "root".to_string(),
        port: 22,
    })
}

pub fn desktop_credentials() -> ProtocolCredentials {
    ProtocolCredentials::Desktop(DesktopCredentials {
        username: "admin".to_string(),
        password: "correct horse".to_string(),
        domain: None,
        port: 3389,
    })
}

pub fn spawn_orchestrator(
    peer: TargetPeer,
    access: Arc<FakeAccess>,
    connector: Arc<FakeConnector>,
) -> SessionOrchestrator {
    init_tracing();
    let peer_id = peer.id.clone();
    SessionOrchestrator::spawn(
        peer_id,
        SessionDeps {
            directory: FakeDirectory::with_peer(peer),
            access,
            connector,
        },
        &PeerlinkConfig::default(),
    )
}

/// Wait (bounded) until the orchestrator reaches a matching state
pub async fn expect_state(
    orchestrator: &SessionOrchestrator,
    predicate: impl FnMut(&SessionState) -> bool,
) -> SessionState {
    tokio::time::timeout(Duration::from_secs(5), orchestrator.wait_for(predicate))
        .await
        .expect("timed out waiting for state")
        .expect("orchestrator stopped")
}

/// Wait (bounded) until `condition` holds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

pub const DESKTOP_SIZE: SurfaceSize = SurfaceSize {
    width: 1280,
    height: 720,
};
