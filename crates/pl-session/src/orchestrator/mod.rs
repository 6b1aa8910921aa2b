//! Session orchestrator
//!
//! Sequences the tunnel, protocol session and I/O bridge of one
//! remote-access session behind a single state machine:
//!
//! ```text
//! Idle -> AwaitingCredentials -> TunnelConnecting -> ProtocolConnecting
//!      -> [PendingTrust] -> Connected -> Disconnected
//! ```
//!
//! Any failure before `Connected` tears both layers down and returns to
//! `AwaitingCredentials` with the error surfaced. Teardown always
//! disconnects the protocol session before closing the tunnel.
//!
//! The orchestrator runs as a task; [`SessionOrchestrator`] is its handle.
//! Dropping the handle tears the session down.

mod actor;
mod command;
mod state;

pub use state::{OrchestratorEvent, Presentation, ReconnectMode, SessionState, SurfacedError};

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use pl_core::config::PeerlinkConfig;
use pl_core::traits::{AccessControl, PeerDirectory};
use pl_core::{PeerId, ProtocolCredentials, ProtocolKind, SurfaceSize};

use crate::bridge::{DisplaySurface, IoBridge, SurfaceEvent};
use crate::protocol::{ProtocolConnector, ProtocolSession};
use crate::tunnel::TunnelSession;
use actor::{ActorParts, SessionActor};
use command::{Command, Internal};

/// Capacity of the UI event channel.
///
/// Events are small and infrequent (presentation switches, prompts,
/// errors); a slow UI only loses the oldest ones.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Collaborators a session is built from
#[derive(Clone)]
pub struct SessionDeps {
    /// Peer lookup
    pub directory: Arc<dyn PeerDirectory>,
    /// Temporary access grants
    pub access: Arc<dyn AccessControl>,
    /// Protocol connector; decides whether this is a terminal or desktop
    /// session
    pub connector: Arc<dyn ProtocolConnector>,
}

/// Handle to a running session orchestrator.
///
/// Every method is non-blocking; outcomes are observed through
/// [`state`](Self::state), [`watch`](Self::watch) and
/// [`subscribe`](Self::subscribe).
pub struct SessionOrchestrator {
    peer_id: PeerId,
    kind: ProtocolKind,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    events: broadcast::Sender<OrchestratorEvent>,
    task: JoinHandle<()>,
}

impl SessionOrchestrator {
    /// Start orchestrating a session to `peer_id`.
    ///
    /// The peer is looked up immediately. Must be called within a tokio
    /// runtime.
    pub fn spawn(peer_id: PeerId, deps: SessionDeps, config: &PeerlinkConfig) -> Self {
        let kind = deps.connector.kind();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let bridge_tx = internal_tx.clone();
        let bridge = IoBridge::new(&config.bridge).with_listener(move |attachment, event| {
            let _ = bridge_tx.send(Internal::Bridge { attachment, event });
        });

        let actor = SessionActor::new(ActorParts {
            peer_id: peer_id.clone(),
            protocol_config: config.protocol.clone(),
            directory: deps.directory,
            tunnel: Arc::new(TunnelSession::new(deps.access, config.tunnel.clone())),
            protocol: Arc::new(ProtocolSession::new(
                deps.connector,
                &config.protocol,
                &config.bridge,
            )),
            bridge,
            commands: commands_rx,
            internal_tx,
            internal_rx,
            state_tx,
            events_tx: events_tx.clone(),
        });
        let task = tokio::spawn(actor.run());

        Self {
            peer_id,
            kind,
            commands: commands_tx,
            state: state_rx,
            events: events_tx,
            task,
        }
    }

    /// Target peer
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Terminal or desktop
    pub fn kind(&self) -> ProtocolKind {
        self.kind
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Watch state changes. Rapid transitions may be coalesced.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Subscribe to UI events
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    /// Wait until the state satisfies `predicate`.
    ///
    /// Returns None if the orchestrator stopped first.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&SessionState) -> bool,
    ) -> Option<SessionState> {
        let mut rx = self.state.clone();
        let state = rx.wait_for(|state| predicate(state)).await.ok()?;
        Some(state.clone())
    }

    /// Submit credentials and start connecting.
    ///
    /// `initial_size` is required for desktop sessions.
    pub fn submit_credentials(
        &self,
        credentials: ProtocolCredentials,
        initial_size: Option<SurfaceSize>,
    ) {
        self.send(Command::Submit {
            credentials,
            initial_size,
        });
    }

    /// Retry after a retryable failure with the same credentials, or repeat
    /// a failed peer lookup
    pub fn retry(&self) {
        self.send(Command::Retry);
    }

    /// Trust the pending certificate
    pub fn accept_trust(&self) {
        self.send(Command::AcceptTrust);
    }

    /// Reject the pending certificate; the attempt is abandoned
    pub fn reject_trust(&self) {
        self.send(Command::RejectTrust);
    }

    /// Abandon an in-flight connect
    pub fn cancel(&self) {
        self.send(Command::Cancel);
    }

    /// End the live session
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Reconnect after a disconnect
    pub fn reconnect(&self) {
        self.send(Command::Reconnect);
    }

    /// Tell the orchestrator the overlay tunnel status changed.
    ///
    /// The protocol connect starts only if the session is in exactly the
    /// tunnel-connected, protocol-disconnected state; otherwise this is a
    /// no-op.
    pub fn notify_tunnel_status_changed(&self) {
        self.send(Command::TunnelStatusChanged);
    }

    /// Attach a display surface, replacing any attached one.
    ///
    /// If the session is not connected yet the surface is attached once it
    /// connects.
    pub fn attach_surface(
        &self,
        surface: Arc<dyn DisplaySurface>,
        events: mpsc::Receiver<SurfaceEvent>,
    ) {
        self.send(Command::AttachSurface { surface, events });
    }

    /// Detach the display surface
    pub fn detach_surface(&self) {
        self.send(Command::DetachSurface);
    }

    /// Tear the session down and stop the orchestrator
    pub async fn shutdown(self) {
        let (done, finished) = oneshot::channel();
        self.send(Command::Shutdown { done });
        let _ = finished.await;
        let _ = self.task.await;
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Session orchestrator for {} already stopped", self.peer_id);
        }
    }
}
