//! The orchestrator task
//!
//! All session state lives here and is only touched from this task. Slow
//! work (peer lookup, tunnel open, protocol connect) runs in spawned tasks
//! that report back through the internal channel.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use pl_core::config::ProtocolConfig;
use pl_core::traits::PeerDirectory;
use pl_core::{
    CertificateTrustRequest, PeerId, ProtocolCredentials, ProtocolError, ProtocolKind,
    SessionError, SurfaceSize, TargetPeer,
};

use super::command::{Command, Internal};
use super::state::{OrchestratorEvent, Presentation, ReconnectMode, SessionState, SurfacedError};
use crate::bridge::{Attachment, BridgeEvent, DisplaySurface, IoBridge, SurfaceEvent};
use crate::protocol::{
    ConnectRequest, PortPlan, ProtocolSession, ProtocolSessionHandle, ProtocolState,
};
use crate::tunnel::{TunnelSession, TunnelState};

/// Parameters of a connect, kept until the session connects
#[derive(Clone)]
struct ConnectParams {
    credentials: ProtocolCredentials,
    initial_size: Option<SurfaceSize>,
}

/// A surface waiting for the session to connect
struct PendingSurface {
    surface: Arc<dyn DisplaySurface>,
    events: mpsc::Receiver<SurfaceEvent>,
}

pub(crate) struct SessionActor {
    peer_id: PeerId,
    kind: ProtocolKind,
    protocol_config: ProtocolConfig,
    directory: Arc<dyn PeerDirectory>,
    tunnel: Arc<TunnelSession>,
    protocol: Arc<ProtocolSession>,
    bridge: IoBridge,

    commands: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    state_tx: watch::Sender<SessionState>,
    events_tx: broadcast::Sender<OrchestratorEvent>,

    state: SessionState,
    presentation: Presentation,
    peer: Option<TargetPeer>,
    /// Parameters of the attempt in progress
    params: Option<ConnectParams>,
    /// Terminal parameters that last connected
    reconnect_params: Option<ConnectParams>,
    next_attempt: u64,
    tunnel_attempt: Option<u64>,
    protocol_attempt: Option<u64>,
    /// Increments with every connection that reaches `Connected`
    connection: u64,
    pending_surface: Option<PendingSurface>,
    attachment: Option<Attachment>,
    close_watcher: Option<JoinHandle<()>>,
}

pub(crate) struct ActorParts {
    pub peer_id: PeerId,
    pub protocol_config: ProtocolConfig,
    pub directory: Arc<dyn PeerDirectory>,
    pub tunnel: Arc<TunnelSession>,
    pub protocol: Arc<ProtocolSession>,
    pub bridge: IoBridge,
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub internal_tx: mpsc::UnboundedSender<Internal>,
    pub internal_rx: mpsc::UnboundedReceiver<Internal>,
    pub state_tx: watch::Sender<SessionState>,
    pub events_tx: broadcast::Sender<OrchestratorEvent>,
}

impl SessionActor {
    pub(crate) fn new(parts: ActorParts) -> Self {
        Self {
            peer_id: parts.peer_id,
            kind: parts.protocol.kind(),
            protocol_config: parts.protocol_config,
            directory: parts.directory,
            tunnel: parts.tunnel,
            protocol: parts.protocol,
            bridge: parts.bridge,
            commands: parts.commands,
            internal_tx: parts.internal_tx,
            internal_rx: parts.internal_rx,
            state_tx: parts.state_tx,
            events_tx: parts.events_tx,
            state: SessionState::Idle,
            presentation: Presentation::Loading,
            peer: None,
            params: None,
            reconnect_params: None,
            next_attempt: 1,
            tunnel_attempt: None,
            protocol_attempt: None,
            connection: 0,
            pending_surface: None,
            attachment: None,
            close_watcher: None,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::info!("Starting {} session to peer {}", self.kind, self.peer_id);
        self.lookup_peer();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { done }) => {
                        self.shutdown();
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        tracing::debug!("Orchestrator handle dropped");
                        self.shutdown();
                        break;
                    }
                },
                Some(event) = self.internal_rx.recv() => self.handle_internal(event),
            }
        }

        tracing::info!("Session to peer {} stopped", self.peer_id);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit {
                credentials,
                initial_size,
            } => self.submit(credentials, initial_size),
            Command::Retry => self.retry(),
            Command::AcceptTrust => self.accept_trust(),
            Command::RejectTrust => self.reject_trust(),
            Command::Cancel => self.cancel(),
            Command::Disconnect => self.disconnect(),
            Command::Reconnect => self.reconnect(),
            Command::TunnelStatusChanged => self.try_start_protocol("tunnel status change"),
            Command::AttachSurface { surface, events } => {
                self.attach_surface(PendingSurface { surface, events })
            }
            Command::DetachSurface => {
                self.pending_surface = None;
                if let Some(attachment) = self.attachment.take() {
                    attachment.detach();
                }
            }
            // Handled in run()
            Command::Shutdown { .. } => {}
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::PeerLoaded(result) => self.on_peer_loaded(result),
            Internal::TunnelSettled { attempt, result } => {
                if self.tunnel_attempt != Some(attempt) {
                    tracing::debug!("Ignoring settled tunnel attempt {}", attempt);
                    return;
                }
                self.tunnel_attempt = None;
                match result {
                    Ok(grant) => {
                        tracing::info!(
                            "Access grant to {} active for {} rule(s)",
                            grant.peer_id,
                            grant.rules.len()
                        );
                        self.try_start_protocol("tunnel connected");
                    }
                    Err(e) => self.fail_attempt(e.into()),
                }
            }
            Internal::TrustRequested { attempt, request } => {
                self.on_trust_requested(attempt, request)
            }
            Internal::ProtocolSettled { attempt, result } => {
                if self.protocol_attempt != Some(attempt) {
                    tracing::debug!("Ignoring settled protocol attempt {}", attempt);
                    return;
                }
                self.protocol_attempt = None;
                match result {
                    Ok(handle) => self.on_connected(handle),
                    Err(e) => self.fail_attempt(e.into()),
                }
            }
            Internal::HandleClosed { connection, reason } => {
                self.on_handle_closed(connection, reason)
            }
            Internal::Bridge { attachment, event } => self.on_bridge_event(attachment, event),
        }
    }

    fn lookup_peer(&mut self) {
        let directory = Arc::clone(&self.directory);
        let peer_id = self.peer_id.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = directory.get_peer(&peer_id).await;
            let _ = tx.send(Internal::PeerLoaded(result));
        });
    }

    fn on_peer_loaded(&mut self, result: Result<TargetPeer, pl_core::DirectoryError>) {
        if self.state != SessionState::Idle {
            return;
        }
        match result {
            Ok(peer) => {
                tracing::info!(
                    "Target peer {} ({}, {}, version {})",
                    peer.id,
                    peer.hostname,
                    peer.address,
                    peer.version
                );
                self.peer = Some(peer);
                self.set_state(SessionState::AwaitingCredentials {
                    error: None,
                    can_retry: false,
                });
            }
            Err(e) => {
                tracing::error!("Failed to load peer {}: {}", self.peer_id, e);
                let error = SurfacedError::from(&SessionError::from(e));
                self.emit(OrchestratorEvent::Error(error.clone()));
                self.set_state(SessionState::Failed { error });
            }
        }
    }

    fn submit(&mut self, credentials: ProtocolCredentials, initial_size: Option<SurfaceSize>) {
        if !matches!(self.state, SessionState::AwaitingCredentials { .. }) {
            tracing::debug!("Ignoring credentials submitted in state {}", self.state);
            return;
        }
        if credentials.kind() != self.kind {
            let error = ProtocolError::InvalidParameters(format!(
                "{} credentials supplied to a {} session",
                credentials.kind(),
                self.kind
            ));
            self.fail_attempt(error.into());
            return;
        }

        self.params = Some(ConnectParams {
            credentials,
            initial_size,
        });
        self.begin_tunnel();
    }

    fn retry(&mut self) {
        let retry_connect = matches!(
            self.state,
            SessionState::AwaitingCredentials {
                can_retry: true,
                ..
            }
        ) && self.params.is_some();

        if retry_connect {
            tracing::info!("Retrying with the same credentials");
            self.begin_tunnel();
        } else if matches!(self.state, SessionState::Failed { .. }) {
            tracing::info!("Retrying peer lookup for {}", self.peer_id);
            self.set_state(SessionState::Idle);
            self.lookup_peer();
        } else {
            tracing::debug!("Nothing to retry in state {}", self.state);
        }
    }

    fn begin_tunnel(&mut self) {
        let (Some(peer), Some(params)) = (self.peer.clone(), self.params.as_ref()) else {
            tracing::debug!("Cannot open tunnel without a peer and parameters");
            return;
        };

        let plan = PortPlan::for_credentials(&peer, &params.credentials, &self.protocol_config);
        let rules = plan.rules();
        let attempt = self.next_attempt();
        self.tunnel_attempt = Some(attempt);
        self.set_state(SessionState::TunnelConnecting);

        let tunnel = Arc::clone(&self.tunnel);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = tunnel.open(&peer, &rules).await;
            let _ = tx.send(Internal::TunnelSettled { attempt, result });
        });
    }

    /// Start the protocol connect if, and only if, the tunnel is connected,
    /// the protocol session is disconnected and nothing is in flight.
    fn try_start_protocol(&mut self, trigger: &str) {
        let ready = self.state == SessionState::TunnelConnecting
            && self.protocol_attempt.is_none()
            && self.tunnel.state() == TunnelState::Connected
            && self.protocol.state() == ProtocolState::Disconnected;
        if !ready {
            tracing::debug!("Ignoring {} in state {}", trigger, self.state);
            return;
        }

        let (Some(peer), Some(params)) = (self.peer.as_ref(), self.params.clone()) else {
            return;
        };

        let plan = PortPlan::for_credentials(peer, &params.credentials, &self.protocol_config);
        let request = ConnectRequest {
            address: peer.address.clone(),
            port: plan.connect_port,
            credentials: params.credentials,
            initial_size: params.initial_size,
        };

        let attempt = self.next_attempt();
        self.protocol_attempt = Some(attempt);
        tracing::debug!("Starting protocol connect after {}", trigger);
        self.set_state(SessionState::ProtocolConnecting);

        let protocol = Arc::clone(&self.protocol);
        let tunnel = Arc::clone(&self.tunnel);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let trust_tx = tx.clone();
            let on_trust = move |request: CertificateTrustRequest| {
                let _ = trust_tx.send(Internal::TrustRequested { attempt, request });
            };
            let result = protocol.connect(request, tunnel.as_ref(), &on_trust).await;
            let _ = tx.send(Internal::ProtocolSettled { attempt, result });
        });
    }

    fn on_trust_requested(&mut self, attempt: u64, request: CertificateTrustRequest) {
        if self.protocol_attempt != Some(attempt)
            || self.state != SessionState::ProtocolConnecting
        {
            tracing::debug!("Ignoring stale certificate prompt");
            return;
        }
        self.emit(OrchestratorEvent::TrustRequested(request.clone()));
        self.set_state(SessionState::PendingTrust { request });
    }

    fn accept_trust(&mut self) {
        if !matches!(self.state, SessionState::PendingTrust { .. }) {
            tracing::debug!("No certificate decision pending");
            return;
        }
        if self.protocol.accept_trust() {
            self.set_state(SessionState::ProtocolConnecting);
        }
    }

    fn reject_trust(&mut self) {
        if !matches!(self.state, SessionState::PendingTrust { .. }) {
            tracing::debug!("No certificate decision pending");
            return;
        }
        self.protocol.reject_trust();
        self.fail_attempt(ProtocolError::TrustRejected.into());
    }

    fn on_connected(&mut self, handle: Arc<ProtocolSessionHandle>) {
        self.connection += 1;
        let connection = self.connection;

        match self.kind {
            ProtocolKind::Terminal => self.reconnect_params = self.params.take(),
            // Desktop secrets do not outlive the attempt
            ProtocolKind::Desktop => {
                self.params = None;
                self.reconnect_params = None;
            }
        }

        let closed = handle.closed();
        let tx = self.internal_tx.clone();
        self.close_watcher = Some(tokio::spawn(async move {
            let reason = closed.await;
            let _ = tx.send(Internal::HandleClosed { connection, reason });
        }));

        tracing::info!("Session to {} connected", self.peer_id);
        self.set_state(SessionState::Connected { resizing: false });

        if let Some(pending) = self.pending_surface.take() {
            self.attach_to(&handle, pending);
        }
    }

    fn on_handle_closed(&mut self, connection: u64, reason: Option<String>) {
        if connection != self.connection || !matches!(self.state, SessionState::Connected { .. }) {
            return;
        }

        tracing::warn!(
            "Session to {} ended: {}",
            self.peer_id,
            reason.as_deref().unwrap_or("closed by remote")
        );
        self.teardown();

        let error = reason.map(|reason| {
            SurfacedError::from(&SessionError::from(ProtocolError::TransportError(reason)))
        });
        if let Some(error) = &error {
            self.emit(OrchestratorEvent::Error(error.clone()));
        }
        let reconnect = self.reconnect_mode();
        self.set_state(SessionState::Disconnected { error, reconnect });
    }

    fn disconnect(&mut self) {
        if self.state.is_connecting() {
            self.cancel();
            return;
        }
        if !matches!(self.state, SessionState::Connected { .. }) {
            tracing::debug!("Nothing to disconnect in state {}", self.state);
            return;
        }

        tracing::info!("Disconnecting session to {}", self.peer_id);
        self.teardown();
        let reconnect = self.reconnect_mode();
        self.set_state(SessionState::Disconnected {
            error: None,
            reconnect,
        });
    }

    fn cancel(&mut self) {
        if !self.state.is_connecting() {
            tracing::debug!("Nothing to cancel in state {}", self.state);
            return;
        }
        tracing::info!("Cancelling connect to {}", self.peer_id);
        self.teardown();
        self.params = None;
        self.set_state(SessionState::AwaitingCredentials {
            error: None,
            can_retry: false,
        });
    }

    fn reconnect(&mut self) {
        if !matches!(self.state, SessionState::Disconnected { .. }) {
            tracing::debug!("Ignoring reconnect in state {}", self.state);
            return;
        }
        match self.reconnect_mode() {
            ReconnectMode::SameParameters => {
                tracing::info!("Reconnecting to {} with previous parameters", self.peer_id);
                self.params = self.reconnect_params.clone();
                self.begin_tunnel();
            }
            ReconnectMode::ReenterCredentials => {
                self.set_state(SessionState::AwaitingCredentials {
                    error: None,
                    can_retry: false,
                });
            }
        }
    }

    fn attach_surface(&mut self, pending: PendingSurface) {
        let handle = match self.state {
            SessionState::Connected { .. } => self.protocol.handle(),
            _ => None,
        };
        match handle {
            Some(handle) => self.attach_to(&handle, pending),
            None => {
                tracing::debug!("Surface queued until the session connects");
                self.pending_surface = Some(pending);
            }
        }
    }

    fn attach_to(&mut self, handle: &Arc<ProtocolSessionHandle>, pending: PendingSurface) {
        let attachment = self.bridge.attach(handle, pending.surface, pending.events);
        self.attachment = Some(attachment);
        // A burst on the replaced surface will never finish
        self.set_resizing(false);
    }

    fn on_bridge_event(&mut self, attachment: u64, event: BridgeEvent) {
        if self.attachment.as_ref().map(Attachment::id) != Some(attachment) {
            tracing::debug!("Ignoring {:?} from stale surface {}", event, attachment);
            return;
        }
        match event {
            BridgeEvent::ResizeStarted(_) => self.set_resizing(true),
            BridgeEvent::Resized { .. } => self.set_resizing(false),
            BridgeEvent::SurfaceDisposed => {
                tracing::debug!("Surface disposed");
                self.attachment = None;
            }
            BridgeEvent::FocusChanged(focused) => tracing::trace!("Surface focus: {}", focused),
        }
    }

    fn set_resizing(&mut self, resizing: bool) {
        if let SessionState::Connected { resizing: current } = self.state {
            if current != resizing {
                self.set_state(SessionState::Connected { resizing });
            }
        }
    }

    fn fail_attempt(&mut self, error: SessionError) {
        if error == SessionError::Protocol(ProtocolError::NotReachable) {
            tracing::error!("Protocol connect attempted without a connected tunnel");
        } else {
            tracing::warn!("Connect to {} failed: {}", self.peer_id, error);
        }

        self.teardown();
        let can_retry = error.retry_with_same_credentials();
        if !can_retry {
            self.params = None;
        }

        let surfaced = SurfacedError::from(&error);
        self.emit(OrchestratorEvent::Error(surfaced.clone()));
        self.set_state(SessionState::AwaitingCredentials {
            error: Some(surfaced),
            can_retry,
        });
    }

    /// Release every resource of the current attempt or connection.
    ///
    /// The protocol session is always disconnected before the tunnel closes.
    fn teardown(&mut self) {
        self.tunnel_attempt = None;
        self.protocol_attempt = None;
        if let Some(watcher) = self.close_watcher.take() {
            watcher.abort();
        }
        if let Some(attachment) = self.attachment.take() {
            attachment.detach();
        }
        self.protocol.disconnect();
        self.tunnel.close();
    }

    fn shutdown(&mut self) {
        self.teardown();
        self.params = None;
        self.reconnect_params = None;
        self.pending_surface = None;
        self.set_state(SessionState::Idle);
    }

    fn reconnect_mode(&self) -> ReconnectMode {
        if self.kind == ProtocolKind::Terminal && self.reconnect_params.is_some() {
            ReconnectMode::SameParameters
        } else {
            ReconnectMode::ReenterCredentials
        }
    }

    fn next_attempt(&mut self) -> u64 {
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        attempt
    }

    fn set_state(&mut self, state: SessionState) {
        tracing::debug!("Session state: {} -> {}", self.state, state);
        self.state = state.clone();

        let presentation = state.presentation();
        self.state_tx.send_replace(state);

        if presentation != self.presentation {
            self.presentation = presentation;
            self.emit(OrchestratorEvent::PresentationChanged(presentation));
        }
    }

    fn emit(&self, event: OrchestratorEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }
}
