//! Protocol session state machine

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use pl_core::config::{BridgeConfig, ProtocolConfig};
use pl_core::{
    CertificateTrustRequest, ProtocolCredentials, ProtocolError, ProtocolKind, TrustDecision,
};

use super::connector::{ConnectRequest, ProtocolConnector, TrustGate};
use super::handle::ProtocolSessionHandle;
use crate::tunnel::Reachability;

/// Externally visible protocol session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Disconnected,
    Connecting,
    /// Paused on a certificate decision
    PendingTrust,
    Connected,
}

struct Attempt {
    id: u64,
    cancel: CancellationToken,
    /// Responder for the outstanding certificate prompt
    pending_trust: Option<oneshot::Sender<TrustDecision>>,
    trust_resolved: Arc<Notify>,
    trust_rejected: bool,
}

enum Phase {
    Disconnected,
    Connecting(Attempt),
    Connected(Arc<ProtocolSessionHandle>),
}

/// Drives the connect lifecycle of one remote-control protocol session.
///
/// The session refuses to dial unless the tunnel reports the peer routable.
/// Time spent waiting for a certificate decision does not count against the
/// connect timeout.
pub struct ProtocolSession {
    kind: ProtocolKind,
    connector: Arc<dyn ProtocolConnector>,
    connect_timeout: Duration,
    event_capacity: usize,
    phase: Mutex<Phase>,
    next_attempt: AtomicU64,
}

impl ProtocolSession {
    /// Create a session using `connector`
    pub fn new(
        connector: Arc<dyn ProtocolConnector>,
        protocol: &ProtocolConfig,
        bridge: &BridgeConfig,
    ) -> Self {
        Self {
            kind: connector.kind(),
            connector,
            connect_timeout: protocol.connect_timeout,
            event_capacity: bridge.event_capacity,
            phase: Mutex::new(Phase::Disconnected),
            next_attempt: AtomicU64::new(1),
        }
    }

    /// Protocol variant of this session
    pub fn kind(&self) -> ProtocolKind {
        self.kind
    }

    /// Current state
    pub fn state(&self) -> ProtocolState {
        match &*self.lock() {
            Phase::Disconnected => ProtocolState::Disconnected,
            Phase::Connecting(attempt) if attempt.pending_trust.is_some() => {
                ProtocolState::PendingTrust
            }
            Phase::Connecting(_) => ProtocolState::Connecting,
            Phase::Connected(handle) if handle.is_closed() => ProtocolState::Disconnected,
            Phase::Connected(_) => ProtocolState::Connected,
        }
    }

    /// The live handle, if connected
    pub fn handle(&self) -> Option<Arc<ProtocolSessionHandle>> {
        match &*self.lock() {
            Phase::Connected(handle) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    /// Connect to the remote host.
    ///
    /// Fails with `NotReachable` without dialing if `route` is not routable.
    /// `on_trust` is invoked when the connector asks for a certificate
    /// decision; answer it with [`accept_trust`](Self::accept_trust) or
    /// [`reject_trust`](Self::reject_trust).
    pub async fn connect(
        &self,
        request: ConnectRequest,
        route: &dyn Reachability,
        on_trust: &(dyn Fn(CertificateTrustRequest) + Send + Sync),
    ) -> Result<Arc<ProtocolSessionHandle>, ProtocolError> {
        if !route.is_routable() {
            tracing::error!(
                "Refusing {} connect to {}: tunnel is not connected",
                self.kind,
                request.address
            );
            return Err(ProtocolError::NotReachable);
        }
        self.validate(&request)?;

        let (attempt_id, cancel, trust_resolved) = self.begin_attempt()?;
        let mut guard = AttemptGuard {
            session: self,
            attempt: attempt_id,
        };

        tracing::info!(
            "Connecting {} session to {}:{} as {}",
            self.kind,
            request.address,
            request.port,
            request.credentials.username()
        );

        let (gate, mut prompts) = TrustGate::channel();
        let connect = self.connector.connect(request, gate);
        tokio::pin!(connect);

        let deadline = tokio::time::sleep(self.connect_timeout);
        tokio::pin!(deadline);
        let mut paused_at: Option<Instant> = None;

        let result = loop {
            tokio::select! {
                result = &mut connect => break result,
                _ = cancel.cancelled() => break Err(ProtocolError::Cancelled),
                _ = &mut deadline, if paused_at.is_none() => {
                    tracing::warn!("{} connect timed out after {:?}", self.kind, self.connect_timeout);
                    break Err(ProtocolError::Timeout(self.connect_timeout));
                }
                Some(prompt) = prompts.recv() => {
                    if !self.enter_pending_trust(attempt_id, prompt.respond) {
                        break Err(ProtocolError::Cancelled);
                    }
                    tracing::info!(
                        "Awaiting trust decision for certificate of {} ({})",
                        prompt.request.host,
                        prompt.request.fingerprint
                    );
                    paused_at = Some(Instant::now());
                    on_trust(prompt.request);
                }
                _ = trust_resolved.notified(), if paused_at.is_some() => {
                    if let Some(paused) = paused_at.take() {
                        let extended = deadline.deadline() + paused.elapsed();
                        deadline.as_mut().reset(extended);
                    }
                }
            }
        };

        let result = match result {
            Ok(link) if !cancel.is_cancelled() => {
                let handle = ProtocolSessionHandle::spawn(self.kind, link, self.event_capacity);
                if self.finish_connected(attempt_id, &handle) {
                    guard.disarm();
                    tracing::info!("{} session connected (handle {})", self.kind, handle.id());
                    Ok(handle)
                } else {
                    handle.close();
                    Err(ProtocolError::Cancelled)
                }
            }
            // Dropping the link closes the driver
            Ok(_) => Err(ProtocolError::Cancelled),
            Err(_) if self.trust_was_rejected(attempt_id) => Err(ProtocolError::TrustRejected),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            tracing::warn!("{} connect failed: {}", self.kind, e);
        }
        result
    }

    /// Accept the outstanding certificate. Returns false if none is pending.
    pub fn accept_trust(&self) -> bool {
        self.resolve_trust(TrustDecision::Accept)
    }

    /// Reject the outstanding certificate. Returns false if none is pending.
    ///
    /// The connect attempt then fails with `TrustRejected`.
    pub fn reject_trust(&self) -> bool {
        self.resolve_trust(TrustDecision::Reject)
    }

    /// Disconnect.
    ///
    /// Idempotent. Cancels an in-flight connect or closes the live handle.
    pub fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.lock(), Phase::Disconnected);
        match previous {
            Phase::Disconnected => tracing::debug!("{} session already disconnected", self.kind),
            Phase::Connecting(mut attempt) => {
                tracing::info!("Cancelling in-flight {} connect", self.kind);
                attempt.cancel.cancel();
                if let Some(respond) = attempt.pending_trust.take() {
                    let _ = respond.send(TrustDecision::Reject);
                }
            }
            Phase::Connected(handle) => {
                tracing::info!("Disconnecting {} session (handle {})", self.kind, handle.id());
                handle.close();
            }
        }
    }

    fn validate(&self, request: &ConnectRequest) -> Result<(), ProtocolError> {
        if request.kind() != self.kind {
            return Err(ProtocolError::InvalidParameters(format!(
                "{} credentials supplied to a {} session",
                request.kind(),
                self.kind
            )));
        }
        if request.port == 0 {
            return Err(ProtocolError::InvalidParameters(
                "port must be non-zero".to_string(),
            ));
        }
        if request.credentials.username().trim().is_empty() {
            return Err(ProtocolError::InvalidParameters(
                "username is required".to_string(),
            ));
        }
        if let ProtocolCredentials::Desktop(_) = &request.credentials {
            match request.initial_size {
                Some(size) if !size.is_empty() => {}
                _ => {
                    return Err(ProtocolError::InvalidParameters(
                        "desktop sessions need an initial surface size".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    fn begin_attempt(&self) -> Result<(u64, CancellationToken, Arc<Notify>), ProtocolError> {
        let mut phase = self.lock();
        match &*phase {
            Phase::Connecting(_) => return Err(ProtocolError::AlreadyConnecting),
            Phase::Connected(handle) if !handle.is_closed() => {
                return Err(ProtocolError::AlreadyConnected)
            }
            _ => {}
        }

        let attempt = Attempt {
            id: self.next_attempt.fetch_add(1, Ordering::SeqCst),
            cancel: CancellationToken::new(),
            pending_trust: None,
            trust_resolved: Arc::new(Notify::new()),
            trust_rejected: false,
        };
        let started = (
            attempt.id,
            attempt.cancel.clone(),
            Arc::clone(&attempt.trust_resolved),
        );
        *phase = Phase::Connecting(attempt);
        Ok(started)
    }

    fn enter_pending_trust(&self, attempt_id: u64, respond: oneshot::Sender<TrustDecision>) -> bool {
        match &mut *self.lock() {
            Phase::Connecting(attempt) if attempt.id == attempt_id => {
                attempt.pending_trust = Some(respond);
                true
            }
            _ => false,
        }
    }

    fn resolve_trust(&self, decision: TrustDecision) -> bool {
        let mut phase = self.lock();
        let Phase::Connecting(attempt) = &mut *phase else {
            tracing::debug!("No certificate decision pending");
            return false;
        };
        let Some(respond) = attempt.pending_trust.take() else {
            tracing::debug!("No certificate decision pending");
            return false;
        };

        if decision == TrustDecision::Reject {
            attempt.trust_rejected = true;
        }
        tracing::info!("Certificate decision: {:?}", decision);
        let _ = respond.send(decision);
        attempt.trust_resolved.notify_one();
        true
    }

    fn trust_was_rejected(&self, attempt_id: u64) -> bool {
        matches!(&*self.lock(), Phase::Connecting(attempt) if attempt.id == attempt_id && attempt.trust_rejected)
    }

    fn finish_connected(&self, attempt_id: u64, handle: &Arc<ProtocolSessionHandle>) -> bool {
        let mut phase = self.lock();
        match &*phase {
            Phase::Connecting(attempt) if attempt.id == attempt_id => {
                *phase = Phase::Connected(Arc::clone(handle));
                true
            }
            _ => false,
        }
    }

    fn reset_if_current(&self, attempt_id: u64) {
        let mut phase = self.lock();
        if matches!(&*phase, Phase::Connecting(attempt) if attempt.id == attempt_id) {
            *phase = Phase::Disconnected;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ProtocolSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Returns the session to `Disconnected` unless the attempt connected
struct AttemptGuard<'a> {
    session: &'a ProtocolSession,
    attempt: u64,
}

impl AttemptGuard<'_> {
    fn disarm(&mut self) {
        self.attempt = 0;
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.attempt != 0 {
            self.session.reset_if_current(self.attempt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::link::{link_pair, LinkEndpoint, RemoteLink};
    use async_trait::async_trait;
    use pl_core::{DesktopCredentials, SurfaceSize, TerminalCredentials};
    use std::sync::atomic::{AtomicBool, AtomicU32};

    struct Route(AtomicBool);

    impl Reachability for Route {
        fn is_routable(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn routable() -> Route {
        Route(AtomicBool::new(true))
    }

    enum Behavior {
        Succeed,
        AuthFail,
        Hang,
        /// Ask for trust, then connect after `delay`
        Certificate { delay: Duration },
    }

    struct FakeConnector {
        kind: ProtocolKind,
        behavior: Behavior,
        calls: AtomicU32,
        endpoints: Mutex<Vec<LinkEndpoint>>,
    }

    impl FakeConnector {
        fn new(kind: ProtocolKind, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                kind,
                behavior,
                calls: AtomicU32::new(0),
                endpoints: Mutex::new(Vec::new()),
            })
        }

        fn link(&self) -> RemoteLink {
            let (link, endpoint) = link_pair(8);
            self.endpoints.lock().unwrap().push(endpoint);
            link
        }
    }

    #[async_trait]
    impl ProtocolConnector for FakeConnector {
        fn kind(&self) -> ProtocolKind {
            self.kind
        }

        async fn connect(
            &self,
            _request: ConnectRequest,
            trust: TrustGate,
        ) -> Result<RemoteLink, ProtocolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Succeed => Ok(self.link()),
                Behavior::AuthFail => Err(ProtocolError::AuthFailed),
                Behavior::Hang => std::future::pending().await,
                Behavior::Certificate { delay } => {
                    trust
                        .request(CertificateTrustRequest::from_der(
                            "100.64.0.10",
                            "CN=lab",
                            None,
                            b"cert",
                        ))
                        .await?;
                    tokio::time::sleep(*delay).await;
                    Ok(self.link())
                }
            }
        }
    }

    fn session(connector: Arc<FakeConnector>) -> Arc<ProtocolSession> {
        Arc::new(ProtocolSession::new(
            connector,
            &ProtocolConfig::default(),
            &BridgeConfig::default(),
        ))
    }

    fn terminal_request() -> ConnectRequest {
        ConnectRequest {
            address: "100.64.0.10".to_string(),
            port: 22,
            credentials: ProtocolCredentials::Terminal(TerminalCredentials {
                username: "root".to_string(),
                port: 22,
            }),
            initial_size: None,
        }
    }

    fn desktop_request(size: Option<SurfaceSize>) -> ConnectRequest {
        ConnectRequest {
            address: "100.64.0.10".to_string(),
            port: 3389,
            credentials: ProtocolCredentials::Desktop(DesktopCredentials {
                username: "admin".to_string(),
                password: "secret".to_string(),
                domain: None,
                port: 3389,
            }),
            initial_size: size,
        }
    }

    fn ignore_trust(_: CertificateTrustRequest) {}

    #[tokio::test]
    async fn test_connect_requires_routable_tunnel() {
        let connector = FakeConnector::new(ProtocolKind::Terminal, Behavior::Succeed);
        let session = session(connector.clone());

        let route = Route(AtomicBool::new(false));
        let err = session
            .connect(terminal_request(), &route, &ignore_trust)
            .await
            .unwrap_err();

        assert_eq!(err, ProtocolError::NotReachable);
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.state(), ProtocolState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let connector = FakeConnector::new(ProtocolKind::Terminal, Behavior::Succeed);
        let session = session(connector);

        let handle = session
            .connect(terminal_request(), &routable(), &ignore_trust)
            .await
            .unwrap();
        assert_eq!(session.state(), ProtocolState::Connected);

        session.disconnect();
        session.disconnect();
        assert_eq!(session.state(), ProtocolState::Disconnected);
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_auth_failure_returns_to_disconnected() {
        let connector = FakeConnector::new(ProtocolKind::Terminal, Behavior::AuthFail);
        let session = session(connector);

        let err = session
            .connect(terminal_request(), &routable(), &ignore_trust)
            .await
            .unwrap_err();
        assert_eq!(err, ProtocolError::AuthFailed);
        assert_eq!(session.state(), ProtocolState::Disconnected);
    }

    #[tokio::test]
    async fn test_mismatched_credentials_are_invalid() {
        let connector = FakeConnector::new(ProtocolKind::Terminal, Behavior::Succeed);
        let session = session(connector.clone());

        let err = session
            .connect(
                desktop_request(Some(SurfaceSize::new(1280, 720))),
                &routable(),
                &ignore_trust,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParameters(_)));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_desktop_requires_initial_size() {
        let connector = FakeConnector::new(ProtocolKind::Desktop, Behavior::Succeed);
        let session = session(connector);

        let err = session
            .connect(desktop_request(None), &routable(), &ignore_trust)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParameters(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out() {
        let connector = FakeConnector::new(ProtocolKind::Terminal, Behavior::Hang);
        let session = session(connector);

        let err = session
            .connect(terminal_request(), &routable(), &ignore_trust)
            .await
            .unwrap_err();
        assert_eq!(err, ProtocolError::Timeout(Duration::from_secs(30)));
        assert_eq!(session.state(), ProtocolState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_connect_while_connecting_is_rejected() {
        let connector = FakeConnector::new(ProtocolKind::Terminal, Behavior::Hang);
        let session = session(connector);

        let first = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .connect(terminal_request(), &routable(), &ignore_trust)
                    .await
            })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        let err = session
            .connect(terminal_request(), &routable(), &ignore_trust)
            .await
            .unwrap_err();
        assert_eq!(err, ProtocolError::AlreadyConnecting);

        session.disconnect();
        assert_eq!(first.await.unwrap().unwrap_err(), ProtocolError::Cancelled);
        assert_eq!(session.state(), ProtocolState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trust_wait_is_not_counted_against_timeout() {
        let connector = FakeConnector::new(
            ProtocolKind::Desktop,
            Behavior::Certificate {
                delay: Duration::from_secs(20),
            },
        );
        let session = session(connector);

        let prompted = Arc::new(Notify::new());
        let task = {
            let session = session.clone();
            let prompted = prompted.clone();
            tokio::spawn(async move {
                let on_trust = move |_: CertificateTrustRequest| prompted.notify_one();
                session
                    .connect(
                        desktop_request(Some(SurfaceSize::new(1280, 720))),
                        &routable(),
                        &on_trust,
                    )
                    .await
            })
        };

        prompted.notified().await;
        assert_eq!(session.state(), ProtocolState::PendingTrust);

        // The user takes longer to decide than the whole connect timeout
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(session.accept_trust());

        let handle = task.await.unwrap().unwrap();
        assert!(!handle.is_closed());
        assert_eq!(session.state(), ProtocolState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_trust_fails_connect() {
        let connector = FakeConnector::new(
            ProtocolKind::Desktop,
            Behavior::Certificate {
                delay: Duration::ZERO,
            },
        );
        let session = session(connector);

        let prompted = Arc::new(Notify::new());
        let task = {
            let session = session.clone();
            let prompted = prompted.clone();
            tokio::spawn(async move {
                let on_trust = move |_: CertificateTrustRequest| prompted.notify_one();
                session
                    .connect(
                        desktop_request(Some(SurfaceSize::new(1280, 720))),
                        &routable(),
                        &on_trust,
                    )
                    .await
            })
        };

        prompted.notified().await;
        assert!(session.reject_trust());
        assert!(!session.reject_trust());

        assert_eq!(
            task.await.unwrap().unwrap_err(),
            ProtocolError::TrustRejected
        );
        assert_eq!(session.state(), ProtocolState::Disconnected);
    }
}
