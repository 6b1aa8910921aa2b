//! Tunnel session state machine

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use pl_core::config::TunnelConfig;
use pl_core::time::{current_time_millis, elapsed_since};
use pl_core::traits::AccessControl;
use pl_core::{AccessError, AccessRule, PeerId, TargetPeer, TunnelError};

use super::revoke::revoke_grant;

/// Externally visible tunnel state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Disconnected,
    Connecting,
    Connected,
}

/// Answers whether traffic toward the target peer is currently routable.
///
/// The protocol layer consults this before dialing so it never connects
/// over a tunnel that is not up.
pub trait Reachability: Send + Sync {
    fn is_routable(&self) -> bool;
}

/// A temporary, rule-scoped allowance for traffic to one peer.
///
/// At most one grant exists per tunnel session. The grant is revoked when
/// the session closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralAccessGrant {
    /// Peer the grant allows traffic to
    pub peer_id: PeerId,
    /// Allowed `protocol/port` rules
    pub rules: BTreeSet<AccessRule>,
    /// Unix timestamp (millis) the grant was confirmed at
    pub created_at: u64,
}

impl EphemeralAccessGrant {
    fn new(peer_id: PeerId, rules: BTreeSet<AccessRule>) -> Self {
        Self {
            peer_id,
            rules,
            created_at: current_time_millis(),
        }
    }

    /// How long the grant has been active
    pub fn age(&self) -> Duration {
        elapsed_since(self.created_at)
    }

    /// Whether the grant allows the given rule
    pub fn allows(&self, rule: &AccessRule) -> bool {
        self.rules.contains(rule)
    }
}

enum Phase {
    Disconnected,
    Connecting {
        attempt: u64,
        cancel: CancellationToken,
    },
    Connected(EphemeralAccessGrant),
}

/// Owns the lifecycle of a single ephemeral access grant.
///
/// `open` is idempotent for the same peer and rule set. `close` never fails
/// and never blocks: remote revocation runs in a background task. A later
/// `open` does not request access until every such revoke has finished.
pub struct TunnelSession {
    access: Arc<dyn AccessControl>,
    config: TunnelConfig,
    phase: Mutex<Phase>,
    next_attempt: AtomicU64,
    /// Number of background revokes still running
    revokes: Arc<watch::Sender<usize>>,
}

impl TunnelSession {
    /// Create a new tunnel session on top of the given access control
    pub fn new(access: Arc<dyn AccessControl>, config: TunnelConfig) -> Self {
        let (revokes, _) = watch::channel(0);
        Self {
            access,
            config,
            phase: Mutex::new(Phase::Disconnected),
            next_attempt: AtomicU64::new(1),
            revokes: Arc::new(revokes),
        }
    }

    /// Current state
    pub fn state(&self) -> TunnelState {
        match &*self.lock() {
            Phase::Disconnected => TunnelState::Disconnected,
            Phase::Connecting { .. } => TunnelState::Connecting,
            Phase::Connected(_) => TunnelState::Connected,
        }
    }

    /// The active grant, if connected
    pub fn grant(&self) -> Option<EphemeralAccessGrant> {
        match &*self.lock() {
            Phase::Connected(grant) => Some(grant.clone()),
            _ => None,
        }
    }

    /// Request temporary access to `peer` for exactly `rules`.
    ///
    /// Returns the existing grant if already connected to the same peer with
    /// the same rule set. If this future is dropped before it settles, the
    /// session returns to `Disconnected` and any grant that may have been
    /// installed remotely is revoked.
    pub async fn open(
        &self,
        peer: &TargetPeer,
        rules: &[AccessRule],
    ) -> Result<EphemeralAccessGrant, TunnelError> {
        let rules: BTreeSet<AccessRule> = rules.iter().copied().collect();

        let (attempt, cancel) = {
            let mut phase = self.lock();
            match &*phase {
                Phase::Connected(grant) if grant.peer_id == peer.id && grant.rules == rules => {
                    tracing::debug!("Tunnel to {} already open", peer.id);
                    return Ok(grant.clone());
                }
                Phase::Connected(grant) => {
                    return Err(TunnelError::AlreadyConnected {
                        peer: grant.peer_id.clone(),
                    });
                }
                Phase::Connecting { .. } => return Err(TunnelError::AlreadyConnecting),
                Phase::Disconnected => {}
            }

            let attempt = self.next_attempt.fetch_add(1, Ordering::SeqCst);
            let cancel = CancellationToken::new();
            *phase = Phase::Connecting {
                attempt,
                cancel: cancel.clone(),
            };
            (attempt, cancel)
        };

        let mut guard = OpenGuard {
            session: self,
            peer_id: peer.id.clone(),
            attempt,
            settled: false,
        };

        let rule_strings: Vec<String> = rules.iter().map(ToString::to_string).collect();
        tracing::info!(
            "Requesting temporary access to {} ({}) for [{}]",
            peer.id,
            peer.address,
            rule_strings.join(", ")
        );

        let timeout = self.config.open_timeout;
        let request = async {
            self.wait_for_revokes().await;
            self.access.connect_temporary(&peer.id, &rule_strings).await
        };
        let outcome = tokio::select! {
            result = tokio::time::timeout(timeout, request) => Some(result),
            _ = cancel.cancelled() => None,
        };
        guard.settled = true;

        match outcome {
            None => {
                // close() already moved the session to Disconnected
                tracing::info!("Tunnel open to {} cancelled", peer.id);
                self.spawn_revoke(peer.id.clone());
                Err(TunnelError::Cancelled)
            }
            Some(Err(_elapsed)) => {
                tracing::warn!("Access grant for {} not confirmed within {:?}", peer.id, timeout);
                self.reset_if_current(attempt);
                self.spawn_revoke(peer.id.clone());
                Err(TunnelError::Timeout(timeout))
            }
            Some(Ok(Err(e))) => {
                tracing::warn!("Temporary access to {} failed: {}", peer.id, e);
                self.reset_if_current(attempt);
                Err(map_access_error(&peer.id, e))
            }
            Some(Ok(Ok(()))) => {
                let mut phase = self.lock();
                match &*phase {
                    Phase::Connecting { attempt: current, .. } if *current == attempt => {
                        let grant = EphemeralAccessGrant::new(peer.id.clone(), rules);
                        *phase = Phase::Connected(grant.clone());
                        tracing::info!("Tunnel to {} connected", peer.id);
                        Ok(grant)
                    }
                    _ => {
                        drop(phase);
                        tracing::info!("Tunnel to {} closed while opening", peer.id);
                        self.spawn_revoke(peer.id.clone());
                        Err(TunnelError::Cancelled)
                    }
                }
            }
        }
    }

    /// Close the tunnel.
    ///
    /// Idempotent. Cancels an in-flight open, and revokes an active grant
    /// in the background. The session is `Disconnected` when this returns.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.lock(), Phase::Disconnected);
        match previous {
            Phase::Disconnected => tracing::debug!("Tunnel already closed"),
            Phase::Connecting { cancel, .. } => {
                tracing::info!("Cancelling in-flight tunnel open");
                cancel.cancel();
            }
            Phase::Connected(grant) => {
                tracing::info!(
                    "Closing tunnel to {} after {:?}",
                    grant.peer_id,
                    grant.age()
                );
                self.spawn_revoke(grant.peer_id);
            }
        }
    }

    fn reset_if_current(&self, attempt: u64) {
        let mut phase = self.lock();
        if matches!(&*phase, Phase::Connecting { attempt: current, .. } if *current == attempt) {
            *phase = Phase::Disconnected;
        }
    }

    /// Wait until no revoke is outstanding
    async fn wait_for_revokes(&self) {
        let mut pending = self.revokes.subscribe();
        let outstanding = *pending.borrow();
        if outstanding > 0 {
            tracing::debug!("Waiting for {} pending revoke(s)", outstanding);
        }
        // The sender lives as long as `self`
        let _ = pending.wait_for(|count| *count == 0).await;
    }

    fn spawn_revoke(&self, peer_id: PeerId) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                "No async runtime available, temporary access to {} not revoked",
                peer_id
            );
            return;
        };

        let in_flight = RevokeInFlight::new(Arc::clone(&self.revokes));
        let access = Arc::clone(&self.access);
        let backoff = self.config.revoke_backoff.clone();
        let attempts = self.config.revoke_attempts;
        runtime.spawn(async move {
            let _in_flight = in_flight;
            // Failures are logged inside revoke_grant
            let _ = revoke_grant(access, peer_id, &backoff, attempts).await;
        });
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Reachability for TunnelSession {
    fn is_routable(&self) -> bool {
        matches!(&*self.lock(), Phase::Connected(_))
    }
}

impl Drop for TunnelSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Counts one background revoke until dropped
struct RevokeInFlight(Arc<watch::Sender<usize>>);

impl RevokeInFlight {
    fn new(counter: Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|count| *count += 1);
        Self(counter)
    }
}

impl Drop for RevokeInFlight {
    fn drop(&mut self) {
        self.0.send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Resets the session if an `open` future is dropped before settling
struct OpenGuard<'a> {
    session: &'a TunnelSession,
    peer_id: PeerId,
    attempt: u64,
    settled: bool,
}

impl Drop for OpenGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        tracing::debug!("Tunnel open to {} abandoned", self.peer_id);
        self.session.reset_if_current(self.attempt);
        self.session.spawn_revoke(self.peer_id.clone());
    }
}

fn map_access_error(peer_id: &PeerId, error: AccessError) -> TunnelError {
    match error {
        AccessError::Denied(reason) => TunnelError::GrantDenied {
            peer: peer_id.clone(),
            reason,
        },
        AccessError::PeerNotFound(peer) => TunnelError::GrantDenied {
            reason: format!("peer {} not found", peer),
            peer,
        },
        AccessError::Http(message) => TunnelError::Api(message),
    }
}
