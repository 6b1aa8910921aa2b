//! Live protocol session handle

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use pl_core::{ProtocolError, ProtocolKind, SurfaceSize};

use super::link::{LinkCommand, LinkEvent, RemoteLink};
use crate::bridge::Attachment;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Events published by a connected session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleEvent {
    /// Remote output
    Data(Bytes),
    /// The remote side resized the surface on its own
    RemoteResized(SurfaceSize),
    /// The session ended
    Closed { reason: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Liveness {
    Open,
    Closed { reason: Option<String> },
}

impl Liveness {
    fn is_closed(&self) -> bool {
        matches!(self, Liveness::Closed { .. })
    }
}

/// A live, bidirectional channel to the remote host.
///
/// Only the I/O bridge writes to it or resizes it. At most one surface is
/// attached at a time.
pub struct ProtocolSessionHandle {
    id: u64,
    kind: ProtocolKind,
    commands: mpsc::Sender<LinkCommand>,
    events: broadcast::Sender<HandleEvent>,
    /// Receiver created before the pump starts so early output is kept for
    /// the first subscriber
    first_subscriber: Mutex<Option<broadcast::Receiver<HandleEvent>>>,
    liveness: Arc<watch::Sender<Liveness>>,
    closing: AtomicBool,
    attachment: Mutex<Option<Attachment>>,
    pump: JoinHandle<()>,
}

impl ProtocolSessionHandle {
    /// Wrap a connected link and start relaying its events
    pub fn spawn(kind: ProtocolKind, link: RemoteLink, capacity: usize) -> Arc<Self> {
        let (events, first) = broadcast::channel(capacity.max(1));
        let (liveness, _) = watch::channel(Liveness::Open);
        let liveness = Arc::new(liveness);

        let pump = tokio::spawn(pump_events(
            link.events,
            events.clone(),
            Arc::clone(&liveness),
        ));

        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Protocol session handle {} ({}) opened", id, kind);

        Arc::new(Self {
            id,
            kind,
            commands: link.commands,
            events,
            first_subscriber: Mutex::new(Some(first)),
            liveness,
            closing: AtomicBool::new(false),
            attachment: Mutex::new(None),
            pump,
        })
    }

    /// Unique handle ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Protocol spoken on this handle
    pub fn kind(&self) -> ProtocolKind {
        self.kind
    }

    /// Whether the session has ended, locally or remotely
    pub fn is_closed(&self) -> bool {
        self.liveness.borrow().is_closed()
    }

    /// Subscribe to remote output and lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<HandleEvent> {
        lock(&self.first_subscriber)
            .take()
            .unwrap_or_else(|| self.events.subscribe())
    }

    /// Resolves with the close reason once the session has ended.
    ///
    /// The returned future does not keep the handle alive.
    pub fn closed(&self) -> impl Future<Output = Option<String>> + Send + 'static {
        let mut rx = self.liveness.subscribe();
        async move {
            match rx.wait_for(Liveness::is_closed).await {
                Ok(state) => match &*state {
                    Liveness::Closed { reason } => reason.clone(),
                    Liveness::Open => None,
                },
                Err(_) => None,
            }
        }
    }

    /// Close the session.
    ///
    /// Idempotent. Detaches any attached surface first.
    pub fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(attachment) = lock(&self.attachment).take() {
            attachment.detach();
        }

        if let Err(e) = self.commands.try_send(LinkCommand::Close) {
            tracing::debug!("Handle {}: close not delivered to driver: {}", self.id, e);
        }

        mark_closed(&self.liveness, None);
        tracing::debug!("Protocol session handle {} closed", self.id);
    }

    /// Send input bytes to the remote host
    pub(crate) async fn write(&self, data: Bytes) -> Result<(), ProtocolError> {
        if self.is_closed() {
            return Err(session_closed());
        }
        self.commands
            .send(LinkCommand::Write(data))
            .await
            .map_err(|_| session_closed())
    }

    /// Resize the remote surface and wait for the acknowledgement
    pub(crate) async fn resize(&self, size: SurfaceSize) -> Result<(), ProtocolError> {
        if self.is_closed() {
            return Err(session_closed());
        }
        let (done, ack) = oneshot::channel();
        self.commands
            .send(LinkCommand::Resize { size, done })
            .await
            .map_err(|_| session_closed())?;
        ack.await.map_err(|_| session_closed())?
    }

    /// Install `attachment` as the current one, returning the previous.
    ///
    /// A closed handle refuses the attachment and detaches it immediately.
    pub(crate) fn replace_attachment(&self, attachment: Attachment) -> Option<Attachment> {
        if self.closing.load(Ordering::SeqCst) {
            attachment.detach();
            return None;
        }
        lock(&self.attachment).replace(attachment)
    }
}

impl std::fmt::Debug for ProtocolSessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSessionHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for ProtocolSessionHandle {
    fn drop(&mut self) {
        self.close();
        self.pump.abort();
    }
}

async fn pump_events(
    mut link_events: mpsc::Receiver<LinkEvent>,
    events: broadcast::Sender<HandleEvent>,
    liveness: Arc<watch::Sender<Liveness>>,
) {
    let reason = loop {
        match link_events.recv().await {
            // Send errors only mean nobody is listening right now
            Some(LinkEvent::Data(data)) => {
                let _ = events.send(HandleEvent::Data(data));
            }
            Some(LinkEvent::RemoteResized(size)) => {
                let _ = events.send(HandleEvent::RemoteResized(size));
            }
            Some(LinkEvent::Closed { reason }) => break reason,
            None => break None,
        }
    };

    if let Some(reason) = &reason {
        tracing::info!("Remote session closed: {}", reason);
    }
    mark_closed(&liveness, reason.clone());
    let _ = events.send(HandleEvent::Closed { reason });
}

fn mark_closed(liveness: &watch::Sender<Liveness>, reason: Option<String>) {
    liveness.send_if_modified(|state| {
        if state.is_closed() {
            return false;
        }
        *state = Liveness::Closed { reason };
        true
    });
}

fn session_closed() -> ProtocolError {
    ProtocolError::TransportError("session closed".to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
