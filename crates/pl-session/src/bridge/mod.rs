//! Interactive I/O bridge
//!
//! Relays bytes between a [`ProtocolSessionHandle`] and a [`DisplaySurface`]:
//! remote output is rendered, user input is written back, and surface
//! resizes are debounced before they reach the remote side. Each handle has
//! at most one attached surface; attaching a new one detaches the previous.

mod debounce;
mod surface;

pub use debounce::ResizeDebouncer;
pub use surface::{DisplaySurface, SurfaceEvent};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use pl_core::config::BridgeConfig;
use pl_core::{ProtocolError, SurfaceSize};

use crate::protocol::{HandleEvent, ProtocolSessionHandle};

static NEXT_ATTACHMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Notifications from the bridge to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// A burst of surface resizes began
    ResizeStarted(SurfaceSize),
    /// A debounced resize was forwarded to the remote side
    Resized {
        size: SurfaceSize,
        result: Result<(), ProtocolError>,
    },
    /// The surface gained or lost focus
    FocusChanged(bool),
    /// The surface was torn down and has been detached
    SurfaceDisposed,
}

type Listener = Arc<dyn Fn(u64, BridgeEvent) + Send + Sync>;

struct AttachmentInner {
    id: u64,
    handle_id: u64,
    cancel: CancellationToken,
    surface: Mutex<Option<Arc<dyn DisplaySurface>>>,
}

/// A live binding between one surface and one session handle.
///
/// After [`detach`](Self::detach) returns, the surface receives no further
/// output.
#[derive(Clone)]
pub struct Attachment {
    inner: Arc<AttachmentInner>,
}

impl Attachment {
    fn new(handle_id: u64, surface: Arc<dyn DisplaySurface>) -> Self {
        Self {
            inner: Arc::new(AttachmentInner {
                id: NEXT_ATTACHMENT_ID.fetch_add(1, Ordering::Relaxed),
                handle_id,
                cancel: CancellationToken::new(),
                surface: Mutex::new(Some(surface)),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether the surface is still attached
    pub fn is_attached(&self) -> bool {
        !self.inner.cancel.is_cancelled()
    }

    /// Detach the surface. Idempotent.
    pub fn detach(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner.cancel.cancel();
        self.surface().take();
        tracing::debug!(
            "Detached surface {} from handle {}",
            self.inner.id,
            self.inner.handle_id
        );
    }

    /// Resolves once the surface has been detached
    pub async fn detached(&self) {
        self.inner.cancel.cancelled().await
    }

    fn render(&self, data: &[u8]) {
        if let Some(surface) = self.surface().as_ref() {
            surface.render(data);
        }
    }

    fn apply_remote_size(&self, size: SurfaceSize) {
        if let Some(surface) = self.surface().as_ref() {
            surface.apply_remote_size(size);
        }
    }

    fn surface(&self) -> MutexGuard<'_, Option<Arc<dyn DisplaySurface>>> {
        self.inner
            .surface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("id", &self.inner.id)
            .field("handle_id", &self.inner.handle_id)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Attaches display surfaces to protocol session handles
#[derive(Clone)]
pub struct IoBridge {
    resize_debounce: Duration,
    listener: Option<Listener>,
}

impl IoBridge {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            resize_debounce: config.resize_debounce,
            listener: None,
        }
    }

    /// Receive [`BridgeEvent`]s from every attachment made by this bridge,
    /// along with the id of the attachment that produced each one
    pub fn with_listener(
        mut self,
        listener: impl Fn(u64, BridgeEvent) + Send + Sync + 'static,
    ) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Bind `surface` to `handle`, replacing any previously attached surface.
    ///
    /// `events` carries the surface's input, resize, focus and disposal
    /// events. Attaching to a closed handle yields a detached attachment.
    pub fn attach(
        &self,
        handle: &Arc<ProtocolSessionHandle>,
        surface: Arc<dyn DisplaySurface>,
        events: mpsc::Receiver<SurfaceEvent>,
    ) -> Attachment {
        let attachment = Attachment::new(handle.id(), surface);
        let output = handle.subscribe();

        if let Some(previous) = handle.replace_attachment(attachment.clone()) {
            tracing::debug!("Replacing surface {} on handle {}", previous.id(), handle.id());
            previous.detach();
        }

        if attachment.is_attached() {
            tracing::debug!("Attached surface {} to handle {}", attachment.id(), handle.id());
            let task = BridgeTask {
                handle: Arc::clone(handle),
                attachment: attachment.clone(),
                debouncer: ResizeDebouncer::new(self.resize_debounce),
                local_size: None,
                listener: self.listener.clone(),
            };
            tokio::spawn(relay(task, output, events));
        }

        attachment
    }
}

struct BridgeTask {
    handle: Arc<ProtocolSessionHandle>,
    attachment: Attachment,
    debouncer: ResizeDebouncer,
    /// Last size the surface asked for
    local_size: Option<SurfaceSize>,
    listener: Option<Listener>,
}

impl BridgeTask {
    fn notify(&self, event: BridgeEvent) {
        if let Some(listener) = &self.listener {
            listener(self.attachment.id(), event);
        }
    }

    async fn forward_resize(&mut self, size: SurfaceSize) {
        self.local_size = Some(size);
        let result = self.handle.resize(size).await;
        if let Err(e) = &result {
            tracing::warn!("Resize to {} failed: {}", size, e);
        }
        self.notify(BridgeEvent::Resized { size, result });
    }

    async fn on_remote_resize(&mut self, size: SurfaceSize) {
        if self.debouncer.is_pending() {
            tracing::debug!("Ignoring remote resize to {}: local resize pending", size);
            return;
        }
        match self.local_size {
            Some(local) if local != size => {
                tracing::debug!("Remote resized to {}, re-asserting {}", size, local);
                self.forward_resize(local).await;
            }
            _ => self.attachment.apply_remote_size(size),
        }
    }

    async fn on_surface_event(&mut self, event: SurfaceEvent) -> bool {
        match event {
            SurfaceEvent::Input(data) => {
                if let Err(e) = self.handle.write(data).await {
                    tracing::debug!("Dropping input for handle {}: {}", self.handle.id(), e);
                }
            }
            SurfaceEvent::Resize(size) if size.is_empty() => {
                tracing::debug!("Ignoring empty surface size {}", size);
            }
            SurfaceEvent::Resize(size) => {
                if self.debouncer.push(size) {
                    self.notify(BridgeEvent::ResizeStarted(size));
                }
            }
            SurfaceEvent::Focus(focused) => self.notify(BridgeEvent::FocusChanged(focused)),
            SurfaceEvent::Disposed => {
                self.attachment.detach();
                self.notify(BridgeEvent::SurfaceDisposed);
                return false;
            }
        }
        true
    }
}

async fn relay(
    mut task: BridgeTask,
    mut output: broadcast::Receiver<HandleEvent>,
    mut events: mpsc::Receiver<SurfaceEvent>,
) {
    let cancel = task.attachment.inner.cancel.clone();

    loop {
        let due = task.debouncer.deadline();

        tokio::select! {
            _ = cancel.cancelled() => break,
            event = output.recv() => match event {
                Ok(HandleEvent::Data(data)) => task.attachment.render(&data),
                Ok(HandleEvent::RemoteResized(size)) => task.on_remote_resize(size).await,
                Ok(HandleEvent::Closed { .. }) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "Surface {} fell behind, {} events skipped",
                        task.attachment.id(),
                        skipped
                    );
                }
            },
            event = events.recv() => match event {
                Some(event) => {
                    if !task.on_surface_event(event).await {
                        break;
                    }
                }
                None => {
                    task.attachment.detach();
                    task.notify(BridgeEvent::SurfaceDisposed);
                    break;
                }
            },
            _ = tokio::time::sleep_until(due.unwrap_or_else(Instant::now)), if due.is_some() => {
                if let Some(size) = task.debouncer.take() {
                    task.forward_resize(size).await;
                }
            }
        }
    }

    tracing::debug!("Bridge for surface {} stopped", task.attachment.id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{link_pair, LinkCommand, LinkEndpoint, LinkEvent};
    use bytes::Bytes;
    use pl_core::ProtocolKind;

    #[derive(Default)]
    struct RecordingSurface {
        rendered: Mutex<Vec<u8>>,
        remote_sizes: Mutex<Vec<SurfaceSize>>,
    }

    impl RecordingSurface {
        fn rendered(&self) -> Vec<u8> {
            self.rendered.lock().unwrap().clone()
        }
    }

    impl DisplaySurface for RecordingSurface {
        fn render(&self, data: &[u8]) {
            self.rendered.lock().unwrap().extend_from_slice(data);
        }

        fn apply_remote_size(&self, size: SurfaceSize) {
            self.remote_sizes.lock().unwrap().push(size);
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        Write(Bytes),
        Resize(SurfaceSize),
        Close,
    }

    struct Remote {
        events: mpsc::Sender<LinkEvent>,
        sent: Arc<Mutex<Vec<Sent>>>,
    }

    impl Remote {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn resizes(&self) -> Vec<SurfaceSize> {
            self.sent()
                .into_iter()
                .filter_map(|s| match s {
                    Sent::Resize(size) => Some(size),
                    _ => None,
                })
                .collect()
        }
    }

    fn connected_handle() -> (Arc<ProtocolSessionHandle>, Remote) {
        let (link, endpoint) = link_pair(64);
        let handle = ProtocolSessionHandle::spawn(ProtocolKind::Terminal, link, 64);
        let LinkEndpoint {
            mut commands,
            events,
        } = endpoint;
        let sent = Arc::new(Mutex::new(Vec::new()));

        let log = sent.clone();
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                let entry = match command {
                    LinkCommand::Write(data) => Sent::Write(data),
                    LinkCommand::Resize { size, done } => {
                        let _ = done.send(Ok(()));
                        Sent::Resize(size)
                    }
                    LinkCommand::Close => Sent::Close,
                };
                log.lock().unwrap().push(entry);
            }
        });

        (
            handle,
            Remote { events, sent },
        )
    }

    fn bridge() -> IoBridge {
        IoBridge::new(&BridgeConfig::default())
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_output_rendered_and_input_forwarded() {
        let (handle, remote) = connected_handle();
        let surface = Arc::new(RecordingSurface::default());
        let (input, events) = mpsc::channel(16);

        let _attachment = bridge().attach(&handle, surface.clone(), events);

        remote
            .events
            .send(LinkEvent::Data(Bytes::from_static(b"$ ")))
            .await
            .unwrap();
        input
            .send(SurfaceEvent::Input(Bytes::from_static(b"ls\r")))
            .await
            .unwrap();
        settle().await;

        assert_eq!(surface.rendered(), b"$ ".to_vec());
        assert_eq!(remote.sent(), vec![Sent::Write(Bytes::from_static(b"ls\r"))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resize_burst_forwards_final_size_once() {
        let (handle, remote) = connected_handle();
        let surface = Arc::new(RecordingSurface::default());
        let (input, events) = mpsc::channel(16);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let bridge = bridge().with_listener(move |_, event| log.lock().unwrap().push(event));
        let _attachment = bridge.attach(&handle, surface, events);

        for width in [90u16, 100, 110, 120, 132] {
            input
                .send(SurfaceEvent::Resize(SurfaceSize::new(width, 40)))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(remote.resizes().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;

        assert_eq!(remote.resizes(), vec![SurfaceSize::new(132, 40)]);
        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                BridgeEvent::ResizeStarted(SurfaceSize::new(90, 40)),
                BridgeEvent::Resized {
                    size: SurfaceSize::new(132, 40),
                    result: Ok(())
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_events_carry_attachment_id() {
        let (handle, _remote) = connected_handle();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let bridge = bridge().with_listener(move |id, event| log.lock().unwrap().push((id, event)));

        let (_first_input, first_events) = mpsc::channel(16);
        let first = bridge.attach(&handle, Arc::new(RecordingSurface::default()), first_events);
        let (second_input, second_events) = mpsc::channel(16);
        let second = bridge.attach(&handle, Arc::new(RecordingSurface::default()), second_events);
        assert!(!first.is_attached());

        second_input.send(SurfaceEvent::Focus(true)).await.unwrap();
        settle().await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, vec![(second.id(), BridgeEvent::FocusChanged(true))]);
    }

    #[tokio::test]
    async fn test_no_render_after_detach() {
        let (handle, remote) = connected_handle();
        let surface = Arc::new(RecordingSurface::default());
        let (_input, events) = mpsc::channel(16);

        let attachment = bridge().attach(&handle, surface.clone(), events);
        remote
            .events
            .send(LinkEvent::Data(Bytes::from_static(b"before")))
            .await
            .unwrap();
        settle().await;

        attachment.detach();
        attachment.detach();
        assert!(!attachment.is_attached());

        remote
            .events
            .send(LinkEvent::Data(Bytes::from_static(b"after")))
            .await
            .unwrap();
        settle().await;

        assert_eq!(surface.rendered(), b"before".to_vec());
    }

    #[tokio::test]
    async fn test_second_attach_replaces_first() {
        let (handle, remote) = connected_handle();
        let first_surface = Arc::new(RecordingSurface::default());
        let second_surface = Arc::new(RecordingSurface::default());
        let (_first_input, first_events) = mpsc::channel(16);
        let (_second_input, second_events) = mpsc::channel(16);

        let bridge = bridge();
        let first = bridge.attach(&handle, first_surface.clone(), first_events);
        let second = bridge.attach(&handle, second_surface.clone(), second_events);
        assert!(!first.is_attached());
        assert!(second.is_attached());

        remote
            .events
            .send(LinkEvent::Data(Bytes::from_static(b"hello")))
            .await
            .unwrap();
        settle().await;

        assert!(first_surface.rendered().is_empty());
        assert_eq!(second_surface.rendered(), b"hello".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_resize_wins_over_remote() {
        let (handle, remote) = connected_handle();
        let surface = Arc::new(RecordingSurface::default());
        let (input, events) = mpsc::channel(16);
        let _attachment = bridge().attach(&handle, surface.clone(), events);

        input
            .send(SurfaceEvent::Resize(SurfaceSize::new(1280, 720)))
            .await
            .unwrap();
        settle().await;

        // Remote resize while the local one is still pending is ignored
        remote
            .events
            .send(LinkEvent::RemoteResized(SurfaceSize::new(1024, 768)))
            .await
            .unwrap();
        settle().await;
        assert!(surface.remote_sizes.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(remote.resizes(), vec![SurfaceSize::new(1280, 720)]);

        // A later conflicting remote resize is answered with the local size
        remote
            .events
            .send(LinkEvent::RemoteResized(SurfaceSize::new(800, 600)))
            .await
            .unwrap();
        settle().await;
        assert_eq!(
            remote.resizes(),
            vec![SurfaceSize::new(1280, 720), SurfaceSize::new(1280, 720)]
        );
        assert!(surface.remote_sizes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_resize_applied_without_local_size() {
        let (handle, remote) = connected_handle();
        let surface = Arc::new(RecordingSurface::default());
        let (_input, events) = mpsc::channel(16);
        let _attachment = bridge().attach(&handle, surface.clone(), events);

        remote
            .events
            .send(LinkEvent::RemoteResized(SurfaceSize::new(1024, 768)))
            .await
            .unwrap();
        settle().await;

        assert_eq!(
            *surface.remote_sizes.lock().unwrap(),
            vec![SurfaceSize::new(1024, 768)]
        );
    }

    #[tokio::test]
    async fn test_disposed_surface_detaches() {
        let (handle, _remote) = connected_handle();
        let surface = Arc::new(RecordingSurface::default());
        let (input, events) = mpsc::channel(16);
        let attachment = bridge().attach(&handle, surface, events);

        input.send(SurfaceEvent::Disposed).await.unwrap();
        attachment.detached().await;
        assert!(!attachment.is_attached());
    }

    #[tokio::test]
    async fn test_closing_handle_detaches_surface() {
        let (handle, _remote) = connected_handle();
        let surface = Arc::new(RecordingSurface::default());
        let (_input, events) = mpsc::channel(16);
        let attachment = bridge().attach(&handle, surface, events);

        handle.close();
        assert!(!attachment.is_attached());

        let (_input, events) = mpsc::channel(16);
        let late = bridge().attach(&handle, Arc::new(RecordingSurface::default()), events);
        assert!(!late.is_attached());
    }
}
