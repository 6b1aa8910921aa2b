//! Display surface seam

use bytes::Bytes;

use pl_core::SurfaceSize;

/// The UI element that renders a session and produces user input.
///
/// Rendering happens synchronously on the bridge task; implementations
/// should hand data off quickly.
pub trait DisplaySurface: Send + Sync {
    /// Render remote output
    fn render(&self, data: &[u8]);

    /// Adopt a size chosen by the remote side
    fn apply_remote_size(&self, _size: SurfaceSize) {}
}

/// Events a display surface produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// User input to forward
    Input(Bytes),
    /// The surface changed size
    Resize(SurfaceSize),
    /// The surface gained or lost focus
    Focus(bool),
    /// The surface was torn down
    Disposed,
}
