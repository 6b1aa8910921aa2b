//! Channels between a protocol session handle and the connector's driver task

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use pl_core::{ProtocolError, SurfaceSize};

/// Commands sent from the handle to the remote side
#[derive(Debug)]
pub enum LinkCommand {
    /// Bytes typed by the user
    Write(Bytes),
    /// Resize the remote surface, acknowledged once applied
    Resize {
        size: SurfaceSize,
        done: oneshot::Sender<Result<(), ProtocolError>>,
    },
    /// Close the remote session
    Close,
}

/// Events produced by the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Output to render
    Data(Bytes),
    /// The remote side changed the surface size on its own
    RemoteResized(SurfaceSize),
    /// The remote session ended
    Closed { reason: Option<String> },
}

/// Handle-side half of a connected protocol channel
#[derive(Debug)]
pub struct RemoteLink {
    pub commands: mpsc::Sender<LinkCommand>,
    pub events: mpsc::Receiver<LinkEvent>,
}

/// Driver-side half of a connected protocol channel
#[derive(Debug)]
pub struct LinkEndpoint {
    pub commands: mpsc::Receiver<LinkCommand>,
    pub events: mpsc::Sender<LinkEvent>,
}

/// Create a connected link pair with the given buffer capacity
pub fn link_pair(capacity: usize) -> (RemoteLink, LinkEndpoint) {
    let (command_tx, command_rx) = mpsc::channel(capacity);
    let (event_tx, event_rx) = mpsc::channel(capacity);
    (
        RemoteLink {
            commands: command_tx,
            events: event_rx,
        },
        LinkEndpoint {
            commands: command_rx,
            events: event_tx,
        },
    )
}
