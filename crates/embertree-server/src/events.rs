//! Lifecycle and domain events
//!
//! Observers call [`EventBus::subscribe`] (or `TreeServer::events`) and read
//! from the returned broadcast receiver. Emitting never blocks; events are
//! dropped when nobody listens and lagging receivers lose the oldest ones.

use std::net::SocketAddr;

use embertree_core::{Element, Error, Root, TreePath};
use tokio::sync::broadcast;

/// A connection change announced by the routing engine
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixEvent {
    pub path: TreePath,
    pub target: u32,
    pub sources: Vec<u32>,
    /// Requesting client, `None` for server-side operations
    pub client: Option<SocketAddr>,
}

#[derive(Debug, Clone)]
pub enum ServerEvent {
    Listening(SocketAddr),
    Connection(SocketAddr),
    Disconnect(SocketAddr),
    ClientError {
        address: SocketAddr,
        error: String,
    },
    Error(Error),
    Request {
        client: SocketAddr,
        root: Root,
        /// Resolved path, `"root"` for commands on the tree root, `None`
        /// when the request was ignored or rejected
        path: Option<String>,
    },
    /// The element after the change, without children
    ValueChange(Element),
    MatrixConnect(MatrixEvent),
    MatrixDisconnect(MatrixEvent),
    MatrixChange(MatrixEvent),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Listening(_) => "listening",
            ServerEvent::Connection(_) => "connection",
            ServerEvent::Disconnect(_) => "disconnect",
            ServerEvent::ClientError { .. } => "clientError",
            ServerEvent::Error(_) => "error",
            ServerEvent::Request { .. } => "request",
            ServerEvent::ValueChange(_) => "value-change",
            ServerEvent::MatrixConnect(_) => "matrix-connect",
            ServerEvent::MatrixDisconnect(_) => "matrix-disconnect",
            ServerEvent::MatrixChange(_) => "matrix-change",
        }
    }

    pub fn as_matrix(&self) -> Option<&MatrixEvent> {
        match self {
            ServerEvent::MatrixConnect(e)
            | ServerEvent::MatrixDisconnect(e)
            | ServerEvent::MatrixChange(e) => Some(e),
            _ => None,
        }
    }
}

/// Fan-out channel for [`ServerEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: ServerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
