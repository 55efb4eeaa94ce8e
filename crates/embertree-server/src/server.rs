//! Tree provider server
//!
//! The server is transport-agnostic: it accepts connections from any
//! [`TransportServer`] and handles each connection's requests in order on a
//! dedicated task. All handlers run under one lock on the element tree, so
//! a request's mutation, response and subscriber pushes complete before the
//! next request (from any client) touches the tree.
//!
//! # Example
//!
//! ```no_run
//! use embertree_core::Tree;
//! use embertree_server::{ServerConfig, TreeServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = TreeServer::new(Tree::new(), ServerConfig::default());
//!     server.serve_tcp("0.0.0.0:9000").await?;
//!     Ok(())
//! }
//! ```

use dashmap::DashMap;
use embertree_core::{
    codec, Element, Error, MatrixConnection, MatrixOperation, Root, RoutingOutcome, Tree,
    TreePath, Value,
};
use embertree_transport::{
    TcpConfig, TcpServer, TransportEvent, TransportReceiver, TransportSender, TransportServer,
};
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, warn};

use crate::dispatcher::{Dispatcher, SetOutcome};
use crate::error::{Result, ServerError};
use crate::events::{EventBus, ServerEvent};
use crate::session::{Session, SessionId};
use crate::subscription::SubscriptionRegistry;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server name, used in logs
    pub name: String,
    /// Maximum concurrent sessions
    pub max_sessions: usize,
    /// Events buffered per observer before the oldest are dropped
    pub event_capacity: usize,
    /// Largest accepted request frame in bytes (TCP)
    pub max_frame_size: usize,
    /// Outbound frames buffered per connection (TCP)
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let tcp = TcpConfig::default();
        Self {
            name: "Embertree Provider".to_string(),
            max_sessions: 100,
            event_capacity: 1024,
            max_frame_size: tcp.max_frame_size,
            outbound_capacity: tcp.outbound_capacity,
        }
    }
}

impl ServerConfig {
    pub fn tcp_config(&self) -> TcpConfig {
        TcpConfig {
            max_frame_size: self.max_frame_size,
            outbound_capacity: self.outbound_capacity,
            ..TcpConfig::default()
        }
    }
}

/// Control tree provider
pub struct TreeServer {
    config: ServerConfig,
    /// The authoritative tree, locked for the whole handling of a request
    tree: Arc<Mutex<Tree>>,
    /// Live sessions
    sessions: Arc<DashMap<SessionId, Arc<Session>>>,
    subscriptions: Arc<SubscriptionRegistry>,
    events: EventBus,
    /// Running flag
    running: Arc<RwLock<bool>>,
    shutdown: Arc<Notify>,
}

impl TreeServer {
    pub fn new(tree: Tree, config: ServerConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            config,
            tree: Arc::new(Mutex::new(tree)),
            sessions: Arc::new(DashMap::new()),
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            events,
            running: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    // =========================================================================
    // Serving
    // =========================================================================

    /// Serve using any TransportServer implementation until [`stop`](Self::stop)
    pub async fn serve_on<S>(&self, mut server: S) -> Result<()>
    where
        S: TransportServer + 'static,
    {
        let local = server.local_addr()?;
        info!("{} accepting connections on {}", self.config.name, local);
        *self.running.write() = true;
        self.events.emit(ServerEvent::Listening(local));

        while *self.running.read() {
            tokio::select! {
                accepted = server.accept() => match accepted {
                    Ok((sender, receiver, addr)) => {
                        info!("New connection from {}", addr);
                        self.handle_connection(Arc::new(sender), receiver, addr);
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                },
                _ = self.shutdown.notified() => break,
            }
        }

        info!("{} stopped accepting connections", self.config.name);
        Ok(())
    }

    /// Bind a TCP listener and serve on it
    pub async fn serve_tcp(&self, addr: &str) -> Result<()> {
        let server = TcpServer::bind_with_config(addr, self.config.tcp_config()).await?;
        self.serve_on(server).await
    }

    /// Stop accepting connections; established sessions stay up
    pub fn stop(&self) {
        *self.running.write() = false;
        self.shutdown.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    /// Close every live session
    pub async fn close_sessions(&self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for session in sessions {
            session.close().await;
        }
    }

    fn clone_internal(&self) -> Self {
        Self {
            config: self.config.clone(),
            tree: Arc::clone(&self.tree),
            sessions: Arc::clone(&self.sessions),
            subscriptions: Arc::clone(&self.subscriptions),
            events: self.events.clone(),
            running: Arc::clone(&self.running),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Handle a new connection
    fn handle_connection(
        &self,
        sender: Arc<dyn TransportSender>,
        mut receiver: impl TransportReceiver + 'static,
        addr: SocketAddr,
    ) {
        let session = match self.connect_session(Arc::clone(&sender), addr) {
            Ok(session) => session,
            Err(e) => {
                warn!("Rejecting {}: {}", addr, e);
                tokio::spawn(async move {
                    let _ = sender.close().await;
                });
                return;
            }
        };

        let server = self.clone_internal();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                match event {
                    TransportEvent::Data(data) => match codec::decode(&data) {
                        Ok(root) => {
                            server.handle_request(&session, &root);
                        }
                        Err(e) => {
                            warn!("Decode error from {}: {}", addr, e);
                            server.events.emit(ServerEvent::ClientError {
                                address: addr,
                                error: e.to_string(),
                            });
                        }
                    },
                    TransportEvent::Error(e) => {
                        error!("Transport error from {}: {}", addr, e);
                        server.events.emit(ServerEvent::ClientError {
                            address: addr,
                            error: e,
                        });
                    }
                    TransportEvent::Disconnected { reason } => {
                        info!("Client {} disconnected: {:?}", addr, reason);
                        break;
                    }
                    TransportEvent::Connected => {
                        debug!("Transport up for {}", addr);
                    }
                }
            }

            server.disconnect_session(&session.id);
        });
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Register a connected client
    pub fn connect_session(
        &self,
        sender: Arc<dyn TransportSender>,
        address: SocketAddr,
    ) -> Result<Arc<Session>> {
        if self.sessions.len() >= self.config.max_sessions {
            return Err(ServerError::SessionLimit(self.config.max_sessions));
        }

        let session = Arc::new(Session::new(sender, address));
        self.sessions.insert(session.id.clone(), Arc::clone(&session));
        debug!("Session {} opened for {}", session.id, address);
        self.events.emit(ServerEvent::Connection(address));
        Ok(session)
    }

    /// Drop a client from the live set
    ///
    /// Its subscriptions become inert and are pruned by the next
    /// notification that reaches them.
    pub fn disconnect_session(&self, id: &SessionId) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(id)?;
        info!("Removing session {}", session.id);
        self.events.emit(ServerEvent::Disconnect(session.address));
        Some(session)
    }

    pub fn session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Handle one decoded request from `session`, returning the resolved path
    pub fn handle_request(&self, session: &Session, root: &Root) -> Option<String> {
        debug!("Request from {}", session.address);
        let path = {
            let mut tree = self.tree.lock();
            Dispatcher::new(
                &mut tree,
                &self.sessions,
                &self.subscriptions,
                &self.events,
                Some(session),
            )
            .handle_root(root)
        };

        self.events.emit(ServerEvent::Request {
            client: session.address,
            root: root.clone(),
            path: path.clone(),
        });
        path
    }

    // =========================================================================
    // Administrative API
    // =========================================================================

    /// Add `sources` to `target`
    pub fn matrix_connect(
        &self,
        path: &TreePath,
        target: u32,
        sources: &[u32],
    ) -> Result<RoutingOutcome> {
        self.matrix_operation(path, target, sources, MatrixOperation::Connect)
    }

    /// Remove `sources` from `target`
    pub fn matrix_disconnect(
        &self,
        path: &TreePath,
        target: u32,
        sources: &[u32],
    ) -> Result<RoutingOutcome> {
        self.matrix_operation(path, target, sources, MatrixOperation::Disconnect)
    }

    /// Replace the sources of `target`
    pub fn matrix_set(
        &self,
        path: &TreePath,
        target: u32,
        sources: &[u32],
    ) -> Result<RoutingOutcome> {
        self.matrix_operation(path, target, sources, MatrixOperation::Absolute)
    }

    fn matrix_operation(
        &self,
        path: &TreePath,
        target: u32,
        sources: &[u32],
        operation: MatrixOperation,
    ) -> Result<RoutingOutcome> {
        let mut tree = self.tree.lock();
        let matrix = tree
            .get(path)
            .ok_or_else(|| Error::PathNotFound(path.clone()))?
            .as_matrix()
            .ok_or_else(|| Error::MatrixValidation {
                path: path.clone(),
                reason: "element is not a matrix".to_string(),
            })?;
        if !matrix.has_target(target) {
            return Err(Error::MatrixValidation {
                path: path.clone(),
                reason: format!("target {} out of range", target),
            }
            .into());
        }

        let request = MatrixConnection::request(target, sources.to_vec(), operation);
        let outcome = self.dispatcher(&mut tree).apply_connections(path, &[request])?;
        Ok(outcome)
    }

    /// Set a parameter value on behalf of the server; every subscriber is
    /// notified
    pub fn set_value(&self, path: &TreePath, value: Value) -> Result<SetOutcome> {
        let mut tree = self.tree.lock();
        Ok(self.dispatcher(&mut tree).set_value(path, value)?)
    }

    /// Set a named matrix contents field
    pub fn set_matrix_field(&self, path: &TreePath, key: &str, value: &Value) -> Result<SetOutcome> {
        let mut tree = self.tree.lock();
        Ok(self.dispatcher(&mut tree).set_matrix_field(path, key, value)?)
    }

    /// Swap the subtree at `path` for `element`
    pub fn replace_element(&self, path: &TreePath, element: Element) -> Result<()> {
        let mut tree = self.tree.lock();
        Ok(self.dispatcher(&mut tree).replace_element(path, element)?)
    }

    fn dispatcher<'a>(&'a self, tree: &'a mut Tree) -> Dispatcher<'a> {
        Dispatcher::new(tree, &self.sessions, &self.subscriptions, &self.events, None)
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Receiver for lifecycle and domain events emitted from now on
    pub fn events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Read access to the tree
    pub fn with_tree<R>(&self, f: impl FnOnce(&Tree) -> R) -> R {
        f(&self.tree.lock())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Total (path, session) subscription memberships, stale ones included
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_subscribed(&self, path: &TreePath, id: &SessionId) -> bool {
        self.subscriptions.is_subscribed(path, id)
    }
}

impl Default for TreeServer {
    fn default() -> Self {
        Self::new(Tree::new(), ServerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_feeds_tcp() {
        let config = ServerConfig {
            max_frame_size: 4096,
            outbound_capacity: 8,
            ..Default::default()
        };
        let tcp = config.tcp_config();
        assert_eq!(tcp.max_frame_size, 4096);
        assert_eq!(tcp.outbound_capacity, 8);
    }

    #[test]
    fn test_admin_errors() {
        let server = TreeServer::default();
        let missing = TreePath::parse("3.1").unwrap();
        let result = server.matrix_set(&missing, 0, &[1]);
        assert!(matches!(
            result,
            Err(ServerError::Core(Error::PathNotFound(_)))
        ));
        assert_eq!(server.session_count(), 0);
        assert!(!server.is_running());
    }
}
