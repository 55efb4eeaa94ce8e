//! Common test helpers and utilities for embertree tests
//!
//! This crate provides:
//! - A recording transport sender that keeps every frame the server sends
//! - A sample tree covering every element kind and matrix topology
//! - Request builders for qualified and relative requests
//! - Event collection and condition-based waiting
//! - A TCP test server with RAII cleanup

use async_trait::async_trait;
use bytes::Bytes;
use embertree_core::{
    codec, loader, Command, CommandKind, FunctionRegistry, FunctionResult, Invocation, ItemKind,
    Root, Tree, TreeItem, TreePath, Value,
};
use embertree_server::{ServerConfig, ServerEvent, Session, TreeServer};
use embertree_transport::tcp::{self, TcpReceiver, TcpSender};
use embertree_transport::{TcpConfig, TransportError, TransportEvent, TransportReceiver, TransportSender};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::timeout;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Loopback address used to label an in-process client
pub fn client_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

// ============================================================================
// Recording Sender
// ============================================================================

/// Transport sender that records frames instead of writing them
#[derive(Debug)]
pub struct RecordingSender {
    frames: Mutex<Vec<Bytes>>,
    connected: AtomicBool,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    /// Number of frames recorded and not yet taken
    pub fn count(&self) -> usize {
        self.frames.lock().len()
    }

    /// Decoded copies of the recorded frames
    pub fn roots(&self) -> Vec<Root> {
        self.frames
            .lock()
            .iter()
            .map(|frame| codec::decode(frame).unwrap())
            .collect()
    }

    /// Decode and clear the recorded frames
    pub fn take(&self) -> Vec<Root> {
        let frames = std::mem::take(&mut *self.frames.lock());
        frames
            .iter()
            .map(|frame| codec::decode(frame).unwrap())
            .collect()
    }

    pub fn last(&self) -> Option<Root> {
        self.frames
            .lock()
            .last()
            .map(|frame| codec::decode(frame).unwrap())
    }

    /// Make further sends fail as if the peer had gone away
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Default for RecordingSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportSender for RecordingSender {
    async fn send(&self, data: Bytes) -> embertree_transport::Result<()> {
        self.try_send(data)
    }

    fn try_send(&self, data: Bytes) -> embertree_transport::Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.frames.lock().push(data);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> embertree_transport::Result<()> {
        self.disconnect();
        Ok(())
    }
}

/// Register an in-process client with `server`, labelled with `port`
pub fn attach(server: &TreeServer, port: u16) -> (Arc<RecordingSender>, Arc<Session>) {
    let recorder = Arc::new(RecordingSender::new());
    let session = server
        .connect_session(recorder.clone(), client_addr(port))
        .unwrap();
    (recorder, session)
}

// ============================================================================
// Sample Tree
// ============================================================================

/// Description of the sample tree
///
/// ```text
/// 0    device
/// 0.0    gain       integer parameter, readWrite
/// 0.1    name       string parameter, read only
/// 0.2    meter      real parameter with a stream identifier
/// 0.3    sum        function adding its integer arguments
/// 0.4    fail       function that always fails
/// 1    router
/// 1.0    crosspoint oneToOne 4x4, target 0 <- source 0, target 3 locked
/// 1.1    mixer      nToN 2x3, at most 2 sources per target, 3 in total
/// 1.2    selector   oneToN 3x4, defaults read from 1.4
/// 1.3    labels
/// 1.4    defaults   [1, -1, 0]
/// ```
pub const SAMPLE_TREE: &str = r#"[
    {
        "identifier": "device",
        "description": "Sample device",
        "children": [
            { "identifier": "gain", "value": -6, "type": "integer", "access": "readWrite",
              "minimum": -60, "maximum": 12 },
            { "identifier": "name", "value": "embertree", "type": "string" },
            { "identifier": "meter", "value": 0.0, "type": "real", "streamIdentifier": 7 },
            { "identifier": "sum", "func": "sum",
              "arguments": [{ "type": "integer", "name": "a" }, { "type": "integer", "name": "b" }],
              "result": [{ "type": "integer", "name": "total" }] },
            { "identifier": "fail", "func": "fail" }
        ]
    },
    {
        "identifier": "router",
        "children": [
            { "identifier": "crosspoint", "type": "oneToOne", "targetCount": 4, "sourceCount": 4,
              "connections": [
                  { "target": 0, "sources": [0] },
                  { "target": 3, "sources": [3], "locked": true }
              ] },
            { "identifier": "mixer", "type": "nToN", "targetCount": 2, "sourceCount": 3,
              "maximumConnectsPerTarget": 2, "maximumTotalConnects": 3 },
            { "identifier": "selector", "type": "oneToN", "targetCount": 3, "sourceCount": 4,
              "labels": [{ "basePath": "1.3", "description": "inputs" }],
              "connections": [
                  { "target": 0, "sources": [2] },
                  { "target": 1, "sources": [3] },
                  { "target": 2, "sources": [1] }
              ] },
            { "identifier": "labels" },
            { "identifier": "defaults", "children": [
                { "value": 1, "type": "integer" },
                { "value": -1, "type": "integer" },
                { "value": 0, "type": "integer" }
            ] }
        ]
    }
]"#;

fn sum(arguments: &[Value]) -> FunctionResult {
    let mut total = 0;
    for argument in arguments {
        total += argument
            .as_i64()
            .ok_or_else(|| format!("not an integer: {}", argument))?;
    }
    Ok(vec![Value::Integer(total)])
}

fn fail(_: &[Value]) -> FunctionResult {
    Err("device busy".to_string())
}

/// Handlers referenced by [`SAMPLE_TREE`]
pub fn sample_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    registry.register("sum", sum).register("fail", fail);
    registry
}

pub fn sample_tree() -> Tree {
    loader::load_str(SAMPLE_TREE, &sample_registry()).unwrap()
}

/// Server over the sample tree with default configuration
pub fn sample_server() -> TreeServer {
    TreeServer::new(sample_tree(), ServerConfig::default())
}

pub fn path(s: &str) -> TreePath {
    TreePath::parse(s).unwrap()
}

// ============================================================================
// Request Builders
// ============================================================================

/// Wrap `leaf` in node items for each ancestor of `path`
fn relative_chain(path: &TreePath, leaf: TreeItem) -> TreeItem {
    let numbers = path.numbers();
    numbers[..numbers.len() - 1]
        .iter()
        .rev()
        .fold(leaf, |child, number| {
            TreeItem::new(*number, ItemKind::Node(None)).with_child(child)
        })
}

/// Command addressed by qualified path
pub fn qualified_command(p: &str, command: Command) -> Root {
    Root::with_element(
        TreeItem::qualified(path(p), ItemKind::Node(None)).with_child(TreeItem::command(command)),
    )
}

/// Command addressed by relative descent
pub fn relative_command(p: &str, command: Command) -> Root {
    let p = path(p);
    let holder = TreeItem::new(p.last().unwrap(), ItemKind::Node(None))
        .with_child(TreeItem::command(command));
    Root::with_element(relative_chain(&p, holder))
}

/// Contents addressed by qualified path
pub fn qualified_item(p: &str, kind: ItemKind) -> Root {
    Root::with_element(TreeItem::qualified(path(p), kind))
}

/// Contents addressed by relative descent
pub fn relative_item(p: &str, kind: ItemKind) -> Root {
    let p = path(p);
    let leaf = TreeItem::new(p.last().unwrap(), kind);
    Root::with_element(relative_chain(&p, leaf))
}

pub fn get_directory() -> Command {
    Command::new(CommandKind::GetDirectory)
}

pub fn subscribe() -> Command {
    Command::new(CommandKind::Subscribe)
}

pub fn unsubscribe() -> Command {
    Command::new(CommandKind::Unsubscribe)
}

pub fn invoke(id: u32, arguments: Vec<Value>) -> Command {
    Command::invoke(Invocation { id, arguments })
}

// ============================================================================
// Event Collection
// ============================================================================

/// Reads server events from a broadcast receiver
pub struct EventCollector {
    rx: broadcast::Receiver<ServerEvent>,
}

impl EventCollector {
    pub fn new(rx: broadcast::Receiver<ServerEvent>) -> Self {
        Self { rx }
    }

    /// Every event already emitted and not yet read
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }

    /// Names of the drained events, in emission order
    pub fn names(&mut self) -> Vec<&'static str> {
        self.drain().iter().map(ServerEvent::name).collect()
    }

    /// Wait for the next event called `name`, skipping others
    pub async fn wait_for(&mut self, name: &str, max_wait: Duration) -> Option<ServerEvent> {
        let rx = &mut self.rx;
        timeout(max_wait, async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.name() == name => return Some(event),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }
}

// ============================================================================
// Test Server - RAII wrapper with proper cleanup
// ============================================================================

/// A TCP-served tree that stops on drop
pub struct TestServer {
    port: u16,
    server: Arc<TreeServer>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Serve the sample tree
    pub async fn start() -> Self {
        Self::start_with(sample_tree(), ServerConfig::default()).await
    }

    pub async fn start_with(tree: Tree, config: ServerConfig) -> Self {
        let port = find_available_port().await;
        let addr = format!("127.0.0.1:{}", port);
        let server = Arc::new(TreeServer::new(tree, config));

        let serving = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            let _ = serving.serve_tcp(&addr).await;
        });

        wait_for(
            move || async move {
                tokio::net::TcpStream::connect(("127.0.0.1", port))
                    .await
                    .is_ok()
            },
            DEFAULT_CHECK_INTERVAL,
            Duration::from_secs(5),
        )
        .await;

        Self {
            port,
            server,
            handle: Some(handle),
        }
    }

    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn server(&self) -> &TreeServer {
        &self.server
    }

    pub async fn connect(&self) -> TestClient {
        TestClient::connect(&self.addr()).await
    }

    /// Stop the server explicitly (also happens on drop)
    pub fn stop(&mut self) {
        self.server.stop();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Raw TCP consumer speaking encoded roots
pub struct TestClient {
    sender: TcpSender,
    receiver: TcpReceiver,
}

impl TestClient {
    pub async fn connect(addr: &str) -> Self {
        let (sender, receiver) = tcp::connect(addr, &TcpConfig::default()).await.unwrap();
        Self { sender, receiver }
    }

    pub async fn request(&self, root: &Root) {
        self.sender.send(codec::encode(root).unwrap()).await.unwrap();
    }

    /// Send bytes that are not an encoded root
    pub async fn send_raw(&self, data: &'static [u8]) {
        self.sender.send(Bytes::from_static(data)).await.unwrap();
    }

    /// Next decoded root, skipping connection events
    pub async fn next_root(&mut self, max_wait: Duration) -> Option<Root> {
        let receiver = &mut self.receiver;
        timeout(max_wait, async move {
            loop {
                match receiver.recv().await {
                    Some(TransportEvent::Data(data)) => return codec::decode(&data).ok(),
                    Some(TransportEvent::Connected) => continue,
                    _ => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    pub async fn close(&self) {
        let _ = self.sender.close().await;
    }
}
