//! Transport trait definitions

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

use crate::error::Result;

/// Events delivered for one connection, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connection established
    Connected,
    /// Connection closed, cleanly or not
    Disconnected { reason: Option<String> },
    /// One complete frame
    Data(Bytes),
    /// Transport-level failure on this connection
    Error(String),
}

/// Outbound half of a connection
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Queue a frame, waiting for buffer space
    async fn send(&self, data: Bytes) -> Result<()>;

    /// Queue a frame without waiting
    fn try_send(&self, data: Bytes) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Stop writing and close the connection
    async fn close(&self) -> Result<()>;
}

/// Inbound half of a connection
#[async_trait]
pub trait TransportReceiver: Send {
    /// Next event, `None` once the connection is gone
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// Listener producing connections
#[async_trait]
pub trait TransportServer: Send {
    type Sender: TransportSender + 'static;
    type Receiver: TransportReceiver + 'static;

    /// Wait for the next connection
    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)>;

    fn local_addr(&self) -> Result<SocketAddr>;
}
