//! TCP transport
//!
//! Frames are carried on a plain TCP stream, each preceded by its length as a
//! 4-byte big-endian integer. A frame larger than the configured maximum
//! ends the connection.

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};

/// Default maximum frame size (1 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

const LENGTH_PREFIX: usize = 4;

/// TCP configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Largest accepted frame payload in bytes
    pub max_frame_size: usize,
    /// Outbound frames buffered per connection
    pub outbound_capacity: usize,
    /// Inbound events buffered per connection
    pub inbound_capacity: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            outbound_capacity: 1024,
            inbound_capacity: 256,
        }
    }
}

/// Prefix a payload with its length
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.extend_from_slice(payload);
    frame.freeze()
}

/// Split complete frames off the front of `buf`
///
/// Incomplete trailing data stays in the buffer.
pub fn decode_frames(buf: &mut BytesMut, max_frame_size: usize) -> Result<Vec<Bytes>> {
    let mut frames = Vec::new();
    while buf.len() >= LENGTH_PREFIX {
        let size = (&buf[..LENGTH_PREFIX]).get_u32() as usize;
        if size > max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size,
                max: max_frame_size,
            });
        }
        if buf.len() < LENGTH_PREFIX + size {
            break;
        }
        buf.advance(LENGTH_PREFIX);
        frames.push(buf.split_to(size).freeze());
    }
    Ok(frames)
}

/// Connection state shared by the sender and the IO tasks
///
/// Each IO task waits on its own `Notify`; `notify_one` keeps a permit, so a
/// close that lands between two waits is not lost.
struct Link {
    connected: Mutex<bool>,
    stop_writer: Notify,
    stop_reader: Notify,
}

impl Link {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: Mutex::new(true),
            stop_writer: Notify::new(),
            stop_reader: Notify::new(),
        })
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    /// Stop both IO tasks, closing the socket in both directions
    fn close(&self) {
        *self.connected.lock() = false;
        self.stop_writer.notify_one();
        self.stop_reader.notify_one();
    }
}

/// Outbound half of a TCP connection
pub struct TcpSender {
    tx: mpsc::Sender<Bytes>,
    link: Arc<Link>,
}

#[async_trait]
impl TransportSender for TcpSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !self.link.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.tx
            .send(data)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn try_send(&self, data: Bytes) -> Result<()> {
        if !self.link.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.tx.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn close(&self) -> Result<()> {
        self.link.close();
        Ok(())
    }
}

/// Inbound half of a TCP connection
pub struct TcpReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for TcpReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// Split a stream into sender/receiver halves backed by two IO tasks
fn spawn_connection(stream: TcpStream, config: &TcpConfig) -> (TcpSender, TcpReceiver) {
    let link = Link::new();
    let (outgoing_tx, outgoing_rx) = mpsc::channel::<Bytes>(config.outbound_capacity);
    let (incoming_tx, incoming_rx) = mpsc::channel::<TransportEvent>(config.inbound_capacity);
    let (reader, writer) = stream.into_split();

    tokio::spawn(write_loop(writer, outgoing_rx, link.clone()));
    tokio::spawn(read_loop(
        reader,
        incoming_tx,
        config.max_frame_size,
        link.clone(),
    ));

    (
        TcpSender {
            tx: outgoing_tx,
            link,
        },
        TcpReceiver { rx: incoming_rx },
    )
}

async fn write_loop(mut writer: OwnedWriteHalf, mut outgoing: mpsc::Receiver<Bytes>, link: Arc<Link>) {
    loop {
        tokio::select! {
            data = outgoing.recv() => {
                let Some(data) = data else { break };
                if let Err(e) = writer.write_all(&encode_frame(&data)).await {
                    error!("TCP write error: {}", e);
                    break;
                }
            }
            _ = link.stop_writer.notified() => {
                debug!("TCP writer shutting down");
                break;
            }
        }
    }
    *link.connected.lock() = false;
    let _ = writer.shutdown().await;
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    incoming: mpsc::Sender<TransportEvent>,
    max_frame_size: usize,
    link: Arc<Link>,
) {
    let _ = incoming.send(TransportEvent::Connected).await;
    let mut buf = BytesMut::with_capacity(8192);

    let reason = loop {
        let read = tokio::select! {
            read = reader.read_buf(&mut buf) => read,
            _ = link.stop_reader.notified() => {
                debug!("TCP reader shutting down");
                break Some("closed locally".to_string());
            }
        };
        match read {
            Ok(0) => break None,
            Ok(_) => match decode_frames(&mut buf, max_frame_size) {
                Ok(frames) => {
                    for frame in frames {
                        if incoming.send(TransportEvent::Data(frame)).await.is_err() {
                            link.close();
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!("Dropping TCP connection: {}", e);
                    break Some(e.to_string());
                }
            },
            Err(e) => {
                error!("TCP read error: {}", e);
                let _ = incoming.send(TransportEvent::Error(e.to_string())).await;
                break Some(e.to_string());
            }
        }
    };

    link.close();
    let _ = incoming.send(TransportEvent::Disconnected { reason }).await;
}

/// Open a client connection
pub async fn connect(addr: &str, config: &TcpConfig) -> Result<(TcpSender, TcpReceiver)> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
    stream.set_nodelay(true)?;
    debug!("TCP connected to {}", addr);
    Ok(spawn_connection(stream, config))
}

/// TCP listener
pub struct TcpServer {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, TcpConfig::default()).await
    }

    pub async fn bind_with_config(addr: &str, config: TcpConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{}: {}", addr, e)))?;
        info!("TCP listening on {}", listener.local_addr()?);
        Ok(Self { listener, config })
    }
}

#[async_trait]
impl TransportServer for TcpServer {
    type Sender = TcpSender;
    type Receiver = TcpReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;
        stream.set_nodelay(true)?;
        let (sender, receiver) = spawn_connection(stream, &self.config);
        Ok((sender, receiver, peer))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_frames_stay_buffered() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(b"first"));
        let second = encode_frame(b"second");
        buf.extend_from_slice(&second[..5]);

        let frames = decode_frames(&mut buf, 64).unwrap();
        assert_eq!(frames, vec![Bytes::from_static(b"first")]);
        assert_eq!(buf.len(), 5);

        buf.extend_from_slice(&second[5..]);
        let frames = decode_frames(&mut buf, 64).unwrap();
        assert_eq!(frames, vec![Bytes::from_static(b"second")]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversize_frame() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(&[0u8; 100]));
        assert!(matches!(
            decode_frames(&mut buf, 64),
            Err(TransportError::FrameTooLarge { size: 100, max: 64 })
        ));
    }

    #[test]
    fn test_empty_frame() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(&[]));
        let frames = decode_frames(&mut buf, 64).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_empty());
    }
}
