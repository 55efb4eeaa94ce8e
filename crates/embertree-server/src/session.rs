//! Client sessions

use bytes::Bytes;
use embertree_core::{codec, Root};
use embertree_transport::TransportSender;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

/// Session identifier
pub type SessionId = String;

/// A connected client
pub struct Session {
    pub id: SessionId,
    /// Remote address, used to label events
    pub address: SocketAddr,
    sender: Arc<dyn TransportSender>,
    pub created_at: Instant,
}

impl Session {
    pub fn new(sender: Arc<dyn TransportSender>, address: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            address,
            sender,
            created_at: Instant::now(),
        }
    }

    /// Send a direct response
    pub fn send(&self, root: &Root) -> Result<()> {
        let data = codec::encode(root)?;
        self.sender.try_send(data)?;
        Ok(())
    }

    /// Queue an already encoded push; failures are logged, not returned
    pub fn queue(&self, data: Bytes) -> bool {
        match self.sender.try_send(data) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping push to {}: {}", self.address, e);
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    pub async fn close(&self) {
        let _ = self.sender.close().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("address", &self.address)
            .finish()
    }
}
