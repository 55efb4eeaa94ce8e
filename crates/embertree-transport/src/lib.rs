//! Embertree Transport Layer
//!
//! Connection-oriented transport for the provider:
//! - transport traits the server is written against
//! - length-prefixed TCP framing

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::{TcpConfig, TcpReceiver, TcpSender, TcpServer};
pub use traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};
