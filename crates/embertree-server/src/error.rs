//! Server error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session limit of {0} reached")]
    SessionLimit(usize),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] embertree_transport::TransportError),

    #[error(transparent)]
    Core(#[from] embertree_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
