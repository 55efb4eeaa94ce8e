//! Error types for the element tree and routing engine

use thiserror::Error;

use crate::path::TreePath;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Path string could not be parsed
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// No element lives at the requested path
    #[error("unknown element at path {0}")]
    PathNotFound(TreePath),

    /// Malformed request shape
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Function missing, not invocable, or its handler failed
    #[error("invocation failed: {0}")]
    InvocationFailure(String),

    /// Matrix operation rejected before reaching the routing engine
    #[error("invalid matrix operation at {path}: {reason}")]
    MatrixValidation { path: TreePath, reason: String },

    /// Declarative tree description could not be materialized
    #[error("invalid tree description: {0}")]
    InvalidTree(String),

    /// MessagePack encoding error
    #[error("encode error: {0}")]
    EncodeError(String),

    /// MessagePack decoding error
    #[error("decode error: {0}")]
    DecodeError(String),
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::EncodeError(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::DecodeError(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidTree(e.to_string())
    }
}
