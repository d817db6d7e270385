//! Error types for transport operations.

use thiserror::Error;

/// Error raised by a [`Transport`](super::Transport) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The session is not connected (never connected, or closed).
    #[error("transport not connected")]
    NotConnected,
    /// The broker was unreachable or refused the session.
    #[error("connection failed: {0}")]
    Connection(String),
    /// A message could not be encoded or decoded on the wire.
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Codec(err.to_string())
    }
}

impl From<bitcode::Error> for TransportError {
    fn from(err: bitcode::Error) -> Self {
        TransportError::Codec(err.to_string())
    }
}

impl From<base64::DecodeError> for TransportError {
    fn from(err: base64::DecodeError) -> Self {
        TransportError::Codec(err.to_string())
    }
}
