//! Error type for event handlers.

use std::error::Error;

use thiserror::Error;

/// Failure of an application handler. Recorded on the inbox row, and the
/// delivery is rejected.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Payload decode / deserialization failed.
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    /// Business logic refused the event.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The handler's owning component could not be resolved.
    #[error("unresolved component: {0}")]
    Unresolved(String),
    /// No handler is registered for the message's channel.
    #[error("no handler for channel: {0}")]
    UnknownChannel(String),
    /// Other error.
    #[error("handler error: {0}")]
    Other(Box<dyn Error + Send + Sync>),
}

impl HandlerError {
    /// Wrap any error as [`HandlerError::Other`].
    pub fn other<E>(err: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        HandlerError::Other(err.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::DecodeFailed(err.to_string())
    }
}
