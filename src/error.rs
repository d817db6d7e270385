use thiserror::Error;

use crate::listener::HandlerError;
use crate::store::StoreError;
use crate::transport::TransportError;

/// A value failed validation: malformed configuration, an empty channel, or a
/// handler whose component cannot be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum TramError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for TramError {
    fn from(err: serde_json::Error) -> Self {
        TramError::Serialization(err.to_string())
    }
}

impl TramError {
    /// Whether the underlying failure is a store uniqueness violation.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TramError::Store(err) if err.is_conflict())
    }
}
