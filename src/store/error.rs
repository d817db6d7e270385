use thiserror::Error;

/// Error raised by a [`Store`](super::Store) or one of its transactions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated (duplicate primary key).
    #[error("duplicate key {id} in {table}")]
    Conflict { table: &'static str, id: String },
    /// An update targeted a row that does not exist.
    #[error("no row {id} in {table}")]
    NotFound { table: &'static str, id: String },
    /// The store cannot open a transaction at all.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// An internal lock was poisoned by a panicking writer.
    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

impl StoreError {
    /// Whether this error is a uniqueness violation.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
