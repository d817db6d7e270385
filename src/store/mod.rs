//! Store - the transactional data store shared by outbox and inbox.
//!
//! A [`Store`] hands out [`Transaction`]s. Everything the outbox client, the
//! relay and the listener write goes through a transaction; nothing is visible
//! to other transactions until `commit`. Dropping a transaction without
//! committing rolls it back.
//!
//! Table-specific operations live next to the tables they touch:
//! [`OutboxStore`](crate::outbox::OutboxStore) and
//! [`InboxStore`](crate::inbox::InboxStore) are implemented by a store's
//! transaction type.
//!
//! [`InMemoryStore`] is the reference implementation. SQL-backed stores are
//! expected to map the same operations onto `outbox_messages` and
//! `incoming_messages` tables (see [`OUTBOX_TABLE`] / [`INBOX_TABLE`]).

mod error;
mod memory;

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use tracing::warn;

pub use error::StoreError;
pub use memory::{InMemoryStore, InMemoryTransaction};

/// Name of the outgoing messages table.
pub const OUTBOX_TABLE: &str = "outbox_messages";

/// Name of the incoming messages (deduplication ledger) table.
pub const INBOX_TABLE: &str = "incoming_messages";

/// A store that can open transactions.
#[async_trait]
pub trait Store: Send + Sync {
    type Tx: Transaction;

    /// Open a new transaction. Fails with `Unavailable` when the store is down.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// An open unit of work.
#[async_trait]
pub trait Transaction: Send {
    /// Make every staged write durable and visible, atomically.
    async fn commit(self) -> Result<(), StoreError>;

    /// Discard every staged write.
    async fn rollback(self) -> Result<(), StoreError>;
}

/// Future returned by the closure passed to [`transactional`].
pub type TxFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Run `work` inside a new transaction: commit on `Ok`, roll back on `Err`.
///
/// ```ignore
/// let record = transactional(&store, |tx| Box::pin(async move {
///     tx.put_document("orders", "o-1", json!({ "total": 10 }))?;
///     let record = OutboxClient::new(tx).emit("orders", json!({ "id": "o-1" }), Headers::new()).await?;
///     Ok::<_, TramError>(record)
/// })).await?;
/// ```
pub async fn transactional<S, T, E, F>(store: &S, work: F) -> Result<T, E>
where
    S: Store,
    E: From<StoreError>,
    F: for<'a> FnOnce(&'a mut S::Tx) -> TxFuture<'a, T, E>,
{
    let mut tx = store.begin().await?;
    match work(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}
