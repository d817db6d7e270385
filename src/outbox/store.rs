use async_trait::async_trait;

use crate::store::{StoreError, Transaction};

use super::record::{OutboxRecord, OutboxStatus};

/// Outbox table operations, implemented by a store's transaction type.
#[async_trait]
pub trait OutboxStore: Transaction {
    /// Stage a new record. Fails with `Conflict` if the id already exists.
    async fn insert_outbox(&mut self, record: &OutboxRecord) -> Result<(), StoreError>;

    /// Select up to `limit` pending records, oldest first, and lock them
    /// against other transactions until this one ends. Records locked by
    /// another open transaction are skipped.
    async fn lock_pending_outbox(&mut self, limit: usize)
        -> Result<Vec<OutboxRecord>, StoreError>;

    /// Stage an update of an existing record.
    async fn update_outbox(&mut self, record: &OutboxRecord) -> Result<(), StoreError>;

    async fn find_outbox(&mut self, id: &str) -> Result<Option<OutboxRecord>, StoreError>;

    /// All records with the given status, oldest first.
    async fn outbox_by_status(
        &mut self,
        status: OutboxStatus,
    ) -> Result<Vec<OutboxRecord>, StoreError>;
}
