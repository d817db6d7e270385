use async_trait::async_trait;

use crate::store::{StoreError, Transaction};

use super::record::{InboxRecord, InboxStatus};

/// Inbox table operations, implemented by a store's transaction type.
#[async_trait]
pub trait InboxStore: Transaction {
    async fn find_inbox(&mut self, id: &str) -> Result<Option<InboxRecord>, StoreError>;

    /// Stage a reservation. Fails with `Conflict` if the id is already known,
    /// either at insert time or when the transaction commits.
    async fn insert_inbox(&mut self, record: &InboxRecord) -> Result<(), StoreError>;

    /// Stage an update of an existing record.
    async fn update_inbox(&mut self, record: &InboxRecord) -> Result<(), StoreError>;

    async fn inbox_by_status(&mut self, status: InboxStatus)
        -> Result<Vec<InboxRecord>, StoreError>;
}
