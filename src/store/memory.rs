//! In-memory transactional store.
//!
//! Committed state lives behind an `Arc<RwLock<..>>`, so clones of
//! [`InMemoryStore`] are handles to the same data. Transactions stage their
//! writes locally and apply them in one step on commit, re-checking primary
//! keys so that two transactions racing to insert the same id cannot both
//! succeed. Outbox rows selected for publishing are locked until the selecting
//! transaction ends; other transactions skip them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::inbox::{InboxRecord, InboxStatus, InboxStore};
use crate::outbox::{OutboxRecord, OutboxStatus, OutboxStore};

use super::{Store, StoreError, Transaction, INBOX_TABLE, OUTBOX_TABLE};

#[derive(Clone)]
struct OutboxRow {
    sequence: u64,
    record: OutboxRecord,
}

#[derive(Default)]
struct Tables {
    outbox: HashMap<String, OutboxRow>,
    inbox: HashMap<String, InboxRecord>,
    documents: HashMap<(String, String), Value>,
}

struct Shared {
    tables: RwLock<Tables>,
    outbox_locks: Mutex<HashSet<String>>,
    sequence: AtomicU64,
    available: AtomicBool,
}

/// Transactional in-memory store holding the outbox, the inbox and simple
/// keyed business documents.
#[derive(Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                outbox_locks: Mutex::new(HashSet::new()),
                sequence: AtomicU64::new(1),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulate an outage: while unavailable, `begin` fails.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::Release);
    }

    /// Committed outbox records, oldest first.
    pub fn outbox_records(&self) -> Result<Vec<OutboxRecord>, StoreError> {
        let tables = self.read("outbox read")?;
        Ok(sorted_outbox(tables.outbox.values()))
    }

    /// A committed outbox record by id.
    pub fn outbox_record(&self, id: &str) -> Result<Option<OutboxRecord>, StoreError> {
        let tables = self.read("outbox read")?;
        Ok(tables.outbox.get(id).map(|row| row.record.clone()))
    }

    /// Committed inbox records, oldest first.
    pub fn inbox_records(&self) -> Result<Vec<InboxRecord>, StoreError> {
        let tables = self.read("inbox read")?;
        let mut records: Vec<InboxRecord> = tables.inbox.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    /// A committed inbox record by id.
    pub fn inbox_record(&self, id: &str) -> Result<Option<InboxRecord>, StoreError> {
        let tables = self.read("inbox read")?;
        Ok(tables.inbox.get(id).cloned())
    }

    /// A committed business document.
    pub fn document(&self, table: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let tables = self.read("document read")?;
        Ok(tables
            .documents
            .get(&(table.to_string(), key.to_string()))
            .cloned())
    }

    fn read(
        &self,
        operation: &'static str,
    ) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.shared
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned(operation))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction, StoreError> {
        if !self.shared.available.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable(
                "in-memory store is marked unavailable".to_string(),
            ));
        }
        Ok(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            outbox_inserts: Vec::new(),
            outbox_updates: HashMap::new(),
            inbox_inserts: Vec::new(),
            inbox_updates: HashMap::new(),
            documents: HashMap::new(),
            locked: Vec::new(),
        })
    }
}

/// An open transaction on an [`InMemoryStore`].
///
/// Reads see committed state plus this transaction's own staged writes.
/// Dropping the transaction without committing discards its writes and
/// releases its row locks.
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    outbox_inserts: Vec<OutboxRow>,
    outbox_updates: HashMap<String, OutboxRecord>,
    inbox_inserts: Vec<InboxRecord>,
    inbox_updates: HashMap<String, InboxRecord>,
    documents: HashMap<(String, String), Value>,
    locked: Vec<String>,
}

impl InMemoryTransaction {
    /// Stage a business document write (`table`/`key` → `value`).
    pub fn put_document(
        &mut self,
        table: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), StoreError> {
        self.documents.insert((table.into(), key.into()), value);
        Ok(())
    }

    /// Read a business document, seeing this transaction's own writes.
    pub fn get_document(&self, table: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let key = (table.to_string(), key.to_string());
        if let Some(value) = self.documents.get(&key) {
            return Ok(Some(value.clone()));
        }
        let tables = self.read("document read")?;
        Ok(tables.documents.get(&key).cloned())
    }

    fn read(
        &self,
        operation: &'static str,
    ) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.shared
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned(operation))
    }

    fn staged_outbox(&self, id: &str) -> Option<&OutboxRecord> {
        self.outbox_updates.get(id).or_else(|| {
            self.outbox_inserts
                .iter()
                .find(|row| row.record.id == id)
                .map(|row| &row.record)
        })
    }

    fn staged_inbox(&self, id: &str) -> Option<&InboxRecord> {
        self.inbox_updates
            .get(id)
            .or_else(|| self.inbox_inserts.iter().find(|r| r.id == id))
    }

    fn release_locks(&mut self) {
        if self.locked.is_empty() {
            return;
        }
        let mut locks = self
            .shared
            .outbox_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for id in self.locked.drain(..) {
            locks.remove(&id);
        }
    }

    fn apply(&mut self) -> Result<(), StoreError> {
        let mut tables = self
            .shared
            .tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("commit"))?;

        // Check every constraint before touching anything.
        if let Some(row) = self
            .outbox_inserts
            .iter()
            .find(|row| tables.outbox.contains_key(&row.record.id))
        {
            return Err(StoreError::Conflict {
                table: OUTBOX_TABLE,
                id: row.record.id.clone(),
            });
        }
        if let Some(record) = self
            .inbox_inserts
            .iter()
            .find(|r| tables.inbox.contains_key(&r.id))
        {
            return Err(StoreError::Conflict {
                table: INBOX_TABLE,
                id: record.id.clone(),
            });
        }

        for row in self.outbox_inserts.drain(..) {
            tables.outbox.insert(row.record.id.clone(), row);
        }
        for (id, record) in self.outbox_updates.drain() {
            if let Some(row) = tables.outbox.get_mut(&id) {
                row.record = record;
            }
        }
        for record in self.inbox_inserts.drain(..) {
            tables.inbox.insert(record.id.clone(), record);
        }
        for (id, record) in self.inbox_updates.drain() {
            tables.inbox.insert(id, record);
        }
        for (key, value) in self.documents.drain() {
            tables.documents.insert(key, value);
        }
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.release_locks();
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn commit(mut self) -> Result<(), StoreError> {
        let result = self.apply();
        self.release_locks();
        result
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.release_locks();
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryTransaction {
    async fn insert_outbox(&mut self, record: &OutboxRecord) -> Result<(), StoreError> {
        let exists = self.staged_outbox(&record.id).is_some()
            || self.read("outbox read")?.outbox.contains_key(&record.id);
        if exists {
            return Err(StoreError::Conflict {
                table: OUTBOX_TABLE,
                id: record.id.clone(),
            });
        }
        let sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed);
        self.outbox_inserts.push(OutboxRow {
            sequence,
            record: record.clone(),
        });
        Ok(())
    }

    async fn lock_pending_outbox(
        &mut self,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        // Row locks are held across the read, so a row whose lock was just
        // released is already committed in its final state.
        let mut locks = self
            .shared
            .outbox_locks
            .lock()
            .map_err(|_| StoreError::LockPoisoned("outbox lock"))?;
        let candidates = {
            let tables = self.read("outbox read")?;
            let mut rows: Vec<OutboxRow> = tables
                .outbox
                .values()
                .filter(|row| row.record.is_pending())
                .filter(|row| {
                    self.outbox_updates
                        .get(&row.record.id)
                        .map_or(true, OutboxRecord::is_pending)
                })
                .cloned()
                .collect();
            rows.sort_by_key(|row| (row.record.created_at, row.sequence));
            rows
        };

        let mut selected = Vec::new();
        for row in candidates {
            if selected.len() >= limit {
                break;
            }
            let id = row.record.id.clone();
            let ours = self.locked.contains(&id);
            if !ours && !locks.insert(id.clone()) {
                // Locked by another open transaction.
                continue;
            }
            if !ours {
                self.locked.push(id);
            }
            selected.push(row.record);
        }
        Ok(selected)
    }

    async fn update_outbox(&mut self, record: &OutboxRecord) -> Result<(), StoreError> {
        if let Some(row) = self
            .outbox_inserts
            .iter_mut()
            .find(|row| row.record.id == record.id)
        {
            row.record = record.clone();
            return Ok(());
        }
        if !self.read("outbox read")?.outbox.contains_key(&record.id) {
            return Err(StoreError::NotFound {
                table: OUTBOX_TABLE,
                id: record.id.clone(),
            });
        }
        self.outbox_updates.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn find_outbox(&mut self, id: &str) -> Result<Option<OutboxRecord>, StoreError> {
        if let Some(record) = self.staged_outbox(id) {
            return Ok(Some(record.clone()));
        }
        let tables = self.read("outbox read")?;
        Ok(tables.outbox.get(id).map(|row| row.record.clone()))
    }

    async fn outbox_by_status(
        &mut self,
        status: OutboxStatus,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let mut rows: Vec<OutboxRow> = {
            let tables = self.read("outbox read")?;
            tables
                .outbox
                .values()
                .filter(|row| !self.outbox_updates.contains_key(&row.record.id))
                .cloned()
                .collect()
        };
        for (id, record) in &self.outbox_updates {
            if let Some(sequence) = self.read("outbox read")?.outbox.get(id).map(|r| r.sequence) {
                rows.push(OutboxRow {
                    sequence,
                    record: record.clone(),
                });
            }
        }
        rows.extend(self.outbox_inserts.iter().cloned());
        Ok(sorted_outbox(
            rows.iter().filter(|row| row.record.status == status),
        ))
    }
}

#[async_trait]
impl InboxStore for InMemoryTransaction {
    async fn find_inbox(&mut self, id: &str) -> Result<Option<InboxRecord>, StoreError> {
        if let Some(record) = self.staged_inbox(id) {
            return Ok(Some(record.clone()));
        }
        let tables = self.read("inbox read")?;
        Ok(tables.inbox.get(id).cloned())
    }

    async fn insert_inbox(&mut self, record: &InboxRecord) -> Result<(), StoreError> {
        let exists = self.staged_inbox(&record.id).is_some()
            || self.read("inbox read")?.inbox.contains_key(&record.id);
        if exists {
            return Err(StoreError::Conflict {
                table: INBOX_TABLE,
                id: record.id.clone(),
            });
        }
        self.inbox_inserts.push(record.clone());
        Ok(())
    }

    async fn update_inbox(&mut self, record: &InboxRecord) -> Result<(), StoreError> {
        if let Some(staged) = self.inbox_inserts.iter_mut().find(|r| r.id == record.id) {
            *staged = record.clone();
            return Ok(());
        }
        if !self.read("inbox read")?.inbox.contains_key(&record.id) {
            return Err(StoreError::NotFound {
                table: INBOX_TABLE,
                id: record.id.clone(),
            });
        }
        self.inbox_updates.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn inbox_by_status(
        &mut self,
        status: InboxStatus,
    ) -> Result<Vec<InboxRecord>, StoreError> {
        let mut records: Vec<InboxRecord> = {
            let tables = self.read("inbox read")?;
            tables
                .inbox
                .values()
                .map(|r| self.inbox_updates.get(&r.id).unwrap_or(r).clone())
                .collect()
        };
        records.extend(self.inbox_inserts.iter().cloned());
        records.retain(|r| r.status == status);
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

fn sorted_outbox<'a>(rows: impl Iterator<Item = &'a OutboxRow>) -> Vec<OutboxRecord> {
    let mut rows: Vec<&OutboxRow> = rows.collect();
    rows.sort_by_key(|row| (row.record.created_at, row.sequence));
    rows.into_iter().map(|row| row.record.clone()).collect()
}
