use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{TramError, ValidationError};
use crate::transport::Headers;

use super::record::OutboxRecord;
use super::store::OutboxStore;

/// Writes outgoing events into the outbox of a caller-owned transaction.
///
/// The client borrows the transaction, so an event can only be emitted while
/// one is open. Nothing is committed here: the row becomes durable together
/// with whatever else the caller wrote, or not at all.
///
/// ```ignore
/// let mut tx = store.begin().await?;
/// tx.put_document("orders", "o-1", json!({ "total": 10 }))?;
/// OutboxClient::new(&mut tx)
///     .emit("orders.created", json!({ "id": "o-1" }), Headers::new())
///     .await?;
/// tx.commit().await?;
/// ```
pub struct OutboxClient<'a, T> {
    tx: &'a mut T,
}

impl<'a, T: OutboxStore> OutboxClient<'a, T> {
    pub fn new(tx: &'a mut T) -> Self {
        Self { tx }
    }

    /// Stage a pending record for `channel`. Returns the staged record.
    pub async fn emit(
        &mut self,
        channel: &str,
        payload: Value,
        headers: Headers,
    ) -> Result<OutboxRecord, TramError> {
        if channel.trim().is_empty() {
            return Err(ValidationError::new("channel", "must not be empty").into());
        }

        let record = OutboxRecord::new(channel, payload, headers);
        self.tx.insert_outbox(&record).await?;
        debug!(message_id = %record.id, channel = %record.channel, "outbox record staged");
        Ok(record)
    }

    /// Serialize `payload` with serde_json, then [`emit`](Self::emit) it.
    pub async fn emit_serialized<P: Serialize + ?Sized>(
        &mut self,
        channel: &str,
        payload: &P,
        headers: Headers,
    ) -> Result<OutboxRecord, TramError> {
        let payload = serde_json::to_value(payload)?;
        self.emit(channel, payload, headers).await
    }

    /// The underlying transaction, for business writes alongside the events.
    pub fn transaction(&mut self) -> &mut T {
        self.tx
    }
}
