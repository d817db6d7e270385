//! Outbox - outgoing events stored alongside business data.
//!
//! Business code emits events through an [`OutboxClient`] bound to its own
//! transaction, so the event row and the business change commit (or roll
//! back) together. The relay later picks up `Pending` rows and publishes them.

mod client;
mod record;
mod store;

pub use client::OutboxClient;
pub use record::{OutboxRecord, OutboxStatus};
pub use store::OutboxStore;
