//! Inbox - the deduplication ledger of inbound messages.
//!
//! One [`InboxRecord`] per message id, enforced by primary-key uniqueness.
//! The listener reserves a `Pending` row before running a handler, then
//! moves it to `Processed` or `Failed`; a second delivery of the same id
//! finds the row and is not handled again.

mod record;
mod store;

pub use record::{InboxRecord, InboxStatus};
pub use store::InboxStore;
