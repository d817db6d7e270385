//! Message relay - drains the outbox into the transport.
//!
//! A [`MessageRelay`] runs one background task that repeats a cycle on a
//! fixed interval:
//!
//! 1. begin a transaction and lock up to `batch_size` pending rows, oldest first
//! 2. publish each row with `x-message-id` set to the row id
//! 3. mark the row `Published` or `Failed`
//! 4. commit every transition of the batch at once
//!
//! Rows locked by another relay are skipped, so several relays can share a
//! store. A crash between publish and commit leaves rows `Pending` that were
//! already sent; consumers deduplicate them through the inbox.
//!
//! ## Example
//!
//! ```ignore
//! let relay = MessageRelay::new(store.clone(), Arc::new(transport), RelayConfig::default())?;
//! relay.start().await?;
//! // ...
//! relay.stop().await?;
//! println!("published {}", relay.stats().published);
//! ```

mod stats;
mod worker;

pub use stats::{RelayCycle, RelayStats};
pub use worker::MessageRelay;
