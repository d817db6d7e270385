//! Reliable event delivery between a transactional store and a message
//! transport: a transactional outbox, a message relay and an idempotent
//! inbox-backed listener.

pub mod config;
mod error;
pub mod inbox;
pub mod listener;
pub mod outbox;
pub mod relay;
pub mod store;
pub mod transport;

pub use config::{ListenerConfig, RelayConfig, TramConfig};
pub use error::{TramError, ValidationError};
pub use inbox::{InboxRecord, InboxStatus, InboxStore};
pub use listener::{
    ComponentKey, ComponentMap, DeliveryOutcome, EventHandler, HandlerContext, HandlerError,
    HandlerRegistry, IdempotentListener, Resolver,
};
pub use outbox::{OutboxClient, OutboxRecord, OutboxStatus, OutboxStore};
pub use relay::{MessageRelay, RelayCycle, RelayStats};
pub use store::{
    transactional, InMemoryStore, InMemoryTransaction, Store, StoreError, Transaction,
};
pub use transport::{
    DeliveryHandler, Headers, IncomingMessage, MemoryTransport, Transport, TransportError,
    MESSAGE_ID_HEADER,
};
