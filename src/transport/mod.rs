//! Transport - the publish/subscribe contract between relay and listener.
//!
//! Any broker can carry tram messages as long as it implements [`Transport`]:
//!
//! ```text
//! ┌──────────────┐  publish(channel, payload, headers)  ┌──────────────┐
//! │ MessageRelay │ ───────────────────────────────────▶ │              │
//! └──────────────┘                                      │    Broker    │
//! ┌──────────────┐  subscribe(pattern, handler)         │              │
//! │   Listener   │ ◀─────────────────────────────────── │              │
//! └──────────────┘   IncomingMessage + ack / reject     └──────────────┘
//! ```
//!
//! [`MemoryTransport`] is the in-process reference implementation, used for
//! tests and single-process deployments. Broker-backed transports live
//! outside this crate; they map the four operations onto their protocol and
//! wire settlement through [`Acknowledge`].

mod error;
mod memory;
mod message;
pub mod pattern;
pub mod wire;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

pub use error::TransportError;
pub use memory::{MemoryTransport, PublishedMessage, Settlement};
pub use message::{Acknowledge, Headers, IncomingMessage, MESSAGE_ID_HEADER};
pub use wire::{WireFormat, WireMessage};

/// Callback invoked once per delivered message.
///
/// Implemented for any `Fn(IncomingMessage) -> impl Future<Output = ()>`.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn deliver(&self, message: IncomingMessage);
}

#[async_trait]
impl<F, Fut> DeliveryHandler for F
where
    F: Fn(IncomingMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn deliver(&self, message: IncomingMessage) {
        (self)(message).await
    }
}

/// Minimal broker contract.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the broker session. Calling it on a connected session is a no-op.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Release the session. Safe to call when not connected.
    async fn close(&self) -> Result<(), TransportError>;

    /// Publish one message to a channel.
    async fn publish(
        &self,
        channel: &str,
        payload: &Value,
        headers: &Headers,
    ) -> Result<(), TransportError>;

    /// Register a handler for every message whose channel matches `pattern`.
    ///
    /// May be called several times for the same pattern; every registered
    /// handler receives each matching message.
    async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(), TransportError>;
}
