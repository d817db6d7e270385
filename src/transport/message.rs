//! The envelope a transport hands to subscribers.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::TransportError;

/// Message headers. An empty map means "no headers".
pub type Headers = HashMap<String, String>;

/// Header carrying the producer-assigned deduplication identifier.
pub const MESSAGE_ID_HEADER: &str = "x-message-id";

/// Broker-side settlement of one delivery.
///
/// Broker-backed transports implement this on top of their native ack/nack
/// primitives; the in-memory transport records the outcome for inspection.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    /// Confirm the delivery; the broker must not redeliver it.
    async fn ack(&self) -> Result<(), TransportError>;

    /// Refuse the delivery; the broker may apply its own redelivery policy.
    async fn reject(&self, reason: &str) -> Result<(), TransportError>;
}

/// A message delivered by a transport to a subscriber.
///
/// Settlement happens at most once: after the first `acknowledge` or
/// `reject`, further calls return `Ok(())` without reaching the broker.
pub struct IncomingMessage {
    /// Decoded message body.
    pub payload: Value,
    /// Channel (routing key) the message was published to.
    pub channel: String,
    /// Message headers, including [`MESSAGE_ID_HEADER`] when the producer set it.
    pub headers: Headers,
    acknowledger: Option<Arc<dyn Acknowledge>>,
    settled: AtomicBool,
}

impl IncomingMessage {
    /// Create a message with no broker acknowledger attached.
    pub fn new(channel: impl Into<String>, payload: Value, headers: Headers) -> Self {
        Self {
            payload,
            channel: channel.into(),
            headers,
            acknowledger: None,
            settled: AtomicBool::new(false),
        }
    }

    /// Attach the broker-side acknowledger for this delivery.
    pub fn with_acknowledger(mut self, acknowledger: Arc<dyn Acknowledge>) -> Self {
        self.acknowledger = Some(acknowledger);
        self
    }

    /// The deduplication identifier, if the producer supplied a non-blank one.
    pub fn message_id(&self) -> Option<&str> {
        self.header(MESSAGE_ID_HEADER)
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Get a header value by key.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|s| s.as_str())
    }

    /// Deserialize the payload into a typed value.
    pub fn input<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Whether this delivery has already been acknowledged or rejected.
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Acknowledge the delivery at the transport level.
    pub async fn acknowledge(&self) -> Result<(), TransportError> {
        if self.settled.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match &self.acknowledger {
            Some(acknowledger) => acknowledger.ack().await,
            None => Ok(()),
        }
    }

    /// Reject the delivery at the transport level.
    pub async fn reject(&self, reason: &str) -> Result<(), TransportError> {
        if self.settled.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match &self.acknowledger {
            Some(acknowledger) => acknowledger.reject(reason).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("channel", &self.channel)
            .field("payload", &self.payload)
            .field("headers", &self.headers)
            .field("settled", &self.is_settled())
            .finish()
    }
}
