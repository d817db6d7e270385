//! In-memory transport for testing and single-process deployments.
//!
//! Messages are dispatched by direct function call: `publish` hands every
//! matching subscriber its own [`IncomingMessage`] on an independent tokio
//! task, so a slow handler never blocks other deliveries.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::debug;

use super::message::{Acknowledge, Headers, IncomingMessage, MESSAGE_ID_HEADER};
use super::pattern;
use super::wire::{WireFormat, WireMessage};
use super::{DeliveryHandler, Transport, TransportError};

/// A message as recorded by the in-memory broker at publish time.
#[derive(Clone, Debug, PartialEq)]
pub struct PublishedMessage {
    /// Position in the broker log, starting at 1.
    pub sequence: u64,
    pub channel: String,
    pub payload: Value,
    pub headers: Headers,
}

impl PublishedMessage {
    /// The deduplication identifier carried by the message, if any.
    pub fn message_id(&self) -> Option<&str> {
        self.headers.get(MESSAGE_ID_HEADER).map(|s| s.as_str())
    }
}

/// Broker-side outcome of one delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    Acked {
        delivery_tag: u64,
        message_id: Option<String>,
    },
    Rejected {
        delivery_tag: u64,
        message_id: Option<String>,
        reason: String,
    },
}

impl Settlement {
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Settlement::Acked { message_id, .. } | Settlement::Rejected { message_id, .. } => {
                message_id.as_deref()
            }
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Settlement::Acked { .. })
    }
}

struct Subscription {
    session: u64,
    pattern: String,
    handler: Arc<dyn DeliveryHandler>,
}

/// State shared by every session opened on the same in-memory broker.
#[derive(Default)]
struct Broker {
    subscriptions: RwLock<Vec<Subscription>>,
    published: Mutex<Vec<PublishedMessage>>,
    settlements: Mutex<Vec<Settlement>>,
    next_session: AtomicU64,
    next_sequence: AtomicU64,
    next_tag: AtomicU64,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl Broker {
    fn settle(&self, settlement: Settlement) {
        self.settlements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(settlement);
    }
}

/// Decrements the in-flight counter when a delivery task ends, even on panic.
struct DeliveryGuard(Arc<Broker>);

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

struct MemoryDelivery {
    broker: Arc<Broker>,
    delivery_tag: u64,
    message_id: Option<String>,
}

#[async_trait]
impl Acknowledge for MemoryDelivery {
    async fn ack(&self) -> Result<(), TransportError> {
        self.broker.settle(Settlement::Acked {
            delivery_tag: self.delivery_tag,
            message_id: self.message_id.clone(),
        });
        Ok(())
    }

    async fn reject(&self, reason: &str) -> Result<(), TransportError> {
        self.broker.settle(Settlement::Rejected {
            delivery_tag: self.delivery_tag,
            message_id: self.message_id.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }
}

/// In-process transport.
///
/// Each `MemoryTransport` is a session on a broker. Clones share the session;
/// [`new_session`](Self::new_session) opens an independent session on the same
/// broker, with its own connection state and subscriptions, the way a relay
/// and a listener would each hold their own broker connection.
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use serde_json::json;
/// use tram_rust::transport::{Headers, IncomingMessage, MemoryTransport, Transport};
///
/// # tokio_test_block_on(async {
/// let transport = MemoryTransport::new();
/// transport.connect().await.unwrap();
/// transport
///     .subscribe("orders", Arc::new(|message: IncomingMessage| async move {
///         message.acknowledge().await.unwrap();
///     }))
///     .await
///     .unwrap();
///
/// transport.publish("orders", &json!({ "id": 1 }), &Headers::new()).await.unwrap();
/// transport.wait_idle().await;
/// assert_eq!(transport.acknowledged().len(), 1);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryTransport {
    broker: Arc<Broker>,
    session: u64,
    connected: Arc<AtomicBool>,
    wire_format: WireFormat,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Create a new broker and open a first session on it.
    pub fn new() -> Self {
        Self::open(Arc::new(Broker::default()), WireFormat::Native)
    }

    /// Open another independent session on the same broker.
    pub fn new_session(&self) -> Self {
        Self::open(Arc::clone(&self.broker), self.wire_format)
    }

    /// Encode every message through the given wire framing.
    pub fn with_wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = format;
        self
    }

    fn open(broker: Arc<Broker>, wire_format: WireFormat) -> Self {
        let session = broker.next_session.fetch_add(1, Ordering::Relaxed);
        Self {
            broker,
            session,
            connected: Arc::new(AtomicBool::new(false)),
            wire_format,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Every message published on this broker, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.broker
            .published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Messages published to one channel.
    pub fn published_on(&self, channel: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.channel == channel)
            .collect()
    }

    /// Every settlement recorded on this broker, in settlement order.
    pub fn settlements(&self) -> Vec<Settlement> {
        self.broker
            .settlements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn acknowledged(&self) -> Vec<Settlement> {
        self.settlements().into_iter().filter(Settlement::is_ack).collect()
    }

    pub fn rejected(&self) -> Vec<Settlement> {
        self.settlements()
            .into_iter()
            .filter(|s| !s.is_ack())
            .collect()
    }

    /// Number of subscriptions held by this session.
    pub fn subscription_count(&self) -> usize {
        self.broker
            .subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.session == self.session)
            .count()
    }

    /// Wait until every dispatched delivery has finished running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.broker.idle.notified();
            if self.broker.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn carry(
        &self,
        channel: &str,
        payload: &Value,
        headers: &Headers,
    ) -> Result<(Value, Headers), TransportError> {
        if self.wire_format == WireFormat::Native {
            return Ok((payload.clone(), headers.clone()));
        }
        let wire = WireMessage::encode(channel, payload, headers)?;
        let delivered = self.wire_format.carry(wire)?;
        Ok((delivered.decode_payload()?, delivered.headers))
    }

    fn matching_handlers(&self, channel: &str) -> Vec<Arc<dyn DeliveryHandler>> {
        self.broker
            .subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| pattern::matches(&s.pattern, channel))
            .map(|s| Arc::clone(&s.handler))
            .collect()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if !self.connected.swap(true, Ordering::AcqRel) {
            debug!(session = self.session, "memory transport connected");
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.broker
            .subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|s| s.session != self.session);
        debug!(session = self.session, "memory transport closed");
        Ok(())
    }

    async fn publish(
        &self,
        channel: &str,
        payload: &Value,
        headers: &Headers,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let (payload, headers) = self.carry(channel, payload, headers)?;
        let sequence = self.broker.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.broker
            .published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage {
                sequence,
                channel: channel.to_string(),
                payload: payload.clone(),
                headers: headers.clone(),
            });

        let handlers = self.matching_handlers(channel);
        debug!(channel, sequence, receivers = handlers.len(), "message published");

        let message_id = headers.get(MESSAGE_ID_HEADER).cloned();
        for handler in handlers {
            let delivery_tag = self.broker.next_tag.fetch_add(1, Ordering::Relaxed) + 1;
            let message = IncomingMessage::new(channel, payload.clone(), headers.clone())
                .with_acknowledger(Arc::new(MemoryDelivery {
                    broker: Arc::clone(&self.broker),
                    delivery_tag,
                    message_id: message_id.clone(),
                }));

            self.broker.in_flight.fetch_add(1, Ordering::AcqRel);
            let guard = DeliveryGuard(Arc::clone(&self.broker));
            tokio::spawn(async move {
                let _guard = guard;
                handler.deliver(message).await;
            });
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.broker
            .subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscription {
                session: self.session,
                pattern: pattern.to_string(),
                handler,
            });
        debug!(session = self.session, pattern, "subscribed");
        Ok(())
    }
}
