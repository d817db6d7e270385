use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::ListenerConfig;
use crate::error::{TramError, ValidationError};
use crate::inbox::{InboxRecord, InboxStore};
use crate::store::{Store, StoreError, Transaction, INBOX_TABLE};
use crate::transport::{pattern, DeliveryHandler, IncomingMessage, Transport};

use super::context::HandlerContext;
use super::error::HandlerError;
use super::registry::{HandlerRegistry, Registration, Resolver};

/// What happened to one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// First sighting; the handler succeeded and the inbox row is `Processed`.
    Processed,
    /// The id was already in the inbox; the handler was not invoked.
    Duplicate,
    /// The handler failed; the inbox row (if any) is `Failed`.
    Failed,
    /// No message id; the handler ran without deduplication.
    Untracked,
}

struct ListenerInner<S> {
    store: S,
    transport: Arc<dyn Transport>,
    registry: HandlerRegistry,
    resolver: Arc<dyn Resolver>,
    permits: Semaphore,
    max_in_flight: u32,
}

/// Consumer that deduplicates deliveries through the inbox before running
/// application handlers.
///
/// Each message is handled in three short transactions: reserve the id,
/// run the handler outside any transaction, record the outcome. A second
/// delivery of the same id finds the reservation and is acknowledged
/// without reaching the handler.
pub struct IdempotentListener<S> {
    inner: Arc<ListenerInner<S>>,
    running: AsyncMutex<bool>,
}

impl<S> IdempotentListener<S>
where
    S: Store + 'static,
    S::Tx: InboxStore + 'static,
{
    pub fn new(
        store: S,
        transport: Arc<dyn Transport>,
        registry: HandlerRegistry,
        resolver: Arc<dyn Resolver>,
        config: ListenerConfig,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        let max_in_flight = u32::try_from(config.max_in_flight).unwrap_or(u32::MAX);
        Ok(Self {
            inner: Arc::new(ListenerInner {
                store,
                transport,
                registry,
                resolver,
                permits: Semaphore::new(max_in_flight as usize),
                max_in_flight,
            }),
            running: AsyncMutex::new(false),
        })
    }

    /// Check every component-bound handler against the resolver, connect the
    /// transport and subscribe once per registered pattern.
    pub async fn start(&self) -> Result<(), TramError> {
        let mut running = self.running.lock().await;
        if *running {
            return Ok(());
        }

        self.validate_registry()?;
        self.inner.transport.connect().await?;

        for registration in self.inner.registry.iter() {
            let delivery = Arc::new(Delivery {
                inner: Arc::clone(&self.inner),
                registration: registration.clone(),
            });
            if let Err(err) = self
                .inner
                .transport
                .subscribe(registration.pattern(), delivery)
                .await
            {
                // Drop the subscriptions made so far so a retry starts clean.
                if let Err(close_err) = self.inner.transport.close().await {
                    warn!(error = %close_err, "close after failed subscribe failed");
                }
                return Err(err.into());
            }
            debug!(pattern = %registration.pattern(), "subscribed");
        }

        *running = true;
        info!(patterns = self.inner.registry.len(), "idempotent listener started");
        Ok(())
    }

    /// Close the transport, then wait for handler invocations in flight.
    pub async fn stop(&self) -> Result<(), TramError> {
        let mut running = self.running.lock().await;
        if !*running {
            return Ok(());
        }

        let closed = self.inner.transport.close().await;
        // Taking every permit means no handler is still running.
        if let Ok(drained) = self.inner.permits.acquire_many(self.inner.max_in_flight).await {
            drop(drained);
        }
        *running = false;
        info!("idempotent listener stopped");
        closed.map_err(TramError::from)
    }

    pub async fn is_running(&self) -> bool {
        *self.running.lock().await
    }

    /// Run the deduplicating algorithm on one message, using the first
    /// registration whose pattern matches its channel, and settle it.
    pub async fn process(&self, message: IncomingMessage) -> Result<DeliveryOutcome, TramError> {
        let registration = self
            .inner
            .registry
            .iter()
            .find(|r| pattern::matches(r.pattern(), &message.channel))
            .cloned();

        match registration {
            Some(registration) => self.inner.process(&registration, message).await,
            None => {
                let err = HandlerError::UnknownChannel(message.channel.clone());
                reject(&message, &err.to_string()).await;
                Err(err.into())
            }
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    fn validate_registry(&self) -> Result<(), ValidationError> {
        for registration in self.inner.registry.iter() {
            if let Some(key) = registration.component() {
                if self.inner.resolver.resolve(key).is_none() {
                    return Err(ValidationError::new(
                        format!("handler '{}'", registration.pattern()),
                        format!("component {} cannot be resolved", key.name()),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Subscription callback binding one registration to the listener.
struct Delivery<S> {
    inner: Arc<ListenerInner<S>>,
    registration: Registration,
}

#[async_trait]
impl<S> DeliveryHandler for Delivery<S>
where
    S: Store + 'static,
    S::Tx: InboxStore + 'static,
{
    async fn deliver(&self, message: IncomingMessage) {
        let channel = message.channel.clone();
        if let Err(err) = self.inner.process(&self.registration, message).await {
            error!(channel = %channel, error = %err, "delivery could not be processed");
        }
    }
}

enum Reservation {
    Reserved,
    Duplicate,
}

impl<S> ListenerInner<S>
where
    S: Store,
    S::Tx: InboxStore + 'static,
{
    async fn process(
        &self,
        registration: &Registration,
        message: IncomingMessage,
    ) -> Result<DeliveryOutcome, TramError> {
        let _permit = self.permits.acquire().await.ok();

        let Some(id) = message.message_id().map(str::to_string) else {
            warn!(
                channel = %message.channel,
                "message has no id, processing without deduplication"
            );
            return Ok(match self.invoke(registration, &message).await {
                Ok(()) => {
                    acknowledge(&message).await;
                    DeliveryOutcome::Untracked
                }
                Err(err) => {
                    error!(channel = %message.channel, error = %err, "handler failed");
                    reject(&message, &err.to_string()).await;
                    DeliveryOutcome::Failed
                }
            });
        };

        match self.reserve(&id, &message).await {
            Ok(Reservation::Reserved) => {}
            Ok(Reservation::Duplicate) => {
                debug!(message_id = %id, channel = %message.channel, "duplicate message skipped");
                acknowledge(&message).await;
                return Ok(DeliveryOutcome::Duplicate);
            }
            Err(err) => {
                error!(message_id = %id, error = %err, "inbox reservation failed");
                reject(&message, &err.to_string()).await;
                return Err(err.into());
            }
        }

        let result = self.invoke(registration, &message).await;
        if let Err(err) = self.record(&id, &result).await {
            error!(message_id = %id, error = %err, "inbox outcome could not be recorded");
            reject(&message, &err.to_string()).await;
            return Err(err.into());
        }

        match result {
            Ok(()) => {
                debug!(message_id = %id, channel = %message.channel, "message processed");
                acknowledge(&message).await;
                Ok(DeliveryOutcome::Processed)
            }
            Err(err) => {
                error!(
                    message_id = %id,
                    channel = %message.channel,
                    error = %err,
                    "handler failed"
                );
                reject(&message, &err.to_string()).await;
                Ok(DeliveryOutcome::Failed)
            }
        }
    }

    async fn reserve(
        &self,
        id: &str,
        message: &IncomingMessage,
    ) -> Result<Reservation, StoreError> {
        let mut tx = self.store.begin().await?;
        if tx.find_inbox(id).await?.is_some() {
            tx.rollback().await?;
            return Ok(Reservation::Duplicate);
        }

        match tx.insert_inbox(&InboxRecord::reserve(id, message)).await {
            Ok(()) => {}
            Err(err) if err.is_conflict() => return Ok(Reservation::Duplicate),
            Err(err) => return Err(err),
        }

        match tx.commit().await {
            Ok(()) => Ok(Reservation::Reserved),
            Err(err) if err.is_conflict() => {
                warn!(message_id = %id, "lost reservation race, treating as duplicate");
                Ok(Reservation::Duplicate)
            }
            Err(err) => Err(err),
        }
    }

    async fn record(&self, id: &str, result: &Result<(), HandlerError>) -> Result<(), StoreError> {
        let mut tx = self.store.begin().await?;
        let Some(mut record) = tx.find_inbox(id).await? else {
            return Err(StoreError::NotFound {
                table: INBOX_TABLE,
                id: id.to_string(),
            });
        };

        match result {
            Ok(()) => record.mark_processed(),
            Err(err) => record.mark_failed(err.to_string()),
        };
        tx.update_inbox(&record).await?;
        tx.commit().await
    }

    /// Resolve the component, then run the handler in its own task so a
    /// panic is reported as a failure instead of tearing down the delivery.
    async fn invoke(
        &self,
        registration: &Registration,
        message: &IncomingMessage,
    ) -> Result<(), HandlerError> {
        let mut ctx = HandlerContext::new(message);
        if let Some(key) = registration.component() {
            let component = self
                .resolver
                .resolve(key)
                .ok_or_else(|| HandlerError::Unresolved(key.name().to_string()))?;
            ctx = ctx.with_component(component);
        }

        let handler = registration.handler();
        match tokio::spawn(async move { handler.handle(ctx).await }).await {
            Ok(result) => result,
            Err(err) => Err(HandlerError::other(format!("handler panicked: {}", err))),
        }
    }
}

async fn acknowledge(message: &IncomingMessage) {
    if let Err(err) = message.acknowledge().await {
        warn!(channel = %message.channel, error = %err, "acknowledge failed");
    }
}

async fn reject(message: &IncomingMessage, reason: &str) {
    if let Err(err) = message.reject(reason).await {
        warn!(channel = %message.channel, error = %err, "reject failed");
    }
}
