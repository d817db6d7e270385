//! Shared fixtures for the tram integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tram_rust::transport::{DeliveryHandler, Headers, MemoryTransport, Transport, TransportError};
use tram_rust::{
    ComponentMap, HandlerContext, HandlerError, HandlerRegistry, IdempotentListener,
    InMemoryStore, ListenerConfig, MessageRelay, OutboxClient, OutboxRecord, RelayConfig, Store,
    Transaction,
};

/// Install a test-writer subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Payload used by the order scenarios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub id: u64,
}

/// Emit one event in its own committed transaction.
pub async fn emit(store: &InMemoryStore, channel: &str, payload: Value) -> OutboxRecord {
    let mut tx = store.begin().await.unwrap();
    let record = OutboxClient::new(&mut tx)
        .emit(channel, payload, Headers::new())
        .await
        .unwrap();
    tx.commit().await.unwrap();
    record
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn fast_relay_config() -> RelayConfig {
    RelayConfig::default().with_poll_interval(Duration::from_millis(10))
}

pub fn relay<T: Transport + 'static>(
    store: &InMemoryStore,
    transport: T,
) -> MessageRelay<InMemoryStore> {
    MessageRelay::new(store.clone(), Arc::new(transport), fast_relay_config()).unwrap()
}

pub fn listener<T: Transport + 'static>(
    store: &InMemoryStore,
    transport: T,
    registry: HandlerRegistry,
) -> IdempotentListener<InMemoryStore> {
    IdempotentListener::new(
        store.clone(),
        Arc::new(transport),
        registry,
        Arc::new(ComponentMap::new()),
        ListenerConfig::default(),
    )
    .unwrap()
}

/// Records every payload a handler sees.
#[derive(Clone, Default)]
pub struct Received {
    seen: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Received {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.seen.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn channels(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
    }

    /// A registry whose `pattern` handler records into `self`.
    pub fn registry(&self, pattern: &str) -> HandlerRegistry {
        let received = self.clone();
        HandlerRegistry::new().on(pattern, move |ctx: HandlerContext| {
            let received = received.clone();
            async move {
                received
                    .seen
                    .lock()
                    .unwrap()
                    .push((ctx.channel().to_string(), ctx.payload().clone()));
                Ok::<(), HandlerError>(())
            }
        })
    }
}

/// Memory transport whose publish fails for selected channels and whose
/// subscribe fails for selected patterns.
#[derive(Clone)]
pub struct FlakyTransport {
    inner: MemoryTransport,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl FlakyTransport {
    pub fn new(inner: MemoryTransport) -> Self {
        Self {
            inner,
            failing: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Refuse publishes to `name`, and subscriptions to `name` as a pattern.
    pub fn fail_on(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.inner.connect().await
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.close().await
    }

    async fn publish(
        &self,
        channel: &str,
        payload: &Value,
        headers: &Headers,
    ) -> Result<(), TransportError> {
        if self.failing.lock().unwrap().contains(channel) {
            return Err(TransportError::Connection(format!(
                "broker refused {}",
                channel
            )));
        }
        self.inner.publish(channel, payload, headers).await
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(), TransportError> {
        if self.failing.lock().unwrap().contains(pattern) {
            return Err(TransportError::Connection(format!(
                "broker refused subscription to {}",
                pattern
            )));
        }
        self.inner.subscribe(pattern, handler).await
    }
}
