//! Relay behaviour against the in-memory store and transport.

use std::time::Duration;

use serde_json::json;
use tram_rust::transport::{MemoryTransport, Transport};
use tram_rust::{
    InMemoryStore, MessageRelay, OutboxStatus, OutboxStore, RelayConfig, Store,
    MESSAGE_ID_HEADER,
};

use crate::support::{emit, eventually, init_tracing, relay, FlakyTransport};

async fn connected() -> MemoryTransport {
    let transport = MemoryTransport::new();
    transport.connect().await.unwrap();
    transport
}

#[tokio::test]
async fn publishes_oldest_first() {
    init_tracing();
    let store = InMemoryStore::new();
    let transport = connected().await;

    let t1 = emit(&store, "orders", json!({ "n": 1 })).await;
    let t2 = emit(&store, "orders", json!({ "n": 2 })).await;
    let t3 = emit(&store, "orders", json!({ "n": 3 })).await;

    relay(&store, transport.clone()).process_outbox().await.unwrap();

    let order: Vec<Option<String>> = transport
        .published()
        .iter()
        .map(|m| m.message_id().map(str::to_string))
        .collect();
    assert_eq!(order, vec![Some(t1.id), Some(t2.id), Some(t3.id)]);
}

#[tokio::test]
async fn published_rows_are_never_sent_again() {
    let store = InMemoryStore::new();
    let transport = connected().await;
    emit(&store, "orders", json!({ "id": 1 })).await;

    let relay = relay(&store, transport.clone());
    assert_eq!(relay.process_outbox().await.unwrap().published, 1);
    assert_eq!(relay.process_outbox().await.unwrap().fetched, 0);
    assert_eq!(transport.published().len(), 1);

    let stats = relay.stats();
    assert_eq!(stats.cycles, 2);
    assert_eq!(stats.published, 1);
}

#[tokio::test]
async fn batch_size_limits_each_cycle() {
    let store = InMemoryStore::new();
    let transport = connected().await;
    for n in 0..5 {
        emit(&store, "orders", json!({ "n": n })).await;
    }

    let relay = MessageRelay::new(
        store.clone(),
        std::sync::Arc::new(transport.clone()),
        RelayConfig::default().with_batch_size(2),
    )
    .unwrap();

    let fetched: Vec<usize> = {
        let mut fetched = Vec::new();
        for _ in 0..4 {
            fetched.push(relay.process_outbox().await.unwrap().fetched);
        }
        fetched
    };
    assert_eq!(fetched, vec![2, 2, 1, 0]);
    assert_eq!(transport.published().len(), 5);
}

#[tokio::test]
async fn failed_publish_does_not_abort_the_batch() {
    init_tracing();
    let store = InMemoryStore::new();
    let transport = FlakyTransport::new(connected().await);
    transport.fail_on("payments");

    let ok_before = emit(&store, "orders", json!({ "id": 1 })).await;
    let failing = emit(&store, "payments", json!({ "id": 2 })).await;
    let ok_after = emit(&store, "orders", json!({ "id": 3 })).await;

    let cycle = relay(&store, transport.clone()).process_outbox().await.unwrap();
    assert_eq!((cycle.fetched, cycle.published, cycle.failed), (3, 2, 1));

    let failed = store.outbox_record(&failing.id).unwrap().unwrap();
    assert_eq!(failed.status, OutboxStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("connection failed: broker refused payments"));
    assert!(failed.processed_at.is_some());

    for id in [&ok_before.id, &ok_after.id] {
        let record = store.outbox_record(id).unwrap().unwrap();
        assert_eq!(record.status, OutboxStatus::Published);
        assert!(record.error.is_none());
    }

    // Failed rows are terminal: no automatic retry.
    transport.heal();
    let cycle = relay(&store, transport).process_outbox().await.unwrap();
    assert_eq!(cycle.fetched, 0);
}

#[tokio::test]
async fn rows_locked_by_another_transaction_are_skipped() {
    let store = InMemoryStore::new();
    let transport = connected().await;
    let first = emit(&store, "orders", json!({ "n": 1 })).await;
    let second = emit(&store, "orders", json!({ "n": 2 })).await;

    let mut other = store.begin().await.unwrap();
    let locked = other.lock_pending_outbox(1).await.unwrap();
    assert_eq!(locked[0].id, first.id);

    let relay = relay(&store, transport.clone());
    let cycle = relay.process_outbox().await.unwrap();
    assert_eq!(cycle.fetched, 1);
    assert_eq!(transport.published()[0].message_id(), Some(second.id.as_str()));

    drop(other);
    let cycle = relay.process_outbox().await.unwrap();
    assert_eq!(cycle.fetched, 1);
    assert_eq!(transport.published()[1].message_id(), Some(first.id.as_str()));
}

#[tokio::test]
async fn message_id_header_keeps_producer_headers() {
    let store = InMemoryStore::new();
    let transport = connected().await;

    let mut tx = store.begin().await.unwrap();
    let mut headers = tram_rust::Headers::new();
    headers.insert("correlation_id".to_string(), "req-9".to_string());
    let record = tram_rust::OutboxClient::new(&mut tx)
        .emit("orders", json!({}), headers)
        .await
        .unwrap();
    tram_rust::Transaction::commit(tx).await.unwrap();

    relay(&store, transport.clone()).process_outbox().await.unwrap();

    let sent = &transport.published()[0];
    assert_eq!(sent.headers.get(MESSAGE_ID_HEADER), Some(&record.id));
    assert_eq!(sent.headers.get("correlation_id").map(String::as_str), Some("req-9"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn loop_survives_a_store_outage() {
    init_tracing();
    let store = InMemoryStore::new();
    let transport = MemoryTransport::new();
    let relay = relay(&store, transport.clone());

    store.set_available(false);
    relay.start().await.unwrap();
    eventually(|| relay.stats().errors >= 2).await;
    assert!(relay.is_running());

    store.set_available(true);
    let record = emit(&store, "orders", json!({ "id": 1 })).await;
    eventually(|| {
        store
            .outbox_record(&record.id)
            .unwrap()
            .map_or(false, |r| r.is_published())
    })
    .await;

    relay.stop().await.unwrap();
    assert_eq!(transport.published().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_waits_for_the_running_cycle() {
    let store = InMemoryStore::new();
    let transport = MemoryTransport::new();
    for n in 0..20 {
        emit(&store, "orders", json!({ "n": n })).await;
    }

    let relay = MessageRelay::new(
        store.clone(),
        std::sync::Arc::new(transport.clone()),
        RelayConfig::default().with_poll_interval(Duration::from_secs(30)),
    )
    .unwrap();
    relay.start().await.unwrap();
    relay.stop().await.unwrap();

    // Whatever the first cycle fetched was committed; nothing is left half-done.
    let records = store.outbox_records().unwrap();
    let published = records.iter().filter(|r| r.is_published()).count();
    let pending = records.iter().filter(|r| r.is_pending()).count();
    assert_eq!(published + pending, 20);
    assert_eq!(transport.published().len(), published);
    assert!(!transport.is_connected());
}
