//! Full pipeline: business transaction → relay → transport → listener.

use serde_json::json;
use tram_rust::transport::{MemoryTransport, WireFormat};
use tram_rust::{InboxStatus, OutboxStatus, MESSAGE_ID_HEADER};

use crate::support::{emit, eventually, init_tracing, listener, relay, OrderCreated, Received};

async fn run_order_scenario(broker: MemoryTransport) {
    init_tracing();
    let store = tram_rust::InMemoryStore::new();
    let received = Received::new();

    let listener = listener(&store, broker.new_session(), received.registry("orders"));
    listener.start().await.unwrap();
    let relay = relay(&store, broker.new_session());
    relay.start().await.unwrap();

    let record = emit(&store, "orders", json!({ "id": 1 })).await;

    eventually(|| received.count() == 1).await;
    broker.wait_idle().await;
    eventually(|| {
        store
            .inbox_record(&record.id)
            .unwrap()
            .map_or(false, |r| r.status == InboxStatus::Processed)
    })
    .await;

    relay.stop().await.unwrap();
    listener.stop().await.unwrap();

    assert_eq!(received.payloads(), vec![json!({ "id": 1 })]);
    assert_eq!(received.channels(), vec!["orders".to_string()]);

    let outbox = store.outbox_record(&record.id).unwrap().unwrap();
    assert_eq!(outbox.status, OutboxStatus::Published);
    assert!(outbox.processed_at.is_some());

    let published = broker.published_on("orders");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].message_id(), Some(record.id.as_str()));

    let acked = broker.acknowledged();
    assert_eq!(acked.len(), 1);
    assert_eq!(acked[0].message_id(), Some(record.id.as_str()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn order_event_reaches_the_handler_once() {
    run_order_scenario(MemoryTransport::new()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn binary_frames_carry_the_event() {
    run_order_scenario(MemoryTransport::new().with_wire_format(WireFormat::Binary)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn text_frames_carry_the_event() {
    run_order_scenario(MemoryTransport::new().with_wire_format(WireFormat::Text)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn typed_handlers_and_wildcards() {
    init_tracing();
    let store = tram_rust::InMemoryStore::new();
    let broker = MemoryTransport::new();
    let totals = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));

    let sink = totals.clone();
    let registry = tram_rust::HandlerRegistry::new().on("orders.*", move |ctx| {
        let sink = sink.clone();
        async move {
            let order = ctx.input::<OrderCreated>()?;
            sink.lock().unwrap().push((ctx.channel().to_string(), order.id));
            Ok(())
        }
    });

    let listener = listener(&store, broker.new_session(), registry);
    listener.start().await.unwrap();
    let relay_session = broker.new_session();
    tram_rust::Transport::connect(&relay_session).await.unwrap();
    let relay = relay(&store, relay_session);

    emit(&store, "orders.created", json!({ "id": 7 })).await;
    emit(&store, "orders.shipped", json!({ "id": 7 })).await;
    emit(&store, "orders.eu.created", json!({ "id": 8 })).await;
    let cycle = relay.process_outbox().await.unwrap();
    assert_eq!(cycle.published, 3);

    eventually(|| totals.lock().unwrap().len() == 2).await;
    broker.wait_idle().await;
    listener.stop().await.unwrap();

    let mut seen = totals.lock().unwrap().clone();
    seen.sort();
    assert_eq!(
        seen,
        vec![
            ("orders.created".to_string(), 7),
            ("orders.shipped".to_string(), 7)
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn relay_and_listener_sessions_stop_independently() {
    init_tracing();
    let store = tram_rust::InMemoryStore::new();
    let broker = MemoryTransport::new();
    let received = Received::new();

    let listener_session = broker.new_session();
    let listener = listener(&store, listener_session.clone(), received.registry("orders"));
    listener.start().await.unwrap();

    let relay = relay(&store, broker.new_session());
    relay.start().await.unwrap();
    relay.stop().await.unwrap();
    assert!(listener_session.is_connected());
    assert_eq!(listener_session.subscription_count(), 1);

    // Still consuming after the relay went away.
    let mut headers = tram_rust::Headers::new();
    headers.insert(MESSAGE_ID_HEADER.to_string(), "m-1".to_string());
    let publisher = broker.new_session();
    tram_rust::Transport::connect(&publisher).await.unwrap();
    tram_rust::Transport::publish(&publisher, "orders", &json!({ "id": 2 }), &headers)
        .await
        .unwrap();

    eventually(|| received.count() == 1).await;
    listener.stop().await.unwrap();
    assert_eq!(listener_session.subscription_count(), 0);
}
