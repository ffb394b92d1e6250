//! Outbox relay behaviour across broker outages and restarts.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::Shop;
use ordercore::{Disposition, OutboundMessage, Topic};
use ordercore_memory::InMemoryBackend;
use tokio::sync::watch;

#[tokio::test]
async fn outage_defers_and_recovery_publishes_in_commit_order() {
    let shop = Shop::new();
    let _ = shop.stock("SKU-WIDGET", 10).await;
    let order = shop.checkout("customer-1", &[("SKU-WIDGET", 1, "1.00")]).await;
    assert_eq!(shop.pay(order.id()).await, Disposition::Applied);

    shop.backend.publisher.set_online(false);
    let report = shop.relay.relay_once().await.unwrap();
    assert_eq!(report.published, 0);
    assert_eq!(report.deferred, 3);
    assert!(shop.backend.publisher.is_empty());
    assert_eq!(shop.backend.orders.pending_count(), 3);

    shop.backend.publisher.set_online(true);
    let report = shop.relay.relay_once().await.unwrap();
    assert_eq!(report.published, 3);
    assert_eq!(report.deferred, 0);
    assert_eq!(shop.backend.orders.pending_count(), 0);

    let topics: Vec<Topic> = shop
        .backend
        .publisher
        .published()
        .into_iter()
        .map(|(topic, _)| topic)
        .collect();
    assert_eq!(
        topics,
        vec![Topic::OrderEvents, Topic::OrderEvents, Topic::InventoryReductions]
    );
    assert!(shop
        .backend
        .publisher
        .published()
        .iter()
        .all(|(_, envelope)| envelope.partition_key == order.id().to_string()));
}

#[tokio::test]
async fn a_fresh_relay_resumes_where_the_last_one_stopped() {
    let backend = InMemoryBackend::new();
    let first = Shop::with_backend(backend.clone());
    let _ = first.stock("SKU-WIDGET", 10).await;
    let order = first.checkout("customer-1", &[("SKU-WIDGET", 2, "1.00")]).await;
    let _ = first.relay.relay_once().await.unwrap();
    assert_eq!(first.pay(order.id()).await, Disposition::Applied);

    // A new process over the same storage picks up what is still pending.
    let second = Shop::with_backend(backend.clone());
    let report = second.relay.relay_once().await.unwrap();
    assert_eq!(report.published, 2);
    assert_eq!(backend.publisher.len(), 3);

    let message_ids: std::collections::HashSet<_> = backend
        .publisher
        .published()
        .iter()
        .map(|(_, envelope)| envelope.message_id)
        .collect();
    assert_eq!(message_ids.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_relay_drains_until_shutdown() {
    let shop = Arc::new(Shop::new());
    let _ = shop.stock("SKU-WIDGET", 10).await;
    let order = shop.checkout("customer-1", &[("SKU-WIDGET", 1, "1.00")]).await;
    shop.backend.publisher.set_online(false);

    let (stop, shutdown) = watch::channel(false);
    let runner = {
        let shop = Arc::clone(&shop);
        tokio::spawn(async move { shop.relay.run(Duration::from_millis(10), shutdown).await })
    };

    assert_eq!(shop.pay(order.id()).await, Disposition::Applied);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(shop.backend.publisher.is_empty());

    shop.backend.publisher.set_online(true);
    tokio::time::timeout(Duration::from_secs(5), async {
        while shop.backend.orders.pending_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("relay should drain the outbox");

    stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("relay should stop after shutdown")
        .unwrap();

    let reductions = shop
        .backend
        .publisher
        .on_topic(Topic::InventoryReductions);
    assert!(matches!(
        reductions.as_slice(),
        [OutboundMessage::InventoryReduction(event)] if event.order_id == *order.id()
    ));
}
