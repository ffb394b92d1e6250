use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ordercore::{
    CartError, CartLine, CartSnapshotProvider, CustomerId, Envelope, EventPublisher,
    OutboundMessage, PublishError, Topic,
};
use parking_lot::{Mutex, RwLock};

/// A publisher that keeps everything it is given.
///
/// Can be switched offline to simulate a broker outage; while offline every
/// publish fails with a transient error.
#[derive(Clone)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<(Topic, Envelope<OutboundMessage>)>>>,
    online: Arc<AtomicBool>,
}

impl RecordingPublisher {
    /// Creates an online publisher with nothing recorded.
    pub fn new() -> Self {
        Self {
            published: Arc::new(Mutex::new(Vec::new())),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulates the broker going down or coming back.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<(Topic, Envelope<OutboundMessage>)> {
        self.published.lock().clone()
    }

    /// Payloads published to `topic`, in order.
    pub fn on_topic(&self, topic: Topic) -> Vec<OutboundMessage> {
        self.published
            .lock()
            .iter()
            .filter(|(published_to, _)| *published_to == topic)
            .map(|(_, envelope)| envelope.payload.clone())
            .collect()
    }

    /// Number of messages published.
    pub fn len(&self) -> usize {
        self.published.lock().len()
    }

    /// Whether nothing has been published.
    pub fn is_empty(&self) -> bool {
        self.published.lock().is_empty()
    }
}

impl Default for RecordingPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(
        &self,
        topic: Topic,
        envelope: &Envelope<OutboundMessage>,
    ) -> Result<(), PublishError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("publisher offline".to_string()));
        }
        self.published.lock().push((topic, envelope.clone()));
        Ok(())
    }
}

/// Cart snapshots held in memory, standing in for the cart service.
#[derive(Clone, Default)]
pub struct InMemoryCarts {
    carts: Arc<RwLock<HashMap<CustomerId, Vec<CartLine>>>>,
}

impl InMemoryCarts {
    /// Creates a provider with no carts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cart of `customer_id`.
    pub fn put(&self, customer_id: CustomerId, lines: Vec<CartLine>) {
        let _ = self.carts.write().insert(customer_id, lines);
    }

    /// Drops the cart of `customer_id`.
    pub fn clear(&self, customer_id: &CustomerId) {
        let _ = self.carts.write().remove(customer_id);
    }
}

#[async_trait]
impl CartSnapshotProvider for InMemoryCarts {
    async fn snapshot(&self, customer_id: &CustomerId) -> Result<Vec<CartLine>, CartError> {
        self.carts
            .read()
            .get(customer_id)
            .cloned()
            .ok_or_else(|| CartError::NotFound(customer_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordercore::{Currency, Money, OrderItemEvent, OrderId, OrderItem, ProductKey, Quantity};
    use rust_decimal_macros::dec;

    fn reduction() -> OutboundMessage {
        let item = OrderItem::new(
            ProductKey::try_new("SKU-A").unwrap(),
            "Widget",
            Quantity::from(1),
            Money::new(dec!(3), Currency::try_new("EUR").unwrap()).unwrap(),
        )
        .unwrap();
        OutboundMessage::InventoryReduction(OrderItemEvent::stock_reduction(
            &OrderId::try_new("o-1").unwrap(),
            &item,
        ))
    }

    #[tokio::test]
    async fn test_offline_publisher_fails_transiently() {
        let publisher = RecordingPublisher::new();
        let message = reduction();
        let envelope = message.clone().into_envelope();

        publisher.set_online(false);
        let error = publisher
            .publish(message.topic(), &envelope)
            .await
            .unwrap_err();
        assert!(error.is_transient());
        assert!(publisher.is_empty());

        publisher.set_online(true);
        publisher.publish(message.topic(), &envelope).await.unwrap();
        assert_eq!(publisher.on_topic(Topic::InventoryReductions), vec![message]);
    }

    #[tokio::test]
    async fn test_missing_cart() {
        let carts = InMemoryCarts::new();
        let customer = CustomerId::try_new("c-1").unwrap();

        assert_eq!(
            carts.snapshot(&customer).await.unwrap_err(),
            CartError::NotFound(customer.clone())
        );
        carts.put(customer.clone(), Vec::new());
        assert!(carts.snapshot(&customer).await.unwrap().is_empty());
    }
}
