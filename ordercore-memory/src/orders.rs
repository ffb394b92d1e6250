use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use ordercore::{
    MessageId, Order, OrderId, OrderRepository, Outbox, OutboxEntry, OutboundMessage, StoreError,
    StoreResult,
};
use parking_lot::Mutex;
use tracing::debug;

#[derive(Default)]
struct OrderTables {
    orders: HashMap<OrderId, Order>,
    /// Unpublished entries in commit order; published ones are dropped.
    outbox: VecDeque<OutboxEntry>,
    committed: usize,
}

impl OrderTables {
    fn append(&mut self, messages: Vec<OutboundMessage>) {
        self.committed += messages.len();
        self.outbox
            .extend(messages.into_iter().map(OutboxEntry::new));
    }
}

/// Orders and their outbox in one shared table set.
///
/// An order write and its outbox rows are applied under the same lock,
/// mirroring the single transaction a database backend would use.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    tables: Arc<Mutex<OrderTables>>,
}

impl InMemoryOrderStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outbox entries ever committed, published or not.
    pub fn committed_count(&self) -> usize {
        self.tables.lock().committed
    }

    /// Number of outbox entries not yet marked published.
    pub fn pending_count(&self) -> usize {
        self.tables.lock().outbox.len()
    }

    /// Number of stored orders.
    pub fn order_count(&self) -> usize {
        self.tables.lock().orders.len()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderStore {
    async fn insert(&self, order: &Order, outbox: Vec<OutboundMessage>) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        if tables.orders.contains_key(order.id()) {
            return Err(StoreError::AlreadyExists(format!("order {}", order.id())));
        }

        let mut stored = order.clone();
        stored.mark_persisted(1);
        let _ = tables.orders.insert(order.id().clone(), stored);
        tables.append(outbox);
        debug!(order_id = %order.id(), "order inserted");
        Ok(1)
    }

    async fn load(&self, id: &OrderId) -> StoreResult<Option<Order>> {
        Ok(self.tables.lock().orders.get(id).cloned())
    }

    async fn save(
        &self,
        order: &Order,
        expected_version: u64,
        outbox: Vec<OutboundMessage>,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        let current = tables.orders.get(order.id()).map(Order::version);
        if current != Some(expected_version) {
            return Err(StoreError::VersionConflict {
                key: order.id().to_string(),
                expected: expected_version,
            });
        }

        let version = expected_version + 1;
        let mut stored = order.clone();
        stored.mark_persisted(version);
        let _ = tables.orders.insert(order.id().clone(), stored);
        tables.append(outbox);
        Ok(version)
    }
}

#[async_trait]
impl Outbox for InMemoryOrderStore {
    async fn pending(&self, limit: usize) -> StoreResult<Vec<OutboxEntry>> {
        Ok(self
            .tables
            .lock()
            .outbox
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, ids: &[MessageId]) -> StoreResult<()> {
        let mut remaining: HashSet<MessageId> = ids.iter().copied().collect();
        let mut tables = self.tables.lock();
        // The relay publishes from the front, so the common case pops a prefix.
        while let Some(front) = tables.outbox.front().map(OutboxEntry::id) {
            if !remaining.remove(&front) {
                break;
            }
            let _ = tables.outbox.pop_front();
        }
        if !remaining.is_empty() {
            tables
                .outbox
                .retain(|entry| !remaining.contains(&entry.id()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordercore::{CustomerId, OrderItem, OrderStatus, ProductKey, Quantity, Topic};
    use ordercore::{Currency, Money};
    use rust_decimal_macros::dec;

    fn placed() -> (Order, OutboundMessage) {
        let item = OrderItem::new(
            ProductKey::try_new("SKU-A").unwrap(),
            "Widget",
            Quantity::from(1),
            Money::new(dec!(10), Currency::try_new("USD").unwrap()).unwrap(),
        )
        .unwrap();
        let (order, event) = Order::place(
            OrderId::generate(),
            CustomerId::try_new("c-1").unwrap(),
            vec![item],
        )
        .unwrap();
        (order, OutboundMessage::Domain(event))
    }

    #[tokio::test]
    async fn test_insert_then_load() {
        let store = InMemoryOrderStore::new();
        let (order, event) = placed();

        assert_eq!(store.insert(&order, vec![event]).await.unwrap(), 1);
        let loaded = store.load(order.id()).await.unwrap().unwrap();
        assert_eq!(loaded.version(), 1);
        assert_eq!(loaded.items(), order.items());
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected() {
        let store = InMemoryOrderStore::new();
        let (order, event) = placed();
        store.insert(&order, vec![event.clone()]).await.unwrap();

        let error = store.insert(&order, vec![event]).await.unwrap_err();
        assert!(matches!(error, StoreError::AlreadyExists(_)));
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_save_commits_nothing() {
        let store = InMemoryOrderStore::new();
        let (order, event) = placed();
        store.insert(&order, vec![event]).await.unwrap();

        let mut first = store.load(order.id()).await.unwrap().unwrap();
        let mut second = first.clone();

        let paid = first.update_status(OrderStatus::Paid).unwrap();
        assert_eq!(
            store
                .save(&first, 1, vec![OutboundMessage::Domain(paid)])
                .await
                .unwrap(),
            2
        );

        let cancelled = second.update_status(OrderStatus::Cancelled).unwrap();
        let error = store
            .save(&second, 1, vec![OutboundMessage::Domain(cancelled)])
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::VersionConflict { expected: 1, .. }));

        let stored = store.load(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Paid);
        assert_eq!(store.committed_count(), 2);
    }

    #[tokio::test]
    async fn test_pending_respects_limit_and_marks() {
        let store = InMemoryOrderStore::new();
        for _ in 0..3 {
            let (order, event) = placed();
            store.insert(&order, vec![event]).await.unwrap();
        }

        let batch = store.pending(2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|entry| entry.topic == Topic::OrderEvents));

        let ids: Vec<_> = batch.iter().map(OutboxEntry::id).collect();
        store.mark_published(&ids).await.unwrap();
        assert_eq!(store.pending_count(), 1);
        assert_eq!(store.pending(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_published_entries_are_pruned() {
        let store = InMemoryOrderStore::new();
        for _ in 0..4 {
            let (order, event) = placed();
            store.insert(&order, vec![event]).await.unwrap();
        }
        let all: Vec<_> = store
            .pending(10)
            .await
            .unwrap()
            .iter()
            .map(OutboxEntry::id)
            .collect();

        // Out of order and repeated acknowledgements are fine.
        store.mark_published(&[all[2], all[0]]).await.unwrap();
        store.mark_published(&[all[0]]).await.unwrap();
        let left: Vec<_> = store
            .pending(10)
            .await
            .unwrap()
            .iter()
            .map(OutboxEntry::id)
            .collect();
        assert_eq!(left, vec![all[1], all[3]]);

        store.mark_published(&left).await.unwrap();
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.committed_count(), 4);
        assert!(store.tables.lock().outbox.is_empty());
    }
}
