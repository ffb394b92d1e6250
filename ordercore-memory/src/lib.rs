//! In-memory storage adapters for `OrderCore`.
//!
//! Every adapter is a cheap `Clone` handle over shared state, so one
//! instance can be handed to several services and inspected by tests
//! afterwards. Nothing here survives a restart.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

mod ledger;
mod orders;
mod stock;
mod transport;

use std::sync::Arc;

use ordercore::{
    ChoreographyCoordinator, InventoryService, OrderService, OutboxBatchSize, OutboxRelay,
    RetryConfig,
};

pub use ledger::{InMemoryIdempotencyLedger, InMemoryProcessedEventLedger};
pub use orders::InMemoryOrderStore;
pub use stock::InMemoryStockStore;
pub use transport::{InMemoryCarts, RecordingPublisher};

/// One of each adapter, wired together.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    /// Orders and outbox
    pub orders: InMemoryOrderStore,
    /// Idempotency claims
    pub claims: InMemoryIdempotencyLedger,
    /// Processed-event markers
    pub processed: InMemoryProcessedEventLedger,
    /// Stock rows
    pub stock: InMemoryStockStore,
    /// Cart snapshots
    pub carts: InMemoryCarts,
    /// Outbound transport
    pub publisher: RecordingPublisher,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Order service over this backend.
    pub fn order_service(&self, retry: RetryConfig) -> OrderService {
        OrderService::new(
            Arc::new(self.orders.clone()),
            Arc::new(self.claims.clone()),
            Arc::new(self.carts.clone()),
            retry,
        )
    }

    /// Inventory service over this backend.
    pub fn inventory_service(&self) -> InventoryService {
        InventoryService::new(Arc::new(self.claims.clone()), Arc::new(self.stock.clone()))
    }

    /// Choreography coordinator over this backend.
    pub fn coordinator(&self, retry: RetryConfig) -> ChoreographyCoordinator {
        ChoreographyCoordinator::new(
            Arc::new(self.orders.clone()),
            Arc::new(self.processed.clone()),
            Arc::new(self.stock.clone()),
            retry,
        )
    }

    /// Outbox relay publishing to the recording publisher.
    pub fn relay(&self, batch_size: OutboxBatchSize, retry: RetryConfig) -> OutboxRelay {
        OutboxRelay::new(
            Arc::new(self.orders.clone()),
            Arc::new(self.publisher.clone()),
            batch_size,
            retry,
        )
    }
}
