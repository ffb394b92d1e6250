//! `OrderCore` - order lifecycle with idempotent, at-least-once event
//! choreography.
//!
//! Exactly-once effects over an at-least-once transport come from four
//! pieces working together:
//!
//! - the [`order::Order`] state machine, which rejects illegal transitions;
//! - the [`ledger::IdempotencyLedger`], which deduplicates creation requests;
//! - the [`ledger::ProcessedEventLedger`], which deduplicates stock-reduction
//!   instructions per `order:product` key;
//! - the [`stock::StockAdjuster`], whose conditional decrement is the only
//!   way stock goes down.
//!
//! The [`coordinator::ChoreographyCoordinator`] wires them to inbound
//! messages, [`service`] exposes the request-facing operations and
//! [`partition::PartitionedExecutor`] serializes work per order. Storage
//! backends live in `ordercore-memory` and `ordercore-postgres`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod ledger;
pub mod messaging;
pub mod money;
pub mod order;
pub mod partition;
pub mod repository;
pub mod retry;
pub mod service;
pub mod stock;
pub mod telemetry;
pub mod types;

pub use config::{
    BackoffMultiplier, ConfigError, MaxRetryAttempts, OrderCoreConfig, OutboxBatchSize,
    QueueCapacity, RetryBaseDelayMs, RetryMaxDelayMs, WorkerCount,
};
pub use coordinator::{ChoreographyCoordinator, Disposition};
pub use errors::{
    CartError, CoordinatorError, MoneyError, OrderError, PublishError, ServiceError, StockError,
    StoreError, StoreResult,
};
pub use ledger::{
    ClaimOutcome, IdempotencyClaim, IdempotencyLedger, MarkOutcome, ProcessedEventLedger,
    ProcessedEventMarker,
};
pub use messaging::{
    Envelope, EventPublisher, FulfillmentStage, InboundMessage, MessageId, OrderItemEvent,
    OrderItemEventTag, OutboundMessage, PaymentOutcome, Topic,
};
pub use money::{Currency, Money, Quantity};
pub use order::{Order, OrderEvent, OrderItem, OrderStatus, PersistedOrder};
pub use partition::{ExecutorError, PartitionedExecutor};
pub use repository::{Outbox, OutboxEntry, OutboxRelay, OrderRepository, RelayReport};
pub use retry::{RetryConfig, RetryPolicy};
pub use service::{
    CartLine, CartSnapshotProvider, CreateOrder, InventoryService, OrderService, Registration,
};
pub use stock::{reduce_and_classify, StockAdjuster, StockLevel, StockReduction};
pub use types::{
    CustomerId, IdempotencyToken, OrderId, ProcessedEventKey, ProductKey, ResourceKey, Timestamp,
};
