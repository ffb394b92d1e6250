//! Application services for the order and inventory sides.
//!
//! These sit where a REST layer would call in. They own the idempotent
//! creation flow, customer-facing order mutations and stock operations;
//! transport and HTTP concerns stay outside.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::errors::{CartError, OrderError, ServiceError, StoreError};
use crate::ledger::{ClaimOutcome, IdempotencyLedger};
use crate::messaging::OutboundMessage;
use crate::money::{Money, Quantity};
use crate::order::{Order, OrderEvent, OrderItem, OrderStatus};
use crate::repository::OrderRepository;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::stock::{reduce_and_classify, StockAdjuster, StockLevel, StockReduction};
use crate::types::{CustomerId, IdempotencyToken, OrderId, ProductKey, ResourceKey};

/// One line of a customer's cart, priced at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Product key
    pub product_key: ProductKey,
    /// Display name
    pub name: String,
    /// Requested quantity
    pub quantity: Quantity,
    /// Current unit price
    pub unit_price: Money,
}

/// The external cart service. The snapshot is copied into the order as is;
/// catalog existence is not re-checked.
#[async_trait]
pub trait CartSnapshotProvider: Send + Sync {
    /// Current cart contents for `customer_id`.
    async fn snapshot(&self, customer_id: &CustomerId) -> Result<Vec<CartLine>, CartError>;
}

/// Input of [`OrderService::create_order`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    /// Customer checking out
    pub customer_id: CustomerId,
    /// Deduplicates retried requests; generated when absent
    pub idempotency_token: Option<IdempotencyToken>,
}

/// Order-side application service.
pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    ledger: Arc<dyn IdempotencyLedger>,
    carts: Arc<dyn CartSnapshotProvider>,
    retry: RetryConfig,
}

impl OrderService {
    /// Creates the service.
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        ledger: Arc<dyn IdempotencyLedger>,
        carts: Arc<dyn CartSnapshotProvider>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            orders,
            ledger,
            carts,
            retry,
        }
    }

    /// Checks out the customer's cart, at most once per idempotency token.
    ///
    /// A replayed token returns the order created by the first request. A
    /// token already used for another customer's checkout is a conflict.
    #[instrument(name = "orders.create", skip(self, request), fields(customer_id = %request.customer_id))]
    pub async fn create_order(&self, request: CreateOrder) -> Result<Order, ServiceError> {
        let token = request
            .idempotency_token
            .unwrap_or_else(IdempotencyToken::generate);
        let resource = ResourceKey::for_checkout(&request.customer_id);
        let order_id = OrderId::for_token(&token);

        match self.ledger.claim(&token, &resource).await? {
            ClaimOutcome::Claimed => self.place(order_id, request.customer_id).await,
            ClaimOutcome::Replay => {
                if let Some(order) = self.orders.load(&order_id).await? {
                    info!(%token, %order_id, "[orders.create] replayed request");
                    return Ok(order);
                }
                // Claimed earlier, but the order was never stored.
                warn!(%token, %order_id, "[orders.create] claim without order, placing again");
                self.place(order_id, request.customer_id).await
            }
            ClaimOutcome::Conflict { existing } => {
                Err(ServiceError::IdempotencyConflict { token, existing })
            }
        }
    }

    /// Loads an order.
    pub async fn get_order(&self, order_id: &OrderId) -> Result<Order, ServiceError> {
        self.orders
            .load(order_id)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.clone()))
    }

    /// Adds a line to an open order.
    pub async fn add_item(
        &self,
        order_id: &OrderId,
        product_key: ProductKey,
        name: String,
        quantity: Quantity,
        unit_price: Money,
    ) -> Result<Order, ServiceError> {
        self.mutate(order_id, |order| {
            order
                .add_item(product_key.clone(), name.clone(), quantity, unit_price.clone())
                .map(Some)
        })
        .await
    }

    /// Changes a line's quantity. Unknown products are a no-op.
    pub async fn update_item_quantity(
        &self,
        order_id: &OrderId,
        product_key: &ProductKey,
        quantity: Quantity,
    ) -> Result<Order, ServiceError> {
        self.mutate(order_id, |order| {
            order.update_item_quantity(product_key, quantity)
        })
        .await
    }

    /// Removes a line. Unknown products are a no-op.
    pub async fn remove_item(
        &self,
        order_id: &OrderId,
        product_key: &ProductKey,
    ) -> Result<Order, ServiceError> {
        self.mutate(order_id, |order| order.remove_item(product_key))
            .await
    }

    /// Cancels an order on the customer's behalf.
    pub async fn cancel_order(&self, order_id: &OrderId) -> Result<Order, ServiceError> {
        self.mutate(order_id, |order| {
            order.update_status(OrderStatus::Cancelled).map(Some)
        })
        .await
    }

    async fn place(&self, order_id: OrderId, customer_id: CustomerId) -> Result<Order, ServiceError> {
        let lines = self.carts.snapshot(&customer_id).await?;
        let items = lines
            .into_iter()
            .map(|line| OrderItem::new(line.product_key, line.name, line.quantity, line.unit_price))
            .collect::<Result<Vec<_>, OrderError>>()?;

        let (mut order, event) = Order::place(order_id, customer_id, items)?;
        match self
            .orders
            .insert(&order, vec![OutboundMessage::Domain(event)])
            .await
        {
            Ok(version) => {
                order.mark_persisted(version);
                info!(
                    order_id = %order.id(),
                    items = order.items().len(),
                    "[orders.create] order placed"
                );
                Ok(order)
            }
            // A concurrent replay of the same token got there first.
            Err(StoreError::AlreadyExists(_)) => self.get_order(order.id()).await,
            Err(error) => Err(error.into()),
        }
    }

    /// Load, mutate, save with optimistic retries. `change` may run more
    /// than once and must not have side effects.
    async fn mutate<F>(&self, order_id: &OrderId, mut change: F) -> Result<Order, ServiceError>
    where
        F: FnMut(&mut Order) -> Result<Option<OrderEvent>, OrderError> + Send,
    {
        let policy = RetryPolicy::ConcurrencyAndTransient;
        let attempts = self.retry.attempts();
        let mut attempt = 0;

        loop {
            let mut order = self.get_order(order_id).await?;
            let expected_version = order.version();
            let Some(event) = change(&mut order)? else {
                return Ok(order);
            };

            match self
                .orders
                .save(&order, expected_version, vec![OutboundMessage::Domain(event)])
                .await
            {
                Ok(version) => {
                    order.mark_persisted(version);
                    return Ok(order);
                }
                Err(error) if policy.should_retry(&error) && attempt + 1 < attempts => {
                    tokio::time::sleep(self.retry.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}

/// Result of [`InventoryService::register_product`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The stock row was created by this call.
    Registered(StockLevel),
    /// The token was seen before; stock was not touched.
    Replayed(StockLevel),
}

impl Registration {
    /// The stock level, whichever way it was obtained.
    pub const fn level(&self) -> &StockLevel {
        match self {
            Self::Registered(level) | Self::Replayed(level) => level,
        }
    }
}

/// Inventory-side application service.
pub struct InventoryService {
    ledger: Arc<dyn IdempotencyLedger>,
    stock: Arc<dyn StockAdjuster>,
}

impl InventoryService {
    /// Creates the service.
    pub fn new(ledger: Arc<dyn IdempotencyLedger>, stock: Arc<dyn StockAdjuster>) -> Self {
        Self { ledger, stock }
    }

    /// Registers a product with initial stock, at most once per token.
    #[instrument(name = "inventory.register", skip_all, fields(%product_key))]
    pub async fn register_product(
        &self,
        token: Option<IdempotencyToken>,
        product_key: &ProductKey,
        initial: Quantity,
    ) -> Result<Registration, ServiceError> {
        let token = token.unwrap_or_else(IdempotencyToken::generate);
        let resource = ResourceKey::for_product(product_key);

        match self.ledger.claim(&token, &resource).await? {
            ClaimOutcome::Claimed => {
                if !self.stock.register(product_key, initial).await? {
                    return Err(StoreError::AlreadyExists(format!("product {product_key}")).into());
                }
                info!(%product_key, %initial, "[inventory.register] product registered");
                Ok(Registration::Registered(self.level(product_key).await?))
            }
            ClaimOutcome::Replay => {
                // Finish a registration whose stock row was never written.
                self.stock.register(product_key, initial).await?;
                Ok(Registration::Replayed(self.level(product_key).await?))
            }
            ClaimOutcome::Conflict { existing } => {
                Err(ServiceError::IdempotencyConflict { token, existing })
            }
        }
    }

    /// Adds stock to an existing product.
    pub async fn restock(
        &self,
        product_key: &ProductKey,
        quantity: Quantity,
    ) -> Result<StockLevel, ServiceError> {
        Ok(self.stock.increase(product_key, quantity).await?)
    }

    /// Removes stock synchronously, reporting why when it cannot.
    pub async fn reduce(
        &self,
        product_key: &ProductKey,
        quantity: Quantity,
    ) -> Result<(), ServiceError> {
        match reduce_and_classify(self.stock.as_ref(), product_key, quantity).await? {
            StockReduction::Reduced => Ok(()),
            StockReduction::Insufficient { available } => Err(ServiceError::InsufficientStock {
                product_key: product_key.clone(),
                requested: quantity.value(),
                available: available.value(),
            }),
            StockReduction::ProductNotFound => {
                Err(ServiceError::ProductNotFound(product_key.clone()))
            }
        }
    }

    /// Snapshot of a product's stock.
    pub async fn level(&self, product_key: &ProductKey) -> Result<StockLevel, ServiceError> {
        self.stock
            .level(product_key)
            .await?
            .ok_or_else(|| ServiceError::ProductNotFound(product_key.clone()))
    }
}
