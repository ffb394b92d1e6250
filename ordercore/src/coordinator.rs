//! Event choreography: turns inbound payment, fulfillment and order-item
//! messages into aggregate transitions, stock reductions and outbound
//! messages.
//!
//! Delivery is at-least-once, so every handler is safe to run repeatedly
//! for the same message:
//!
//! - status messages are no-ops once the order has reached the requested
//!   status (checked against the stored order, under the repository's
//!   optimistic version check);
//! - stock reductions go through the processed-event ledger before touching
//!   stock, and the decrement itself is a single conditional update.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::errors::{CoordinatorError, OrderError, StoreError};
use crate::ledger::ProcessedEventLedger;
use crate::messaging::{
    FulfillmentStage, InboundMessage, OrderItemEvent, OutboundMessage, PaymentOutcome,
};
use crate::order::{Order, OrderStatus};
use crate::repository::OrderRepository;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::stock::{reduce_and_classify, StockAdjuster, StockReduction};
use crate::types::OrderId;

/// What a handler did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The effect was applied.
    Applied,
    /// The message had already been handled; nothing changed.
    Duplicate,
    /// The message needs no handling here.
    Ignored,
    /// Stock could not be reduced. The processed marker stays, so
    /// redelivery will not retry; the outcome is terminal.
    StockRejected(StockReduction),
}

/// Drives orders and stock from inbound messages.
#[derive(Clone)]
pub struct ChoreographyCoordinator {
    orders: Arc<dyn OrderRepository>,
    processed: Arc<dyn ProcessedEventLedger>,
    stock: Arc<dyn StockAdjuster>,
    retry: RetryConfig,
    policy: RetryPolicy,
}

impl ChoreographyCoordinator {
    /// Creates a coordinator with the default retry policy.
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        processed: Arc<dyn ProcessedEventLedger>,
        stock: Arc<dyn StockAdjuster>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            orders,
            processed,
            stock,
            retry,
            policy: RetryPolicy::default(),
        }
    }

    /// Overrides which storage failures are retried on order writes.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Dispatches any inbound message.
    #[instrument(
        name = "coordinator.handle",
        skip(self, message),
        fields(kind = message.kind(), order_id = %message.order_id())
    )]
    pub async fn handle(&self, message: InboundMessage) -> Result<Disposition, CoordinatorError> {
        match message {
            InboundMessage::PaymentResult {
                order_id,
                payment_id,
                outcome,
            } => {
                self.handle_payment_result(&order_id, &payment_id, &outcome)
                    .await
            }
            InboundMessage::Fulfillment { order_id, stage } => {
                self.handle_fulfillment(&order_id, stage).await
            }
            InboundMessage::OrderItem(event) => self.handle_order_item(&event).await,
        }
    }

    /// Payment success moves the order to `PAID` and emits one stock
    /// reduction per line; failure cancels it.
    pub async fn handle_payment_result(
        &self,
        order_id: &OrderId,
        payment_id: &str,
        outcome: &PaymentOutcome,
    ) -> Result<Disposition, CoordinatorError> {
        let target = match outcome {
            PaymentOutcome::Succeeded => OrderStatus::Paid,
            PaymentOutcome::Failed { reason } => {
                info!(%order_id, payment_id, %reason, "[coordinator.payment] payment failed");
                OrderStatus::Cancelled
            }
        };
        self.transition(order_id, target).await
    }

    /// Moves the order along the fulfillment path.
    pub async fn handle_fulfillment(
        &self,
        order_id: &OrderId,
        stage: FulfillmentStage,
    ) -> Result<Disposition, CoordinatorError> {
        self.transition(order_id, stage.target_status()).await
    }

    /// Applies a stock-reduction instruction at most once per key.
    ///
    /// Events not tagged as stock reductions are ignored without touching
    /// the ledger.
    pub async fn handle_order_item(
        &self,
        event: &OrderItemEvent,
    ) -> Result<Disposition, CoordinatorError> {
        if !event.is_stock_reduction() {
            return Ok(Disposition::Ignored);
        }
        if !event.quantity.is_positive() {
            return Err(OrderError::NonPositiveQuantity {
                product_key: event.product_key.clone(),
                quantity: event.quantity.value(),
            }
            .into());
        }

        let mark = self.processed.mark_processed(&event.key).await?;
        if !mark.should_proceed() {
            info!(key = %event.key, "[coordinator.stock] duplicate stock reduction skipped");
            return Ok(Disposition::Duplicate);
        }

        let reduction = reduce_and_classify(self.stock.as_ref(), &event.product_key, event.quantity)
            .await
            .inspect_err(|e| {
                error!(
                    key = %event.key,
                    error = %e,
                    "[coordinator.stock] marked as processed but stock reduction failed"
                );
            })?;

        if reduction.is_reduced() {
            info!(
                key = %event.key,
                product_key = %event.product_key,
                quantity = %event.quantity,
                "[coordinator.stock] stock reduced"
            );
            Ok(Disposition::Applied)
        } else {
            warn!(key = %event.key, outcome = ?reduction, "[coordinator.stock] stock reduction rejected");
            Ok(Disposition::StockRejected(reduction))
        }
    }

    async fn transition(
        &self,
        order_id: &OrderId,
        target: OrderStatus,
    ) -> Result<Disposition, CoordinatorError> {
        let attempts = self.retry.attempts();
        let mut attempt = 0;

        loop {
            let mut order = self
                .orders
                .load(order_id)
                .await?
                .ok_or_else(|| CoordinatorError::OrderNotFound(order_id.clone()))?;

            if has_reached(order.status(), target) {
                info!(
                    %order_id,
                    status = %order.status(),
                    requested = %target,
                    "[coordinator.order] status already reached, duplicate ignored"
                );
                return Ok(Disposition::Duplicate);
            }

            let expected_version = order.version();
            let event = order.update_status(target)?;
            let outbox = outbound_for(&order, OutboundMessage::Domain(event));

            match self.orders.save(&order, expected_version, outbox).await {
                Ok(version) => {
                    info!(
                        %order_id,
                        status = %target,
                        version,
                        "[coordinator.order] status changed"
                    );
                    return Ok(Disposition::Applied);
                }
                Err(error) if self.policy.should_retry(&error) && attempt + 1 < attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        %order_id,
                        attempt,
                        ?delay,
                        error = %error,
                        "[coordinator.order] write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(StoreError::VersionConflict { .. }) => {
                    return Err(CoordinatorError::ConcurrencyExhausted {
                        order_id: order_id.clone(),
                        attempts: attempt + 1,
                    });
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}

/// Whether an order at `current` has already passed through `target` on
/// the fulfillment path.
fn has_reached(current: OrderStatus, target: OrderStatus) -> bool {
    if current == target {
        return true;
    }
    match (fulfillment_rank(current), fulfillment_rank(target)) {
        (Some(current), Some(target)) => current > target,
        _ => false,
    }
}

const fn fulfillment_rank(status: OrderStatus) -> Option<u8> {
    match status {
        OrderStatus::Created => Some(0),
        OrderStatus::Paid => Some(1),
        OrderStatus::Shipped => Some(2),
        OrderStatus::Delivered => Some(3),
        OrderStatus::Cancelled => None,
    }
}

/// Outbox messages for a status change: the domain event, plus one stock
/// reduction per line when the order has just been paid.
fn outbound_for(order: &Order, domain: OutboundMessage) -> Vec<OutboundMessage> {
    let mut outbox = vec![domain];
    if order.status() == OrderStatus::Paid {
        outbox.extend(order.items().iter().map(|item| {
            OutboundMessage::InventoryReduction(OrderItemEvent::stock_reduction(order.id(), item))
        }));
    }
    outbox
}
