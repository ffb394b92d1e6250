use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ordercore::{
    CartLine, ChoreographyCoordinator, CoordinatorError, CreateOrder, Currency, CustomerId,
    Disposition, FulfillmentStage, IdempotencyToken, InboundMessage, InventoryService, Money,
    Order, OrderCoreConfig, OrderId, OrderService, OrderStatus, OutboundMessage, OutboxRelay,
    PartitionedExecutor, PaymentOutcome, ProductKey, Quantity, Topic,
};
use ordercore_memory::InMemoryBackend;
use rust_decimal_macros::dec;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

type Consumer = PartitionedExecutor<InboundMessage, Result<Disposition, CoordinatorError>>;

/// What the walkthrough observed, for callers that want to check it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkthroughSummary {
    /// The order that was placed
    pub order_id: OrderId,
    /// Its final status
    pub final_status: OrderStatus,
    /// Its final version
    pub final_version: u64,
    /// Stock left per product after the order
    pub remaining_stock: Vec<(ProductKey, Quantity)>,
    /// Messages published by the relay
    pub published: usize,
    /// Redelivered messages that were recognized as duplicates
    pub duplicates_ignored: usize,
}

/// A small shop: services over one in-memory backend, a background relay
/// and a keyed consumer for inbound messages.
pub struct Storefront {
    backend: InMemoryBackend,
    orders: OrderService,
    inventory: InventoryService,
    consumer: Consumer,
    relay_stop: watch::Sender<bool>,
    relay_task: JoinHandle<()>,
    consumed: usize,
}

impl Storefront {
    /// Wires everything up and starts the relay on the current runtime.
    pub fn open(config: &OrderCoreConfig) -> Self {
        let backend = InMemoryBackend::new();
        let coordinator: ChoreographyCoordinator = backend.coordinator(config.retry);
        let consumer = PartitionedExecutor::spawn(
            config.workers,
            config.queue_capacity,
            move |message: InboundMessage| {
                let coordinator = coordinator.clone();
                async move { coordinator.handle(message).await }
            },
        );

        let relay: OutboxRelay = backend.relay(config.outbox_batch_size, config.retry);
        let (relay_stop, shutdown) = watch::channel(false);
        let relay_task =
            tokio::spawn(async move { relay.run(Duration::from_millis(20), shutdown).await });

        Self {
            orders: backend.order_service(config.retry),
            inventory: backend.inventory_service(),
            backend,
            consumer,
            relay_stop,
            relay_task,
            consumed: 0,
        }
    }

    /// Registers products with their opening stock.
    pub async fn stock_catalog(&self, catalog: &[(&str, u32)]) -> Result<()> {
        for (sku, quantity) in catalog {
            let product_key = ProductKey::try_new(*sku)?;
            let token = IdempotencyToken::try_new(format!("register-{sku}"))?;
            let registration = self
                .inventory
                .register_product(Some(token), &product_key, Quantity::from(*quantity))
                .await?;
            info!(%product_key, available = %registration.level().available, "product stocked");
        }
        Ok(())
    }

    /// Fills the customer's cart and checks it out with `token`.
    pub async fn checkout(
        &self,
        customer_id: &CustomerId,
        lines: Vec<CartLine>,
        token: &IdempotencyToken,
    ) -> Result<Order> {
        self.backend.carts.put(customer_id.clone(), lines);
        let order = self
            .orders
            .create_order(CreateOrder {
                customer_id: customer_id.clone(),
                idempotency_token: Some(token.clone()),
            })
            .await?;
        Ok(order)
    }

    /// Delivers one inbound message through the keyed consumer.
    pub async fn deliver(&self, message: InboundMessage) -> Result<Disposition> {
        let key = message.order_id().to_string();
        let disposition = self.consumer.submit(&key, message).await??;
        Ok(disposition)
    }

    /// Waits until the relay has drained the outbox, then hands every newly
    /// published stock reduction to the consumer.
    pub async fn consume_published(&mut self) -> Result<Vec<Disposition>> {
        self.await_relay().await?;
        let reductions: Vec<_> = self
            .backend
            .publisher
            .on_topic(Topic::InventoryReductions)
            .into_iter()
            .skip(self.consumed)
            .collect();
        self.consumed += reductions.len();

        let mut dispositions = Vec::with_capacity(reductions.len());
        for message in reductions {
            if let OutboundMessage::InventoryReduction(event) = message {
                dispositions.push(self.deliver(InboundMessage::OrderItem(event)).await?);
            }
        }
        Ok(dispositions)
    }

    /// Every stock reduction published so far, redelivered.
    pub async fn redeliver_reductions(&self) -> Result<Vec<Disposition>> {
        let mut dispositions = Vec::new();
        for message in self.backend.publisher.on_topic(Topic::InventoryReductions) {
            if let OutboundMessage::InventoryReduction(event) = message {
                dispositions.push(self.deliver(InboundMessage::OrderItem(event)).await?);
            }
        }
        Ok(dispositions)
    }

    /// Current stock of `product_key`.
    pub async fn available(&self, product_key: &ProductKey) -> Result<Quantity> {
        Ok(self.inventory.level(product_key).await?.available)
    }

    /// The order service, for direct queries.
    pub fn orders(&self) -> &OrderService {
        &self.orders
    }

    /// Messages published so far.
    pub fn published(&self) -> usize {
        self.backend.publisher.len()
    }

    /// Stops the relay and the consumer, draining queued work.
    pub async fn close(self) -> Result<()> {
        self.await_relay().await?;
        let _ = self.relay_stop.send(true);
        self.relay_task.await.context("relay task failed")?;
        self.consumer.shutdown().await;
        Ok(())
    }

    async fn await_relay(&self) -> Result<()> {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.backend.orders.pending_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .context("outbox was not drained in time")
    }
}

fn usd(amount: rust_decimal::Decimal) -> Result<Money> {
    Ok(Money::new(amount, Currency::try_new("USD")?)?)
}

/// Runs one customer from cart to delivery, redelivering every message
/// along the way to show that duplicates change nothing.
pub async fn run_walkthrough(config: &OrderCoreConfig) -> Result<WalkthroughSummary> {
    let mut shop = Storefront::open(config);
    shop.stock_catalog(&[("SKU-KETTLE", 12), ("SKU-MUG", 40)])
        .await?;

    let customer = CustomerId::try_new("customer-ada")?;
    let token = IdempotencyToken::try_new("checkout-ada-0001")?;
    let lines = vec![
        CartLine {
            product_key: ProductKey::try_new("SKU-KETTLE")?,
            name: "Stovetop kettle".to_string(),
            quantity: Quantity::from(1),
            unit_price: usd(dec!(34.90))?,
        },
        CartLine {
            product_key: ProductKey::try_new("SKU-MUG")?,
            name: "Enamel mug".to_string(),
            quantity: Quantity::from(4),
            unit_price: usd(dec!(7.25))?,
        },
    ];

    let order = shop.checkout(&customer, lines.clone(), &token).await?;
    info!(order_id = %order.id(), total = ?order.total(), "order placed");

    // The client times out and retries with the same token.
    let replay = shop.checkout(&customer, lines, &token).await?;
    if replay.id() != order.id() {
        bail!("replayed checkout produced a second order");
    }

    let payment = InboundMessage::PaymentResult {
        order_id: order.id().clone(),
        payment_id: "pay-7781".to_string(),
        outcome: PaymentOutcome::Succeeded,
    };
    let mut duplicates_ignored = 0;
    for disposition in [
        shop.deliver(payment.clone()).await?,
        shop.deliver(payment).await?,
    ] {
        if disposition == Disposition::Duplicate {
            duplicates_ignored += 1;
        }
    }

    for disposition in shop.consume_published().await? {
        if let Disposition::StockRejected(reason) = disposition {
            warn!(?reason, "stock could not be reduced");
        }
    }
    duplicates_ignored += shop
        .redeliver_reductions()
        .await?
        .into_iter()
        .filter(|d| *d == Disposition::Duplicate)
        .count();

    for stage in [FulfillmentStage::Shipped, FulfillmentStage::Delivered] {
        let message = InboundMessage::Fulfillment {
            order_id: order.id().clone(),
            stage,
        };
        let _ = shop.deliver(message.clone()).await?;
        if shop.deliver(message).await? == Disposition::Duplicate {
            duplicates_ignored += 1;
        }
    }

    let stored = shop.orders().get_order(order.id()).await?;
    let mut remaining_stock = Vec::new();
    for sku in ["SKU-KETTLE", "SKU-MUG"] {
        let product_key = ProductKey::try_new(sku)?;
        let available = shop.available(&product_key).await?;
        remaining_stock.push((product_key, available));
    }
    shop.await_relay().await?;
    let published = shop.published();
    shop.close().await?;

    Ok(WalkthroughSummary {
        order_id: stored.id().clone(),
        final_status: stored.status(),
        final_version: stored.version(),
        remaining_stock,
        published,
        duplicates_ignored,
    })
}
