//! Shared wiring for the integration tests.

#![allow(dead_code)]

use std::str::FromStr;

use ordercore::{
    CartLine, ChoreographyCoordinator, CreateOrder, Currency, CustomerId, Disposition,
    FulfillmentStage, IdempotencyToken, InboundMessage, InventoryService, Money, Order,
    OrderCoreConfig, OrderId, OrderService, OutboundMessage, OutboxRelay, PaymentOutcome,
    ProductKey, Quantity, RetryConfig, Topic,
};
use ordercore_memory::InMemoryBackend;
use rust_decimal::Decimal;

/// Services, coordinator and relay over one in-memory backend.
pub struct Shop {
    pub backend: InMemoryBackend,
    pub orders: OrderService,
    pub inventory: InventoryService,
    pub coordinator: ChoreographyCoordinator,
    pub relay: OutboxRelay,
    /// Inventory reductions already handed to the coordinator
    delivered: std::sync::Mutex<usize>,
}

impl Shop {
    pub fn new() -> Self {
        Self::with_backend(InMemoryBackend::new())
    }

    pub fn with_backend(backend: InMemoryBackend) -> Self {
        let retry = fast_retry();
        let batch = OrderCoreConfig::default().outbox_batch_size;
        Self {
            orders: backend.order_service(retry),
            inventory: backend.inventory_service(),
            coordinator: backend.coordinator(retry),
            relay: backend.relay(batch, retry),
            backend,
            delivered: std::sync::Mutex::new(0),
        }
    }

    pub async fn stock(&self, sku: &str, quantity: u32) -> ProductKey {
        let product_key = sku_key(sku);
        self.inventory
            .register_product(None, &product_key, Quantity::from(quantity))
            .await
            .unwrap();
        product_key
    }

    pub async fn checkout(&self, customer: &str, lines: &[(&str, u32, &str)]) -> Order {
        let customer_id = CustomerId::try_new(customer).unwrap();
        self.backend.carts.put(
            customer_id.clone(),
            lines
                .iter()
                .map(|(sku, quantity, price)| cart_line(sku, *quantity, price))
                .collect(),
        );
        self.orders
            .create_order(CreateOrder {
                customer_id,
                idempotency_token: Some(IdempotencyToken::generate()),
            })
            .await
            .unwrap()
    }

    pub async fn pay(&self, order_id: &OrderId) -> Disposition {
        self.coordinator
            .handle(payment_succeeded(order_id))
            .await
            .unwrap()
    }

    pub async fn fulfil(&self, order_id: &OrderId, stage: FulfillmentStage) -> Disposition {
        self.coordinator
            .handle(InboundMessage::Fulfillment {
                order_id: order_id.clone(),
                stage,
            })
            .await
            .unwrap()
    }

    /// Relays the outbox and feeds every newly published stock reduction to
    /// the coordinator, as the inventory consumer would.
    pub async fn pump(&self) -> Vec<Disposition> {
        let _ = self.relay.relay_once().await.unwrap();
        let reductions = self.reductions();
        let fresh: Vec<_> = {
            let mut delivered = self.delivered.lock().unwrap();
            let fresh = reductions[*delivered..].to_vec();
            *delivered = reductions.len();
            fresh
        };

        let mut dispositions = Vec::with_capacity(fresh.len());
        for message in fresh {
            dispositions.push(self.coordinator.handle(message).await.unwrap());
        }
        dispositions
    }

    /// Every stock reduction published so far, as inbound messages.
    pub fn reductions(&self) -> Vec<InboundMessage> {
        self.backend
            .publisher
            .on_topic(Topic::InventoryReductions)
            .into_iter()
            .filter_map(|message| match message {
                OutboundMessage::InventoryReduction(event) => Some(InboundMessage::OrderItem(event)),
                OutboundMessage::Domain(_) => None,
            })
            .collect()
    }

    pub async fn available(&self, product_key: &ProductKey) -> Quantity {
        self.inventory.level(product_key).await.unwrap().available
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        base_delay: ordercore::RetryBaseDelayMs::try_new(10).unwrap(),
        ..RetryConfig::default()
    }
}

pub fn sku_key(sku: &str) -> ProductKey {
    ProductKey::try_new(sku).unwrap()
}

pub fn usd(amount: &str) -> Money {
    Money::new(
        Decimal::from_str(amount).unwrap(),
        Currency::try_new("USD").unwrap(),
    )
    .unwrap()
}

pub fn cart_line(sku: &str, quantity: u32, price: &str) -> CartLine {
    CartLine {
        product_key: sku_key(sku),
        name: format!("{sku} item"),
        quantity: Quantity::from(quantity),
        unit_price: usd(price),
    }
}

pub fn payment_succeeded(order_id: &OrderId) -> InboundMessage {
    InboundMessage::PaymentResult {
        order_id: order_id.clone(),
        payment_id: format!("pay-{order_id}"),
        outcome: PaymentOutcome::Succeeded,
    }
}

pub fn payment_failed(order_id: &OrderId, reason: &str) -> InboundMessage {
    InboundMessage::PaymentResult {
        order_id: order_id.clone(),
        payment_id: format!("pay-{order_id}"),
        outcome: PaymentOutcome::Failed {
            reason: reason.to_string(),
        },
    }
}
