//! Messages exchanged with the transport, and the publisher port.
//!
//! The transport is at-least-once with best-effort ordering per partition
//! key. Every message here is keyed by its order id so that messages about
//! one order land on one partition.

use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::PublishError;
use crate::money::Quantity;
use crate::order::{OrderEvent, OrderItem, OrderStatus};
use crate::types::{OrderId, ProcessedEventKey, ProductKey};

/// Unique id of a transport message (UUIDv7).
#[nutype(
    validate(predicate = |id: &Uuid| id.get_version() == Some(uuid::Version::SortRand)),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct MessageId(Uuid);

impl MessageId {
    /// A fresh, time-ordered id.
    pub fn new() -> Self {
        Self::try_new(Uuid::now_v7()).expect("now_v7 always yields a v7 UUID")
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

/// Logical channels on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    /// Payment results, consumed by the order side
    Payments,
    /// Shipping and delivery updates
    Fulfillment,
    /// Per-line stock reduction instructions
    InventoryReductions,
    /// Order domain events
    OrderEvents,
}

impl Topic {
    /// Wire name of the topic.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Payments => "payments",
            Self::Fulfillment => "fulfillment",
            Self::InventoryReductions => "inventory-reductions",
            Self::OrderEvents => "order-events",
        }
    }
}

impl Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = PublishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Payments,
            Self::Fulfillment,
            Self::InventoryReductions,
            Self::OrderEvents,
        ]
        .into_iter()
        .find(|topic| topic.as_str() == s)
        .ok_or_else(|| PublishError::Rejected(format!("unknown topic {s}")))
    }
}

/// A payload with its transport metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Unique per published copy
    pub message_id: MessageId,
    /// Messages sharing a key are delivered in order
    pub partition_key: String,
    /// The message itself
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wraps `payload` with a fresh message id.
    pub fn new(partition_key: impl Into<String>, payload: T) -> Self {
        Self {
            message_id: MessageId::new(),
            partition_key: partition_key.into(),
            payload,
        }
    }
}

/// Result reported by the payment service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// The payment was captured
    Succeeded,
    /// The payment was declined or failed
    Failed {
        /// Human-readable reason
        reason: String,
    },
}

/// Fulfillment milestones reported by the shipping side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStage {
    /// Handed to the carrier
    Shipped,
    /// Received by the customer
    Delivered,
}

impl FulfillmentStage {
    /// The order status this milestone moves the order to.
    pub const fn target_status(self) -> OrderStatus {
        match self {
            Self::Shipped => OrderStatus::Shipped,
            Self::Delivered => OrderStatus::Delivered,
        }
    }
}

/// Distinguishes stock-reduction instructions from ordinary item updates
/// that travel on the same channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderItemEventTag {
    /// Decrement stock for this line
    StockReduction,
    /// Informational; never touches stock
    OrderUpdated,
}

/// A per-line message about an order item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemEvent {
    /// The order
    pub order_id: OrderId,
    /// The line's product
    pub product_key: ProductKey,
    /// The line's quantity
    pub quantity: Quantity,
    /// What the consumer should do with it
    pub tag: OrderItemEventTag,
    /// Dedup key, `orderId:productKey`
    pub key: ProcessedEventKey,
}

impl OrderItemEvent {
    /// The stock-reduction instruction for one line of a paid order.
    pub fn stock_reduction(order_id: &OrderId, item: &OrderItem) -> Self {
        Self {
            order_id: order_id.clone(),
            product_key: item.product_key().clone(),
            quantity: item.quantity(),
            tag: OrderItemEventTag::StockReduction,
            key: ProcessedEventKey::for_line(order_id, item.product_key()),
        }
    }

    /// Whether the consumer should act on this event at all.
    pub fn is_stock_reduction(&self) -> bool {
        self.tag == OrderItemEventTag::StockReduction
    }
}

/// Everything the choreography consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundMessage {
    /// From the payment service
    PaymentResult {
        /// The order being paid
        order_id: OrderId,
        /// Payment-side reference
        payment_id: String,
        /// Success or failure
        outcome: PaymentOutcome,
    },
    /// From the shipping side
    Fulfillment {
        /// The order being fulfilled
        order_id: OrderId,
        /// Milestone reached
        stage: FulfillmentStage,
    },
    /// Per-line instruction, consumed by the inventory side
    OrderItem(OrderItemEvent),
}

impl InboundMessage {
    /// The order this message concerns.
    pub const fn order_id(&self) -> &OrderId {
        match self {
            Self::PaymentResult { order_id, .. } | Self::Fulfillment { order_id, .. } => order_id,
            Self::OrderItem(event) => &event.order_id,
        }
    }

    /// Short name for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PaymentResult { .. } => "payment_result",
            Self::Fulfillment { .. } => "fulfillment",
            Self::OrderItem(_) => "order_item",
        }
    }
}

/// Everything the order side emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// An order domain event
    Domain(OrderEvent),
    /// A stock-reduction instruction
    InventoryReduction(OrderItemEvent),
}

impl OutboundMessage {
    /// Topic the message is published on.
    pub const fn topic(&self) -> Topic {
        match self {
            Self::Domain(_) => Topic::OrderEvents,
            Self::InventoryReduction(_) => Topic::InventoryReductions,
        }
    }

    /// The order the message concerns.
    pub const fn order_id(&self) -> &OrderId {
        match self {
            Self::Domain(event) => event.order_id(),
            Self::InventoryReduction(event) => &event.order_id,
        }
    }

    /// Wraps the message in an envelope keyed by its order.
    pub fn into_envelope(self) -> Envelope<Self> {
        Envelope::new(self.order_id().to_string(), self)
    }
}

/// Transport port for outbound messages.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one message. Publishing the same envelope twice is allowed;
    /// consumers deduplicate.
    async fn publish(
        &self,
        topic: Topic,
        envelope: &Envelope<OutboundMessage>,
    ) -> Result<(), PublishError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::{Currency, Money};
    use rust_decimal_macros::dec;

    fn item() -> OrderItem {
        OrderItem::new(
            ProductKey::try_new("SKU-1").unwrap(),
            "Widget",
            Quantity::from(2),
            Money::new(dec!(10), Currency::try_new("USD").unwrap()).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn stock_reduction_carries_line_key() {
        let order_id = OrderId::try_new("order123").unwrap();
        let event = OrderItemEvent::stock_reduction(&order_id, &item());

        assert!(event.is_stock_reduction());
        assert_eq!(event.key.as_ref(), "order123:SKU-1");
        assert_eq!(event.quantity, Quantity::from(2));
    }

    #[test]
    fn outbound_messages_route_by_kind() {
        let order_id = OrderId::try_new("order123").unwrap();
        let message = OutboundMessage::InventoryReduction(OrderItemEvent::stock_reduction(
            &order_id,
            &item(),
        ));
        assert_eq!(message.topic(), Topic::InventoryReductions);

        let envelope = message.into_envelope();
        assert_eq!(envelope.partition_key, "order123");
    }

    #[test]
    fn inbound_messages_deserialize_from_json() {
        let json = r#"{
            "kind": "payment_result",
            "order_id": "order123",
            "payment_id": "pay-9",
            "outcome": { "status": "failed", "reason": "card declined" }
        }"#;
        let message: InboundMessage = serde_json::from_str(json).unwrap();

        assert_eq!(message.order_id().as_ref(), "order123");
        assert!(matches!(
            message,
            InboundMessage::PaymentResult {
                outcome: PaymentOutcome::Failed { .. },
                ..
            }
        ));
    }

    #[test]
    fn topics_parse_from_wire_names() {
        assert_eq!(
            "inventory-reductions".parse::<Topic>().unwrap(),
            Topic::InventoryReductions
        );
        assert!("unknown".parse::<Topic>().is_err());
    }

    #[test]
    fn message_ids_are_unique() {
        assert_ne!(MessageId::new(), MessageId::new());
    }
}
