//! Domain events produced by the order aggregate.

use serde::{Deserialize, Serialize};

use super::item::OrderItem;
use super::status::OrderStatus;
use crate::money::Quantity;
use crate::types::{CustomerId, OrderId, ProductKey, Timestamp};

/// An event returned by a successful aggregate mutation.
///
/// Callers persist the event together with the new order state; nothing is
/// buffered inside the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    /// The order was created from a cart snapshot.
    OrderPlaced {
        /// Order id
        order_id: OrderId,
        /// Customer who checked out
        customer_id: CustomerId,
        /// Items copied from the cart
        items: Vec<OrderItem>,
        /// When it happened
        occurred_at: Timestamp,
    },
    /// A line item was appended.
    ItemAdded {
        /// Order id
        order_id: OrderId,
        /// The new line
        item: OrderItem,
        /// When it happened
        occurred_at: Timestamp,
    },
    /// A line item's quantity changed.
    ItemQuantityChanged {
        /// Order id
        order_id: OrderId,
        /// The changed line
        product_key: ProductKey,
        /// Previous quantity
        from: Quantity,
        /// New quantity
        to: Quantity,
        /// When it happened
        occurred_at: Timestamp,
    },
    /// A line item was removed.
    ItemRemoved {
        /// Order id
        order_id: OrderId,
        /// The removed line
        product_key: ProductKey,
        /// When it happened
        occurred_at: Timestamp,
    },
    /// The order moved to a new status.
    StatusChanged {
        /// Order id
        order_id: OrderId,
        /// Previous status
        from: OrderStatus,
        /// New status
        to: OrderStatus,
        /// When it happened
        occurred_at: Timestamp,
    },
}

impl OrderEvent {
    /// The order this event belongs to.
    pub const fn order_id(&self) -> &OrderId {
        match self {
            Self::OrderPlaced { order_id, .. }
            | Self::ItemAdded { order_id, .. }
            | Self::ItemQuantityChanged { order_id, .. }
            | Self::ItemRemoved { order_id, .. }
            | Self::StatusChanged { order_id, .. } => order_id,
        }
    }

    /// When the mutation happened.
    pub const fn occurred_at(&self) -> Timestamp {
        match self {
            Self::OrderPlaced { occurred_at, .. }
            | Self::ItemAdded { occurred_at, .. }
            | Self::ItemQuantityChanged { occurred_at, .. }
            | Self::ItemRemoved { occurred_at, .. }
            | Self::StatusChanged { occurred_at, .. } => *occurred_at,
        }
    }

    /// Stable name used in logs and as the serialized `type` tag.
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::OrderPlaced { .. } => "order_placed",
            Self::ItemAdded { .. } => "item_added",
            Self::ItemQuantityChanged { .. } => "item_quantity_changed",
            Self::ItemRemoved { .. } => "item_removed",
            Self::StatusChanged { .. } => "status_changed",
        }
    }

    /// The target status if this is a status change.
    pub const fn new_status(&self) -> Option<OrderStatus> {
        match self {
            Self::StatusChanged { to, .. } => Some(*to),
            _ => None,
        }
    }
}
