use serde::{Deserialize, Serialize};

use super::events::OrderEvent;
use super::item::OrderItem;
use super::status::OrderStatus;
use crate::errors::{MoneyError, OrderError};
use crate::money::{Currency, Money, Quantity};
use crate::types::{CustomerId, OrderId, ProductKey, Timestamp};

/// The order aggregate root.
///
/// Every mutation validates the complete resulting state before touching
/// `self`, so an `Err` always leaves the order exactly as it was. Successful
/// mutations return the event they produced; the caller persists it in the
/// same write as the new state.
///
/// The aggregate holds no lock. Callers serialize writes per order, through
/// [`crate::partition::PartitionedExecutor`] and the repository's version check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PersistedOrder")]
pub struct Order {
    id: OrderId,
    customer_id: CustomerId,
    status: OrderStatus,
    items: Vec<OrderItem>,
    created_at: Timestamp,
    updated_at: Timestamp,
    version: u64,
}

/// Plain representation used by storage backends to rebuild an [`Order`].
#[derive(Debug, Clone, Deserialize)]
pub struct PersistedOrder {
    /// Order id
    pub id: OrderId,
    /// Customer id
    pub customer_id: CustomerId,
    /// Stored status
    pub status: OrderStatus,
    /// Items in insertion order
    pub items: Vec<OrderItem>,
    /// When the order was placed
    pub created_at: Timestamp,
    /// Last mutation time
    pub updated_at: Timestamp,
    /// Stored revision
    pub version: u64,
}

impl Order {
    /// Creates an order in `CREATED` from a cart snapshot.
    pub fn place(
        id: OrderId,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
    ) -> Result<(Self, OrderEvent), OrderError> {
        validate_items(&id, &items)?;

        let now = Timestamp::now();
        let order = Self {
            id,
            customer_id,
            status: OrderStatus::Created,
            items,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        let event = OrderEvent::OrderPlaced {
            order_id: order.id.clone(),
            customer_id: order.customer_id.clone(),
            items: order.items.clone(),
            occurred_at: now,
        };
        Ok((order, event))
    }

    /// Rebuilds an order from storage, re-checking the item invariants.
    pub fn restore(persisted: PersistedOrder) -> Result<Self, OrderError> {
        validate_items(&persisted.id, &persisted.items)?;
        Ok(Self {
            id: persisted.id,
            customer_id: persisted.customer_id,
            status: persisted.status,
            items: persisted.items,
            created_at: persisted.created_at,
            updated_at: persisted.updated_at,
            version: persisted.version,
        })
    }

    /// Order id.
    pub const fn id(&self) -> &OrderId {
        &self.id
    }

    /// Customer id.
    pub const fn customer_id(&self) -> &CustomerId {
        &self.customer_id
    }

    /// Current status.
    pub const fn status(&self) -> OrderStatus {
        self.status
    }

    /// Line items in insertion order.
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// The line for `product_key`, if present.
    pub fn item(&self, product_key: &ProductKey) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.product_key() == product_key)
    }

    /// When the order was placed.
    pub const fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Time of the last successful mutation.
    pub const fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    /// Storage revision this value was loaded at (0 if never stored).
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Records the revision assigned by a successful write.
    pub fn mark_persisted(&mut self, version: u64) {
        self.version = version;
    }

    /// The currency every line of this order uses, if it has any lines.
    pub fn currency(&self) -> Option<&Currency> {
        self.items.first().map(OrderItem::currency)
    }

    /// Sum of all line totals; `None` for an order with no items.
    pub fn total(&self) -> Option<Money> {
        // Every mutation checks that the total of the new item list computes.
        total_of(&self.items).ok().flatten()
    }

    /// Appends a new line.
    pub fn add_item(
        &mut self,
        product_key: ProductKey,
        name: impl Into<String>,
        quantity: Quantity,
        unit_price: Money,
    ) -> Result<OrderEvent, OrderError> {
        self.ensure_open()?;
        if self.item(&product_key).is_some() {
            return Err(OrderError::DuplicateLineItem {
                order_id: self.id.clone(),
                product_key,
            });
        }
        let item = OrderItem::new(product_key, name, quantity, unit_price)?;
        if let Some(expected) = self.currency() {
            if expected != item.currency() {
                return Err(OrderError::CurrencyMismatch {
                    order_id: self.id.clone(),
                    expected: expected.clone(),
                    found: item.currency().clone(),
                });
            }
        }

        let mut next = self.items.clone();
        next.push(item.clone());
        self.commit_items(next)?;

        Ok(OrderEvent::ItemAdded {
            order_id: self.id.clone(),
            item,
            occurred_at: self.updated_at,
        })
    }

    /// Changes the quantity of an existing line.
    ///
    /// Returns `Ok(None)` when the product is not on the order or the
    /// quantity is unchanged. A quantity of zero is rejected; remove the line
    /// instead.
    pub fn update_item_quantity(
        &mut self,
        product_key: &ProductKey,
        quantity: Quantity,
    ) -> Result<Option<OrderEvent>, OrderError> {
        self.ensure_open()?;
        let Some(position) = self.position_of(product_key) else {
            return Ok(None);
        };
        let current = self.items[position].quantity();
        let updated = self.items[position].with_quantity(quantity)?;
        if current == quantity {
            return Ok(None);
        }

        let mut next = self.items.clone();
        next[position] = updated;
        self.commit_items(next)?;

        Ok(Some(OrderEvent::ItemQuantityChanged {
            order_id: self.id.clone(),
            product_key: product_key.clone(),
            from: current,
            to: quantity,
            occurred_at: self.updated_at,
        }))
    }

    /// Removes a line. Returns `Ok(None)` if the product is not on the order.
    pub fn remove_item(&mut self, product_key: &ProductKey) -> Result<Option<OrderEvent>, OrderError> {
        self.ensure_open()?;
        let Some(position) = self.position_of(product_key) else {
            return Ok(None);
        };

        let mut next = self.items.clone();
        next.remove(position);
        self.commit_items(next)?;

        Ok(Some(OrderEvent::ItemRemoved {
            order_id: self.id.clone(),
            product_key: product_key.clone(),
            occurred_at: self.updated_at,
        }))
    }

    /// Moves the order to `target` if the transition table allows it.
    pub fn update_status(&mut self, target: OrderStatus) -> Result<OrderEvent, OrderError> {
        let from = self.status;
        if !from.can_transition_to(target) {
            return Err(OrderError::InvalidStatusTransition {
                order_id: self.id.clone(),
                from,
                to: target,
            });
        }

        self.status = target;
        self.touch();

        Ok(OrderEvent::StatusChanged {
            order_id: self.id.clone(),
            from,
            to: target,
            occurred_at: self.updated_at,
        })
    }

    fn ensure_open(&self) -> Result<(), OrderError> {
        if self.status.is_closed_for_mutation() {
            return Err(OrderError::OrderClosedForMutation {
                order_id: self.id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    fn position_of(&self, product_key: &ProductKey) -> Option<usize> {
        self.items
            .iter()
            .position(|i| i.product_key() == product_key)
    }

    fn commit_items(&mut self, items: Vec<OrderItem>) -> Result<(), OrderError> {
        total_of(&items).map_err(|source| OrderError::Money {
            order_id: self.id.clone(),
            source,
        })?;
        self.items = items;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        let now = Timestamp::now();
        // Keep updated_at monotonic even if the wall clock steps back.
        self.updated_at = now.max(self.updated_at);
    }
}

impl TryFrom<PersistedOrder> for Order {
    type Error = OrderError;

    fn try_from(persisted: PersistedOrder) -> Result<Self, Self::Error> {
        Self::restore(persisted)
    }
}

fn validate_items(order_id: &OrderId, items: &[OrderItem]) -> Result<(), OrderError> {
    for (index, item) in items.iter().enumerate() {
        if !item.quantity().is_positive() {
            return Err(OrderError::NonPositiveQuantity {
                product_key: item.product_key().clone(),
                quantity: item.quantity().value(),
            });
        }
        if items[..index]
            .iter()
            .any(|earlier| earlier.product_key() == item.product_key())
        {
            return Err(OrderError::DuplicateLineItem {
                order_id: order_id.clone(),
                product_key: item.product_key().clone(),
            });
        }
    }

    total_of(items).map_err(|source| match source {
        MoneyError::CurrencyMismatch { expected, found } => OrderError::CurrencyMismatch {
            order_id: order_id.clone(),
            expected,
            found,
        },
        source => OrderError::Money {
            order_id: order_id.clone(),
            source,
        },
    })?;
    Ok(())
}

fn total_of(items: &[OrderItem]) -> Result<Option<Money>, MoneyError> {
    let mut lines = items.iter();
    let Some(first) = lines.next() else {
        return Ok(None);
    };
    let mut total = first.line_total()?;
    for item in lines {
        total = total.checked_add(&item.line_total()?)?;
    }
    Ok(Some(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn usd() -> Currency {
        Currency::try_new("USD").unwrap()
    }

    fn sku(key: &str) -> ProductKey {
        ProductKey::try_new(key).unwrap()
    }

    fn price(amount: Decimal) -> Money {
        Money::new(amount, usd()).unwrap()
    }

    fn line(key: &str, quantity: u32, amount: Decimal) -> OrderItem {
        OrderItem::new(sku(key), key, Quantity::from(quantity), price(amount)).unwrap()
    }

    fn empty_order() -> Order {
        Order::place(
            OrderId::try_new("order123").unwrap(),
            CustomerId::try_new("customer-1").unwrap(),
            Vec::new(),
        )
        .unwrap()
        .0
    }

    fn status_strategy() -> impl Strategy<Value = OrderStatus> {
        prop::sample::select(OrderStatus::ALL.to_vec())
    }

    /// Drives a fresh order to `status` along legal transitions.
    fn order_in(status: OrderStatus) -> Order {
        let mut order = empty_order();
        let path: &[OrderStatus] = match status {
            OrderStatus::Created => &[],
            OrderStatus::Paid => &[OrderStatus::Paid],
            OrderStatus::Cancelled => &[OrderStatus::Cancelled],
            OrderStatus::Shipped => &[OrderStatus::Paid, OrderStatus::Shipped],
            OrderStatus::Delivered => &[
                OrderStatus::Paid,
                OrderStatus::Shipped,
                OrderStatus::Delivered,
            ],
        };
        for step in path {
            order.update_status(*step).unwrap();
        }
        order
    }

    #[test]
    fn total_of_two_lines() {
        let (order, _) = Order::place(
            OrderId::try_new("order123").unwrap(),
            CustomerId::try_new("customer-1").unwrap(),
            vec![line("SKU-1", 2, dec!(10.00)), line("SKU-2", 1, dec!(15.00))],
        )
        .unwrap();

        assert_eq!(order.total(), Some(price(dec!(35.00))));
    }

    #[test]
    fn empty_order_has_no_total() {
        let order = empty_order();
        assert_eq!(order.status(), OrderStatus::Created);
        assert_eq!(order.total(), None);
    }

    #[test]
    fn placing_emits_order_placed_with_snapshot() {
        let items = vec![line("SKU-1", 2, dec!(10.00))];
        let (order, event) = Order::place(
            OrderId::try_new("order123").unwrap(),
            CustomerId::try_new("customer-1").unwrap(),
            items.clone(),
        )
        .unwrap();

        match event {
            OrderEvent::OrderPlaced {
                order_id,
                items: placed,
                ..
            } => {
                assert_eq!(&order_id, order.id());
                assert_eq!(placed, items);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn placing_rejects_duplicate_products() {
        let result = Order::place(
            OrderId::try_new("order123").unwrap(),
            CustomerId::try_new("customer-1").unwrap(),
            vec![line("SKU-1", 1, dec!(1)), line("SKU-1", 2, dec!(1))],
        );
        assert!(matches!(result, Err(OrderError::DuplicateLineItem { .. })));
    }

    #[test]
    fn placing_rejects_mixed_currencies() {
        let euro_line = OrderItem::new(
            sku("SKU-2"),
            "euro",
            Quantity::from(1),
            Money::new(dec!(5), Currency::try_new("EUR").unwrap()).unwrap(),
        )
        .unwrap();
        let result = Order::place(
            OrderId::try_new("order123").unwrap(),
            CustomerId::try_new("customer-1").unwrap(),
            vec![line("SKU-1", 1, dec!(1)), euro_line],
        );
        assert!(matches!(result, Err(OrderError::CurrencyMismatch { .. })));
    }

    #[test]
    fn deserialization_revalidates_items() {
        let (order, _) = Order::place(
            OrderId::try_new("order123").unwrap(),
            CustomerId::try_new("customer-1").unwrap(),
            vec![line("SKU-1", 2, dec!(10.00))],
        )
        .unwrap();
        let mut json = serde_json::to_value(&order).unwrap();
        let restored: Order = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(restored, order);

        let mut euro_line = json["items"][0].clone();
        euro_line["unit_price"]["currency"] = serde_json::json!("EUR");
        json["items"].as_array_mut().unwrap().push(euro_line.clone());
        assert!(serde_json::from_value::<Order>(json.clone()).is_err());

        euro_line["product_key"] = serde_json::json!("SKU-2");
        json["items"][1] = euro_line;
        assert!(serde_json::from_value::<Order>(json).is_err());
    }

    #[test]
    fn paid_to_paid_is_illegal() {
        let mut order = empty_order();
        let event = order.update_status(OrderStatus::Paid).unwrap();
        assert_eq!(event.new_status(), Some(OrderStatus::Paid));

        let before = order.clone();
        let err = order.update_status(OrderStatus::Paid).unwrap_err();
        assert_eq!(
            err,
            OrderError::InvalidStatusTransition {
                order_id: order.id().clone(),
                from: OrderStatus::Paid,
                to: OrderStatus::Paid,
            }
        );
        assert_eq!(order, before);
    }

    #[test]
    fn add_item_emits_item_added_and_updates_total() {
        let mut order = empty_order();
        let event = order
            .add_item(sku("SKU-1"), "Widget", Quantity::from(3), price(dec!(2.50)))
            .unwrap();

        assert!(matches!(event, OrderEvent::ItemAdded { .. }));
        assert_eq!(order.total(), Some(price(dec!(7.50))));
        assert!(order.updated_at() >= order.created_at());
    }

    #[test]
    fn add_item_rejects_duplicate_key() {
        let mut order = empty_order();
        order
            .add_item(sku("SKU-1"), "Widget", Quantity::from(1), price(dec!(1)))
            .unwrap();
        let before = order.clone();

        let err = order
            .add_item(sku("SKU-1"), "Widget", Quantity::from(2), price(dec!(1)))
            .unwrap_err();
        assert!(matches!(err, OrderError::DuplicateLineItem { .. }));
        assert_eq!(order, before);
    }

    #[test]
    fn add_item_rejects_zero_quantity() {
        let mut order = empty_order();
        let err = order
            .add_item(sku("SKU-1"), "Widget", Quantity::ZERO, price(dec!(1)))
            .unwrap_err();
        assert!(matches!(err, OrderError::NonPositiveQuantity { .. }));
        assert!(order.items().is_empty());
    }

    #[test]
    fn add_item_rejects_other_currency() {
        let mut order = empty_order();
        order
            .add_item(sku("SKU-1"), "Widget", Quantity::from(1), price(dec!(1)))
            .unwrap();

        let err = order
            .add_item(
                sku("SKU-2"),
                "Gadget",
                Quantity::from(1),
                Money::new(dec!(1), Currency::try_new("GBP").unwrap()).unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, OrderError::CurrencyMismatch { .. }));
        assert_eq!(order.items().len(), 1);
    }

    #[test]
    fn closed_orders_reject_item_changes() {
        for status in [OrderStatus::Cancelled, OrderStatus::Delivered] {
            let mut order = order_in(status);
            assert!(matches!(
                order.add_item(sku("SKU-1"), "Widget", Quantity::from(1), price(dec!(1))),
                Err(OrderError::OrderClosedForMutation { .. })
            ));
            assert!(matches!(
                order.remove_item(&sku("SKU-1")),
                Err(OrderError::OrderClosedForMutation { .. })
            ));
            assert!(matches!(
                order.update_item_quantity(&sku("SKU-1"), Quantity::from(2)),
                Err(OrderError::OrderClosedForMutation { .. })
            ));
        }
    }

    #[test]
    fn paid_orders_still_accept_item_changes() {
        let mut order = order_in(OrderStatus::Paid);
        assert!(order
            .add_item(sku("SKU-1"), "Widget", Quantity::from(1), price(dec!(1)))
            .is_ok());
    }

    #[test]
    fn update_quantity_of_missing_item_is_noop() {
        let mut order = empty_order();
        let before = order.clone();
        assert_eq!(
            order
                .update_item_quantity(&sku("SKU-404"), Quantity::from(2))
                .unwrap(),
            None
        );
        assert_eq!(order, before);
    }

    #[test]
    fn update_quantity_emits_change_and_recomputes_total() {
        let mut order = empty_order();
        order
            .add_item(sku("SKU-1"), "Widget", Quantity::from(1), price(dec!(4)))
            .unwrap();

        let event = order
            .update_item_quantity(&sku("SKU-1"), Quantity::new(dec!(2.5)).unwrap())
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            OrderEvent::ItemQuantityChanged { from, to, .. }
                if from == Quantity::from(1) && to.value() == dec!(2.5)
        ));
        assert_eq!(order.total(), Some(price(dec!(10))));
    }

    #[test]
    fn update_quantity_to_zero_is_rejected() {
        let mut order = empty_order();
        order
            .add_item(sku("SKU-1"), "Widget", Quantity::from(1), price(dec!(4)))
            .unwrap();
        let before = order.clone();

        let err = order
            .update_item_quantity(&sku("SKU-1"), Quantity::ZERO)
            .unwrap_err();
        assert!(matches!(err, OrderError::NonPositiveQuantity { .. }));
        assert_eq!(order, before);
    }

    #[test]
    fn removing_last_item_clears_total() {
        let mut order = empty_order();
        order
            .add_item(sku("SKU-1"), "Widget", Quantity::from(1), price(dec!(4)))
            .unwrap();

        let event = order.remove_item(&sku("SKU-1")).unwrap();
        assert!(matches!(event, Some(OrderEvent::ItemRemoved { .. })));
        assert_eq!(order.total(), None);
        assert_eq!(order.remove_item(&sku("SKU-1")).unwrap(), None);
    }

    #[test]
    fn full_lifecycle_to_delivered() {
        let order = order_in(OrderStatus::Delivered);
        assert_eq!(order.status(), OrderStatus::Delivered);
    }

    #[test]
    fn restore_rechecks_invariants() {
        let persisted = PersistedOrder {
            id: OrderId::try_new("order123").unwrap(),
            customer_id: CustomerId::try_new("customer-1").unwrap(),
            status: OrderStatus::Paid,
            items: vec![line("SKU-1", 1, dec!(1)), line("SKU-1", 1, dec!(1))],
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
            version: 3,
        };
        assert!(Order::restore(persisted).is_err());
    }

    proptest! {
        #[test]
        fn illegal_transitions_leave_order_unchanged(
            from in status_strategy(),
            to in status_strategy(),
        ) {
            let mut order = order_in(from);
            let before = order.clone();
            let result = order.update_status(to);

            if from.can_transition_to(to) {
                prop_assert!(result.is_ok());
                prop_assert_eq!(order.status(), to);
            } else {
                let is_invalid_transition =
                    matches!(result, Err(OrderError::InvalidStatusTransition { .. }));
                prop_assert!(is_invalid_transition);
                prop_assert_eq!(order, before);
            }
        }

        #[test]
        fn total_is_sum_of_line_totals(
            lines in prop::collection::vec((1u32..100, 0i64..100_000), 0..10)
        ) {
            let mut order = empty_order();
            let mut expected = Decimal::ZERO;
            for (index, (quantity, cents)) in lines.iter().enumerate() {
                let unit = Decimal::new(*cents, 2);
                expected += unit * Decimal::from(*quantity);
                order
                    .add_item(
                        sku(&format!("SKU-{index}")),
                        "item",
                        Quantity::from(*quantity),
                        price(unit),
                    )
                    .unwrap();
            }

            match order.total() {
                None => prop_assert!(lines.is_empty()),
                Some(total) => {
                    prop_assert_eq!(total.amount(), expected);
                    prop_assert_eq!(total.currency(), &usd());
                }
            }
        }
    }
}
