use serde::{Deserialize, Serialize};

use crate::errors::{MoneyError, OrderError};
use crate::money::{Currency, Money, Quantity};
use crate::types::ProductKey;

/// A line of an order. Owned by its order; has no identity outside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "OrderItemRepr")]
pub struct OrderItem {
    product_key: ProductKey,
    name: String,
    quantity: Quantity,
    unit_price: Money,
}

#[derive(Deserialize)]
struct OrderItemRepr {
    product_key: ProductKey,
    name: String,
    quantity: Quantity,
    unit_price: Money,
}

impl TryFrom<OrderItemRepr> for OrderItem {
    type Error = OrderError;

    fn try_from(repr: OrderItemRepr) -> Result<Self, Self::Error> {
        Self::new(repr.product_key, repr.name, repr.quantity, repr.unit_price)
    }
}

impl OrderItem {
    /// Creates a line item; the quantity must be strictly positive.
    pub fn new(
        product_key: ProductKey,
        name: impl Into<String>,
        quantity: Quantity,
        unit_price: Money,
    ) -> Result<Self, OrderError> {
        ensure_positive(&product_key, quantity)?;
        Ok(Self {
            product_key,
            name: name.into(),
            quantity,
            unit_price,
        })
    }

    /// Product key.
    pub const fn product_key(&self) -> &ProductKey {
        &self.product_key
    }

    /// Display name captured at order time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered quantity, always positive.
    pub const fn quantity(&self) -> Quantity {
        self.quantity
    }

    /// Unit price captured at order time.
    pub const fn unit_price(&self) -> &Money {
        &self.unit_price
    }

    /// Currency of the unit price.
    pub const fn currency(&self) -> &Currency {
        self.unit_price.currency()
    }

    /// `quantity × unit_price`.
    pub fn line_total(&self) -> Result<Money, MoneyError> {
        self.unit_price.times(self.quantity)
    }

    pub(crate) fn with_quantity(&self, quantity: Quantity) -> Result<Self, OrderError> {
        ensure_positive(&self.product_key, quantity)?;
        Ok(Self {
            quantity,
            ..self.clone()
        })
    }
}

fn ensure_positive(product_key: &ProductKey, quantity: Quantity) -> Result<(), OrderError> {
    if quantity.is_positive() {
        Ok(())
    } else {
        Err(OrderError::NonPositiveQuantity {
            product_key: product_key.clone(),
            quantity: quantity.value(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializing_a_zero_quantity_line_fails() {
        let json = r#"{
            "product_key": "SKU-1",
            "name": "Widget",
            "quantity": "0",
            "unit_price": {"amount": "2.00", "currency": "USD"}
        }"#;
        assert!(serde_json::from_str::<OrderItem>(json).is_err());

        let json = json.replace(r#""quantity": "0""#, r#""quantity": "2""#);
        let item: OrderItem = serde_json::from_str(&json).unwrap();
        assert_eq!(item.quantity(), Quantity::from(2));
    }
}
