//! Property tests for redelivery.
//!
//! Any number of duplicate deliveries, in any interleaving, has the same
//! effect as delivering each message once.

use ordercore::{Disposition, FulfillmentStage, InboundMessage, OrderStatus, Quantity};
use proptest::prelude::*;

use crate::common::{payment_succeeded, Shop};

const INITIAL_STOCK: u32 = 100;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_duplicate_reductions_apply_once_per_line(
        quantities in prop::collection::vec(1u32..5, 1..5),
        extra in prop::collection::vec(0usize..5, 0..30),
    ) {
        tokio_test::block_on(async {
            let shop = Shop::new();
            let skus: Vec<String> = (0..quantities.len()).map(|i| format!("SKU-{i}")).collect();
            let mut lines = Vec::with_capacity(quantities.len());
            for (sku, quantity) in skus.iter().zip(&quantities) {
                let _ = shop.stock(sku, INITIAL_STOCK).await;
                lines.push((sku.as_str(), *quantity, "1.00"));
            }
            let order = shop.checkout("prop-customer", &lines).await;
            prop_assert_eq!(shop.pay(order.id()).await, Disposition::Applied);
            let _ = shop.relay.relay_once().await.unwrap();

            let reductions = shop.reductions();
            prop_assert_eq!(reductions.len(), quantities.len());
            let deliveries = extra
                .iter()
                .map(|index| index % reductions.len())
                .chain(0..reductions.len());

            let mut applied = 0;
            for index in deliveries {
                match shop.coordinator.handle(reductions[index].clone()).await.unwrap() {
                    Disposition::Applied => applied += 1,
                    Disposition::Duplicate => {}
                    other => prop_assert!(false, "unexpected disposition {:?}", other),
                }
            }
            prop_assert_eq!(applied, quantities.len());

            for (sku, quantity) in skus.iter().zip(&quantities) {
                let available = shop.available(&crate::common::sku_key(sku)).await;
                prop_assert_eq!(available, Quantity::from(INITIAL_STOCK - quantity));
            }
            Ok(())
        })?;
    }

    #[test]
    fn test_repeated_status_messages_advance_once_per_stage(
        payments in 1usize..4,
        shipments in 1usize..4,
        deliveries in 1usize..4,
    ) {
        tokio_test::block_on(async {
            let shop = Shop::new();
            let _ = shop.stock("SKU-A", INITIAL_STOCK).await;
            let order = shop.checkout("prop-customer", &[("SKU-A", 1, "1.00")]).await;
            let fulfillment = |stage| InboundMessage::Fulfillment {
                order_id: order.id().clone(),
                stage,
            };

            let messages = std::iter::repeat_with(|| payment_succeeded(order.id()))
                .take(payments)
                .chain(std::iter::repeat_with(|| fulfillment(FulfillmentStage::Shipped)).take(shipments))
                .chain(std::iter::repeat_with(|| fulfillment(FulfillmentStage::Delivered)).take(deliveries))
                // A stale payment arriving after delivery.
                .chain(std::iter::once(payment_succeeded(order.id())));

            let mut applied = 0;
            let mut duplicates = 0;
            for message in messages {
                match shop.coordinator.handle(message).await.unwrap() {
                    Disposition::Applied => applied += 1,
                    Disposition::Duplicate => duplicates += 1,
                    other => prop_assert!(false, "unexpected disposition {:?}", other),
                }
            }

            prop_assert_eq!(applied, 3);
            prop_assert_eq!(duplicates, payments + shipments + deliveries - 2);
            let stored = shop.orders.get_order(order.id()).await.unwrap();
            prop_assert_eq!(stored.status(), OrderStatus::Delivered);
            prop_assert_eq!(stored.version(), 4);
            Ok(())
        })?;
    }
}
