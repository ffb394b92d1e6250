//! Property tests for stock conservation.
//!
//! Whatever sequence of reductions arrives, available stock never goes
//! negative and equals the initial amount minus what was actually reduced.

use ordercore::{reduce_and_classify, ProductKey, Quantity, StockAdjuster, StockReduction};
use ordercore_memory::InMemoryStockStore;
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_sequential_reductions_conserve_stock(
        initial in 0u32..60,
        requests in prop::collection::vec(1u32..10, 1..25),
    ) {
        tokio_test::block_on(async {
            let sku = ProductKey::try_new("SKU-PROP").unwrap();
            let stock = InMemoryStockStore::new();
            stock.register(&sku, Quantity::from(initial)).await.unwrap();

            let mut remaining = initial;
            for request in requests {
                let outcome = reduce_and_classify(&stock, &sku, Quantity::from(request))
                    .await
                    .unwrap();
                if request <= remaining {
                    prop_assert_eq!(outcome, StockReduction::Reduced);
                    remaining -= request;
                } else {
                    prop_assert_eq!(
                        outcome,
                        StockReduction::Insufficient { available: Quantity::from(remaining) }
                    );
                }
            }

            let level = stock.level(&sku).await.unwrap().unwrap();
            prop_assert_eq!(level.available, Quantity::from(remaining));
            Ok(())
        })?;
    }

    #[test]
    fn test_concurrent_reductions_never_exceed_initial_stock(
        initial in 0u32..40,
        requests in prop::collection::vec(1u32..6, 1..20),
    ) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .build()
            .unwrap();
        rt.block_on(async {
            let sku = ProductKey::try_new("SKU-PROP").unwrap();
            let stock = InMemoryStockStore::new();
            stock.register(&sku, Quantity::from(initial)).await.unwrap();

            let handles: Vec<_> = requests
                .iter()
                .map(|request| {
                    let stock = stock.clone();
                    let sku = sku.clone();
                    let request = *request;
                    tokio::spawn(async move {
                        stock
                            .reduce_if_sufficient(&sku, Quantity::from(request))
                            .await
                            .map(|ok| (ok, request))
                    })
                })
                .collect();

            let mut reduced = 0u32;
            for handle in handles {
                let (ok, request) = handle.await.unwrap().unwrap();
                if ok {
                    reduced += request;
                }
            }

            prop_assert!(reduced <= initial);
            let level = stock.level(&sku).await.unwrap().unwrap();
            prop_assert_eq!(level.available, Quantity::from(initial - reduced));
            Ok(())
        })?;
    }
}
