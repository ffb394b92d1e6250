use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ordercore::{ProductKey, Quantity, StockAdjuster, StockError, StockLevel, StoreError, StoreResult};
use parking_lot::Mutex;

/// Stock rows in a shared map. Every mutation runs under one lock, so the
/// check and the decrement in `reduce_if_sufficient` cannot interleave with
/// another writer.
#[derive(Clone, Default)]
pub struct InMemoryStockStore {
    rows: Arc<Mutex<HashMap<ProductKey, StockLevel>>>,
}

impl InMemoryStockStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with `(product, quantity)` rows.
    pub fn with_levels<I>(levels: I) -> Self
    where
        I: IntoIterator<Item = (ProductKey, Quantity)>,
    {
        let rows = levels
            .into_iter()
            .map(|(product_key, available)| {
                let level = StockLevel {
                    product_key: product_key.clone(),
                    available,
                    version: 0,
                };
                (product_key, level)
            })
            .collect();
        Self {
            rows: Arc::new(Mutex::new(rows)),
        }
    }
}

#[async_trait]
impl StockAdjuster for InMemoryStockStore {
    async fn reduce_if_sufficient(
        &self,
        product_key: &ProductKey,
        quantity: Quantity,
    ) -> StoreResult<bool> {
        let mut rows = self.rows.lock();
        let Some(level) = rows.get_mut(product_key) else {
            return Ok(false);
        };
        match level.available.checked_sub(quantity) {
            Some(remaining) => {
                level.available = remaining;
                level.version += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn increase(
        &self,
        product_key: &ProductKey,
        quantity: Quantity,
    ) -> Result<StockLevel, StockError> {
        let mut rows = self.rows.lock();
        let level = rows
            .get_mut(product_key)
            .ok_or_else(|| StockError::ProductNotFound(product_key.clone()))?;
        level.available = level
            .available
            .checked_add(quantity)
            .ok_or_else(|| StoreError::Internal(format!("stock overflow for {product_key}")))?;
        level.version += 1;
        Ok(level.clone())
    }

    async fn register(&self, product_key: &ProductKey, initial: Quantity) -> StoreResult<bool> {
        let mut rows = self.rows.lock();
        if rows.contains_key(product_key) {
            return Ok(false);
        }
        let _ = rows.insert(
            product_key.clone(),
            StockLevel {
                product_key: product_key.clone(),
                available: initial,
                version: 0,
            },
        );
        Ok(true)
    }

    async fn level(&self, product_key: &ProductKey) -> StoreResult<Option<StockLevel>> {
        Ok(self.rows.lock().get(product_key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordercore::{reduce_and_classify, StockReduction};

    fn sku(raw: &str) -> ProductKey {
        ProductKey::try_new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_reduce_bumps_version() {
        let store = InMemoryStockStore::with_levels([(sku("SKU-A"), Quantity::from(5))]);

        assert!(store
            .reduce_if_sufficient(&sku("SKU-A"), Quantity::from(2))
            .await
            .unwrap());
        let level = store.level(&sku("SKU-A")).await.unwrap().unwrap();
        assert_eq!(level.available, Quantity::from(3));
        assert_eq!(level.version, 1);
    }

    #[tokio::test]
    async fn test_classify_insufficient_and_missing() {
        let store = InMemoryStockStore::with_levels([(sku("SKU-A"), Quantity::from(1))]);

        assert_eq!(
            reduce_and_classify(&store, &sku("SKU-A"), Quantity::from(2))
                .await
                .unwrap(),
            StockReduction::Insufficient {
                available: Quantity::from(1)
            }
        );
        assert_eq!(
            reduce_and_classify(&store, &sku("SKU-X"), Quantity::from(1))
                .await
                .unwrap(),
            StockReduction::ProductNotFound
        );
        assert_eq!(
            reduce_and_classify(&store, &sku("SKU-A"), Quantity::from(1))
                .await
                .unwrap(),
            StockReduction::Reduced
        );
    }

    #[tokio::test]
    async fn test_increase_unknown_product() {
        let store = InMemoryStockStore::new();
        let error = store
            .increase(&sku("SKU-A"), Quantity::from(1))
            .await
            .unwrap_err();
        assert_eq!(error, StockError::ProductNotFound(sku("SKU-A")));
    }
}
