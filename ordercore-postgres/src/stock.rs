use async_trait::async_trait;
use ordercore::{ProductKey, Quantity, StockAdjuster, StockError, StockLevel, StoreResult};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{query, Row};
use tracing::{debug, instrument};

use crate::error::{corrupt, map_sqlx_error};
use crate::retry::retry_transient;
use crate::{version_from_db, PostgresStore};

fn stock_level(
    product_key: &ProductKey,
    row: &PgRow,
    operation: &'static str,
) -> StoreResult<StockLevel> {
    let quantity: Decimal = row
        .try_get("quantity")
        .map_err(|error| map_sqlx_error(error, operation))?;
    let version: i64 = row
        .try_get("version")
        .map_err(|error| map_sqlx_error(error, operation))?;
    Ok(StockLevel {
        product_key: product_key.clone(),
        available: Quantity::new(quantity).map_err(|e| corrupt(operation, e))?,
        version: version_from_db(version, operation)?,
    })
}

#[async_trait]
impl StockAdjuster for PostgresStore {
    #[instrument(name = "postgres.reduce_stock", skip_all, fields(%product_key, %quantity))]
    async fn reduce_if_sufficient(
        &self,
        product_key: &ProductKey,
        quantity: Quantity,
    ) -> StoreResult<bool> {
        let updated = query(
            "UPDATE stock_levels \
             SET quantity = quantity - $2, version = version + 1, updated_at = now() \
             WHERE product_key = $1 AND quantity >= $2",
        )
        .bind(product_key.as_ref())
        .bind(quantity.value())
        .execute(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, "reduce_stock"))?
        .rows_affected();

        debug!(reduced = updated == 1, "[postgres.reduce_stock] conditional decrement");
        Ok(updated == 1)
    }

    #[instrument(name = "postgres.increase_stock", skip_all, fields(%product_key, %quantity))]
    async fn increase(
        &self,
        product_key: &ProductKey,
        quantity: Quantity,
    ) -> Result<StockLevel, StockError> {
        let row = query(
            "UPDATE stock_levels \
             SET quantity = quantity + $2, version = version + 1, updated_at = now() \
             WHERE product_key = $1 \
             RETURNING quantity, version",
        )
        .bind(product_key.as_ref())
        .bind(quantity.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, "increase_stock"))?
        .ok_or_else(|| StockError::ProductNotFound(product_key.clone()))?;

        Ok(stock_level(product_key, &row, "increase_stock")?)
    }

    async fn register(&self, product_key: &ProductKey, initial: Quantity) -> StoreResult<bool> {
        let inserted = query(
            "INSERT INTO stock_levels (product_key, quantity) VALUES ($1, $2) \
             ON CONFLICT (product_key) DO NOTHING",
        )
        .bind(product_key.as_ref())
        .bind(initial.value())
        .execute(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, "register_stock"))?
        .rows_affected();
        Ok(inserted == 1)
    }

    async fn level(&self, product_key: &ProductKey) -> StoreResult<Option<StockLevel>> {
        let row = retry_transient(&self.retry, "stock_level", || async move {
            query("SELECT quantity, version FROM stock_levels WHERE product_key = $1")
                .bind(product_key.as_ref())
                .fetch_optional(&self.pool)
                .await
                .map_err(|error| map_sqlx_error(error, "stock_level"))
        })
        .await?;

        row.map(|row| stock_level(product_key, &row, "stock_level"))
            .transpose()
    }
}
