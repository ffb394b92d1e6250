//! Stock levels and the race-free adjuster port.
//!
//! The adjuster's conditional decrement is the only write path that may
//! reduce stock. Reads through [`StockAdjuster::level`] are snapshots; they
//! can be stale by the time they return and must never decide whether a
//! decrement is safe.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{StockError, StoreResult};
use crate::money::Quantity;
use crate::types::ProductKey;

/// Available quantity of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    /// Product key
    pub product_key: ProductKey,
    /// Available quantity, never negative
    pub available: Quantity,
    /// Incremented on every change
    pub version: u64,
}

/// Atomic stock mutations at the storage boundary.
#[async_trait]
pub trait StockAdjuster: Send + Sync {
    /// Decrements by `quantity` iff at least `quantity` is available, as one
    /// atomic step.
    ///
    /// Returns `false` both when the product is unknown and when stock is
    /// short; see [`reduce_and_classify`] to tell them apart.
    async fn reduce_if_sufficient(
        &self,
        product_key: &ProductKey,
        quantity: Quantity,
    ) -> StoreResult<bool>;

    /// Adds `quantity` to an existing row.
    async fn increase(
        &self,
        product_key: &ProductKey,
        quantity: Quantity,
    ) -> Result<StockLevel, StockError>;

    /// Creates a stock row unless one exists. Returns whether it was created.
    async fn register(&self, product_key: &ProductKey, initial: Quantity) -> StoreResult<bool>;

    /// Snapshot read of a product's stock.
    async fn level(&self, product_key: &ProductKey) -> StoreResult<Option<StockLevel>>;
}

/// Outcome of [`reduce_and_classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockReduction {
    /// The decrement was applied.
    Reduced,
    /// The product exists but holds less than requested.
    Insufficient {
        /// Snapshot of what was available after the failed attempt
        available: Quantity,
    },
    /// No stock row exists.
    ProductNotFound,
}

impl StockReduction {
    /// Whether stock was actually decremented.
    pub const fn is_reduced(&self) -> bool {
        matches!(self, Self::Reduced)
    }
}

/// Attempts a conditional decrement and, on failure, reads the row to
/// report why.
///
/// The follow-up read is not atomic with the decrement. A row deleted or
/// restocked in between can be misreported, which is acceptable because
/// both failure outcomes are terminal for the caller.
pub async fn reduce_and_classify<A>(
    adjuster: &A,
    product_key: &ProductKey,
    quantity: Quantity,
) -> StoreResult<StockReduction>
where
    A: StockAdjuster + ?Sized,
{
    if adjuster.reduce_if_sufficient(product_key, quantity).await? {
        return Ok(StockReduction::Reduced);
    }

    let outcome = match adjuster.level(product_key).await? {
        Some(level) => StockReduction::Insufficient {
            available: level.available,
        },
        None => StockReduction::ProductNotFound,
    };
    debug!(product_key = %product_key, requested = %quantity, ?outcome, "Stock reduction refused");
    Ok(outcome)
}
