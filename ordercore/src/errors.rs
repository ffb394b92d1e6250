//! Error types for OrderCore.
//!
//! Errors are split along the lines callers need to act on:
//!
//! - **OrderError**: validation and state-machine rejections. The aggregate is
//!   left unchanged; callers surface these as client-visible conflicts.
//! - **StoreError**: storage-layer faults. Never swallowed; safe to retry
//!   because every effect behind the storage traits is idempotent.
//! - **StockError**, **PublishError**, **CartError**: boundary failures of
//!   the stock store, the messaging transport and the cart service.
//! - **CoordinatorError** / **ServiceError**: what the event handlers and
//!   application services return, composed from the above.
//!
//! Expected outcomes such as "already processed", "replayed request" or
//! "insufficient stock" are values (see [`crate::ledger`] and
//! [`crate::stock`]) and never appear here as errors, with the single
//! exception of [`ServiceError::InsufficientStock`], which is how a
//! synchronous caller is told about it.

use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::money::Currency;
use crate::order::OrderStatus;
use crate::types::{CustomerId, IdempotencyToken, OrderId, ProductKey, ResourceKey};

/// Rejections raised by money and quantity constructors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    /// Amounts and quantities are never negative.
    #[error("value cannot be negative: {0}")]
    Negative(Decimal),

    /// Two amounts in different currencies were combined.
    #[error("currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch {
        /// Currency of the left-hand amount
        expected: Currency,
        /// Currency of the right-hand amount
        found: Currency,
    },

    /// Decimal arithmetic overflowed.
    #[error("arithmetic overflow")]
    Overflow,

    /// Text could not be parsed into an amount.
    #[error("cannot parse amount: {0}")]
    Parse(String),
}

/// Validation and state errors raised by the order aggregate.
///
/// Whenever one of these is returned the aggregate is exactly as it was
/// before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// The product is already a line item of this order.
    #[error("order {order_id} already contains product {product_key}")]
    DuplicateLineItem {
        /// The order being mutated
        order_id: OrderId,
        /// The product that is already present
        product_key: ProductKey,
    },

    /// Line-item quantities must stay strictly positive.
    #[error("quantity for {product_key} must be positive, got {quantity}")]
    NonPositiveQuantity {
        /// The offending product
        product_key: ProductKey,
        /// The rejected quantity
        quantity: Decimal,
    },

    /// All amounts within one order share a single currency.
    #[error("order {order_id} is priced in {expected}, cannot add {found}")]
    CurrencyMismatch {
        /// The order being mutated
        order_id: OrderId,
        /// The order's currency
        expected: Currency,
        /// The currency that was offered
        found: Currency,
    },

    /// Items cannot change once an order is cancelled or delivered.
    #[error("order {order_id} is {status} and can no longer be modified")]
    OrderClosedForMutation {
        /// The closed order
        order_id: OrderId,
        /// Its terminal status
        status: OrderStatus,
    },

    /// The requested status is not reachable from the current one.
    #[error("order {order_id} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        /// The order being transitioned
        order_id: OrderId,
        /// Current status
        from: OrderStatus,
        /// Requested status
        to: OrderStatus,
    },

    /// Line-total arithmetic failed.
    #[error("money error in order {order_id}: {source}")]
    Money {
        /// The order being mutated
        order_id: OrderId,
        /// The underlying failure
        #[source]
        source: MoneyError,
    },
}

/// Failures of the storage layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Another writer changed the record since it was loaded.
    #[error("version conflict on {key}: expected version {expected}")]
    VersionConflict {
        /// The contended record
        key: String,
        /// The version the writer had loaded
        expected: u64,
    },

    /// A record with this identity already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The operation did not finish in time.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// A stored row could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Anything else; indicates a bug or an unexpected backend state.
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether retrying the same call unchanged may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Failures of stock operations that are not expected outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockError {
    /// No stock row exists for the product.
    #[error("product {0} not found")]
    ProductNotFound(ProductKey),

    /// The storage layer failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures of the messaging transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The broker could not be reached; retry later.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// The broker refused the message.
    #[error("message rejected: {0}")]
    Rejected(String),

    /// The payload could not be encoded.
    #[error("message serialization failed: {0}")]
    Serialization(String),
}

impl PublishError {
    /// Whether publishing the same message again may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Failures of the external cart service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    /// The customer has no cart to check out.
    #[error("no cart for customer {0}")]
    NotFound(CustomerId),

    /// The cart service could not be reached.
    #[error("cart service unavailable: {0}")]
    Unavailable(String),

    /// The cart contained a line that cannot be priced.
    #[error("invalid cart line: {0}")]
    InvalidLine(String),
}

/// Errors returned by the event choreography handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// The event refers to an order this service does not know.
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// The event asks for a transition the order cannot make.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// The storage layer failed; the transport should redeliver.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Optimistic retries against concurrent writers ran out.
    #[error("gave up on order {order_id} after {attempts} conflicting writes")]
    ConcurrencyExhausted {
        /// The contended order
        order_id: OrderId,
        /// How many attempts were made
        attempts: u32,
    },
}

/// Errors returned by the order and inventory application services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// A state or validation rule of the aggregate was violated.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// The storage layer failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The cart service failed.
    #[error(transparent)]
    Cart(#[from] CartError),

    /// The order does not exist.
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// No stock row exists for the product.
    #[error("product {0} not found")]
    ProductNotFound(ProductKey),

    /// The stock row exists but holds less than requested.
    #[error("insufficient stock for {product_key}: requested {requested}, available {available}")]
    InsufficientStock {
        /// The product
        product_key: ProductKey,
        /// Requested quantity
        requested: Decimal,
        /// Snapshot of what was available
        available: Decimal,
    },

    /// The token was already used for a different resource.
    #[error("idempotency token {token} is bound to {existing}")]
    IdempotencyConflict {
        /// The reused token
        token: IdempotencyToken,
        /// The resource it was first claimed for
        existing: ResourceKey,
    },
}

impl ServiceError {
    /// Whether the failure should be reported to clients as a conflict.
    pub const fn is_conflict(&self) -> bool {
        match self {
            Self::Order(
                OrderError::InvalidStatusTransition { .. }
                | OrderError::OrderClosedForMutation { .. }
                | OrderError::DuplicateLineItem { .. },
            )
            | Self::Store(StoreError::VersionConflict { .. } | StoreError::AlreadyExists(_))
            | Self::InsufficientStock { .. }
            | Self::IdempotencyConflict { .. } => true,
            _ => false,
        }
    }
}

impl From<StockError> for ServiceError {
    fn from(error: StockError) -> Self {
        match error {
            StockError::ProductNotFound(product_key) => Self::ProductNotFound(product_key),
            StockError::Store(error) => Self::Store(error),
        }
    }
}

/// Type alias for storage results.
pub type StoreResult<T> = Result<T, StoreError>;
