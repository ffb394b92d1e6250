//! Identifier and time types shared by every component.
//!
//! All identifiers use smart constructors so that a value, once built, is
//! known to be trimmed, non-empty and bounded in length.

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace used to derive order ids from idempotency tokens.
const ORDER_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f72_6465_7263_6f72_652d_6f72_6465_7273);

const KEY_SEPARATOR: char = ':';

/// Opaque order identifier, immutable once assigned.
///
/// Never contains `:`, which separates the order part of a
/// [`ProcessedEventKey`] from the rest.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255, predicate = |id: &str| !id.contains(KEY_SEPARATOR)),
    derive(
        Debug,
        Clone,
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
pub struct OrderId(String);

impl OrderId {
    /// Generates a fresh, time-ordered order id.
    pub fn generate() -> Self {
        Self::try_new(Uuid::now_v7().to_string()).expect("a UUID string is always a valid order id")
    }

    /// Derives the order id for a creation request.
    ///
    /// The same token always yields the same id, so a replayed request
    /// resolves to the order created by the first attempt.
    pub fn for_token(token: &IdempotencyToken) -> Self {
        let id = Uuid::new_v5(&ORDER_ID_NAMESPACE, token.as_ref().as_bytes());
        Self::try_new(id.to_string()).expect("a UUID string is always a valid order id")
    }
}

/// Customer identifier supplied by the caller.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct CustomerId(String);

/// Product key (SKU) identifying a line item and a stock row.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
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
pub struct ProductKey(String);

/// Caller-supplied token deduplicating a creation request.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct IdempotencyToken(String);

impl IdempotencyToken {
    /// Generates an internally unique token for callers that did not send one.
    pub fn generate() -> Self {
        Self::try_new(format!("gen-{}", Uuid::now_v7()))
            .expect("a generated token is always valid")
    }
}

/// The resource an idempotency token is bound to (e.g. a SKU).
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 512),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Resource key for an order created from a customer's cart.
    pub fn for_checkout(customer_id: &CustomerId) -> Self {
        Self::try_new(format!("checkout:{customer_id}"))
            .expect("a prefixed customer id is always a valid resource key")
    }

    /// Resource key for a product registration.
    pub fn for_product(product_key: &ProductKey) -> Self {
        Self::try_new(format!("product:{product_key}"))
            .expect("a prefixed product key is always a valid resource key")
    }
}

/// Composite key under which an inbound event is marked as processed.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 1024),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ProcessedEventKey(String);

impl ProcessedEventKey {
    /// `orderId:productKey`, the key of a per-line stock reduction.
    pub fn for_line(order_id: &OrderId, product_key: &ProductKey) -> Self {
        Self::try_new(format!("{order_id}{KEY_SEPARATOR}{product_key}"))
            .expect("two bounded ids always form a valid key")
    }

    /// `orderId:eventKey`, for any other order-scoped event.
    pub fn for_event(order_id: &OrderId, event_key: &str) -> Result<Self, ProcessedEventKeyError> {
        Self::try_new(format!("{order_id}{KEY_SEPARATOR}{event_key}"))
    }
}

/// A point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a new timestamp from a UTC `DateTime`.
    pub const fn new(datetime: DateTime<Utc>) -> Self {
        Self(datetime)
    }

    /// The current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the underlying `DateTime`.
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Converts the timestamp into the underlying `DateTime`.
    pub const fn into_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::new(datetime)
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(timestamp: Timestamp) -> Self {
        timestamp.into_datetime()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
