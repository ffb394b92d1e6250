//! Insert-once ledgers used to deduplicate creation requests and inbound
//! events.
//!
//! Both ledgers are ports: backends must implement `claim` and
//! `mark_processed` as a single atomic insert-if-absent, so that two racing
//! callers can never both observe the "first" outcome.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::StoreResult;
use crate::types::{IdempotencyToken, ProcessedEventKey, ResourceKey, Timestamp};

/// A persisted token → resource binding. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyClaim {
    /// The caller-supplied token
    pub token: IdempotencyToken,
    /// The resource the token was first claimed for
    pub resource_key: ResourceKey,
    /// When the claim was made
    pub created_at: Timestamp,
}

/// Result of [`IdempotencyLedger::claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// First use of the token; the caller performs the side effect.
    Claimed,
    /// The token was already claimed for the same resource; the caller
    /// skips the side effect and answers with the original result.
    Replay,
    /// The token was already claimed for a different resource.
    Conflict {
        /// The resource the token is bound to
        existing: ResourceKey,
    },
}

impl ClaimOutcome {
    /// Classifies an existing claim against the resource now being requested.
    pub fn against(existing: &IdempotencyClaim, requested: &ResourceKey) -> Self {
        if &existing.resource_key == requested {
            Self::Replay
        } else {
            Self::Conflict {
                existing: existing.resource_key.clone(),
            }
        }
    }
}

/// Deduplicates creation requests by idempotency token.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Atomically binds `token` to `resource_key` unless it is already bound.
    ///
    /// First writer wins; later callers get `Replay` or `Conflict`.
    async fn claim(
        &self,
        token: &IdempotencyToken,
        resource_key: &ResourceKey,
    ) -> StoreResult<ClaimOutcome>;

    /// Reads the claim for `token`, if any.
    async fn find(&self, token: &IdempotencyToken) -> StoreResult<Option<IdempotencyClaim>>;
}

/// A persisted marker for an inbound event that has been handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEventMarker {
    /// The dedup key
    pub key: ProcessedEventKey,
    /// When it was first marked
    pub processed_at: Timestamp,
}

/// Result of [`ProcessedEventLedger::mark_processed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// First sighting of the key; proceed with the effect.
    Processed,
    /// Already handled; skip.
    AlreadyProcessed,
}

impl MarkOutcome {
    /// Whether the caller should go on to apply the effect.
    pub const fn should_proceed(self) -> bool {
        matches!(self, Self::Processed)
    }
}

/// Deduplicates inbound events by composite key.
///
/// There is deliberately no way to un-mark a key.
#[async_trait]
pub trait ProcessedEventLedger: Send + Sync {
    /// Atomically records `key`; exactly one caller ever sees `Processed`.
    async fn mark_processed(&self, key: &ProcessedEventKey) -> StoreResult<MarkOutcome>;

    /// Whether `key` has been marked.
    async fn is_processed(&self, key: &ProcessedEventKey) -> StoreResult<bool>;
}
