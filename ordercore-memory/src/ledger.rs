use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ordercore::{
    ClaimOutcome, IdempotencyClaim, IdempotencyLedger, IdempotencyToken, MarkOutcome,
    ProcessedEventKey, ProcessedEventLedger, ProcessedEventMarker, ResourceKey, StoreResult,
    Timestamp,
};
use parking_lot::RwLock;
use tracing::debug;

/// Idempotency ledger backed by a shared map.
///
/// `claim` checks and inserts under a single write lock, which is what makes
/// it an atomic insert-if-absent.
#[derive(Clone, Default)]
pub struct InMemoryIdempotencyLedger {
    claims: Arc<RwLock<HashMap<IdempotencyToken, IdempotencyClaim>>>,
}

impl InMemoryIdempotencyLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of claims recorded.
    pub fn len(&self) -> usize {
        self.claims.read().len()
    }

    /// Whether no token has been claimed yet.
    pub fn is_empty(&self) -> bool {
        self.claims.read().is_empty()
    }
}

#[async_trait]
impl IdempotencyLedger for InMemoryIdempotencyLedger {
    async fn claim(
        &self,
        token: &IdempotencyToken,
        resource_key: &ResourceKey,
    ) -> StoreResult<ClaimOutcome> {
        let mut claims = self.claims.write();
        if let Some(existing) = claims.get(token) {
            let outcome = ClaimOutcome::against(existing, resource_key);
            debug!(%token, ?outcome, "token already claimed");
            return Ok(outcome);
        }

        let _ = claims.insert(
            token.clone(),
            IdempotencyClaim {
                token: token.clone(),
                resource_key: resource_key.clone(),
                created_at: Timestamp::now(),
            },
        );
        Ok(ClaimOutcome::Claimed)
    }

    async fn find(&self, token: &IdempotencyToken) -> StoreResult<Option<IdempotencyClaim>> {
        Ok(self.claims.read().get(token).cloned())
    }
}

/// Processed-event ledger backed by a shared map.
#[derive(Clone, Default)]
pub struct InMemoryProcessedEventLedger {
    markers: Arc<RwLock<HashMap<ProcessedEventKey, ProcessedEventMarker>>>,
}

impl InMemoryProcessedEventLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys marked so far.
    pub fn len(&self) -> usize {
        self.markers.read().len()
    }

    /// Whether nothing has been marked yet.
    pub fn is_empty(&self) -> bool {
        self.markers.read().is_empty()
    }
}

#[async_trait]
impl ProcessedEventLedger for InMemoryProcessedEventLedger {
    async fn mark_processed(&self, key: &ProcessedEventKey) -> StoreResult<MarkOutcome> {
        let mut markers = self.markers.write();
        if markers.contains_key(key) {
            return Ok(MarkOutcome::AlreadyProcessed);
        }
        let _ = markers.insert(
            key.clone(),
            ProcessedEventMarker {
                key: key.clone(),
                processed_at: Timestamp::now(),
            },
        );
        Ok(MarkOutcome::Processed)
    }

    async fn is_processed(&self, key: &ProcessedEventKey) -> StoreResult<bool> {
        Ok(self.markers.read().contains_key(key))
    }
}
