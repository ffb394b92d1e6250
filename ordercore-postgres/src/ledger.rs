use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ordercore::{
    ClaimOutcome, IdempotencyClaim, IdempotencyLedger, IdempotencyToken, MarkOutcome,
    ProcessedEventKey, ProcessedEventLedger, ResourceKey, StoreError, StoreResult,
};
use sqlx::{query, Row};
use tracing::{debug, instrument};

use crate::error::{corrupt, map_sqlx_error};
use crate::retry::retry_transient;
use crate::PostgresStore;

#[async_trait]
impl IdempotencyLedger for PostgresStore {
    #[instrument(name = "postgres.claim", skip_all, fields(%token, %resource_key))]
    async fn claim(
        &self,
        token: &IdempotencyToken,
        resource_key: &ResourceKey,
    ) -> StoreResult<ClaimOutcome> {
        let inserted = query(
            "INSERT INTO idempotency_claims (token, resource_key) VALUES ($1, $2) \
             ON CONFLICT (token) DO NOTHING",
        )
        .bind(token.as_ref())
        .bind(resource_key.as_ref())
        .execute(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, "claim"))?
        .rows_affected();

        if inserted == 1 {
            return Ok(ClaimOutcome::Claimed);
        }

        // Claims are never deleted, so the winner's row is there to read.
        let existing = self
            .find(token)
            .await?
            .ok_or_else(|| StoreError::Internal(format!("claim for {token} disappeared")))?;
        let outcome = ClaimOutcome::against(&existing, resource_key);
        debug!(?outcome, "[postgres.claim] token already claimed");
        Ok(outcome)
    }

    async fn find(&self, token: &IdempotencyToken) -> StoreResult<Option<IdempotencyClaim>> {
        let row = retry_transient(&self.retry, "find_claim", || async move {
            query("SELECT resource_key, created_at FROM idempotency_claims WHERE token = $1")
                .bind(token.as_ref())
                .fetch_optional(&self.pool)
                .await
                .map_err(|error| map_sqlx_error(error, "find_claim"))
        })
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let resource: String = row
            .try_get("resource_key")
            .map_err(|error| map_sqlx_error(error, "find_claim"))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|error| map_sqlx_error(error, "find_claim"))?;

        Ok(Some(IdempotencyClaim {
            token: token.clone(),
            resource_key: ResourceKey::try_new(resource).map_err(|e| corrupt("find_claim", e))?,
            created_at: created_at.into(),
        }))
    }
}

#[async_trait]
impl ProcessedEventLedger for PostgresStore {
    #[instrument(name = "postgres.mark_processed", skip_all, fields(%key))]
    async fn mark_processed(&self, key: &ProcessedEventKey) -> StoreResult<MarkOutcome> {
        let inserted = query(
            "INSERT INTO processed_events (key) VALUES ($1) ON CONFLICT (key) DO NOTHING",
        )
        .bind(key.as_ref())
        .execute(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, "mark_processed"))?
        .rows_affected();

        Ok(if inserted == 1 {
            MarkOutcome::Processed
        } else {
            MarkOutcome::AlreadyProcessed
        })
    }

    async fn is_processed(&self, key: &ProcessedEventKey) -> StoreResult<bool> {
        let row = retry_transient(&self.retry, "is_processed", || async move {
            query("SELECT 1 FROM processed_events WHERE key = $1")
                .bind(key.as_ref())
                .fetch_optional(&self.pool)
                .await
                .map_err(|error| map_sqlx_error(error, "is_processed"))
        })
        .await?;
        Ok(row.is_some())
    }
}
