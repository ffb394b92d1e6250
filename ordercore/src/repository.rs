//! Order persistence and the transactional outbox.
//!
//! An order write and the messages it produces are committed in one
//! storage call, so state and published events never diverge. The
//! [`OutboxRelay`] publishes committed messages afterwards; a message can be
//! published more than once but never lost.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::config::OutboxBatchSize;
use crate::errors::{PublishError, StoreResult};
use crate::messaging::{Envelope, EventPublisher, MessageId, OutboundMessage, Topic};
use crate::order::Order;
use crate::retry::RetryConfig;
use crate::types::{OrderId, Timestamp};

/// Persistence for order aggregates.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Stores a new order and its outbox messages. Fails with
    /// `StoreError::AlreadyExists` if the id is taken. Returns the new
    /// version.
    async fn insert(&self, order: &Order, outbox: Vec<OutboundMessage>) -> StoreResult<u64>;

    /// Loads an order.
    async fn load(&self, id: &OrderId) -> StoreResult<Option<Order>>;

    /// Replaces a stored order if it is still at `expected_version`, and
    /// appends its outbox messages, atomically. Fails with
    /// `StoreError::VersionConflict` otherwise. Returns the new version.
    async fn save(
        &self,
        order: &Order,
        expected_version: u64,
        outbox: Vec<OutboundMessage>,
    ) -> StoreResult<u64>;
}

/// A committed message waiting to be published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Destination topic
    pub topic: Topic,
    /// The message, with its stable message id
    pub envelope: Envelope<OutboundMessage>,
    /// When it was committed
    pub created_at: Timestamp,
}

impl OutboxEntry {
    /// Wraps a message for storage.
    pub fn new(message: OutboundMessage) -> Self {
        Self {
            topic: message.topic(),
            envelope: message.into_envelope(),
            created_at: Timestamp::now(),
        }
    }

    /// Id of the wrapped message.
    pub const fn id(&self) -> MessageId {
        self.envelope.message_id
    }
}

/// Read side of the outbox, used by the relay.
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Up to `limit` unpublished entries, oldest first.
    async fn pending(&self, limit: usize) -> StoreResult<Vec<OutboxEntry>>;

    /// Marks entries as published. Unknown ids are ignored.
    async fn mark_published(&self, ids: &[MessageId]) -> StoreResult<()>;
}

/// Result of one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Entries published and marked
    pub published: usize,
    /// Entries left pending for the next pass
    pub deferred: usize,
}

/// Moves committed outbox entries to the transport.
pub struct OutboxRelay {
    outbox: Arc<dyn Outbox>,
    publisher: Arc<dyn EventPublisher>,
    batch_size: OutboxBatchSize,
    retry: RetryConfig,
}

impl OutboxRelay {
    /// Creates a relay.
    pub fn new(
        outbox: Arc<dyn Outbox>,
        publisher: Arc<dyn EventPublisher>,
        batch_size: OutboxBatchSize,
        retry: RetryConfig,
    ) -> Self {
        Self {
            outbox,
            publisher,
            batch_size,
            retry,
        }
    }

    /// Publishes one batch of pending entries in commit order.
    ///
    /// Stops at the first entry that cannot be published, leaving it and
    /// everything after it pending, so that later messages for a partition
    /// never overtake earlier ones.
    #[instrument(name = "outbox.relay_once", skip(self))]
    pub async fn relay_once(&self) -> StoreResult<RelayReport> {
        let entries = self.outbox.pending(self.batch_size.into()).await?;
        let mut published = Vec::with_capacity(entries.len());

        for entry in &entries {
            match self.publish_with_retry(entry).await {
                Ok(()) => published.push(entry.id()),
                Err(error) => {
                    warn!(
                        message_id = %entry.id(),
                        topic = %entry.topic,
                        error = %error,
                        "[outbox.relay] publish failed; leaving remaining entries pending"
                    );
                    break;
                }
            }
        }

        if !published.is_empty() {
            self.outbox.mark_published(&published).await?;
        }

        let report = RelayReport {
            published: published.len(),
            deferred: entries.len() - published.len(),
        };
        if report.published > 0 {
            info!(
                published = report.published,
                deferred = report.deferred,
                "[outbox.relay] batch relayed"
            );
        }
        Ok(report)
    }

    /// Relays until `shutdown` becomes `true`, sleeping `idle` between
    /// passes that found nothing to do.
    pub async fn run(&self, idle: Duration, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let pause = match self.relay_once().await {
                Ok(report) if report.published > 0 && report.deferred == 0 => Duration::ZERO,
                Ok(_) => idle,
                Err(error) => {
                    warn!(error = %error, "[outbox.relay] pass failed");
                    idle
                }
            };
            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("[outbox.relay] stopped");
    }

    async fn publish_with_retry(&self, entry: &OutboxEntry) -> Result<(), PublishError> {
        let attempts = self.retry.attempts();
        let mut attempt = 0;
        loop {
            match self.publisher.publish(entry.topic, &entry.envelope).await {
                Ok(()) => return Ok(()),
                Err(error) if error.is_transient() && attempt + 1 < attempts => {
                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        message_id = %entry.id(),
                        attempt,
                        ?delay,
                        "[outbox.relay] transient publish failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
