//! Fault injection for any `OrderCore` port.
//!
//! [`Chaos`] wraps an adapter and, per call, may fail before delegating
//! (nothing happened), report a version conflict on order writes, or
//! delegate and then report a failure anyway (the effect happened but the
//! caller cannot know). The last mode is what at-least-once delivery looks
//! like from the inside, so handlers must tolerate it.

use async_trait::async_trait;
use nutype::nutype;
use ordercore::{
    ClaimOutcome, Envelope, EventPublisher, IdempotencyClaim, IdempotencyLedger,
    IdempotencyToken, MarkOutcome, MessageId, Order, OrderId, OrderRepository, Outbox,
    OutboxEntry, OutboundMessage, ProcessedEventKey, ProcessedEventLedger, ProductKey,
    PublishError, Quantity, ResourceKey, StockAdjuster, StockError, StockLevel, StoreError,
    StoreResult, Topic,
};
use parking_lot::Mutex;
use rand::{random, rngs::StdRng, Rng, SeedableRng};

/// Injection rate in `[0.0, 1.0]`.
///
/// ```
/// use ordercore_testing::chaos::Probability;
///
/// assert!(Probability::try_new(0.5).is_ok());
/// assert!(Probability::try_new(1.5).is_err());
/// ```
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Display, Into)
)]
pub struct Probability(f32);

impl Probability {
    fn clamped(value: f32) -> Self {
        Self::try_new(value.clamp(0.0, 1.0)).expect("clamped value is always valid")
    }

    fn never() -> Self {
        Self::clamped(0.0)
    }
}

/// How often each kind of fault is injected.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    deterministic_seed: Option<u64>,
    failure_probability: Probability,
    version_conflict_probability: Probability,
    lost_ack_probability: Probability,
}

impl ChaosConfig {
    /// No faults, fixed seed.
    pub fn deterministic() -> Self {
        Self {
            deterministic_seed: Some(0),
            ..Self::default()
        }
    }

    /// Uses `seed` for reproducible fault sequences.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.deterministic_seed = Some(seed);
        self
    }

    /// Fail before delegating.
    #[must_use]
    pub fn with_failure_probability(mut self, probability: f32) -> Self {
        self.failure_probability = Probability::clamped(probability);
        self
    }

    /// Report a version conflict instead of saving an order.
    #[must_use]
    pub fn with_version_conflict_probability(mut self, probability: f32) -> Self {
        self.version_conflict_probability = Probability::clamped(probability);
        self
    }

    /// Delegate, then report a failure.
    #[must_use]
    pub fn with_lost_ack_probability(mut self, probability: f32) -> Self {
        self.lost_ack_probability = Probability::clamped(probability);
        self
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: None,
            failure_probability: Probability::never(),
            version_conflict_probability: Probability::never(),
            lost_ack_probability: Probability::never(),
        }
    }
}

/// Wraps `self` in a [`Chaos`] adapter.
pub trait ChaosExt: Sized {
    /// Adds fault injection according to `config`.
    fn with_chaos(self, config: ChaosConfig) -> Chaos<Self>;
}

impl<T> ChaosExt for T {
    fn with_chaos(self, config: ChaosConfig) -> Chaos<Self> {
        Chaos::new(self, config)
    }
}

/// A fault-injecting wrapper; implements every port its inner adapter does.
pub struct Chaos<T> {
    inner: T,
    config: ChaosConfig,
    rng: Mutex<StdRng>,
}

#[derive(Clone, Copy)]
enum Call {
    Read,
    Write,
    OrderSave,
}

enum Fault {
    None,
    Before,
    Conflict,
    LostAck,
}

impl<T> Chaos<T> {
    /// Wraps `inner`.
    pub fn new(inner: T, config: ChaosConfig) -> Self {
        let rng = match config.deterministic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(random()),
        };
        Self {
            inner,
            config,
            rng: Mutex::new(rng),
        }
    }

    /// The wrapped adapter.
    pub const fn inner(&self) -> &T {
        &self.inner
    }

    fn should_inject(&self, probability: Probability) -> bool {
        let probability: f32 = probability.into();
        if probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        self.rng.lock().random_bool(f64::from(probability))
    }

    fn fault(&self, call: Call) -> Fault {
        if matches!(call, Call::OrderSave)
            && self.should_inject(self.config.version_conflict_probability)
        {
            Fault::Conflict
        } else if self.should_inject(self.config.failure_probability) {
            Fault::Before
        } else if !matches!(call, Call::Read)
            && self.should_inject(self.config.lost_ack_probability)
        {
            Fault::LostAck
        } else {
            Fault::None
        }
    }
}

fn injected(operation: &str) -> StoreError {
    StoreError::Unavailable(format!("chaos: {operation}"))
}

async fn guarded<F, R>(fault: Fault, operation: &str, call: F) -> StoreResult<R>
where
    F: std::future::Future<Output = StoreResult<R>> + Send,
{
    match fault {
        Fault::Before | Fault::Conflict => Err(injected(operation)),
        Fault::LostAck => {
            let _ = call.await?;
            Err(injected(operation))
        }
        Fault::None => call.await,
    }
}

#[async_trait]
impl<T: IdempotencyLedger> IdempotencyLedger for Chaos<T> {
    async fn claim(
        &self,
        token: &IdempotencyToken,
        resource_key: &ResourceKey,
    ) -> StoreResult<ClaimOutcome> {
        guarded(self.fault(Call::Write), "claim", self.inner.claim(token, resource_key)).await
    }

    async fn find(&self, token: &IdempotencyToken) -> StoreResult<Option<IdempotencyClaim>> {
        guarded(self.fault(Call::Read), "find", self.inner.find(token)).await
    }
}

#[async_trait]
impl<T: ProcessedEventLedger> ProcessedEventLedger for Chaos<T> {
    async fn mark_processed(&self, key: &ProcessedEventKey) -> StoreResult<MarkOutcome> {
        guarded(self.fault(Call::Write), "mark_processed", self.inner.mark_processed(key)).await
    }

    async fn is_processed(&self, key: &ProcessedEventKey) -> StoreResult<bool> {
        guarded(self.fault(Call::Read), "is_processed", self.inner.is_processed(key)).await
    }
}

#[async_trait]
impl<T: StockAdjuster> StockAdjuster for Chaos<T> {
    async fn reduce_if_sufficient(
        &self,
        product_key: &ProductKey,
        quantity: Quantity,
    ) -> StoreResult<bool> {
        guarded(
            self.fault(Call::Write),
            "reduce_if_sufficient",
            self.inner.reduce_if_sufficient(product_key, quantity),
        )
        .await
    }

    async fn increase(
        &self,
        product_key: &ProductKey,
        quantity: Quantity,
    ) -> Result<StockLevel, StockError> {
        match self.fault(Call::Write) {
            Fault::Before | Fault::Conflict => Err(injected("increase").into()),
            Fault::LostAck => {
                let _ = self.inner.increase(product_key, quantity).await?;
                Err(injected("increase").into())
            }
            Fault::None => self.inner.increase(product_key, quantity).await,
        }
    }

    async fn register(&self, product_key: &ProductKey, initial: Quantity) -> StoreResult<bool> {
        guarded(
            self.fault(Call::Write),
            "register",
            self.inner.register(product_key, initial),
        )
        .await
    }

    async fn level(&self, product_key: &ProductKey) -> StoreResult<Option<StockLevel>> {
        guarded(self.fault(Call::Read), "level", self.inner.level(product_key)).await
    }
}

#[async_trait]
impl<T: OrderRepository> OrderRepository for Chaos<T> {
    async fn insert(&self, order: &Order, outbox: Vec<OutboundMessage>) -> StoreResult<u64> {
        guarded(self.fault(Call::Write), "insert", self.inner.insert(order, outbox)).await
    }

    async fn load(&self, id: &OrderId) -> StoreResult<Option<Order>> {
        guarded(self.fault(Call::Read), "load", self.inner.load(id)).await
    }

    async fn save(
        &self,
        order: &Order,
        expected_version: u64,
        outbox: Vec<OutboundMessage>,
    ) -> StoreResult<u64> {
        match self.fault(Call::OrderSave) {
            Fault::Conflict => Err(StoreError::VersionConflict {
                key: order.id().to_string(),
                expected: expected_version,
            }),
            fault => {
                guarded(fault, "save", self.inner.save(order, expected_version, outbox)).await
            }
        }
    }
}

#[async_trait]
impl<T: Outbox> Outbox for Chaos<T> {
    async fn pending(&self, limit: usize) -> StoreResult<Vec<OutboxEntry>> {
        guarded(self.fault(Call::Read), "pending", self.inner.pending(limit)).await
    }

    async fn mark_published(&self, ids: &[MessageId]) -> StoreResult<()> {
        guarded(self.fault(Call::Write), "mark_published", self.inner.mark_published(ids)).await
    }
}

#[async_trait]
impl<T: EventPublisher> EventPublisher for Chaos<T> {
    async fn publish(
        &self,
        topic: Topic,
        envelope: &Envelope<OutboundMessage>,
    ) -> Result<(), PublishError> {
        let unavailable = || PublishError::Unavailable("chaos: publish".to_string());
        match self.fault(Call::Write) {
            Fault::Before | Fault::Conflict => Err(unavailable()),
            Fault::LostAck => {
                self.inner.publish(topic, envelope).await?;
                Err(unavailable())
            }
            Fault::None => self.inner.publish(topic, envelope).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordercore_memory::{InMemoryProcessedEventLedger, InMemoryStockStore};

    #[test]
    fn deterministic_config_sets_seed() {
        assert!(ChaosConfig::default().deterministic_seed.is_none());
        assert!(ChaosConfig::deterministic().deterministic_seed.is_some());
    }

    #[test]
    fn out_of_range_rates_are_clamped() {
        let config = ChaosConfig::default().with_failure_probability(7.0);
        assert!((f32::from(config.failure_probability) - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn zero_probability_passes_through() {
        let stock = InMemoryStockStore::new().with_chaos(ChaosConfig::deterministic());
        let sku = ProductKey::try_new("SKU-A").unwrap();

        assert!(stock.register(&sku, Quantity::from(2)).await.unwrap());
        assert!(stock
            .reduce_if_sufficient(&sku, Quantity::from(2))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn lost_ack_applies_the_effect() {
        let ledger = InMemoryProcessedEventLedger::new();
        let chaos = ledger
            .clone()
            .with_chaos(ChaosConfig::deterministic().with_lost_ack_probability(1.0));
        let key = ProcessedEventKey::try_new("o-1:SKU-A").unwrap();

        assert!(chaos.mark_processed(&key).await.unwrap_err().is_transient());
        assert!(ledger.is_processed(&key).await.unwrap());
    }
}
