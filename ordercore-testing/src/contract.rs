//! Behavioral contracts every storage backend must satisfy.
//!
//! Each `test_*` function takes a factory for the adapter under test and
//! returns a [`ContractTestResult`]. The `*_contract_tests!` macros expand
//! them into `#[tokio::test]` functions so a backend crate can run the whole
//! suite with one invocation. Keys are made unique per run so the suites
//! can share a database.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use ordercore::{
    ClaimOutcome, Currency, CustomerId, IdempotencyLedger, IdempotencyToken, MarkOutcome, Money,
    Order, OrderId, OrderItem, OrderRepository, OrderStatus, OutboundMessage, ProcessedEventKey,
    ProcessedEventLedger, ProductKey, Quantity, ResourceKey, StockAdjuster, StoreError,
};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A violated contract, with the scenario it came from.
#[derive(Debug)]
pub struct ContractTestFailure {
    scenario: &'static str,
    detail: String,
}

impl ContractTestFailure {
    fn new(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self {
            scenario,
            detail: detail.into(),
        }
    }

    fn store_error(scenario: &'static str, operation: &'static str, error: impl fmt::Display) -> Self {
        Self::new(
            scenario,
            format!("{operation} operation returned unexpected error: {error}"),
        )
    }
}

impl fmt::Display for ContractTestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scenario, self.detail)
    }
}

impl std::error::Error for ContractTestFailure {}

/// Outcome of one contract scenario.
pub type ContractTestResult = Result<(), ContractTestFailure>;

fn store_failure<E: fmt::Display>(
    scenario: &'static str,
    operation: &'static str,
) -> impl FnOnce(E) -> ContractTestFailure {
    move |error| ContractTestFailure::store_error(scenario, operation, error)
}

fn ensure(scenario: &'static str, condition: bool, detail: impl FnOnce() -> String) -> ContractTestResult {
    if condition {
        Ok(())
    } else {
        Err(ContractTestFailure::new(scenario, detail()))
    }
}

fn unique(scenario: &str, label: &str) -> String {
    format!("contract-{scenario}-{label}-{}", Uuid::now_v7())
}

fn token(scenario: &'static str, label: &str) -> Result<IdempotencyToken, ContractTestFailure> {
    IdempotencyToken::try_new(unique(scenario, label))
        .map_err(|error| ContractTestFailure::new(scenario, format!("bad token: {error}")))
}

fn resource(scenario: &'static str, label: &str) -> Result<ResourceKey, ContractTestFailure> {
    ResourceKey::try_new(unique(scenario, label))
        .map_err(|error| ContractTestFailure::new(scenario, format!("bad resource key: {error}")))
}

fn product(scenario: &'static str, label: &str) -> Result<ProductKey, ContractTestFailure> {
    ProductKey::try_new(unique(scenario, label))
        .map_err(|error| ContractTestFailure::new(scenario, format!("bad product key: {error}")))
}

fn event_key(scenario: &'static str) -> Result<ProcessedEventKey, ContractTestFailure> {
    ProcessedEventKey::try_new(format!("{}:SKU-1", unique(scenario, "order")))
        .map_err(|error| ContractTestFailure::new(scenario, format!("bad event key: {error}")))
}

/// A two-line USD order with ids unique to `scenario`.
pub fn sample_order(scenario: &'static str) -> Result<Order, ContractTestFailure> {
    let fail = |error: &dyn fmt::Display| ContractTestFailure::new(scenario, format!("fixture: {error}"));
    let usd = Currency::try_new("USD").map_err(|e| fail(&e))?;
    let items = vec![
        OrderItem::new(
            product(scenario, "a")?,
            "Widget",
            Quantity::from(2),
            Money::new(Decimal::new(1000, 2), usd.clone()).map_err(|e| fail(&e))?,
        )
        .map_err(|e| fail(&e))?,
        OrderItem::new(
            product(scenario, "b")?,
            "Gadget",
            Quantity::from(1),
            Money::new(Decimal::new(1500, 2), usd).map_err(|e| fail(&e))?,
        )
        .map_err(|e| fail(&e))?,
    ];
    let id = OrderId::try_new(unique(scenario, "order")).map_err(|e| fail(&e))?;
    let customer = CustomerId::try_new("contract-customer").map_err(|e| fail(&e))?;
    Order::place(id, customer, items)
        .map(|(order, _)| order)
        .map_err(|e| fail(&e))
}

/// The first claim wins, a repeat for the same resource is a replay and a
/// repeat for another resource is a conflict naming the original.
pub async fn test_claim_first_replay_conflict<F, L>(make_ledger: F) -> ContractTestResult
where
    F: Fn() -> L,
    L: IdempotencyLedger,
{
    const SCENARIO: &str = "claim_first_replay_conflict";
    let ledger = make_ledger();
    let token = token(SCENARIO, "token")?;
    let first = resource(SCENARIO, "first")?;
    let second = resource(SCENARIO, "second")?;

    let claim = |resource: ResourceKey| {
        let ledger = &ledger;
        let token = &token;
        async move {
            ledger
                .claim(token, &resource)
                .await
                .map_err(|e| ContractTestFailure::store_error(SCENARIO, "claim", e))
        }
    };

    let outcome = claim(first.clone()).await?;
    ensure(SCENARIO, outcome == ClaimOutcome::Claimed, || {
        format!("first claim should be Claimed, got {outcome:?}")
    })?;

    let outcome = claim(first.clone()).await?;
    ensure(SCENARIO, outcome == ClaimOutcome::Replay, || {
        format!("repeat for same resource should be Replay, got {outcome:?}")
    })?;

    let outcome = claim(second).await?;
    ensure(
        SCENARIO,
        outcome
            == ClaimOutcome::Conflict {
                existing: first.clone(),
            },
        || format!("repeat for other resource should conflict, got {outcome:?}"),
    )?;

    let stored = ledger
        .find(&token)
        .await
        .map_err(|e| ContractTestFailure::store_error(SCENARIO, "find", e))?;
    ensure(
        SCENARIO,
        stored.is_some_and(|claim| claim.resource_key == first),
        || "stored claim should keep the first resource".to_string(),
    )
}

/// Racing claims on one token produce exactly one `Claimed`.
pub async fn test_concurrent_claims_single_winner<F, L>(make_ledger: F) -> ContractTestResult
where
    F: Fn() -> L,
    L: IdempotencyLedger + 'static,
{
    const SCENARIO: &str = "concurrent_claims_single_winner";
    const RACERS: usize = 16;
    let ledger = Arc::new(make_ledger());
    let token = token(SCENARIO, "token")?;
    let resource = resource(SCENARIO, "resource")?;

    let handles = (0..RACERS).map(|_| {
        let ledger = Arc::clone(&ledger);
        let token = token.clone();
        let resource = resource.clone();
        tokio::spawn(async move { ledger.claim(&token, &resource).await })
    });

    let mut claimed = 0;
    for joined in join_all(handles).await {
        let outcome = joined
            .map_err(|e| ContractTestFailure::store_error(SCENARIO, "join", e))?
            .map_err(|e| ContractTestFailure::store_error(SCENARIO, "claim", e))?;
        match outcome {
            ClaimOutcome::Claimed => claimed += 1,
            ClaimOutcome::Replay => {}
            ClaimOutcome::Conflict { .. } => {
                return Err(ContractTestFailure::new(SCENARIO, "same resource reported as conflict"));
            }
        }
    }
    ensure(SCENARIO, claimed == 1, || {
        format!("expected exactly one winner, observed {claimed}")
    })
}

/// Marking is first-writer-wins and visible to `is_processed`.
pub async fn test_mark_once<F, L>(make_ledger: F) -> ContractTestResult
where
    F: Fn() -> L,
    L: ProcessedEventLedger,
{
    const SCENARIO: &str = "mark_once";
    let ledger = make_ledger();
    let key = event_key(SCENARIO)?;

    let seen = ledger
        .is_processed(&key)
        .await
        .map_err(|e| ContractTestFailure::store_error(SCENARIO, "is_processed", e))?;
    ensure(SCENARIO, !seen, || "fresh key reported as processed".to_string())?;

    let first = ledger
        .mark_processed(&key)
        .await
        .map_err(|e| ContractTestFailure::store_error(SCENARIO, "mark_processed", e))?;
    let second = ledger
        .mark_processed(&key)
        .await
        .map_err(|e| ContractTestFailure::store_error(SCENARIO, "mark_processed", e))?;
    ensure(
        SCENARIO,
        first == MarkOutcome::Processed && second == MarkOutcome::AlreadyProcessed,
        || format!("expected Processed then AlreadyProcessed, got {first:?} then {second:?}"),
    )?;

    let seen = ledger
        .is_processed(&key)
        .await
        .map_err(|e| ContractTestFailure::store_error(SCENARIO, "is_processed", e))?;
    ensure(SCENARIO, seen, || "marked key not reported as processed".to_string())
}

/// Racing marks on one key produce exactly one `Processed`.
pub async fn test_concurrent_marks_single_winner<F, L>(make_ledger: F) -> ContractTestResult
where
    F: Fn() -> L,
    L: ProcessedEventLedger + 'static,
{
    const SCENARIO: &str = "concurrent_marks_single_winner";
    const RACERS: usize = 16;
    let ledger = Arc::new(make_ledger());
    let key = event_key(SCENARIO)?;

    let handles = (0..RACERS).map(|_| {
        let ledger = Arc::clone(&ledger);
        let key = key.clone();
        tokio::spawn(async move { ledger.mark_processed(&key).await })
    });

    let mut winners = 0;
    for joined in join_all(handles).await {
        let outcome = joined
            .map_err(|e| ContractTestFailure::store_error(SCENARIO, "join", e))?
            .map_err(|e| ContractTestFailure::store_error(SCENARIO, "mark_processed", e))?;
        if outcome.should_proceed() {
            winners += 1;
        }
    }
    ensure(SCENARIO, winners == 1, || {
        format!("expected exactly one winner, observed {winners}")
    })
}

/// Registration is insert-if-absent and reductions stop at zero.
pub async fn test_register_and_reduce<F, A>(make_adjuster: F) -> ContractTestResult
where
    F: Fn() -> A,
    A: StockAdjuster,
{
    const SCENARIO: &str = "register_and_reduce";
    let stock = make_adjuster();
    let sku = product(SCENARIO, "sku")?;
    let created = stock
        .register(&sku, Quantity::from(3))
        .await
        .map_err(store_failure(SCENARIO, "register"))?;
    let again = stock
        .register(&sku, Quantity::from(99))
        .await
        .map_err(store_failure(SCENARIO, "register"))?;
    ensure(SCENARIO, created && !again, || {
        format!("register should create once, got {created} then {again}")
    })?;

    for _ in 0..3 {
        let reduced = stock
            .reduce_if_sufficient(&sku, Quantity::from(1))
            .await
            .map_err(store_failure(SCENARIO, "reduce_if_sufficient"))?;
        ensure(SCENARIO, reduced, || "reduction within stock refused".to_string())?;
    }
    let reduced = stock
        .reduce_if_sufficient(&sku, Quantity::from(1))
        .await
        .map_err(store_failure(SCENARIO, "reduce_if_sufficient"))?;
    ensure(SCENARIO, !reduced, || "reduction below zero accepted".to_string())?;

    let level = stock.level(&sku).await.map_err(store_failure(SCENARIO, "level"))?;
    ensure(
        SCENARIO,
        level.as_ref().is_some_and(|level| level.available == Quantity::ZERO),
        || format!("expected zero stock, got {level:?}"),
    )?;

    let restocked = stock
        .increase(&sku, Quantity::from(2))
        .await
        .map_err(|e| ContractTestFailure::store_error(SCENARIO, "increase", e))?;
    ensure(SCENARIO, restocked.available == Quantity::from(2), || {
        format!("restock should leave 2, got {}", restocked.available)
    })
}

/// Unknown products are never reduced and have no level.
pub async fn test_unknown_product<F, A>(make_adjuster: F) -> ContractTestResult
where
    F: Fn() -> A,
    A: StockAdjuster,
{
    const SCENARIO: &str = "unknown_product";
    let stock = make_adjuster();
    let sku = product(SCENARIO, "missing")?;

    let reduced = stock
        .reduce_if_sufficient(&sku, Quantity::from(1))
        .await
        .map_err(|e| ContractTestFailure::store_error(SCENARIO, "reduce_if_sufficient", e))?;
    let level = stock
        .level(&sku)
        .await
        .map_err(|e| ContractTestFailure::store_error(SCENARIO, "level", e))?;
    ensure(SCENARIO, !reduced && level.is_none(), || {
        format!("unknown product reduced={reduced} level={level:?}")
    })?;

    let increased = stock.increase(&sku, Quantity::from(1)).await;
    ensure(SCENARIO, increased.is_err(), || {
        "increase on unknown product should fail".to_string()
    })
}

/// `N` racing reductions of `q` against `(N - 1) * q` units: exactly
/// `N - 1` succeed and stock ends at zero.
pub async fn test_concurrent_reductions_never_oversell<F, A>(make_adjuster: F) -> ContractTestResult
where
    F: Fn() -> A,
    A: StockAdjuster + 'static,
{
    const SCENARIO: &str = "concurrent_reductions_never_oversell";
    const RACERS: u32 = 20;
    const EACH: u32 = 3;
    let stock = Arc::new(make_adjuster());
    let sku = product(SCENARIO, "sku")?;

    let _ = stock
        .register(&sku, Quantity::from((RACERS - 1) * EACH))
        .await
        .map_err(|e| ContractTestFailure::store_error(SCENARIO, "register", e))?;

    let handles = (0..RACERS).map(|_| {
        let stock = Arc::clone(&stock);
        let sku = sku.clone();
        tokio::spawn(async move { stock.reduce_if_sufficient(&sku, Quantity::from(EACH)).await })
    });

    let mut succeeded = 0;
    for joined in join_all(handles).await {
        let reduced = joined
            .map_err(|e| ContractTestFailure::store_error(SCENARIO, "join", e))?
            .map_err(|e| ContractTestFailure::store_error(SCENARIO, "reduce_if_sufficient", e))?;
        if reduced {
            succeeded += 1;
        }
    }
    ensure(SCENARIO, succeeded == RACERS - 1, || {
        format!("expected {} successful reductions, observed {succeeded}", RACERS - 1)
    })?;

    let level = stock
        .level(&sku)
        .await
        .map_err(|e| ContractTestFailure::store_error(SCENARIO, "level", e))?;
    ensure(
        SCENARIO,
        level.as_ref().is_some_and(|level| level.available == Quantity::ZERO),
        || format!("expected zero stock after the race, got {level:?}"),
    )
}

/// Insert, load, duplicate insert and a stale save.
pub async fn test_order_versioning<F, R>(make_repository: F) -> ContractTestResult
where
    F: Fn() -> R,
    R: OrderRepository,
{
    const SCENARIO: &str = "order_versioning";
    let orders = make_repository();
    let order = sample_order(SCENARIO)?;

    let version = orders
        .insert(&order, Vec::new())
        .await
        .map_err(|e| ContractTestFailure::store_error(SCENARIO, "insert", e))?;
    ensure(SCENARIO, version == 1, || format!("first version should be 1, got {version}"))?;

    let duplicate = orders.insert(&order, Vec::new()).await;
    ensure(
        SCENARIO,
        matches!(duplicate, Err(StoreError::AlreadyExists(_))),
        || format!("duplicate insert should fail with AlreadyExists, got {duplicate:?}"),
    )?;

    let mut loaded = orders
        .load(order.id())
        .await
        .map_err(|e| ContractTestFailure::store_error(SCENARIO, "load", e))?
        .ok_or_else(|| ContractTestFailure::new(SCENARIO, "inserted order not found"))?;
    ensure(
        SCENARIO,
        loaded.items() == order.items() && loaded.version() == 1,
        || "loaded order differs from inserted order".to_string(),
    )?;

    let event = loaded
        .update_status(OrderStatus::Paid)
        .map_err(|e| ContractTestFailure::new(SCENARIO, e.to_string()))?;
    let version = orders
        .save(&loaded, 1, vec![OutboundMessage::Domain(event)])
        .await
        .map_err(|e| ContractTestFailure::store_error(SCENARIO, "save", e))?;
    ensure(SCENARIO, version == 2, || format!("saved version should be 2, got {version}"))?;

    let stale = orders.save(&loaded, 1, Vec::new()).await;
    ensure(
        SCENARIO,
        matches!(stale, Err(StoreError::VersionConflict { expected: 1, .. })),
        || format!("stale save should conflict, got {stale:?}"),
    )?;

    let stored = orders
        .load(order.id())
        .await
        .map_err(|e| ContractTestFailure::store_error(SCENARIO, "load", e))?;
    ensure(
        SCENARIO,
        stored
            .as_ref()
            .is_some_and(|stored| stored.status() == OrderStatus::Paid && stored.version() == 2),
        || format!("stored order after save: {stored:?}"),
    )
}

/// Line edits survive a round trip through storage in their original order.
pub async fn test_order_items_round_trip<F, R>(make_repository: F) -> ContractTestResult
where
    F: Fn() -> R,
    R: OrderRepository,
{
    const SCENARIO: &str = "order_items_round_trip";
    let orders = make_repository();
    let mut order = sample_order(SCENARIO)?;
    let _ = orders
        .insert(&order, Vec::new())
        .await
        .map_err(|e| ContractTestFailure::store_error(SCENARIO, "insert", e))?;

    let first = order.items()[0].product_key().clone();
    let _ = order
        .update_item_quantity(&first, Quantity::from(5))
        .map_err(|e| ContractTestFailure::new(SCENARIO, e.to_string()))?;
    let second = order.items()[1].product_key().clone();
    let _ = order
        .remove_item(&second)
        .map_err(|e| ContractTestFailure::new(SCENARIO, e.to_string()))?;
    let _ = orders
        .save(&order, 1, Vec::new())
        .await
        .map_err(|e| ContractTestFailure::store_error(SCENARIO, "save", e))?;

    let stored = orders
        .load(order.id())
        .await
        .map_err(|e| ContractTestFailure::store_error(SCENARIO, "load", e))?
        .ok_or_else(|| ContractTestFailure::new(SCENARIO, "order vanished"))?;
    ensure(SCENARIO, stored.items() == order.items(), || {
        format!("items differ: stored {:?}, expected {:?}", stored.items(), order.items())
    })?;
    ensure(SCENARIO, stored.total() == order.total(), || {
        "derived total changed across storage".to_string()
    })
}

/// Runs the idempotency ledger contracts against `make_ledger`.
#[macro_export]
macro_rules! idempotency_ledger_contract_tests {
    (suite = $suite:ident, make_ledger = $make_ledger:expr $(,)?) => {
        #[allow(non_snake_case)]
        mod $suite {
            #[allow(unused_imports)]
            use super::*;
            use $crate::contract::{
                test_claim_first_replay_conflict, test_concurrent_claims_single_winner,
            };

            #[tokio::test(flavor = "multi_thread")]
            async fn claim_first_replay_conflict_contract() {
                test_claim_first_replay_conflict($make_ledger)
                    .await
                    .expect("idempotency ledger contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn concurrent_claims_single_winner_contract() {
                test_concurrent_claims_single_winner($make_ledger)
                    .await
                    .expect("idempotency ledger contract failed");
            }
        }
    };
}

pub use idempotency_ledger_contract_tests;

/// Runs the processed-event ledger contracts against `make_ledger`.
#[macro_export]
macro_rules! processed_event_ledger_contract_tests {
    (suite = $suite:ident, make_ledger = $make_ledger:expr $(,)?) => {
        #[allow(non_snake_case)]
        mod $suite {
            #[allow(unused_imports)]
            use super::*;
            use $crate::contract::{test_concurrent_marks_single_winner, test_mark_once};

            #[tokio::test(flavor = "multi_thread")]
            async fn mark_once_contract() {
                test_mark_once($make_ledger)
                    .await
                    .expect("processed-event ledger contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn concurrent_marks_single_winner_contract() {
                test_concurrent_marks_single_winner($make_ledger)
                    .await
                    .expect("processed-event ledger contract failed");
            }
        }
    };
}

pub use processed_event_ledger_contract_tests;

/// Runs the stock adjuster contracts against `make_adjuster`.
#[macro_export]
macro_rules! stock_adjuster_contract_tests {
    (suite = $suite:ident, make_adjuster = $make_adjuster:expr $(,)?) => {
        #[allow(non_snake_case)]
        mod $suite {
            #[allow(unused_imports)]
            use super::*;
            use $crate::contract::{
                test_concurrent_reductions_never_oversell, test_register_and_reduce,
                test_unknown_product,
            };

            #[tokio::test(flavor = "multi_thread")]
            async fn register_and_reduce_contract() {
                test_register_and_reduce($make_adjuster)
                    .await
                    .expect("stock adjuster contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn unknown_product_contract() {
                test_unknown_product($make_adjuster)
                    .await
                    .expect("stock adjuster contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn concurrent_reductions_never_oversell_contract() {
                test_concurrent_reductions_never_oversell($make_adjuster)
                    .await
                    .expect("stock adjuster contract failed");
            }
        }
    };
}

pub use stock_adjuster_contract_tests;

/// Runs the order repository contracts against `make_repository`.
#[macro_export]
macro_rules! order_repository_contract_tests {
    (suite = $suite:ident, make_repository = $make_repository:expr $(,)?) => {
        #[allow(non_snake_case)]
        mod $suite {
            #[allow(unused_imports)]
            use super::*;
            use $crate::contract::{test_order_items_round_trip, test_order_versioning};

            #[tokio::test(flavor = "multi_thread")]
            async fn order_versioning_contract() {
                test_order_versioning($make_repository)
                    .await
                    .expect("order repository contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn order_items_round_trip_contract() {
                test_order_items_round_trip($make_repository)
                    .await
                    .expect("order repository contract failed");
            }
        }
    };
}

pub use order_repository_contract_tests;
