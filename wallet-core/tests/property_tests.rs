//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify the critical invariants:
//! - Non-negativity: every bucket of every wallet stays ≥ 0
//! - Idempotence: one mutation per idempotency key, however often retried
//! - Reconciliation: newest audit snapshot == live available balance
//! - Linearizability: N concurrent debits of A against balance B succeed
//!   exactly floor(B/A) times

use async_trait::async_trait;
use proptest::prelude::*;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;
use wallet_core::{
    Config, CreditRequest, DebitRequest, DepositIntent, DepositIntentRequest, DepositRequest,
    Error, Money, PaymentGateway, PaymentGatewayError, RecordingEventSink, TransactionKind,
    TransactionStatus, WalletEngine, WebhookStatus,
};

use wallet_core::Currency;

/// Gateway stub that mints sequential intents
#[derive(Default)]
struct StubGateway {
    calls: AtomicUsize,
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_deposit_intent(
        &self,
        _request: DepositIntentRequest,
    ) -> Result<DepositIntent, PaymentGatewayError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(DepositIntent {
            id: format!("intent-{n}"),
            redirect_url: format!("https://pay.example/checkout/{n}"),
        })
    }
}

struct Harness {
    engine: Arc<WalletEngine>,
    sink: Arc<RecordingEventSink>,
    _temp: tempfile::TempDir,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn harness() -> Harness {
    init_tracing();
    let temp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp.path().to_path_buf();

    let sink = Arc::new(RecordingEventSink::new());
    let engine = WalletEngine::open(&config, Arc::new(StubGateway::default()), sink.clone()).unwrap();

    Harness {
        engine: Arc::new(engine),
        sink,
        _temp: temp,
    }
}

fn money(s: &str) -> Money {
    Money::from_str(s).unwrap()
}

fn credit_request(user_id: Uuid, currency: Currency, amount: Money, key: String) -> CreditRequest {
    CreditRequest {
        user_id,
        currency,
        amount,
        kind: TransactionKind::Adjustment,
        reason: None,
        idempotency_key: key,
        source_transaction_id: None,
        metadata: HashMap::new(),
    }
}

fn debit_request(
    user_id: Uuid,
    currency: Currency,
    amount: Money,
    key: String,
    lock_funds: bool,
) -> DebitRequest {
    DebitRequest {
        user_id,
        currency,
        amount,
        kind: TransactionKind::Withdrawal,
        lock_funds,
        reason: None,
        idempotency_key: key,
        source_transaction_id: None,
        metadata: HashMap::new(),
    }
}

/// Strategy for generating valid amounts (0.01 ..= 10000.00)
fn amount_strategy() -> impl Strategy<Value = Money> {
    (1i64..1_000_000).prop_map(Money::from_minor_units)
}

/// Strategy for generating currencies
fn currency_strategy() -> impl Strategy<Value = Currency> {
    prop_oneof![
        Just(Currency::USD),
        Just(Currency::EUR),
        Just(Currency::GBP),
        Just(Currency::BRL),
        Just(Currency::INR),
    ]
}

/// One step of a random wallet workload
#[derive(Debug, Clone)]
enum WorkloadOp {
    Credit(Money),
    Debit { amount: Money, lock_funds: bool },
    Reserve(Money),
    Settle { stake: Money, win: Money },
}

fn workload_op_strategy() -> impl Strategy<Value = WorkloadOp> {
    prop_oneof![
        amount_strategy().prop_map(WorkloadOp::Credit),
        (amount_strategy(), any::<bool>())
            .prop_map(|(amount, lock_funds)| WorkloadOp::Debit { amount, lock_funds }),
        amount_strategy().prop_map(WorkloadOp::Reserve),
        (amount_strategy(), amount_strategy())
            .prop_map(|(stake, win)| WorkloadOp::Settle { stake, win }),
    ]
}

/// Apply a workload step, swallowing expected business rejections
async fn apply_op(engine: &WalletEngine, user: Uuid, currency: Currency, index: usize, op: WorkloadOp) {
    let result = match op {
        WorkloadOp::Credit(amount) => engine
            .credit(credit_request(user, currency, amount, format!("c-{index}")))
            .await
            .map(|_| ()),
        WorkloadOp::Debit { amount, lock_funds } => engine
            .debit(debit_request(
                user,
                currency,
                amount,
                format!("d-{index}"),
                lock_funds,
            ))
            .await
            .map(|_| ()),
        WorkloadOp::Reserve(amount) => engine
            .reserve_bet_amount(user, currency, amount)
            .await
            .map(|_| ()),
        WorkloadOp::Settle { stake, win } => engine
            .settle_bet(user, currency, stake, win)
            .await
            .map(|_| ()),
    };

    match result {
        Ok(())
        | Err(Error::InsufficientFunds { .. })
        | Err(Error::InvalidAmount(_)) => {}
        Err(other) => panic!("unexpected workload failure: {other}"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: a single credit is fully reflected in balance and audit
    #[test]
    fn prop_credit_reflected_in_balance_and_audit(
        amount in amount_strategy(),
        currency in currency_strategy(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let h = harness();
            let user = Uuid::new_v4();

            h.engine
                .credit(credit_request(user, currency, amount, "c-0".to_string()))
                .await
                .unwrap();

            let balance = h.engine.balance(user, currency).await.unwrap();
            prop_assert_eq!(balance.available, amount);

            let audit = h.engine.latest_audit(user, currency).await.unwrap().unwrap();
            prop_assert_eq!(audit.balance_after, amount);
            Ok(())
        })?;
    }

    /// Property: replaying an idempotency key never mutates twice
    #[test]
    fn prop_idempotent_replay(
        amount in amount_strategy(),
        replays in 1usize..5,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let h = harness();
            let user = Uuid::new_v4();

            let first = h.engine
                .credit(credit_request(user, Currency::USD, amount, "same".to_string()))
                .await
                .unwrap();

            for _ in 0..replays {
                let replay = h.engine
                    .credit(credit_request(user, Currency::USD, amount, "same".to_string()))
                    .await
                    .unwrap();
                prop_assert_eq!(replay.id, first.id);
            }

            let balance = h.engine.balance(user, Currency::USD).await.unwrap();
            prop_assert_eq!(balance.available, amount);
            Ok(())
        })?;
    }

    /// Property: every bucket stays non-negative under a random workload
    #[test]
    fn prop_buckets_never_negative(
        ops in prop::collection::vec(workload_op_strategy(), 1..24),
        currency in currency_strategy(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let h = harness();
            let user = Uuid::new_v4();

            for (index, op) in ops.into_iter().enumerate() {
                apply_op(&h.engine, user, currency, index, op).await;

                let balance = h.engine.balance(user, currency).await.unwrap();
                prop_assert!(!balance.available.is_negative());
                prop_assert!(!balance.bonus.is_negative());
                prop_assert!(!balance.locked.is_negative());
            }
            Ok(())
        })?;
    }

    /// Property: the newest audit snapshot matches the live balance after
    /// any workload
    #[test]
    fn prop_audit_reconciles_with_balance(
        ops in prop::collection::vec(workload_op_strategy(), 1..24),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let h = harness();
            let user = Uuid::new_v4();

            let mut mutated = false;
            for (index, op) in ops.into_iter().enumerate() {
                let audit_before = h.engine.audit_trail(user, Currency::USD).await.unwrap().len();
                apply_op(&h.engine, user, Currency::USD, index, op).await;
                mutated |= h.engine.audit_trail(user, Currency::USD).await.unwrap().len() > audit_before;
            }

            if mutated {
                let balance = h.engine.balance(user, Currency::USD).await.unwrap();
                let audit = h.engine
                    .latest_audit(user, Currency::USD)
                    .await
                    .unwrap()
                    .unwrap();
                prop_assert_eq!(audit.balance_after, balance.available);
            }
            Ok(())
        })?;
    }
}

mod integration_tests {
    use super::*;

    /// N concurrent debits of A against balance B succeed for exactly
    /// floor(B/A) of them, regardless of interleaving.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_debits_linearize() {
        let h = harness();
        let user = Uuid::new_v4();

        h.engine
            .credit(credit_request(
                user,
                Currency::USD,
                money("100.00"),
                "seed".to_string(),
            ))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .debit(debit_request(
                        user,
                        Currency::USD,
                        money("30.00"),
                        format!("d-{i}"),
                        false,
                    ))
                    .await
            }));
        }

        let mut successes = 0;
        let mut rejections = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(Error::InsufficientFunds { .. }) => rejections += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        // floor(100 / 30) = 3
        assert_eq!(successes, 3);
        assert_eq!(rejections, 7);

        let balance = h.engine.balance(user, Currency::USD).await.unwrap();
        assert_eq!(balance.available, money("10.00"));

        let audit = h
            .engine
            .latest_audit(user, Currency::USD)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(audit.balance_after, balance.available);
    }

    /// Concurrent requests racing on one idempotency key mutate once.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_same_key_credits_apply_once() {
        let h = harness();
        let user = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .credit(credit_request(
                        user,
                        Currency::USD,
                        money("25.00"),
                        "shared-key".to_string(),
                    ))
                    .await
                    .unwrap()
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.iter().collect::<std::collections::HashSet<_>>().len(), 1);

        let balance = h.engine.balance(user, Currency::USD).await.unwrap();
        assert_eq!(balance.available, money("25.00"));
    }

    /// A deposit webhook success applies the pending amount and writes
    /// exactly one audit row; a duplicate webhook is a no-op.
    #[tokio::test]
    async fn duplicate_webhook_settles_once() {
        let h = harness();
        let user = Uuid::new_v4();

        let pending = h
            .engine
            .create_deposit_intent(DepositRequest {
                user_id: user,
                currency: Currency::USD,
                amount: money("50.00"),
                idempotency_key: "dep-1".to_string(),
                source_transaction_id: None,
                metadata: HashMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(pending.transaction.status, TransactionStatus::Pending);

        let external_id = pending.intent.id;
        h.engine
            .reconcile_webhook(&external_id, WebhookStatus::Succeeded, None)
            .await
            .unwrap();
        let audit_rows = h.engine.audit_trail(user, Currency::USD).await.unwrap().len();
        assert_eq!(audit_rows, 1);

        // Duplicate delivery
        let replay = h
            .engine
            .reconcile_webhook(&external_id, WebhookStatus::Succeeded, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replay.status, TransactionStatus::Success);

        let balance = h.engine.balance(user, Currency::USD).await.unwrap();
        assert_eq!(balance.available, money("50.00"));
        assert_eq!(
            h.engine.audit_trail(user, Currency::USD).await.unwrap().len(),
            1
        );
    }

    /// Duplicate webhooks racing in parallel still settle exactly once.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_webhooks_settle_once() {
        let h = harness();
        let user = Uuid::new_v4();

        let pending = h
            .engine
            .create_deposit_intent(DepositRequest {
                user_id: user,
                currency: Currency::USD,
                amount: money("75.00"),
                idempotency_key: "dep-race".to_string(),
                source_transaction_id: None,
                metadata: HashMap::new(),
            })
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..6 {
            let engine = h.engine.clone();
            let external_id = pending.intent.id.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .reconcile_webhook(&external_id, WebhookStatus::Succeeded, None)
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let balance = h.engine.balance(user, Currency::USD).await.unwrap();
        assert_eq!(balance.available, money("75.00"));
    }

    /// Credit, locked debit, and settlement end to end with events.
    #[tokio::test]
    async fn scenario_credit_debit_and_events() {
        let h = harness();
        let user = Uuid::new_v4();

        // credit: {available: "0.00"} + 100.00
        let txn = h
            .engine
            .credit(credit_request(
                user,
                Currency::USD,
                money("100.00"),
                "c-1".to_string(),
            ))
            .await
            .unwrap();
        assert_eq!(txn.status, TransactionStatus::Success);
        let balance = h.engine.balance(user, Currency::USD).await.unwrap();
        assert_eq!(balance.available.to_string(), "100.00");

        // debit with lock: 40.00
        h.engine
            .debit(debit_request(
                user,
                Currency::USD,
                money("40.00"),
                "d-1".to_string(),
                true,
            ))
            .await
            .unwrap();
        let balance = h.engine.balance(user, Currency::USD).await.unwrap();
        assert_eq!(balance.available.to_string(), "60.00");
        assert_eq!(balance.locked.to_string(), "40.00");

        // settle the locked stake as a loss
        h.engine
            .settle_bet(user, Currency::USD, money("40.00"), Money::ZERO)
            .await
            .unwrap();

        let names: Vec<_> = h.sink.events().iter().map(|e| e.name()).collect();
        assert!(names.contains(&"balance.updated"));
        assert!(names.contains(&"bet.settled"));
    }

    /// A reopened store sees every committed row (durability across
    /// engine instances over the same data dir).
    #[tokio::test]
    async fn state_survives_reopen() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp.path().to_path_buf();
        let user = Uuid::new_v4();

        {
            let engine = WalletEngine::open(
                &config,
                Arc::new(StubGateway::default()),
                Arc::new(RecordingEventSink::new()),
            )
            .unwrap();
            engine
                .credit(credit_request(
                    user,
                    Currency::USD,
                    money("12.34"),
                    "c-1".to_string(),
                ))
                .await
                .unwrap();
        }

        let engine = WalletEngine::open(
            &config,
            Arc::new(StubGateway::default()),
            Arc::new(RecordingEventSink::new()),
        )
        .unwrap();

        let balance = engine.balance(user, Currency::USD).await.unwrap();
        assert_eq!(balance.available, money("12.34"));

        // The idempotency key survives too
        let replay = engine
            .credit(credit_request(
                user,
                Currency::USD,
                money("12.34"),
                "c-1".to_string(),
            ))
            .await
            .unwrap();
        assert_eq!(replay.amount, money("12.34"));
        assert_eq!(
            engine.balance(user, Currency::USD).await.unwrap().available,
            money("12.34")
        );
    }
}
