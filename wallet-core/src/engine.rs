//! Ledger engine orchestration layer
//!
//! This module ties storage, locking, the gateway boundary, and event
//! emission into the operation set exposed to callers. Every mutating
//! operation follows the same discipline:
//!
//! 1. Validate the amount.
//! 2. Resolve the idempotency key against the transaction log; a known
//!    key short-circuits with the stored record, never a second mutation.
//! 3. Acquire the per-(user, currency) lock.
//! 4. Re-check the key, read the balance, validate, compute.
//! 5. Commit balance + transaction + audit in one atomic batch.
//! 6. Release the lock, then emit the domain event (fire-and-forget).
//!
//! The payment gateway is called *before* step 3 so a slow provider never
//! holds a wallet lock and a failed provider call leaves no state behind.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    config::Config,
    error::{Error, Result},
    events::{EventSink, WalletEvent},
    gateway::{DepositIntent, DepositIntentRequest, PaymentGateway},
    locks::BalanceLocks,
    metrics::WalletMetrics,
    money::Money,
    storage::Storage,
    types::{
        Balance, BalanceAuditEntry, Currency, Transaction, TransactionKind, TransactionStatus,
        WebhookStatus,
    },
};

/// Metadata key carrying the provider checkout URL on deposit rows
const REDIRECT_URL_KEY: &str = "redirect_url";

/// Input for [`WalletEngine::credit`]
#[derive(Debug, Clone)]
pub struct CreditRequest {
    /// Credited user
    pub user_id: Uuid,
    /// Wallet currency
    pub currency: Currency,
    /// Amount to add to `available`; must be positive
    pub amount: Money,
    /// Transaction kind recorded in the log
    pub kind: TransactionKind,
    /// Human-readable reason, stored in metadata
    pub reason: Option<String>,
    /// Caller-supplied uniqueness token
    pub idempotency_key: String,
    /// Optional upstream correlation id
    pub source_transaction_id: Option<String>,
    /// Free-form audit metadata
    pub metadata: HashMap<String, String>,
}

/// Input for [`WalletEngine::debit`]
#[derive(Debug, Clone)]
pub struct DebitRequest {
    /// Debited user
    pub user_id: Uuid,
    /// Wallet currency
    pub currency: Currency,
    /// Amount to remove from `available`; must be positive
    pub amount: Money,
    /// Transaction kind recorded in the log
    pub kind: TransactionKind,
    /// Move the amount into `locked` instead of out of the wallet
    pub lock_funds: bool,
    /// Human-readable reason, stored in metadata
    pub reason: Option<String>,
    /// Caller-supplied uniqueness token
    pub idempotency_key: String,
    /// Optional upstream correlation id
    pub source_transaction_id: Option<String>,
    /// Free-form audit metadata
    pub metadata: HashMap<String, String>,
}

/// Input for [`WalletEngine::create_deposit_intent`]
#[derive(Debug, Clone)]
pub struct DepositRequest {
    /// Depositing user
    pub user_id: Uuid,
    /// Wallet currency
    pub currency: Currency,
    /// Deposit amount; must be positive
    pub amount: Money,
    /// Caller-supplied uniqueness token
    pub idempotency_key: String,
    /// Optional upstream correlation id
    pub source_transaction_id: Option<String>,
    /// Metadata forwarded to the provider and stored on the row
    pub metadata: HashMap<String, String>,
}

/// Result of a deposit-intent creation: the pending transaction plus the
/// provider handle the caller redirects the user to
#[derive(Debug, Clone)]
pub struct PendingDeposit {
    /// Pending transaction awaiting webhook reconciliation
    pub transaction: Transaction,
    /// Provider-issued intent
    pub intent: DepositIntent,
}

/// Main ledger interface
pub struct WalletEngine {
    storage: Arc<Storage>,
    locks: BalanceLocks,
    gateway: Arc<dyn PaymentGateway>,
    events: Arc<dyn EventSink>,
    metrics: WalletMetrics,
}

impl WalletEngine {
    /// Open the engine over a fresh or existing store
    pub fn open(
        config: &Config,
        gateway: Arc<dyn PaymentGateway>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let storage = Arc::new(Storage::open(config)?);
        Self::with_storage(storage, gateway, events)
    }

    /// Build the engine around an already-open store
    pub fn with_storage(
        storage: Arc<Storage>,
        gateway: Arc<dyn PaymentGateway>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let metrics =
            WalletMetrics::new().map_err(|e| Error::Config(format!("metrics setup: {e}")))?;

        Ok(Self {
            storage,
            locks: BalanceLocks::new(),
            gateway,
            events,
            metrics,
        })
    }

    /// Metrics registry for scrape endpoints
    pub fn metrics(&self) -> &WalletMetrics {
        &self.metrics
    }

    // Read paths

    /// Current balance for display purposes.
    ///
    /// Unknown wallets read as all-zero without creating a row. This read
    /// bypasses the per-wallet lock and may be stale; it must never feed
    /// a mutation decision.
    pub async fn balance(&self, user_id: Uuid, currency: Currency) -> Result<Balance> {
        Ok(self
            .storage
            .get_balance(user_id, currency)?
            .unwrap_or_else(|| Balance::new(user_id, currency)))
    }

    /// Balance for flows that require the wallet to already exist
    pub async fn require_balance(&self, user_id: Uuid, currency: Currency) -> Result<Balance> {
        self.storage
            .get_balance(user_id, currency)?
            .ok_or(Error::WalletNotFound { user_id, currency })
    }

    /// Most recent audit snapshot for one wallet.
    ///
    /// After any successful mutation this equals the live `available`
    /// balance; reconciliation jobs verify the two independently.
    pub async fn latest_audit(
        &self,
        user_id: Uuid,
        currency: Currency,
    ) -> Result<Option<BalanceAuditEntry>> {
        self.storage.latest_audit_entry(user_id, currency)
    }

    /// Full audit trail for one wallet, oldest first
    pub async fn audit_trail(
        &self,
        user_id: Uuid,
        currency: Currency,
    ) -> Result<Vec<BalanceAuditEntry>> {
        self.storage.audit_trail(user_id, currency)
    }

    /// Transactions for one wallet, most recent first
    pub async fn transaction_history(
        &self,
        user_id: Uuid,
        currency: Currency,
        limit: usize,
    ) -> Result<Vec<Transaction>> {
        self.storage.transaction_history(user_id, currency, limit)
    }

    // Synchronous mutations

    /// Add funds to `available`.
    ///
    /// Applied and recorded as `success` in one atomic unit; synchronous
    /// credits have no external dependency to wait for.
    pub async fn credit(&self, request: CreditRequest) -> Result<Transaction> {
        ensure_positive(request.amount)?;
        let _timer = self.metrics.mutation_duration.start_timer();

        if let Some(existing) = self.replayed(&request.idempotency_key)? {
            return Ok(existing);
        }

        let guard = self
            .locks
            .acquire(request.user_id, request.currency)
            .await;

        // The pre-lock check races with concurrent holders of the same
        // key; only this re-check is authoritative.
        if let Some(existing) = self.replayed(&request.idempotency_key)? {
            return Ok(existing);
        }

        let mut balance = self.load_or_new(request.user_id, request.currency)?;
        balance.available = balance.available.checked_add(request.amount)?;
        balance.updated_at = Utc::now();

        let mut metadata = request.metadata;
        if let Some(reason) = request.reason {
            metadata.insert("reason".to_string(), reason);
        }

        let now = Utc::now();
        let transaction = Transaction {
            id: Uuid::now_v7(),
            user_id: request.user_id,
            currency: request.currency,
            amount: request.amount,
            kind: request.kind,
            status: TransactionStatus::Success,
            idempotency_key: request.idempotency_key,
            source_transaction_id: request.source_transaction_id,
            external_id: None,
            metadata,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        let audit = audit_snapshot(&balance, transaction.id);
        self.storage
            .commit_mutation(&balance, &transaction, &audit)?;
        drop(guard);

        self.metrics.mutations_total.inc();
        self.events.emit(WalletEvent::BalanceUpdated {
            user_id: balance.user_id,
            currency: balance.currency,
            available: balance.available,
        });

        tracing::info!(
            user_id = %transaction.user_id,
            currency = %transaction.currency,
            transaction_id = %transaction.id,
            amount = %transaction.amount,
            "credit applied"
        );

        Ok(transaction)
    }

    /// Remove funds from `available`, optionally parking them in
    /// `locked`.
    ///
    /// An underfunded debit persists a `failed` transaction under the
    /// caller's idempotency key and returns
    /// [`Error::InsufficientFunds`]; the balance is untouched and a retry
    /// with the same key replays that terminal record.
    pub async fn debit(&self, request: DebitRequest) -> Result<Transaction> {
        ensure_positive(request.amount)?;
        let _timer = self.metrics.mutation_duration.start_timer();

        if let Some(existing) = self.replayed(&request.idempotency_key)? {
            return Ok(existing);
        }

        let guard = self
            .locks
            .acquire(request.user_id, request.currency)
            .await;

        if let Some(existing) = self.replayed(&request.idempotency_key)? {
            return Ok(existing);
        }

        let mut balance = self.load_or_new(request.user_id, request.currency)?;

        let mut metadata = request.metadata;
        if let Some(reason) = request.reason {
            metadata.insert("reason".to_string(), reason);
        }

        let now = Utc::now();
        let mut transaction = Transaction {
            id: Uuid::now_v7(),
            user_id: request.user_id,
            currency: request.currency,
            amount: -request.amount,
            kind: request.kind,
            status: TransactionStatus::Success,
            idempotency_key: request.idempotency_key,
            source_transaction_id: request.source_transaction_id,
            external_id: None,
            metadata,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        if balance.available < request.amount {
            transaction.status = TransactionStatus::Failed;
            transaction.failure_reason = Some("insufficient funds".to_string());
            self.storage.insert_transaction(&transaction)?;
            drop(guard);

            self.metrics.insufficient_funds_total.inc();
            self.events.emit(WalletEvent::TransactionFailed {
                transaction_id: transaction.id,
                user_id: transaction.user_id,
                reason: transaction.failure_reason.clone(),
            });

            tracing::warn!(
                user_id = %transaction.user_id,
                currency = %transaction.currency,
                available = %balance.available,
                required = %request.amount,
                "debit rejected"
            );

            return Err(Error::InsufficientFunds {
                available: balance.available,
                required: request.amount,
            });
        }

        balance.available = balance.available.checked_sub(request.amount)?;
        if request.lock_funds {
            balance.locked = balance.locked.checked_add(request.amount)?;
        }
        balance.updated_at = now;

        let audit = audit_snapshot(&balance, transaction.id);
        self.storage
            .commit_mutation(&balance, &transaction, &audit)?;
        drop(guard);

        self.metrics.mutations_total.inc();
        self.events.emit(WalletEvent::BalanceUpdated {
            user_id: balance.user_id,
            currency: balance.currency,
            available: balance.available,
        });

        tracing::info!(
            user_id = %transaction.user_id,
            currency = %transaction.currency,
            transaction_id = %transaction.id,
            amount = %transaction.amount,
            lock_funds = request.lock_funds,
            "debit applied"
        );

        Ok(transaction)
    }

    // Gateway-backed deposits

    /// Register a deposit with the payment provider and persist the
    /// pending transaction.
    ///
    /// The gateway is called before any ledger write: a provider failure
    /// is logged and re-raised with nothing persisted, so a retry with
    /// the same idempotency key is safe.
    pub async fn create_deposit_intent(&self, request: DepositRequest) -> Result<PendingDeposit> {
        ensure_positive(request.amount)?;

        if let Some(existing) = self.replayed(&request.idempotency_key)? {
            return Ok(pending_deposit_from(existing));
        }

        let intent = self
            .gateway
            .create_deposit_intent(DepositIntentRequest {
                user_id: request.user_id,
                amount: request.amount,
                currency: request.currency,
                metadata: request.metadata.clone(),
            })
            .await
            .map_err(|err| {
                tracing::error!(
                    user_id = %request.user_id,
                    currency = %request.currency,
                    provider_rejection = err.is_provider_rejection(),
                    error = %err,
                    "deposit intent creation failed"
                );
                Error::PaymentGateway(err)
            })?;

        let guard = self
            .locks
            .acquire(request.user_id, request.currency)
            .await;

        if let Some(existing) = self.replayed(&request.idempotency_key)? {
            // A concurrent duplicate won the race while we were at the
            // provider; its row is the authoritative one.
            tracing::warn!(
                user_id = %request.user_id,
                intent_id = %intent.id,
                "discarding duplicate deposit intent"
            );
            return Ok(pending_deposit_from(existing));
        }

        let mut metadata = request.metadata;
        metadata.insert(REDIRECT_URL_KEY.to_string(), intent.redirect_url.clone());

        let now = Utc::now();
        let transaction = Transaction {
            id: Uuid::now_v7(),
            user_id: request.user_id,
            currency: request.currency,
            amount: request.amount,
            kind: TransactionKind::Deposit,
            status: TransactionStatus::Pending,
            idempotency_key: request.idempotency_key,
            source_transaction_id: request.source_transaction_id,
            external_id: Some(intent.id.clone()),
            metadata,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        self.storage.insert_transaction(&transaction)?;
        drop(guard);

        tracing::info!(
            user_id = %transaction.user_id,
            transaction_id = %transaction.id,
            intent_id = %intent.id,
            "deposit intent created"
        );

        Ok(PendingDeposit {
            transaction,
            intent,
        })
    }

    /// Apply the provider's webhook to the matching pending transaction.
    ///
    /// Unknown external ids and already-terminal transactions are
    /// intentionally idempotent no-ops, which makes duplicate webhook
    /// delivery harmless.
    pub async fn reconcile_webhook(
        &self,
        external_id: &str,
        status: WebhookStatus,
        failure_reason: Option<String>,
    ) -> Result<Option<Transaction>> {
        let Some(transaction) = self.storage.find_by_external_id(external_id)? else {
            tracing::warn!(external_id, "webhook for unknown external id ignored");
            return Ok(None);
        };

        if transaction.is_terminal() {
            tracing::info!(
                transaction_id = %transaction.id,
                status = %transaction.status,
                "webhook replay ignored, transaction already settled"
            );
            return Ok(Some(transaction));
        }

        match status {
            WebhookStatus::Succeeded => {
                self.mark_transaction_success(transaction.id).await.map(Some)
            }
            WebhookStatus::Failed => self
                .mark_transaction_failed(transaction.id, failure_reason)
                .await
                .map(Some),
        }
    }

    /// Transition a pending transaction to `success` and apply its amount.
    ///
    /// The pending check is repeated under the wallet lock: two
    /// concurrent reconciliations of the same transaction apply the
    /// balance mutation exactly once.
    pub async fn mark_transaction_success(&self, transaction_id: Uuid) -> Result<Transaction> {
        let found = self.storage.get_transaction(transaction_id)?;
        let _timer = self.metrics.mutation_duration.start_timer();

        let guard = self.locks.acquire(found.user_id, found.currency).await;

        let mut transaction = self.storage.get_transaction(transaction_id)?;
        if transaction.is_terminal() {
            tracing::info!(
                transaction_id = %transaction.id,
                status = %transaction.status,
                "transaction already processed"
            );
            return Ok(transaction);
        }

        let mut balance = self.load_or_new(transaction.user_id, transaction.currency)?;
        let updated = balance.available.checked_add(transaction.amount)?;
        if updated.is_negative() {
            return Err(Error::InsufficientFunds {
                available: balance.available,
                required: -transaction.amount,
            });
        }
        balance.available = updated;
        balance.updated_at = Utc::now();

        transaction.status = TransactionStatus::Success;
        transaction.updated_at = Utc::now();

        let audit = audit_snapshot(&balance, transaction.id);
        self.storage
            .commit_mutation(&balance, &transaction, &audit)?;
        drop(guard);

        self.metrics.mutations_total.inc();
        self.events.emit(WalletEvent::BalanceUpdated {
            user_id: balance.user_id,
            currency: balance.currency,
            available: balance.available,
        });

        tracing::info!(
            transaction_id = %transaction.id,
            user_id = %transaction.user_id,
            amount = %transaction.amount,
            "pending transaction settled"
        );

        Ok(transaction)
    }

    /// Transition a pending transaction to `failed`; no balance change.
    pub async fn mark_transaction_failed(
        &self,
        transaction_id: Uuid,
        reason: Option<String>,
    ) -> Result<Transaction> {
        let found = self.storage.get_transaction(transaction_id)?;

        let guard = self.locks.acquire(found.user_id, found.currency).await;

        let mut transaction = self.storage.get_transaction(transaction_id)?;
        if transaction.is_terminal() {
            tracing::warn!(
                transaction_id = %transaction.id,
                status = %transaction.status,
                "failure mark ignored, transaction already terminal"
            );
            return Ok(transaction);
        }

        transaction.status = TransactionStatus::Failed;
        transaction.failure_reason = reason;
        transaction.updated_at = Utc::now();
        self.storage.update_transaction(&transaction)?;
        drop(guard);

        self.events.emit(WalletEvent::TransactionFailed {
            transaction_id: transaction.id,
            user_id: transaction.user_id,
            reason: transaction.failure_reason.clone(),
        });

        tracing::info!(
            transaction_id = %transaction.id,
            reason = transaction.failure_reason.as_deref().unwrap_or("unspecified"),
            "pending transaction failed"
        );

        Ok(transaction)
    }

    // Bet flows
    //
    // Reservation and settlement carry no caller idempotency key: the
    // game engine delivers each of them at most once. Both still write
    // internally-keyed transaction rows and audit snapshots.

    /// Move a stake from `available` into `locked`.
    pub async fn reserve_bet_amount(
        &self,
        user_id: Uuid,
        currency: Currency,
        amount: Money,
    ) -> Result<Balance> {
        ensure_positive(amount)?;
        let _timer = self.metrics.mutation_duration.start_timer();

        let guard = self.locks.acquire(user_id, currency).await;

        let mut balance = self.load_or_new(user_id, currency)?;
        if balance.available < amount {
            self.metrics.insufficient_funds_total.inc();
            return Err(Error::InsufficientFunds {
                available: balance.available,
                required: amount,
            });
        }

        balance.available = balance.available.checked_sub(amount)?;
        balance.locked = balance.locked.checked_add(amount)?;
        let now = Utc::now();
        balance.updated_at = now;

        let transaction = Transaction {
            id: Uuid::now_v7(),
            user_id,
            currency,
            amount: -amount,
            kind: TransactionKind::Bet,
            status: TransactionStatus::Success,
            idempotency_key: format!("bet:{}", Uuid::now_v7()),
            source_transaction_id: None,
            external_id: None,
            metadata: HashMap::new(),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        let audit = audit_snapshot(&balance, transaction.id);
        self.storage
            .commit_mutation(&balance, &transaction, &audit)?;
        drop(guard);

        self.metrics.mutations_total.inc();
        self.events.emit(WalletEvent::BalanceUpdated {
            user_id: balance.user_id,
            currency: balance.currency,
            available: balance.available,
        });

        tracing::info!(
            user_id = %user_id,
            currency = %currency,
            amount = %amount,
            "stake reserved"
        );

        Ok(balance)
    }

    /// Release a reserved stake and pay out the win.
    ///
    /// `win_amount` may be zero for a loss. The stake must match an
    /// outstanding reservation: settlement fails with
    /// [`Error::InsufficientFunds`] when `locked < stake_amount`, so the
    /// locked bucket can never go negative.
    pub async fn settle_bet(
        &self,
        user_id: Uuid,
        currency: Currency,
        stake_amount: Money,
        win_amount: Money,
    ) -> Result<Balance> {
        ensure_positive(stake_amount)?;
        if win_amount.is_negative() {
            return Err(Error::InvalidAmount(format!(
                "win amount must not be negative, got {win_amount}"
            )));
        }
        let _timer = self.metrics.mutation_duration.start_timer();

        let guard = self.locks.acquire(user_id, currency).await;

        let mut balance = self.load_or_new(user_id, currency)?;
        if balance.locked < stake_amount {
            self.metrics.insufficient_funds_total.inc();
            return Err(Error::InsufficientFunds {
                available: balance.locked,
                required: stake_amount,
            });
        }

        balance.locked = balance.locked.checked_sub(stake_amount)?;
        balance.available = balance.available.checked_add(win_amount)?;
        let now = Utc::now();
        balance.updated_at = now;

        let transaction = Transaction {
            id: Uuid::now_v7(),
            user_id,
            currency,
            amount: win_amount,
            kind: TransactionKind::Win,
            status: TransactionStatus::Success,
            idempotency_key: format!("settle:{}", Uuid::now_v7()),
            source_transaction_id: None,
            external_id: None,
            metadata: HashMap::new(),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        let audit = audit_snapshot(&balance, transaction.id);
        self.storage
            .commit_mutation(&balance, &transaction, &audit)?;
        drop(guard);

        self.metrics.mutations_total.inc();
        self.events.emit(WalletEvent::BetSettled {
            user_id,
            currency,
            win_amount,
        });

        tracing::info!(
            user_id = %user_id,
            currency = %currency,
            stake = %stake_amount,
            win = %win_amount,
            "bet settled"
        );

        Ok(balance)
    }

    // Internals

    fn load_or_new(&self, user_id: Uuid, currency: Currency) -> Result<Balance> {
        Ok(self
            .storage
            .get_balance(user_id, currency)?
            .unwrap_or_else(|| Balance::new(user_id, currency)))
    }

    fn replayed(&self, idempotency_key: &str) -> Result<Option<Transaction>> {
        let existing = self.storage.find_by_idempotency_key(idempotency_key)?;
        if let Some(transaction) = &existing {
            self.metrics.idempotent_replays_total.inc();
            tracing::info!(
                transaction_id = %transaction.id,
                idempotency_key,
                "request resolved from transaction log"
            );
        }
        Ok(existing)
    }
}

impl std::fmt::Debug for WalletEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletEngine").finish_non_exhaustive()
    }
}

fn ensure_positive(amount: Money) -> Result<()> {
    if !amount.is_positive() {
        return Err(Error::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

fn audit_snapshot(balance: &Balance, transaction_id: Uuid) -> BalanceAuditEntry {
    BalanceAuditEntry {
        id: Uuid::now_v7(),
        wallet_id: balance.id,
        transaction_id,
        balance_after: balance.available,
        created_at: Utc::now(),
    }
}

fn pending_deposit_from(transaction: Transaction) -> PendingDeposit {
    let intent = DepositIntent {
        id: transaction.external_id.clone().unwrap_or_default(),
        redirect_url: transaction
            .metadata
            .get(REDIRECT_URL_KEY)
            .cloned()
            .unwrap_or_default(),
    };
    PendingDeposit {
        transaction,
        intent,
    }
}
