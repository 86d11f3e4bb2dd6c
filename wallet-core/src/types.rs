//! Core types for the wallet ledger
//!
//! All rows are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic ([`Money`] for every amount)
//! - Append-only audit (audit entries are never rewritten)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::money::Money;

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// US Dollar
    USD,
    /// Euro
    EUR,
    /// British Pound
    GBP,
    /// Brazilian Real
    BRL,
    /// Indian Rupee
    INR,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::BRL => "BRL",
            Currency::INR => "INR",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USD" => Some(Currency::USD),
            "EUR" => Some(Currency::EUR),
            "GBP" => Some(Currency::GBP),
            "BRL" => Some(Currency::BRL),
            "INR" => Some(Currency::INR),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Per-user, per-currency balance row with three named buckets.
///
/// Invariant: `available`, `bonus`, and `locked` are each ≥ 0 in every
/// reachable state. Rows are created lazily on first mutation and never
/// deleted; only the ledger engine writes them, under the per-wallet
/// lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    /// Stable wallet row id (referenced by audit entries)
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Wallet currency
    pub currency: Currency,

    /// Funds spendable right now
    pub available: Money,

    /// Promotional funds (never mutated by this subsystem)
    pub bonus: Money,

    /// Funds reserved against open bets
    pub locked: Money,

    /// Row creation timestamp
    pub created_at: DateTime<Utc>,

    /// Timestamp of the last mutation
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Zeroed balance for a wallet that has not been persisted yet
    pub fn new(user_id: Uuid, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id,
            currency,
            available: Money::ZERO,
            bonus: Money::ZERO,
            locked: Money::ZERO,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Transaction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Gateway-backed deposit
    Deposit,
    /// Withdrawal to an external destination
    Withdrawal,
    /// Stake reservation
    Bet,
    /// Bet settlement payout
    Win,
    /// Promotional credit
    Bonus,
    /// Manual back-office correction
    Adjustment,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Deposit => write!(f, "deposit"),
            TransactionKind::Withdrawal => write!(f, "withdrawal"),
            TransactionKind::Bet => write!(f, "bet"),
            TransactionKind::Win => write!(f, "win"),
            TransactionKind::Bonus => write!(f, "bonus"),
            TransactionKind::Adjustment => write!(f, "adjustment"),
        }
    }
}

/// Transaction status
///
/// State machine: `Pending → {Success, Failed}`. Terminal states are
/// immutable; a second transition attempt is a logged no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Awaiting asynchronous confirmation (gateway-backed flows)
    Pending,
    /// Applied to the balance
    Success,
    /// Rejected; balance untouched
    Failed,
}

impl TransactionStatus {
    /// Check if the status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Success | TransactionStatus::Failed)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "pending"),
            TransactionStatus::Success => write!(f, "success"),
            TransactionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Append-only record of one attempted balance mutation.
///
/// `amount` is signed: positive amounts credit the wallet, negative
/// amounts debit it. `idempotency_key` is unique across the log; a second
/// request bearing the same key returns this row instead of re-applying
/// the mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction id (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Wallet currency
    pub currency: Currency,

    /// Signed amount (positive = credit, negative = debit)
    pub amount: Money,

    /// Transaction kind
    pub kind: TransactionKind,

    /// Current status
    pub status: TransactionStatus,

    /// Uniqueness token supplied by the caller (or generated for
    /// bet-flow rows)
    pub idempotency_key: String,

    /// Optional correlation to an upstream event
    pub source_transaction_id: Option<String>,

    /// Payment-gateway reference for gateway-backed flows
    pub external_id: Option<String>,

    /// Free-form audit metadata
    pub metadata: HashMap<String, String>,

    /// Reason recorded on failure
    pub failure_reason: Option<String>,

    /// Row creation timestamp
    pub created_at: DateTime<Utc>,

    /// Timestamp of the last status transition
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Check if the transaction reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Append-only snapshot of the available balance after one successful
/// mutation.
///
/// `balance_after` must exactly equal the balance row's `available`
/// immediately after the linked transaction was applied; the audit trail
/// verifies the live row independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceAuditEntry {
    /// Entry id
    pub id: Uuid,

    /// Wallet row the snapshot belongs to
    pub wallet_id: Uuid,

    /// Transaction that produced the mutation
    pub transaction_id: Uuid,

    /// Available balance immediately after the mutation
    pub balance_after: Money,

    /// Snapshot timestamp
    pub created_at: DateTime<Utc>,
}

/// Outcome reported by the payment provider's webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookStatus {
    /// Provider confirmed the payment
    Succeeded,
    /// Provider rejected or aborted the payment
    Failed,
}

impl WebhookStatus {
    /// Parse the provider's wire value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "succeeded" => Some(WebhookStatus::Succeeded),
            "failed" => Some(WebhookStatus::Failed),
            _ => None,
        }
    }
}
