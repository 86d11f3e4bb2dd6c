//! Wallet ledger engine
//!
//! Per-user, per-currency balances with exactly-once application of
//! financial mutations under concurrent access.
//!
//! # Architecture
//!
//! - **Exact money**: all amounts are fixed-2-decimal [`Money`] values;
//!   binary floats never enter the ledger
//! - **Per-wallet linearization**: one mutation in flight per
//!   (user, currency) key, full parallelism across keys
//! - **Atomic units**: balance row + transaction row + audit snapshot
//!   commit in a single storage batch, or not at all
//! - **Idempotency**: a repeated idempotency key replays the stored
//!   transaction instead of mutating again
//!
//! # Invariants
//!
//! - `available ≥ 0 ∧ bonus ≥ 0 ∧ locked ≥ 0` for every wallet
//! - `pending → {success, failed}` exactly once; terminal states immutable
//! - The newest audit snapshot equals the live `available` balance

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gateway;
pub mod locks;
pub mod metrics;
pub mod money;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use engine::{
    CreditRequest, DebitRequest, DepositRequest, PendingDeposit, WalletEngine,
};
pub use error::{Error, Result};
pub use events::{EventSink, RecordingEventSink, TracingEventSink, WalletEvent};
pub use gateway::{DepositIntent, DepositIntentRequest, PaymentGateway, PaymentGatewayError};
pub use money::Money;
pub use types::{
    Balance, BalanceAuditEntry, Currency, Transaction, TransactionKind, TransactionStatus,
    WebhookStatus,
};
