//! Error types for the wallet ledger

use thiserror::Error;
use uuid::Uuid;

use crate::gateway::PaymentGatewayError;
use crate::money::Money;
use crate::types::Currency;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Validation failures (`InvalidAmount`, `InsufficientFunds`) are expected
/// business outcomes; infrastructure variants (`Storage`, `Serialization`,
/// `Io`) propagate unchanged so the caller can decide whether to retry
/// with the same idempotency key. A duplicate idempotency key is not an
/// error: the engine resolves it by returning the stored record.
#[derive(Error, Debug)]
pub enum Error {
    /// Non-positive or unparsable amount
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The mutation would drive a balance bucket negative
    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        /// Balance of the bucket the operation drew against
        available: Money,
        /// Amount the operation required
        required: Money,
    },

    /// Wallet row required but absent (flows without lazy creation)
    #[error("wallet not found for user {user_id} in {currency}")]
    WalletNotFound {
        /// Owning user
        user_id: Uuid,
        /// Wallet currency
        currency: Currency,
    },

    /// Transaction lookup failed
    #[error("transaction not found: {0}")]
    TransactionNotFound(Uuid),

    /// Payment gateway call failed (provider rejection or transport)
    #[error(transparent)]
    PaymentGateway(#[from] PaymentGatewayError),

    /// Arithmetic out of range for the decimal representation
    #[error("balance arithmetic overflow")]
    BalanceOverflow,

    /// Storage error (RocksDB)
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
