//! Payment gateway boundary
//!
//! The real provider client lives in a separate service; the ledger only
//! depends on this trait. The gateway is always called *before* the
//! per-wallet lock and the atomic write, so a slow or failing provider
//! can never hold a lock or leave partial ledger state behind.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::money::Money;
use crate::types::Currency;

/// Request payload for a deposit intent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositIntentRequest {
    /// Depositing user
    pub user_id: Uuid,

    /// Deposit amount
    pub amount: Money,

    /// Deposit currency
    pub currency: Currency,

    /// Metadata forwarded to the provider
    pub metadata: HashMap<String, String>,
}

/// Intent handle issued by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositIntent {
    /// Provider-side reference, later echoed back by the webhook
    pub id: String,

    /// Checkout URL the user is redirected to
    pub redirect_url: String,
}

/// Typed gateway failure.
///
/// A populated `status` marks a provider rejection (the provider answered
/// and said no); an absent `status` marks a transport failure (the
/// provider was never reliably reached). Callers retry transport
/// failures with the same idempotency key; no ledger state exists either
/// way.
#[derive(Debug, Clone)]
pub struct PaymentGatewayError {
    /// Human-readable failure description
    pub message: String,

    /// HTTP status for provider rejections; `None` for transport failures
    pub status: Option<u16>,

    /// Raw provider response body, when one was received
    pub details: Option<serde_json::Value>,
}

impl PaymentGatewayError {
    /// Provider answered with a rejection
    pub fn provider(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
            details: None,
        }
    }

    /// Provider could not be reached
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            details: None,
        }
    }

    /// Attach the raw provider response
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Distinguish rejection from transport failure
    pub fn is_provider_rejection(&self) -> bool {
        self.status.is_some()
    }
}

impl fmt::Display for PaymentGatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "payment gateway rejection ({status}): {}", self.message),
            None => write!(f, "payment gateway transport failure: {}", self.message),
        }
    }
}

impl std::error::Error for PaymentGatewayError {}

/// Provider-facing seam consumed by the ledger engine
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Register a deposit intent with the provider.
    ///
    /// Must not mutate any ledger state; the engine persists the pending
    /// transaction only after this call returns successfully.
    async fn create_deposit_intent(
        &self,
        request: DepositIntentRequest,
    ) -> Result<DepositIntent, PaymentGatewayError>;
}
