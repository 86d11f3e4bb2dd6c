//! Domain events emitted after committed mutations
//!
//! Emission is fire-and-forget: the engine emits after the atomic write
//! has committed and never waits on, retries, or propagates sink
//! failures. A lost event cannot roll back a committed mutation.

use serde::Serialize;
use uuid::Uuid;

use crate::money::Money;
use crate::types::Currency;

/// Domain event payloads
#[derive(Debug, Clone, Serialize)]
pub enum WalletEvent {
    /// A wallet's available balance changed
    BalanceUpdated {
        /// Owning user
        user_id: Uuid,
        /// Wallet currency
        currency: Currency,
        /// Available balance after the mutation
        available: Money,
    },

    /// A pending transaction was marked failed
    TransactionFailed {
        /// Failed transaction
        transaction_id: Uuid,
        /// Owning user
        user_id: Uuid,
        /// Failure reason, when known
        reason: Option<String>,
    },

    /// A reserved stake was settled
    BetSettled {
        /// Owning user
        user_id: Uuid,
        /// Wallet currency
        currency: Currency,
        /// Net win amount (zero for a loss)
        win_amount: Money,
    },
}

impl WalletEvent {
    /// Wire name consumed by downstream notification/analytics
    pub fn name(&self) -> &'static str {
        match self {
            WalletEvent::BalanceUpdated { .. } => "balance.updated",
            WalletEvent::TransactionFailed { .. } => "transaction.failed",
            WalletEvent::BetSettled { .. } => "bet.settled",
        }
    }
}

/// Consumer seam for domain events.
///
/// Implementations must not block the caller for long and must swallow
/// their own delivery failures; the ledger treats emission as best-effort.
pub trait EventSink: Send + Sync {
    /// Deliver one event
    fn emit(&self, event: WalletEvent);
}

/// Sink that logs every event through `tracing`
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: WalletEvent) {
        tracing::info!(event = event.name(), payload = ?event, "domain event");
    }
}

/// Sink that buffers events in memory.
///
/// Used by tests and by embedders that drain events into their own
/// transport.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: parking_lot::Mutex<Vec<WalletEvent>>,
}

impl RecordingEventSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far
    pub fn events(&self) -> Vec<WalletEvent> {
        self.events.lock().clone()
    }

    /// Drain the buffer
    pub fn take(&self) -> Vec<WalletEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: WalletEvent) {
        self.events.lock().push(event);
    }
}
