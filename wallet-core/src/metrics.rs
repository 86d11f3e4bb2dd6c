//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `wallet_mutations_total` - Successful balance mutations
//! - `wallet_insufficient_funds_total` - Mutations rejected for lack of funds
//! - `wallet_idempotent_replays_total` - Requests resolved from the transaction log
//! - `wallet_mutation_duration_seconds` - Histogram of mutation latencies
//!
//! Instruments live in an owned registry rather than the process-global
//! default, so several engines can coexist in one process (tests).

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct WalletMetrics {
    /// Successful balance mutations
    pub mutations_total: IntCounter,

    /// Mutations rejected with `InsufficientFunds`
    pub insufficient_funds_total: IntCounter,

    /// Requests answered from the existing transaction log
    pub idempotent_replays_total: IntCounter,

    /// Mutation latency histogram
    pub mutation_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl WalletMetrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let mutations_total = IntCounter::with_opts(Opts::new(
            "wallet_mutations_total",
            "Successful balance mutations",
        ))?;
        registry.register(Box::new(mutations_total.clone()))?;

        let insufficient_funds_total = IntCounter::with_opts(Opts::new(
            "wallet_insufficient_funds_total",
            "Mutations rejected for lack of funds",
        ))?;
        registry.register(Box::new(insufficient_funds_total.clone()))?;

        let idempotent_replays_total = IntCounter::with_opts(Opts::new(
            "wallet_idempotent_replays_total",
            "Requests resolved from the transaction log",
        ))?;
        registry.register(Box::new(idempotent_replays_total.clone()))?;

        let mutation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "wallet_mutation_duration_seconds",
                "Histogram of mutation latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(mutation_duration.clone()))?;

        Ok(Self {
            mutations_total,
            insufficient_funds_total,
            idempotent_replays_total,
            mutation_duration,
            registry,
        })
    }
}

impl std::fmt::Debug for WalletMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletMetrics")
            .field("mutations_total", &self.mutations_total.get())
            .field(
                "insufficient_funds_total",
                &self.insufficient_funds_total.get(),
            )
            .field(
                "idempotent_replays_total",
                &self.idempotent_replays_total.get(),
            )
            .finish()
    }
}
