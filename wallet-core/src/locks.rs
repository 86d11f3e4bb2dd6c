//! Per-wallet mutual exclusion
//!
//! Every mutating operation serializes on the lock for its
//! (user, currency) key: exactly one logical mutation is in flight per
//! wallet, while operations on different wallets proceed fully in
//! parallel. Guards release on every exit path, including errors.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::types::Currency;

/// Registry of per-wallet async mutexes.
///
/// Entries are created on first use and kept for the process lifetime;
/// the registry grows with the number of distinct wallets touched, which
/// is bounded by the active user population.
#[derive(Debug, Default)]
pub struct BalanceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BalanceLocks {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the exclusive lock for one wallet.
    ///
    /// Blocks (asynchronously) until any in-flight mutation for the same
    /// wallet releases. The returned guard is owned, so it can be held
    /// across await points and is released on drop.
    pub async fn acquire(&self, user_id: Uuid, currency: Currency) -> OwnedMutexGuard<()> {
        let key = wallet_key(user_id, currency);
        // The map guard must drop before awaiting the mutex.
        let lock = self.locks.entry(key).or_default().value().clone();
        lock.lock_owned().await
    }
}

/// Canonical storage/lock key for one (user, currency) wallet
pub(crate) fn wallet_key(user_id: Uuid, currency: Currency) -> String {
    format!("{user_id}|{currency}")
}
