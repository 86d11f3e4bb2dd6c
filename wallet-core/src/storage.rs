//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `balances` - One row per (user, currency) wallet (key: wallet key)
//! - `transactions` - Append-only transaction log (key: transaction id)
//! - `audit` - Post-mutation balance snapshots (key: wallet key || timestamp || transaction id)
//! - `indices` - Secondary indices: idempotency key, external id, per-wallet history
//!
//! Every multi-row write goes through a single `WriteBatch`, so the
//! balance row, transaction row, audit row, and indices commit or fail as
//! one unit. Partial writes are never observable.

use crate::{
    error::{Error, Result},
    locks::wallet_key,
    types::{Balance, BalanceAuditEntry, Transaction},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::types::Currency;

/// Column family names
const CF_BALANCES: &str = "balances";
const CF_TRANSACTIONS: &str = "transactions";
const CF_AUDIT: &str = "audit";
const CF_INDICES: &str = "indices";

/// Index key prefixes within `indices`
const IDX_IDEMPOTENCY: &[u8] = b"idem|";
const IDX_EXTERNAL: &[u8] = b"ext|";
const IDX_HISTORY: &[u8] = b"hist|";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for the write-heavy transaction log
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_BALANCES, Self::cf_options_balances()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_transactions()),
            ColumnFamilyDescriptor::new(CF_AUDIT, Self::cf_options_audit()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = %path.display(), "opened wallet store");

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_balances() -> Options {
        let mut opts = Options::default();
        // Balances are read on every operation, favor decode speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_transactions() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_audit() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Point lookups by idempotency key benefit from bloom filters
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("column family {name} not found")))
    }

    // Balance operations

    /// Get the balance row for one wallet, if it was ever persisted.
    ///
    /// Reads bypass the per-wallet lock; callers must not base mutation
    /// decisions on this value.
    pub fn get_balance(&self, user_id: Uuid, currency: Currency) -> Result<Option<Balance>> {
        let cf = self.cf_handle(CF_BALANCES)?;
        let key = wallet_key(user_id, currency);

        match self.db.get_cf(cf, key.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    // Transaction log operations

    /// Get transaction by id
    pub fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;

        let value = self
            .db
            .get_cf(cf, transaction_id.as_bytes())?
            .ok_or(Error::TransactionNotFound(transaction_id))?;

        Ok(bincode::deserialize(&value)?)
    }

    /// Look up a transaction by its idempotency key
    pub fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Transaction>> {
        self.find_by_index(IDX_IDEMPOTENCY, key.as_bytes())
    }

    /// Look up a transaction by its payment-gateway reference
    pub fn find_by_external_id(&self, external_id: &str) -> Result<Option<Transaction>> {
        self.find_by_index(IDX_EXTERNAL, external_id.as_bytes())
    }

    fn find_by_index(&self, prefix: &[u8], needle: &[u8]) -> Result<Option<Transaction>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let key = [prefix, needle].concat();

        let Some(value) = self.db.get_cf(cf, &key)? else {
            return Ok(None);
        };

        let id_bytes: [u8; 16] = value
            .as_slice()
            .try_into()
            .map_err(|_| Error::Storage("corrupt transaction index entry".to_string()))?;

        Ok(Some(self.get_transaction(Uuid::from_bytes(id_bytes))?))
    }

    /// Persist a transaction row with its indices (atomic).
    ///
    /// Used for rows that carry no balance change: pending deposit
    /// intents and failed debits.
    pub fn insert_transaction(&self, transaction: &Transaction) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_transaction(&mut batch, transaction)?;
        self.db.write(batch)?;

        tracing::debug!(
            transaction_id = %transaction.id,
            status = %transaction.status,
            "transaction recorded"
        );

        Ok(())
    }

    /// Rewrite an existing transaction row (status transitions only)
    pub fn update_transaction(&self, transaction: &Transaction) -> Result<()> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let value = bincode::serialize(transaction)?;
        self.db.put_cf(cf, transaction.id.as_bytes(), &value)?;
        Ok(())
    }

    // Atomic mutation commit

    /// Commit one balance mutation as a unit: balance row, transaction
    /// row (with indices), and the audit snapshot.
    pub fn commit_mutation(
        &self,
        balance: &Balance,
        transaction: &Transaction,
        audit: &BalanceAuditEntry,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_balances = self.cf_handle(CF_BALANCES)?;
        let balance_key = wallet_key(balance.user_id, balance.currency);
        let balance_value = bincode::serialize(balance)?;
        batch.put_cf(cf_balances, balance_key.as_bytes(), &balance_value);

        self.stage_transaction(&mut batch, transaction)?;

        let cf_audit = self.cf_handle(CF_AUDIT)?;
        let audit_key = audit_row_key(balance.user_id, balance.currency, audit);
        let audit_value = bincode::serialize(audit)?;
        batch.put_cf(cf_audit, &audit_key, &audit_value);

        self.db.write(batch)?;

        tracing::debug!(
            transaction_id = %transaction.id,
            user_id = %balance.user_id,
            currency = %balance.currency,
            balance_after = %audit.balance_after,
            "mutation committed"
        );

        Ok(())
    }

    fn stage_transaction(&self, batch: &mut WriteBatch, transaction: &Transaction) -> Result<()> {
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        let value = bincode::serialize(transaction)?;
        batch.put_cf(cf_transactions, transaction.id.as_bytes(), &value);

        let cf_indices = self.cf_handle(CF_INDICES)?;

        let idem_key = [IDX_IDEMPOTENCY, transaction.idempotency_key.as_bytes()].concat();
        batch.put_cf(cf_indices, &idem_key, transaction.id.as_bytes());

        if let Some(external_id) = &transaction.external_id {
            let ext_key = [IDX_EXTERNAL, external_id.as_bytes()].concat();
            batch.put_cf(cf_indices, &ext_key, transaction.id.as_bytes());
        }

        let hist_key = history_row_key(transaction);
        batch.put_cf(cf_indices, &hist_key, &[]);

        Ok(())
    }

    // Audit log operations

    /// Most recent audit snapshot for one wallet
    pub fn latest_audit_entry(
        &self,
        user_id: Uuid,
        currency: Currency,
    ) -> Result<Option<BalanceAuditEntry>> {
        let cf = self.cf_handle(CF_AUDIT)?;
        let prefix = audit_prefix(user_id, currency);

        let mut upper = prefix.clone();
        upper.extend_from_slice(&[0xff; 24]);

        let mut iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&upper, Direction::Reverse));

        if let Some(item) = iter.next() {
            let (key, value) = item?;
            if key.starts_with(&prefix) {
                return Ok(Some(bincode::deserialize(&value)?));
            }
        }

        Ok(None)
    }

    /// Full audit trail for one wallet, oldest first
    pub fn audit_trail(&self, user_id: Uuid, currency: Currency) -> Result<Vec<BalanceAuditEntry>> {
        let cf = self.cf_handle(CF_AUDIT)?;
        let prefix = audit_prefix(user_id, currency);

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push(bincode::deserialize(&value)?);
        }

        Ok(entries)
    }

    /// Transactions for one wallet, most recent first
    pub fn transaction_history(
        &self,
        user_id: Uuid,
        currency: Currency,
        limit: usize,
    ) -> Result<Vec<Transaction>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let mut prefix = IDX_HISTORY.to_vec();
        prefix.extend_from_slice(wallet_key(user_id, currency).as_bytes());
        prefix.push(b'|');

        let mut upper = prefix.clone();
        upper.extend_from_slice(&[0xff; 24]);

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&upper, Direction::Reverse));

        let mut transactions = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if transactions.len() >= limit {
                break;
            }

            // Transaction id is the fixed-width key tail
            let tail: [u8; 16] = key[key.len() - 16..]
                .try_into()
                .map_err(|_| Error::Storage("corrupt history index entry".to_string()))?;
            transactions.push(self.get_transaction(Uuid::from_bytes(tail))?);
        }

        Ok(transactions)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

// Key helpers

fn audit_prefix(user_id: Uuid, currency: Currency) -> Vec<u8> {
    let mut prefix = wallet_key(user_id, currency).into_bytes();
    prefix.push(b'|');
    prefix
}

fn audit_row_key(user_id: Uuid, currency: Currency, audit: &BalanceAuditEntry) -> Vec<u8> {
    let mut key = audit_prefix(user_id, currency);
    let nanos = audit.created_at.timestamp_nanos_opt().unwrap_or(0);
    key.extend_from_slice(&nanos.to_be_bytes());
    key.extend_from_slice(audit.transaction_id.as_bytes());
    key
}

fn history_row_key(transaction: &Transaction) -> Vec<u8> {
    let mut key = IDX_HISTORY.to_vec();
    key.extend_from_slice(wallet_key(transaction.user_id, transaction.currency).as_bytes());
    key.push(b'|');
    let nanos = transaction.created_at.timestamp_nanos_opt().unwrap_or(0);
    key.extend_from_slice(&nanos.to_be_bytes());
    key.extend_from_slice(transaction.id.as_bytes());
    key
}
