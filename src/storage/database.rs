// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded record database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `identities`: `role|address` → serialized Identity
//! - `campaigns`: campaign_id → serialized CampaignRecord
//! - `campaign_address_index`: on-chain address → campaign_id
//! - `transactions`: tx_hash → serialized StoredTransaction
//! - `address_tx_index`: composite key (address|!timestamp|tx_hash) → direction
//! - `processed_events`: `tx_hash:log_index` → unix timestamp of first claim
//! - `listener_state`: key → value (checkpoint state)
//!
//! Every conditional update (nonce compare-and-swap, terminal status write,
//! address binding, event claim) runs inside a single write transaction so the
//! read and the write observe the same snapshot.

use std::path::Path;

use redb::{
    Database as RedbDatabase, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};

// =============================================================================
// Table Definitions
// =============================================================================

pub(crate) const IDENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("identities");

pub(crate) const CAMPAIGNS: TableDefinition<&str, &[u8]> = TableDefinition::new("campaigns");

pub(crate) const CAMPAIGN_ADDRESS_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("campaign_address_index");

pub(crate) const TRANSACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("transactions");

/// Key format: `address|!timestamp_be|tx_hash` for descending-time range scans.
pub(crate) const ADDRESS_TX_INDEX: TableDefinition<&[u8], &str> =
    TableDefinition::new("address_tx_index");

const PROCESSED_EVENTS: TableDefinition<&str, i64> = TableDefinition::new("processed_events");

const LISTENER_STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("listener_state");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Build a composite key for the address_tx_index table.
///
/// The inverted timestamp ensures newest-first ordering when scanning forward.
pub(crate) fn make_index_key(address: &str, timestamp: i64, tx_hash: &str) -> Vec<u8> {
    let addr = address.to_lowercase();
    let mut key = Vec::with_capacity(addr.len() + 1 + 8 + 1 + tx_hash.len());
    key.extend_from_slice(addr.as_bytes());
    key.push(b'|');
    key.extend_from_slice(&(!timestamp as u64).to_be_bytes());
    key.push(b'|');
    key.extend_from_slice(tx_hash.as_bytes());
    key
}

/// Inclusive start and exclusive end of the key range for one address.
pub(crate) fn address_range(address: &str) -> (Vec<u8>, Vec<u8>) {
    let addr = address.to_lowercase();
    let mut start = Vec::with_capacity(addr.len() + 1);
    start.extend_from_slice(addr.as_bytes());
    start.push(b'|');

    let mut end = start.clone();
    end.extend_from_slice(&[0xFF; 20]);
    (start, end)
}

/// Extract the tx_hash portion from a composite index key.
pub(crate) fn tx_hash_from_index_key(key: &[u8]) -> Option<String> {
    let mut pipe_count = 0;
    for (i, &b) in key.iter().enumerate() {
        if b == b'|' {
            pipe_count += 1;
            if pipe_count == 2 {
                return String::from_utf8(key[i + 1..].to_vec()).ok();
            }
        }
    }
    None
}

/// Claim `key` inside an open write transaction. Returns `false` if it was
/// already claimed. The claim only becomes durable with the transaction, so a
/// mutation that fails later in the same transaction leaves it unclaimed.
pub(crate) fn claim_in(txn: &WriteTransaction, key: &str) -> StoreResult<bool> {
    let mut table = txn.open_table(PROCESSED_EVENTS)?;
    if table.get(key)?.is_some() {
        return Ok(false);
    }
    table.insert(key, chrono::Utc::now().timestamp())?;
    Ok(true)
}

/// Dedup key for a decoded ledger event.
pub fn event_key(tx_hash: &str, log_index: u64) -> String {
    format!("{}:{log_index}", tx_hash.to_lowercase())
}

// =============================================================================
// Database
// =============================================================================

/// Embedded ACID record database shared by the stores and the recorder.
pub struct Database {
    pub(crate) db: RedbDatabase,
}

impl Database {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = RedbDatabase::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(IDENTITIES)?;
            let _ = write_txn.open_table(CAMPAIGNS)?;
            let _ = write_txn.open_table(CAMPAIGN_ADDRESS_INDEX)?;
            let _ = write_txn.open_table(TRANSACTIONS)?;
            let _ = write_txn.open_table(ADDRESS_TX_INDEX)?;
            let _ = write_txn.open_table(PROCESSED_EVENTS)?;
            let _ = write_txn.open_table(LISTENER_STATE)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Open a read transaction on every table.
    pub fn health_check(&self) -> StoreResult<()> {
        let read_txn = self.db.begin_read()?;
        read_txn.open_table(IDENTITIES)?;
        read_txn.open_table(CAMPAIGNS)?;
        read_txn.open_table(TRANSACTIONS)?;
        read_txn.open_table(PROCESSED_EVENTS)?;
        Ok(())
    }

    // =========================================================================
    // Processed events
    // =========================================================================

    /// Atomically claim an event key. Returns `false` if it was already claimed.
    pub fn claim_event(&self, key: &str) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let claimed = claim_in(&write_txn, key)?;
        write_txn.commit()?;
        Ok(claimed)
    }

    pub fn is_event_processed(&self, key: &str) -> StoreResult<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PROCESSED_EVENTS)?;
        Ok(table.get(key)?.is_some())
    }

    // =========================================================================
    // Listener checkpoint
    // =========================================================================

    /// Get the last processed block number for a listener scope.
    pub fn get_last_processed_block(&self, scope: &str) -> StoreResult<Option<u64>> {
        let key = format!("last_block_{scope}");
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LISTENER_STATE)?;
        match table.get(key.as_str())? {
            Some(v) => {
                let bytes: [u8; 8] = v
                    .value()
                    .try_into()
                    .map_err(|_| StoreError::Corrupt(format!("checkpoint {key}")))?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    /// Persist the last processed block number for a listener scope.
    pub fn set_last_processed_block(&self, scope: &str, block: u64) -> StoreResult<()> {
        let key = format!("last_block_{scope}");
        let bytes = block.to_be_bytes();
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(LISTENER_STATE)?;
            table.insert(key.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
