// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction ledger recorder.
//!
//! Every ledger transaction the service learns about is recorded here, first
//! as `pending` and later moved to exactly one terminal status. The terminal
//! write is a compare-and-set inside a single redb write transaction, so the
//! confirmation tracker and the event reconciler can race on the same hash
//! without double-applying or silently overwriting each other.
//!
//! Records created from a client's claim are not trusted blindly. A receipt
//! whose sender or recipient disagrees with the record does not confirm it,
//! and a decoded ledger event overwrites whatever the client claimed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::database::{
    address_range, make_index_key, tx_hash_from_index_key, Database, StoreError, StoreResult,
    ADDRESS_TX_INDEX, TRANSACTIONS,
};
use crate::error::{ServiceError, ServiceResult};

/// Default page size for history queries.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Upper bound on history page size.
pub const MAX_HISTORY_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    CampaignCreation,
    Contribution,
    Withdrawal,
    Refund,
    MilestoneCompletion,
}

/// Transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// Submitted, no receipt observed yet
    Pending,
    /// Included in a block and succeeded
    Confirmed,
    /// Included in a block and reverted, or rejected
    Failed,
}

impl Default for TxStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

/// Stored transaction record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StoredTransaction {
    /// Transaction hash (0x prefixed, lowercase)
    pub tx_hash: String,
    pub tx_type: TxType,
    pub status: TxStatus,
    /// Sender address
    pub from: String,
    /// Recipient (contract) address
    pub to: String,
    /// Value in ether units
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
    /// Effective gas price in wei
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    /// Deployed campaign contract (confirmed creations only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub explorer_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A freshly submitted transaction.
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub tx_hash: String,
    pub tx_type: TxType,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub campaign_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub explorer_url: String,
}

impl StoredTransaction {
    pub fn new_pending(entry: PendingTransaction) -> Self {
        let now = Utc::now();
        Self {
            tx_hash: entry.tx_hash.to_lowercase(),
            tx_type: entry.tx_type,
            status: TxStatus::Pending,
            from: entry.from.to_lowercase(),
            to: entry.to.to_lowercase(),
            amount: entry.amount,
            block_number: None,
            gas_used: None,
            gas_price: None,
            campaign_id: entry.campaign_id,
            contract_address: None,
            metadata: entry.metadata,
            error_message: None,
            explorer_url: entry.explorer_url,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the record already says what `entry` says.
    fn describes(&self, entry: &PendingTransaction) -> bool {
        self.tx_type == entry.tx_type
            && self.from == entry.from.to_lowercase()
            && self.to == entry.to.to_lowercase()
            && self.amount == entry.amount
            && self.campaign_id == entry.campaign_id
    }

    fn parties_differ(&self, update: &TerminalUpdate) -> bool {
        update
            .from
            .as_ref()
            .is_some_and(|from| !from.eq_ignore_ascii_case(&self.from))
            || update
                .to
                .as_ref()
                .is_some_and(|to| !to.eq_ignore_ascii_case(&self.to))
    }

    /// A recorded terminal status that `update` contradicts.
    fn terminal_conflict(&self, update: &TerminalUpdate) -> bool {
        let block_conflict = matches!(
            (self.block_number, update.block_number),
            (Some(recorded), Some(observed)) if recorded != observed
        );
        self.status.is_terminal() && (self.status != update.status || block_conflict)
    }

    fn apply_terminal(&mut self, update: &TerminalUpdate) {
        self.status = update.status;
        self.block_number = update.block_number.or(self.block_number);
        self.gas_used = update.gas_used.or(self.gas_used);
        if update.gas_price.is_some() {
            self.gas_price = update.gas_price.clone();
        }
        if update.contract_address.is_some() {
            self.contract_address = update.contract_address.as_ref().map(|a| a.to_lowercase());
        }
        if update.status == TxStatus::Failed {
            self.error_message = update.error_message.clone();
        }
        self.updated_at = Utc::now();
    }
}

/// Terminal outcome observed on the ledger.
#[derive(Debug, Clone, Default)]
pub struct TerminalUpdate {
    pub status: TxStatus,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub gas_price: Option<String>,
    pub contract_address: Option<String>,
    pub error_message: Option<String>,
    /// Sender observed on the ledger
    pub from: Option<String>,
    /// Recipient observed on the ledger, absent for deployments
    pub to: Option<String>,
}

impl TerminalUpdate {
    pub fn confirmed(block_number: u64) -> Self {
        Self {
            status: TxStatus::Confirmed,
            block_number: Some(block_number),
            ..Default::default()
        }
    }

    pub fn failed(block_number: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            status: TxStatus::Failed,
            block_number,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_gas(mut self, gas_used: u64, gas_price: String) -> Self {
        self.gas_used = Some(gas_used);
        self.gas_price = Some(gas_price);
        self
    }

    pub fn with_contract_address(mut self, address: impl Into<String>) -> Self {
        self.contract_address = Some(address.into());
        self
    }

    /// Require the record's sender and recipient to match the ledger.
    pub fn with_parties(mut self, from: impl Into<String>, to: Option<String>) -> Self {
        self.from = Some(from.into());
        self.to = to;
        self
    }
}

fn conflict_error(hash: &str, tx: &StoredTransaction, update: &TerminalUpdate) -> ServiceError {
    tracing::error!(
        tx_hash = %hash,
        recorded_status = ?tx.status,
        observed_status = ?update.status,
        recorded_block = ?tx.block_number,
        observed_block = ?update.block_number,
        "Conflicting terminal status for transaction"
    );
    ServiceError::ReconciliationMismatch(format!(
        "transaction {hash} recorded as {:?} at block {:?}, observed {:?} at block {:?}",
        tx.status, tx.block_number, update.status, update.block_number
    ))
}

fn parties_error(hash: &str, tx: &StoredTransaction, update: &TerminalUpdate) -> ServiceError {
    tracing::error!(
        tx_hash = %hash,
        recorded_from = %tx.from,
        recorded_to = %tx.to,
        observed_from = ?update.from,
        observed_to = ?update.to,
        "Ledger parties differ from the recorded transaction"
    );
    ServiceError::ReconciliationMismatch(format!(
        "transaction {hash} recorded as {} -> {}, observed {:?} -> {:?}",
        tx.from, tx.to, update.from, update.to
    ))
}

/// Result of a terminal write attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalWrite {
    /// The record moved from pending to the terminal status
    Applied(StoredTransaction),
    /// The same terminal status was already recorded
    AlreadyTerminal,
    /// No record exists for the hash
    Missing,
}

/// Filter for history queries.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub campaign_id: Option<String>,
    /// Matches either side of the transaction
    pub address: Option<String>,
    pub tx_type: Option<TxType>,
    pub status: Option<TxStatus>,
    pub limit: Option<usize>,
}

impl TransactionFilter {
    fn matches(&self, tx: &StoredTransaction) -> bool {
        if let Some(campaign_id) = &self.campaign_id {
            if tx.campaign_id.as_deref() != Some(campaign_id.as_str()) {
                return false;
            }
        }
        if let Some(address) = &self.address {
            let address = address.to_lowercase();
            if tx.from != address && tx.to != address {
                return false;
            }
        }
        if self.tx_type.is_some_and(|t| t != tx.tx_type) {
            return false;
        }
        if self.status.is_some_and(|s| s != tx.status) {
            return false;
        }
        true
    }

    fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT)
    }
}

/// Records transactions and their single terminal transition.
#[derive(Clone)]
pub struct TransactionRecorder {
    db: Arc<Database>,
}

impl TransactionRecorder {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record a pending transaction. Recording the same hash again returns
    /// the existing record unchanged.
    pub fn record_pending(&self, entry: PendingTransaction) -> StoreResult<StoredTransaction> {
        let tx = StoredTransaction::new_pending(entry);
        let timestamp = tx.created_at.timestamp();

        let write_txn = self.db.db.begin_write()?;
        let stored = {
            let mut tx_table = write_txn.open_table(TRANSACTIONS)?;
            let existing = {
                match tx_table.get(tx.tx_hash.as_str())? {
                    Some(value) => Some(value.value().to_vec()),
                    None => None,
                }
            };

            match existing {
                Some(bytes) => serde_json::from_slice(&bytes)?,
                None => {
                    let json = serde_json::to_vec(&tx)?;
                    tx_table.insert(tx.tx_hash.as_str(), json.as_slice())?;

                    let mut idx_table = write_txn.open_table(ADDRESS_TX_INDEX)?;
                    for (addr, direction) in [(&tx.from, "sent"), (&tx.to, "received")] {
                        let key = make_index_key(addr, timestamp, &tx.tx_hash);
                        idx_table.insert(key.as_slice(), direction)?;
                    }
                    tx
                }
            }
        };
        write_txn.commit()?;
        Ok(stored)
    }

    /// Move a pending record to its terminal status exactly once.
    pub fn mark_terminal(
        &self,
        tx_hash: &str,
        update: TerminalUpdate,
    ) -> ServiceResult<TerminalWrite> {
        if !update.status.is_terminal() {
            return Err(ServiceError::Validation(
                "terminal update requires confirmed or failed status".to_string(),
            ));
        }
        let hash = tx_hash.to_lowercase();

        let write_txn = self.db.db.begin_write().map_err(StoreError::from)?;
        let outcome = {
            let mut table = write_txn
                .open_table(TRANSACTIONS)
                .map_err(StoreError::from)?;
            let existing_bytes = {
                let existing = table
                    .get(hash.as_str())
                    .map_err(StoreError::from)?;
                existing.map(|v| v.value().to_vec())
            };

            let Some(bytes) = existing_bytes else {
                tracing::warn!(tx_hash = %hash, status = ?update.status, "Terminal update for unknown transaction");
                return Ok(TerminalWrite::Missing);
            };
            let mut tx: StoredTransaction =
                serde_json::from_slice(&bytes).map_err(StoreError::from)?;

            if tx.parties_differ(&update) {
                return Err(parties_error(&hash, &tx, &update));
            }
            if tx.status.is_terminal() {
                if tx.terminal_conflict(&update) {
                    return Err(conflict_error(&hash, &tx, &update));
                }
                TerminalWrite::AlreadyTerminal
            } else {
                tx.apply_terminal(&update);
                let json = serde_json::to_vec(&tx).map_err(StoreError::from)?;
                table
                    .insert(hash.as_str(), json.as_slice())
                    .map_err(StoreError::from)?;
                TerminalWrite::Applied(tx)
            }
        };
        if matches!(outcome, TerminalWrite::Applied(_)) {
            write_txn.commit().map_err(StoreError::from)?;
            tracing::info!(tx_hash = %hash, status = ?update.status, block = ?update.block_number, "Transaction reached terminal status");
        }
        Ok(outcome)
    }

    /// Record a transaction observed on the ledger and move it to its
    /// terminal status in one step.
    ///
    /// An existing record that disagrees with `entry` is corrected to the
    /// ledger's values unless it already holds a contradicting terminal
    /// status.
    pub fn record_confirmed(
        &self,
        entry: PendingTransaction,
        update: TerminalUpdate,
    ) -> ServiceResult<TerminalWrite> {
        if !update.status.is_terminal() {
            return Err(ServiceError::Validation(
                "terminal update requires confirmed or failed status".to_string(),
            ));
        }
        let observed = StoredTransaction::new_pending(entry.clone());
        let hash = observed.tx_hash.clone();

        let write_txn = self.db.db.begin_write().map_err(StoreError::from)?;
        let outcome = {
            let mut table = write_txn
                .open_table(TRANSACTIONS)
                .map_err(StoreError::from)?;
            let mut index = write_txn
                .open_table(ADDRESS_TX_INDEX)
                .map_err(StoreError::from)?;
            let existing_bytes = table
                .get(hash.as_str())
                .map_err(StoreError::from)?
                .map(|v| v.value().to_vec());

            let tx = match existing_bytes {
                None => {
                    let mut tx = observed;
                    tx.apply_terminal(&update);
                    let timestamp = tx.created_at.timestamp();
                    for (addr, direction) in [(&tx.from, "sent"), (&tx.to, "received")] {
                        let key = make_index_key(addr, timestamp, &hash);
                        index
                            .insert(key.as_slice(), direction)
                            .map_err(StoreError::from)?;
                    }
                    tx
                }
                Some(bytes) => {
                    let mut tx: StoredTransaction =
                        serde_json::from_slice(&bytes).map_err(StoreError::from)?;
                    if tx.terminal_conflict(&update) {
                        return Err(conflict_error(&hash, &tx, &update));
                    }
                    let describes = tx.describes(&entry);
                    if describes && tx.status.is_terminal() {
                        return Ok(TerminalWrite::AlreadyTerminal);
                    }
                    if !describes {
                        tracing::warn!(
                            tx_hash = %hash,
                            recorded_type = ?tx.tx_type,
                            recorded_from = %tx.from,
                            observed_type = ?observed.tx_type,
                            observed_from = %observed.from,
                            "Transaction record corrected from ledger event"
                        );
                        let timestamp = tx.created_at.timestamp();
                        for addr in [&tx.from, &tx.to] {
                            let key = make_index_key(addr, timestamp, &hash);
                            index.remove(key.as_slice()).map_err(StoreError::from)?;
                        }
                        tx.tx_type = observed.tx_type;
                        tx.from = observed.from;
                        tx.to = observed.to;
                        tx.amount = observed.amount;
                        tx.campaign_id = observed.campaign_id;
                        tx.metadata = observed.metadata;
                        for (addr, direction) in [(&tx.from, "sent"), (&tx.to, "received")] {
                            let key = make_index_key(addr, timestamp, &hash);
                            index
                                .insert(key.as_slice(), direction)
                                .map_err(StoreError::from)?;
                        }
                    }
                    if tx.status.is_terminal() {
                        tx.updated_at = Utc::now();
                    } else {
                        tx.apply_terminal(&update);
                    }
                    tx
                }
            };

            let json = serde_json::to_vec(&tx).map_err(StoreError::from)?;
            table
                .insert(hash.as_str(), json.as_slice())
                .map_err(StoreError::from)?;
            TerminalWrite::Applied(tx)
        };
        write_txn.commit().map_err(StoreError::from)?;
        tracing::info!(tx_hash = %hash, status = ?update.status, block = ?update.block_number, "Ledger transaction recorded");
        Ok(outcome)
    }

    pub fn get(&self, tx_hash: &str) -> StoreResult<Option<StoredTransaction>> {
        let hash = tx_hash.to_lowercase();
        let read_txn = self.db.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS)?;
        match table.get(hash.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Newest-first transaction history.
    pub fn history(&self, filter: &TransactionFilter) -> StoreResult<Vec<StoredTransaction>> {
        let limit = filter.effective_limit();
        let read_txn = self.db.db.begin_read()?;
        let tx_table = read_txn.open_table(TRANSACTIONS)?;

        if let Some(address) = &filter.address {
            // Index keys already sort newest first
            let idx_table = read_txn.open_table(ADDRESS_TX_INDEX)?;
            let (start, end) = address_range(address);
            let mut results = Vec::with_capacity(limit);
            for entry in idx_table.range(start.as_slice()..end.as_slice())? {
                let (key, _) = entry?;
                let Some(tx_hash) = tx_hash_from_index_key(key.value()) else {
                    continue;
                };
                if let Some(value) = tx_table.get(tx_hash.as_str())? {
                    let tx: StoredTransaction = serde_json::from_slice(value.value())?;
                    if filter.matches(&tx) {
                        results.push(tx);
                    }
                }
                if results.len() >= limit {
                    break;
                }
            }
            return Ok(results);
        }

        let mut results = Vec::new();
        for entry in tx_table.iter()? {
            let (_, value) = entry?;
            let tx: StoredTransaction = serde_json::from_slice(value.value())?;
            if filter.matches(&tx) {
                results.push(tx);
            }
        }
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        results.truncate(limit);
        Ok(results)
    }

    /// All records still waiting for a terminal status.
    pub fn list_pending(&self) -> StoreResult<Vec<StoredTransaction>> {
        let read_txn = self.db.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS)?;
        let mut pending = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let tx: StoredTransaction = serde_json::from_slice(value.value())?;
            if tx.status == TxStatus::Pending {
                pending.push(tx);
            }
        }
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::tests::temp_db;

    const FROM: &str = "0x1111111111111111111111111111111111111111";
    const TO: &str = "0x2222222222222222222222222222222222222222";

    fn recorder() -> (TransactionRecorder, tempfile::TempDir) {
        let (db, dir) = temp_db();
        (TransactionRecorder::new(Arc::new(db)), dir)
    }

    fn entry(hash: &str, tx_type: TxType, campaign_id: Option<&str>) -> PendingTransaction {
        PendingTransaction {
            tx_hash: hash.to_string(),
            tx_type,
            from: FROM.to_string(),
            to: TO.to_string(),
            amount: "1.5".to_string(),
            campaign_id: campaign_id.map(str::to_string),
            metadata: None,
            explorer_url: format!("https://explorer.test/tx/{hash}"),
        }
    }

    #[test]
    fn record_pending_is_idempotent() {
        let (rec, _dir) = recorder();
        let first = rec
            .record_pending(entry("0xAAA", TxType::Contribution, None))
            .unwrap();
        let mut again = entry("0xaaa", TxType::Contribution, None);
        again.amount = "99".to_string();
        let second = rec.record_pending(again).unwrap();

        assert_eq!(first, second);
        assert_eq!(second.amount, "1.5");
        assert_eq!(rec.list_pending().unwrap().len(), 1);
    }

    #[test]
    fn terminal_transition_happens_once() {
        let (rec, _dir) = recorder();
        rec.record_pending(entry("0xabc", TxType::Contribution, None))
            .unwrap();

        let update = TerminalUpdate::confirmed(100).with_gas(21_000, "25000000000".into());
        let first = rec.mark_terminal("0xABC", update.clone()).unwrap();
        let TerminalWrite::Applied(tx) = first else {
            panic!("expected first write to apply");
        };
        assert_eq!(tx.status, TxStatus::Confirmed);
        assert_eq!(tx.block_number, Some(100));
        assert_eq!(tx.gas_used, Some(21_000));

        let second = rec.mark_terminal("0xabc", update).unwrap();
        assert_eq!(second, TerminalWrite::AlreadyTerminal);

        let stored = rec.get("0xabc").unwrap().unwrap();
        assert_eq!(stored.block_number, Some(100));
        assert!(rec.list_pending().unwrap().is_empty());
    }

    #[test]
    fn conflicting_terminal_status_is_flagged() {
        let (rec, _dir) = recorder();
        rec.record_pending(entry("0xabc", TxType::Refund, None)).unwrap();
        rec.mark_terminal("0xabc", TerminalUpdate::confirmed(100))
            .unwrap();

        let err = rec
            .mark_terminal("0xabc", TerminalUpdate::failed(Some(100), "reverted"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::ReconciliationMismatch(_)));

        let err = rec
            .mark_terminal("0xabc", TerminalUpdate::confirmed(101))
            .unwrap_err();
        assert!(matches!(err, ServiceError::ReconciliationMismatch(_)));

        // Recorded state is untouched
        let stored = rec.get("0xabc").unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Confirmed);
        assert_eq!(stored.block_number, Some(100));
    }

    #[test]
    fn receipt_from_another_sender_does_not_confirm() {
        let (rec, _dir) = recorder();
        rec.record_pending(entry("0xabc", TxType::Refund, None)).unwrap();

        let update = TerminalUpdate::confirmed(100).with_parties(
            "0x70997970c51812dc3a010c7d01b50e0d17dc79c8",
            Some(TO.to_string()),
        );
        let err = rec.mark_terminal("0xabc", update).unwrap_err();
        assert!(matches!(err, ServiceError::ReconciliationMismatch(_)));
        assert_eq!(rec.get("0xabc").unwrap().unwrap().status, TxStatus::Pending);

        // matching parties, in any case, confirm
        let update =
            TerminalUpdate::confirmed(100).with_parties(FROM.to_uppercase().replace("0X", "0x"), None);
        assert!(matches!(
            rec.mark_terminal("0xabc", update).unwrap(),
            TerminalWrite::Applied(_)
        ));
    }

    #[test]
    fn ledger_event_corrects_claimed_record() {
        let (rec, _dir) = recorder();
        rec.record_pending(entry("0xabc", TxType::Refund, None)).unwrap();

        let observed = PendingTransaction {
            tx_hash: "0xabc".into(),
            tx_type: TxType::Contribution,
            from: "0x3333333333333333333333333333333333333333".into(),
            to: TO.into(),
            amount: "0.25".into(),
            campaign_id: Some("c1".into()),
            metadata: None,
            explorer_url: String::new(),
        };
        let write = rec
            .record_confirmed(observed.clone(), TerminalUpdate::confirmed(9))
            .unwrap();
        let TerminalWrite::Applied(tx) = write else {
            panic!("expected the record to be corrected");
        };
        assert_eq!(tx.tx_type, TxType::Contribution);
        assert_eq!(tx.from, "0x3333333333333333333333333333333333333333");
        assert_eq!(tx.amount, "0.25");
        assert_eq!(tx.status, TxStatus::Confirmed);

        // the claimed sender no longer sees it, the real one does
        let by_claimed = rec
            .history(&TransactionFilter {
                address: Some(FROM.into()),
                ..Default::default()
            })
            .unwrap();
        assert!(by_claimed.is_empty());
        let by_contributor = rec
            .history(&TransactionFilter {
                address: Some("0x3333333333333333333333333333333333333333".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_contributor.len(), 1);

        assert_eq!(
            rec.record_confirmed(observed, TerminalUpdate::confirmed(9)).unwrap(),
            TerminalWrite::AlreadyTerminal
        );
    }

    #[test]
    fn ledger_event_never_overrides_a_failed_record() {
        let (rec, _dir) = recorder();
        rec.record_pending(entry("0xabc", TxType::Contribution, None)).unwrap();
        rec.mark_terminal("0xabc", TerminalUpdate::failed(Some(9), "reverted"))
            .unwrap();

        let err = rec
            .record_confirmed(entry("0xabc", TxType::Contribution, None), TerminalUpdate::confirmed(9))
            .unwrap_err();
        assert!(matches!(err, ServiceError::ReconciliationMismatch(_)));
        assert_eq!(rec.get("0xabc").unwrap().unwrap().status, TxStatus::Failed);
    }

    #[test]
    fn ledger_event_without_record_is_inserted_confirmed() {
        let (rec, _dir) = recorder();
        let write = rec
            .record_confirmed(entry("0xnew", TxType::Contribution, Some("c1")), TerminalUpdate::confirmed(3))
            .unwrap();
        assert!(matches!(write, TerminalWrite::Applied(_)));

        let stored = rec.get("0xnew").unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Confirmed);
        assert_eq!(stored.block_number, Some(3));
        assert!(rec.list_pending().unwrap().is_empty());
    }

    #[test]
    fn unknown_hash_reports_missing() {
        let (rec, _dir) = recorder();
        let outcome = rec
            .mark_terminal("0xdead", TerminalUpdate::confirmed(1))
            .unwrap();
        assert_eq!(outcome, TerminalWrite::Missing);
    }

    #[test]
    fn pending_is_not_a_terminal_update() {
        let (rec, _dir) = recorder();
        let update = TerminalUpdate {
            status: TxStatus::Pending,
            ..Default::default()
        };
        assert!(matches!(
            rec.mark_terminal("0xabc", update),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn failed_update_keeps_error_message() {
        let (rec, _dir) = recorder();
        rec.record_pending(entry("0xf00", TxType::Withdrawal, None))
            .unwrap();
        rec.mark_terminal("0xf00", TerminalUpdate::failed(Some(7), "execution reverted"))
            .unwrap();

        let stored = rec.get("0xf00").unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("execution reverted"));
    }

    #[test]
    fn history_filters_and_orders_newest_first() {
        let (rec, _dir) = recorder();
        rec.record_pending(entry("0x01", TxType::Contribution, Some("c1")))
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        rec.record_pending(entry("0x02", TxType::Contribution, Some("c2")))
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        rec.record_pending(entry("0x03", TxType::Refund, Some("c1")))
            .unwrap();

        let all = rec.history(&TransactionFilter::default()).unwrap();
        let hashes: Vec<_> = all.iter().map(|t| t.tx_hash.as_str()).collect();
        assert_eq!(hashes, vec!["0x03", "0x02", "0x01"]);

        let by_campaign = rec
            .history(&TransactionFilter {
                campaign_id: Some("c1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_campaign.len(), 2);

        let by_address = rec
            .history(&TransactionFilter {
                address: Some(TO.to_uppercase().replace("0X", "0x")),
                tx_type: Some(TxType::Contribution),
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_address.len(), 1);
        assert_eq!(by_address[0].tx_hash, "0x02");
    }
}
