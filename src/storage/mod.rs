// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistent state lives in a single embedded redb file under `DATA_DIR`.
//!
//! ## Layout
//!
//! ```text
//! {DATA_DIR}/
//!   ledger.redb      # identities, campaigns, transactions, events, checkpoints
//! ```
//!
//! The identity and campaign stores are exposed as traits so the services
//! depend on the persistence seam rather than on redb itself.

pub mod campaigns;
pub mod database;
pub mod identities;
pub mod transactions;

pub use campaigns::{CampaignRecord, CampaignStatus, CampaignStore};
pub use database::{event_key, Database, StoreError, StoreResult};
pub use identities::{Identity, IdentityStore, Profile};
pub use transactions::{
    PendingTransaction, StoredTransaction, TerminalUpdate, TerminalWrite, TransactionFilter,
    TransactionRecorder, TxStatus, TxType,
};

/// File name of the embedded database inside `DATA_DIR`.
pub const DATABASE_FILE: &str = "ledger.redb";
