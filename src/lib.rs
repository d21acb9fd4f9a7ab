// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Crowdfund Ledger Server - Wallet Authentication & On-Chain Reconciliation
//!
//! Authenticates wallet holders with signed login nonces and keeps the
//! off-chain campaign and transaction records consistent with the campaign
//! factory contracts on an EVM chain.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Nonce signing login, bearer credentials and role guards
//! - `blockchain` - Ledger client, contract bindings and signing keys
//! - `funding` - Campaign submission and confirmation tracking
//! - `reconciler` - Event listener and exactly-once event application
//! - `storage` - Embedded redb store for identities, campaigns and transactions

pub mod api;
pub mod auth;
pub mod blockchain;
pub mod config;
pub mod error;
pub mod funding;
pub mod models;
pub mod reconciler;
pub mod state;
pub mod storage;
