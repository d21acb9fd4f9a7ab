// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM ledger integration.
//!
//! This module provides functionality for:
//! - Encoding campaign factory and campaign calls
//! - Submitting service-signed transactions and awaiting their receipts
//! - Reading and decoding campaign events

pub mod client;
pub mod contracts;
pub mod signing;
pub mod types;

pub use client::LedgerClient;
pub use signing::{load_signer, KeyError};
pub use types::*;
