// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger types and amount helpers.

use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ServiceError, ServiceResult};

/// Decimals of the native currency.
pub const ETHER_DECIMALS: u8 = 18;

/// Connection settings for the EVM ledger.
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    /// Display name
    pub name: String,
    pub rpc_url: String,
    /// Block explorer base URL (transaction links are `{explorer_url}/tx/{hash}`)
    pub explorer_url: String,
    /// Campaign factory contract, if deployed
    pub factory: Option<Address>,
}

impl NetworkSettings {
    pub fn explorer_tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.explorer_url.trim_end_matches('/'), tx_hash)
    }
}

/// Receipt polling schedule.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationPolicy {
    /// First poll delay; doubles after every empty poll
    pub initial_interval: Duration,
    /// Upper bound on the poll delay
    pub max_interval: Duration,
    /// Total time to wait before giving up
    pub ceiling: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(8),
            ceiling: Duration::from_secs(120),
        }
    }
}

/// A contract call the service knows how to encode.
#[derive(Debug, Clone, PartialEq)]
pub enum ContractCall {
    CreateCampaign {
        startup: Address,
        title: String,
        description: String,
        goal: U256,
        duration_secs: u64,
        milestone_descriptions: Vec<String>,
        milestone_amounts: Vec<U256>,
    },
    Contribute {
        campaign: Address,
        value: U256,
    },
    Refund {
        campaign: Address,
    },
    CompleteMilestone {
        campaign: Address,
        index: u64,
    },
    WithdrawMilestoneFunds {
        campaign: Address,
        index: u64,
    },
}

/// Encoded call ready to be signed, by this service or by a client wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCall {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

/// A transaction accepted by the node.
#[derive(Debug, Clone)]
pub struct SubmittedTx {
    pub tx_hash: String,
    pub from: Address,
    pub to: Address,
    pub explorer_url: String,
}

/// Inclusion result of a transaction.
#[derive(Debug, Clone)]
pub struct LedgerReceipt {
    pub tx_hash: String,
    pub from: Address,
    /// Called contract, `None` for a direct deployment
    pub to: Option<Address>,
    pub block_number: u64,
    pub gas_used: u64,
    /// Effective gas price in wei
    pub gas_price: u128,
    pub success: bool,
    /// Address of a contract deployed directly by the transaction
    pub contract_address: Option<Address>,
    /// Campaign events emitted by the transaction
    pub events: Vec<ChainEvent>,
}

/// Decoded campaign event with its position on the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainEvent {
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
    /// Contract that emitted the log
    pub emitter: Address,
    pub kind: ChainEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainEventKind {
    CampaignCreated {
        campaign_address: Address,
        startup: Address,
        title: String,
        goal: U256,
        deadline: U256,
    },
    ContributionMade {
        contributor: Address,
        amount: U256,
        total_raised: U256,
    },
}

/// State reported by a campaign contract's `getCampaignInfo`.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignInfo {
    pub startup: Address,
    pub title: String,
    pub description: String,
    pub goal: U256,
    /// Unix timestamp
    pub deadline: U256,
    pub total_raised: U256,
    /// Contract lifecycle enum: 0 active, 1 funded, 2 failed, 3 cancelled
    pub state: u8,
    pub contributors: U256,
}

/// Network status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NetworkInfo {
    pub name: String,
    pub chain_id: u64,
    pub block_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub factory_address: Option<String>,
    /// Address this service submits from, when a signing key is configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_address: Option<String>,
    pub explorer_url: String,
}

/// Parse a human-readable amount into the smallest unit.
///
/// `"1.5"` with 18 decimals is `1_500_000_000_000_000_000`.
pub fn parse_amount(amount: &str, decimals: u8) -> ServiceResult<U256> {
    let amount = amount.trim();
    let (whole, fraction) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };

    let valid = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !valid(whole) || !valid(fraction) {
        return Err(ServiceError::Validation(format!("invalid amount: {amount}")));
    }
    if fraction.len() > decimals as usize {
        return Err(ServiceError::Validation(format!(
            "too many decimal places (max {decimals})"
        )));
    }

    let padded = format!("{whole}{fraction:0<width$}", width = decimals as usize);
    let digits = padded.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 10)
        .map_err(|_| ServiceError::Validation(format!("amount out of range: {amount}")))
}

/// Format an amount in the smallest unit for display.
pub fn format_amount(amount: U256, decimals: u8) -> String {
    if amount.is_zero() {
        return "0".to_string();
    }

    let divisor = U256::from(10u64).pow(U256::from(decimals));
    let whole = amount / divisor;
    let remainder = amount % divisor;

    if remainder.is_zero() {
        whole.to_string()
    } else {
        let decimal_str = format!("{:0>width$}", remainder, width = decimals as usize);
        let trimmed = decimal_str.trim_end_matches('0');
        format!("{whole}.{trimmed}")
    }
}
