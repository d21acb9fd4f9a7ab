// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the REST API. Stored records that are
//! returned as-is (`CampaignRecord`, `StoredTransaction`) live in
//! [`crate::storage`].
//!
//! ## Amounts
//!
//! Amounts in requests are human-readable ether strings (`"1.5"`). Amounts
//! handed back for client-side signing are wei decimal strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::Role,
    blockchain::CampaignInfo,
    storage::{CampaignRecord, Identity, Profile, StoredTransaction, TxStatus, TxType},
};

// =============================================================================
// Authentication
// =============================================================================

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct NonceQuery {
    /// Wallet address (0x + 40 hex chars)
    pub wallet_address: String,
    /// Role to authenticate as (default: unspecified)
    #[serde(default)]
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NonceResponse {
    /// Message to sign with the wallet (EIP-191 personal message)
    pub nonce: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub wallet_address: String,
    #[serde(default)]
    pub role: Role,
    /// Profile payload; its `kind` must match the role
    pub profile: Profile,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    pub identity: IdentityResponse,
    /// First nonce to sign for login
    pub nonce: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub wallet_address: String,
    #[serde(default)]
    pub role: Role,
    /// 65-byte signature over the outstanding nonce, hex encoded
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    /// Bearer credential for `Authorization: Bearer <token>`
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub identity: IdentityResponse,
}

/// Public view of an identity. The outstanding nonce is never exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IdentityResponse {
    pub address: String,
    pub role: Role,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
}

impl From<Identity> for IdentityResponse {
    fn from(identity: Identity) -> Self {
        Self {
            address: identity.address,
            role: identity.role,
            profile: identity.profile,
            created_at: identity.created_at,
        }
    }
}

// =============================================================================
// Campaigns
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MilestoneRequest {
    pub description: String,
    /// Milestone amount in ether (e.g. "2.5")
    pub amount: String,
}

/// Request to deploy a campaign through the factory contract.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateCampaignRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Funding goal in ether (e.g. "10")
    pub goal: String,
    /// Campaign duration in seconds
    pub duration_secs: u64,
    #[serde(default)]
    pub milestones: Vec<MilestoneRequest>,
}

/// A campaign whose creation transaction has been submitted.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CampaignSubmission {
    pub campaign: CampaignRecord,
    pub transaction: StoredTransaction,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ContributeRequest {
    /// Contribution in ether (e.g. "0.5")
    pub amount: String,
}

/// Call data for the client wallet to sign and send.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PreparedCallResponse {
    /// Contract address
    pub to: String,
    /// Value to attach in wei
    pub value: String,
    /// ABI-encoded call data (0x prefixed)
    pub data: String,
}

/// Campaign state read from its contract. Amounts are wei decimal strings.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CampaignContractInfo {
    pub startup: String,
    pub title: String,
    pub description: String,
    pub goal: String,
    /// Unix timestamp
    pub deadline: String,
    pub total_raised: String,
    /// 0 active, 1 funded, 2 failed, 3 cancelled
    pub state: u8,
    pub contributors_count: String,
}

impl From<CampaignInfo> for CampaignContractInfo {
    fn from(info: CampaignInfo) -> Self {
        Self {
            startup: info.startup.to_checksum(None),
            title: info.title,
            description: info.description,
            goal: info.goal.to_string(),
            deadline: info.deadline.to_string(),
            total_raised: info.total_raised.to_string(),
            state: info.state,
            contributors_count: info.contributors.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CampaignContractResponse {
    pub contract_address: String,
    pub info: CampaignContractInfo,
}

// =============================================================================
// Transactions
// =============================================================================

/// A transaction signed and sent by the client wallet.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TrackTransactionRequest {
    pub tx_type: TxType,
    /// Contract the transaction was sent to
    pub to: String,
    /// Value in ether (default "0")
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct TransactionHistoryQuery {
    pub campaign_id: Option<String>,
    /// Matches sender or recipient
    pub address: Option<String>,
    pub tx_type: Option<TxType>,
    pub status: Option<TxStatus>,
    /// Maximum number of results (default: 50, max: 200)
    #[param(default = 50)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionListResponse {
    pub transactions: Vec<StoredTransaction>,
    pub count: usize,
}
