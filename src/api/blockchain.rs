// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Campaign ledger endpoints.
//!
//! Campaign creation is signed by the service key. Every other campaign
//! call is returned as encoded call data for the client wallet to sign;
//! the client then reports the transaction hash for tracking.

use std::str::FromStr;

use alloy::primitives::Address;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::{
    auth::{normalize_address, Auth, StartupOnly},
    blockchain::{parse_amount, ContractCall, NetworkInfo, PreparedCall, ETHER_DECIMALS},
    error::{ApiError, ServiceError},
    models::{
        CampaignContractResponse, CampaignSubmission, ContributeRequest, CreateCampaignRequest,
        PreparedCallResponse, TrackTransactionRequest, TransactionHistoryQuery,
        TransactionListResponse,
    },
    state::AppState,
    storage::{CampaignRecord, StoredTransaction, TransactionFilter},
};

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_campaign_address(raw: &str) -> Result<Address, ApiError> {
    let normalized = normalize_address(raw)?;
    Address::from_str(&normalized).map_err(|e| ApiError::bad_request(e.to_string()))
}

fn prepared_response(call: PreparedCall) -> PreparedCallResponse {
    PreparedCallResponse {
        to: call.to.to_checksum(None),
        value: call.value.to_string(),
        data: alloy::hex::encode_prefixed(&call.data),
    }
}

fn prepare(state: &AppState, call: ContractCall) -> Result<Json<PreparedCallResponse>, ApiError> {
    let prepared = state.ledger.build_call_data(&call)?;
    Ok(Json(prepared_response(prepared)))
}

// =============================================================================
// Campaigns
// =============================================================================

/// Deploy a campaign through the factory contract.
///
/// Returns as soon as the node accepts the transaction. The transaction
/// record moves to `confirmed` or `failed` once a receipt is observed.
#[utoipa::path(
    post,
    path = "/v1/blockchain/campaigns",
    tag = "Blockchain",
    request_body = CreateCampaignRequest,
    responses(
        (status = 202, description = "Creation submitted", body = CampaignSubmission),
        (status = 400, description = "Invalid campaign parameters"),
        (status = 403, description = "Caller is not a startup"),
        (status = 422, description = "Ledger rejected the transaction"),
        (status = 503, description = "Ledger unavailable or no service key")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_campaign(
    State(state): State<AppState>,
    StartupOnly(user): StartupOnly,
    Json(request): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<CampaignSubmission>), ApiError> {
    let submission = state.funding.create_campaign(&user.address, &request).await?;
    Ok((StatusCode::ACCEPTED, Json(submission)))
}

/// Overwrite the stored counters and status with the contract's own view.
#[utoipa::path(
    post,
    path = "/v1/blockchain/campaigns/{address}/sync",
    tag = "Blockchain",
    params(("address" = String, Path, description = "Campaign contract address")),
    responses(
        (status = 200, description = "Campaign after the sync", body = CampaignRecord),
        (status = 400, description = "Invalid address"),
        (status = 404, description = "No campaign bound to the address"),
        (status = 503, description = "Ledger unavailable")
    ),
    security(("bearer_auth" = []))
)]
pub async fn sync_campaign(
    State(state): State<AppState>,
    Auth(_user): Auth,
    Path(address): Path<String>,
) -> Result<Json<CampaignRecord>, ApiError> {
    Ok(Json(state.funding.sync_campaign(&address).await?))
}

/// Read a campaign contract's state directly from the ledger.
#[utoipa::path(
    get,
    path = "/v1/blockchain/campaigns/{address}/contract",
    tag = "Blockchain",
    params(("address" = String, Path, description = "Campaign contract address")),
    responses(
        (status = 200, description = "Contract state", body = CampaignContractResponse),
        (status = 400, description = "Invalid address"),
        (status = 422, description = "Address is not a campaign contract"),
        (status = 503, description = "Ledger unavailable")
    )
)]
pub async fn campaign_contract(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<CampaignContractResponse>, ApiError> {
    let campaign = parse_campaign_address(&address)?;
    let info = state.ledger.campaign_info(campaign, None).await?;
    Ok(Json(CampaignContractResponse {
        contract_address: campaign.to_checksum(None),
        info: info.into(),
    }))
}

/// Encode a contribution for the client wallet to sign.
#[utoipa::path(
    post,
    path = "/v1/blockchain/campaigns/{address}/contribute",
    tag = "Blockchain",
    params(("address" = String, Path, description = "Campaign contract address")),
    request_body = ContributeRequest,
    responses(
        (status = 200, description = "Call data to sign", body = PreparedCallResponse),
        (status = 400, description = "Invalid address or amount")
    ),
    security(("bearer_auth" = []))
)]
pub async fn contribute(
    State(state): State<AppState>,
    Auth(_user): Auth,
    Path(address): Path<String>,
    Json(request): Json<ContributeRequest>,
) -> Result<Json<PreparedCallResponse>, ApiError> {
    let campaign = parse_campaign_address(&address)?;
    let value = parse_amount(&request.amount, ETHER_DECIMALS)?;
    if value.is_zero() {
        return Err(ServiceError::Validation("contribution must be positive".to_string()).into());
    }
    prepare(&state, ContractCall::Contribute { campaign, value })
}

/// Encode a refund claim for the client wallet to sign.
#[utoipa::path(
    post,
    path = "/v1/blockchain/campaigns/{address}/refund",
    tag = "Blockchain",
    params(("address" = String, Path, description = "Campaign contract address")),
    responses(
        (status = 200, description = "Call data to sign", body = PreparedCallResponse),
        (status = 400, description = "Invalid address")
    ),
    security(("bearer_auth" = []))
)]
pub async fn refund(
    State(state): State<AppState>,
    Auth(_user): Auth,
    Path(address): Path<String>,
) -> Result<Json<PreparedCallResponse>, ApiError> {
    let campaign = parse_campaign_address(&address)?;
    prepare(&state, ContractCall::Refund { campaign })
}

#[utoipa::path(
    post,
    path = "/v1/blockchain/campaigns/{address}/milestones/{index}/complete",
    tag = "Blockchain",
    params(
        ("address" = String, Path, description = "Campaign contract address"),
        ("index" = u64, Path, description = "Milestone index")
    ),
    responses(
        (status = 200, description = "Call data to sign", body = PreparedCallResponse),
        (status = 403, description = "Caller is not a startup")
    ),
    security(("bearer_auth" = []))
)]
pub async fn complete_milestone(
    State(state): State<AppState>,
    StartupOnly(_user): StartupOnly,
    Path((address, index)): Path<(String, u64)>,
) -> Result<Json<PreparedCallResponse>, ApiError> {
    let campaign = parse_campaign_address(&address)?;
    prepare(&state, ContractCall::CompleteMilestone { campaign, index })
}

#[utoipa::path(
    post,
    path = "/v1/blockchain/campaigns/{address}/milestones/{index}/withdraw",
    tag = "Blockchain",
    params(
        ("address" = String, Path, description = "Campaign contract address"),
        ("index" = u64, Path, description = "Milestone index")
    ),
    responses(
        (status = 200, description = "Call data to sign", body = PreparedCallResponse),
        (status = 403, description = "Caller is not a startup")
    ),
    security(("bearer_auth" = []))
)]
pub async fn withdraw_milestone_funds(
    State(state): State<AppState>,
    StartupOnly(_user): StartupOnly,
    Path((address, index)): Path<(String, u64)>,
) -> Result<Json<PreparedCallResponse>, ApiError> {
    let campaign = parse_campaign_address(&address)?;
    prepare(&state, ContractCall::WithdrawMilestoneFunds { campaign, index })
}

// =============================================================================
// Transactions
// =============================================================================

/// Report a client-signed transaction for tracking.
#[utoipa::path(
    post,
    path = "/v1/blockchain/transactions/{tx_hash}/track",
    tag = "Blockchain",
    params(("tx_hash" = String, Path, description = "Transaction hash")),
    request_body = TrackTransactionRequest,
    responses(
        (status = 202, description = "Tracking started", body = StoredTransaction),
        (status = 400, description = "Invalid hash, address or amount"),
        (status = 404, description = "Unknown campaign")
    ),
    security(("bearer_auth" = []))
)]
pub async fn track_transaction(
    State(state): State<AppState>,
    Auth(user): Auth,
    Path(tx_hash): Path<String>,
    Json(request): Json<TrackTransactionRequest>,
) -> Result<(StatusCode, Json<StoredTransaction>), ApiError> {
    let stored = state
        .funding
        .track_client_transaction(&user.address, &tx_hash, &request)?;
    Ok((StatusCode::ACCEPTED, Json(stored)))
}

/// Transaction history, newest first.
#[utoipa::path(
    get,
    path = "/v1/blockchain/transactions",
    tag = "Blockchain",
    params(TransactionHistoryQuery),
    responses(
        (status = 200, description = "Matching transactions", body = TransactionListResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    Auth(_user): Auth,
    Query(query): Query<TransactionHistoryQuery>,
) -> Result<Json<TransactionListResponse>, ApiError> {
    let filter = TransactionFilter {
        campaign_id: query.campaign_id,
        address: query.address,
        tx_type: query.tx_type,
        status: query.status,
        limit: query.limit,
    };
    let transactions = state.recorder.history(&filter)?;
    Ok(Json(TransactionListResponse {
        count: transactions.len(),
        transactions,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/blockchain/transactions/{tx_hash}",
    tag = "Blockchain",
    params(("tx_hash" = String, Path, description = "Transaction hash")),
    responses(
        (status = 200, description = "Transaction record", body = StoredTransaction),
        (status = 404, description = "Unknown transaction")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_transaction(
    State(state): State<AppState>,
    Auth(_user): Auth,
    Path(tx_hash): Path<String>,
) -> Result<Json<StoredTransaction>, ApiError> {
    state
        .recorder
        .get(&tx_hash)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Transaction {tx_hash} not found")))
}

// =============================================================================
// Network
// =============================================================================

#[utoipa::path(
    get,
    path = "/v1/blockchain/network",
    tag = "Blockchain",
    responses(
        (status = 200, description = "Network status", body = NetworkInfo),
        (status = 503, description = "Ledger unavailable")
    )
)]
pub async fn network_info(State(state): State<AppState>) -> Result<Json<NetworkInfo>, ApiError> {
    Ok(Json(state.ledger.network_info().await?))
}
