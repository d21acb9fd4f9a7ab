// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Funding Flow
//!
//! Submits campaign creations from the service key, records client-signed
//! transactions, and tracks every pending transaction until the ledger
//! confirms or rejects it.
//!
//! Tracking runs as a detached task per transaction. It waits for the
//! receipt, writes the terminal status, and forwards the events found in the
//! receipt to the reconciler. When the confirmation ceiling passes, the
//! record stays `pending` and the event listener catches up later.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    auth::normalize_address,
    blockchain::{
        format_amount, parse_amount, ChainEventKind, ContractCall, LedgerClient, LedgerReceipt,
        ETHER_DECIMALS,
    },
    error::{ServiceError, ServiceResult},
    models::{CampaignSubmission, CreateCampaignRequest, TrackTransactionRequest},
    reconciler::ReconcilerMessage,
    storage::{
        CampaignRecord, CampaignStatus, CampaignStore, PendingTransaction, StoredTransaction,
        TerminalUpdate, TerminalWrite, TransactionRecorder, TxType,
    },
};

/// Watches pending transactions until they reach a terminal status.
#[derive(Clone)]
pub struct ConfirmationTracker {
    ledger: Arc<LedgerClient>,
    recorder: TransactionRecorder,
    events: mpsc::Sender<ReconcilerMessage>,
    shutdown: CancellationToken,
}

impl ConfirmationTracker {
    pub fn new(
        ledger: Arc<LedgerClient>,
        recorder: TransactionRecorder,
        events: mpsc::Sender<ReconcilerMessage>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ledger,
            recorder,
            events,
            shutdown,
        }
    }

    /// Spawn a detached tracking task for `tx_hash`.
    pub fn spawn(&self, tx_hash: String) {
        let tracker = self.clone();
        tokio::spawn(async move { tracker.track(tx_hash).await });
    }

    async fn track(self, tx_hash: String) {
        let result = tokio::select! {
            result = self.ledger.await_confirmation(&tx_hash) => result,
            _ = self.shutdown.cancelled() => {
                tracing::debug!(tx_hash = %tx_hash, "Tracking cancelled by shutdown");
                return;
            }
        };

        match result {
            Ok(receipt) => {
                apply_receipt(&self.recorder, &receipt);
                for event in receipt.events {
                    if self.events.send(ReconcilerMessage::Event(event)).await.is_err() {
                        tracing::warn!(tx_hash = %tx_hash, "Reconciler gone, receipt events not forwarded");
                        break;
                    }
                }
            }
            Err(ServiceError::ConfirmationTimeout { waited_secs, .. }) => {
                tracing::warn!(
                    tx_hash = %tx_hash,
                    waited_secs,
                    "No receipt before the confirmation ceiling, leaving pending"
                );
            }
            Err(e) => {
                tracing::warn!(tx_hash = %tx_hash, error = %e, "Confirmation tracking failed");
            }
        }
    }
}

/// Write the terminal status described by a receipt. A record whose sender
/// or recipient differs from the receipt is left pending.
pub fn apply_receipt(recorder: &TransactionRecorder, receipt: &LedgerReceipt) -> Option<TerminalWrite> {
    let update = if receipt.success {
        let mut update = TerminalUpdate::confirmed(receipt.block_number);
        if let Some(address) = deployed_campaign(receipt) {
            update = update.with_contract_address(format!("{address:#x}"));
        }
        update
    } else {
        TerminalUpdate::failed(Some(receipt.block_number), "transaction reverted")
    }
    .with_gas(receipt.gas_used, receipt.gas_price.to_string())
    .with_parties(
        format!("{:#x}", receipt.from),
        receipt.to.map(|to| format!("{to:#x}")),
    );

    match recorder.mark_terminal(&receipt.tx_hash, update) {
        Ok(write) => Some(write),
        Err(e) => {
            tracing::error!(tx_hash = %receipt.tx_hash, error = %e, "Could not record receipt");
            None
        }
    }
}

fn deployed_campaign(receipt: &LedgerReceipt) -> Option<Address> {
    receipt.contract_address.or_else(|| {
        receipt.events.iter().find_map(|event| match &event.kind {
            ChainEventKind::CampaignCreated {
                campaign_address, ..
            } => Some(*campaign_address),
            _ => None,
        })
    })
}

pub struct FundingService {
    ledger: Arc<LedgerClient>,
    campaigns: Arc<dyn CampaignStore>,
    recorder: TransactionRecorder,
    tracker: ConfirmationTracker,
}

impl FundingService {
    pub fn new(
        ledger: Arc<LedgerClient>,
        campaigns: Arc<dyn CampaignStore>,
        recorder: TransactionRecorder,
        tracker: ConfirmationTracker,
    ) -> Self {
        Self {
            ledger,
            campaigns,
            recorder,
            tracker,
        }
    }

    /// Deploy a campaign for `startup` through the factory contract.
    ///
    /// Returns once the node accepts the transaction. The campaign record is
    /// written first and bound to its contract when the creation event is
    /// reconciled.
    pub async fn create_campaign(
        &self,
        startup: &str,
        request: &CreateCampaignRequest,
    ) -> ServiceResult<CampaignSubmission> {
        let startup = normalize_address(startup)?;
        let (call, goal) = build_creation_call(&startup, request)?;

        let campaign = CampaignRecord::new(&startup, request.title.trim(), goal);
        self.campaigns.insert_campaign(&campaign)?;

        let submitted = match self.ledger.submit(&call).await {
            Ok(submitted) => submitted,
            Err(e) => {
                tracing::warn!(campaign_id = %campaign.id, error = %e, "Campaign creation not submitted");
                self.campaigns
                    .set_campaign_status(&campaign.id, CampaignStatus::Failed)?;
                return Err(e);
            }
        };

        let metadata = serde_json::to_value(request)
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        let transaction = self.recorder.record_pending(PendingTransaction {
            tx_hash: submitted.tx_hash.clone(),
            tx_type: TxType::CampaignCreation,
            from: format!("{:#x}", submitted.from),
            to: format!("{:#x}", submitted.to),
            amount: "0".to_string(),
            campaign_id: Some(campaign.id.clone()),
            metadata: Some(metadata),
            explorer_url: submitted.explorer_url,
        })?;

        tracing::info!(
            campaign_id = %campaign.id,
            tx_hash = %transaction.tx_hash,
            startup = %startup,
            "Campaign creation submitted"
        );
        self.tracker.spawn(transaction.tx_hash.clone());

        Ok(CampaignSubmission {
            campaign,
            transaction,
        })
    }

    /// Record a transaction the client signed and sent itself, then track it.
    pub fn track_client_transaction(
        &self,
        sender: &str,
        tx_hash: &str,
        request: &TrackTransactionRequest,
    ) -> ServiceResult<StoredTransaction> {
        let tx_hash = normalize_tx_hash(tx_hash)?;
        let to = normalize_address(&request.to)?;
        let amount = match request.amount.as_deref() {
            Some(amount) => format_amount(parse_amount(amount, ETHER_DECIMALS)?, ETHER_DECIMALS),
            None => "0".to_string(),
        };

        if let Some(campaign_id) = &request.campaign_id {
            if self.campaigns.get_campaign(campaign_id)?.is_none() {
                return Err(ServiceError::NotFound(format!("Campaign {campaign_id}")));
            }
        }

        let stored = self.recorder.record_pending(PendingTransaction {
            explorer_url: self.ledger.network().explorer_tx_url(&tx_hash),
            tx_hash,
            tx_type: request.tx_type,
            from: sender.to_string(),
            to,
            amount,
            campaign_id: request.campaign_id.clone(),
            metadata: request.metadata.clone(),
        })?;

        if !stored.status.is_terminal() {
            self.tracker.spawn(stored.tx_hash.clone());
        }
        Ok(stored)
    }

    /// Overwrite a campaign's counters and status with its contract's view.
    ///
    /// The contract is read at the current head and the sync remembers that
    /// block, so contributions at or before it are not counted a second time
    /// when their events arrive later.
    pub async fn sync_campaign(&self, address: &str) -> ServiceResult<CampaignRecord> {
        let normalized = normalize_address(address)?;
        let contract = Address::from_str(&normalized)
            .map_err(|e| ServiceError::Validation(format!("invalid campaign address: {e}")))?;
        let campaign = self
            .campaigns
            .find_campaign_by_address(&normalized)?
            .ok_or_else(|| ServiceError::NotFound(format!("Campaign {normalized}")))?;

        let block = self.ledger.block_number().await?;
        let info = self.ledger.campaign_info(contract, Some(block)).await?;
        let backers = info.contributors.saturating_to::<u64>();
        let status = CampaignStatus::from_contract_state(info.state);

        let synced = self
            .campaigns
            .sync_campaign_totals(&campaign.id, info.total_raised, backers, status, block)?
            .ok_or_else(|| ServiceError::NotFound(format!("Campaign {}", campaign.id)))?;
        tracing::info!(
            campaign_id = %synced.id,
            block,
            raised = %synced.raised_wei,
            backers = synced.backers,
            status = ?synced.status,
            "Campaign synced from contract"
        );
        Ok(synced)
    }

    /// Resume tracking of every pending transaction. Called once at startup.
    pub fn resume_pending(&self) -> ServiceResult<usize> {
        let pending = self.recorder.list_pending()?;
        for tx in &pending {
            self.tracker.spawn(tx.tx_hash.clone());
        }
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "Resumed tracking of pending transactions");
        }
        Ok(pending.len())
    }
}

/// Validate a creation request and build the factory call. Also returns the
/// goal in wei.
fn build_creation_call(
    startup: &str,
    request: &CreateCampaignRequest,
) -> ServiceResult<(ContractCall, U256)> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(ServiceError::Validation("title is required".to_string()));
    }
    if request.duration_secs == 0 {
        return Err(ServiceError::Validation("duration must be positive".to_string()));
    }
    let goal = parse_amount(&request.goal, ETHER_DECIMALS)?;
    if goal.is_zero() {
        return Err(ServiceError::Validation("goal must be positive".to_string()));
    }

    let mut milestone_descriptions = Vec::with_capacity(request.milestones.len());
    let mut milestone_amounts = Vec::with_capacity(request.milestones.len());
    let mut milestone_total = U256::ZERO;
    for milestone in &request.milestones {
        let amount = parse_amount(&milestone.amount, ETHER_DECIMALS)?;
        milestone_total = milestone_total.saturating_add(amount);
        milestone_descriptions.push(milestone.description.clone());
        milestone_amounts.push(amount);
    }
    if milestone_total > goal {
        return Err(ServiceError::Validation(
            "milestone amounts exceed the goal".to_string(),
        ));
    }

    let startup = Address::from_str(startup)
        .map_err(|e| ServiceError::Validation(format!("invalid startup address: {e}")))?;

    let call = ContractCall::CreateCampaign {
        startup,
        title: title.to_string(),
        description: request.description.clone(),
        goal,
        duration_secs: request.duration_secs,
        milestone_descriptions,
        milestone_amounts,
    };
    Ok((call, goal))
}

fn normalize_tx_hash(raw: &str) -> ServiceResult<String> {
    let hex = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| ServiceError::Validation("transaction hash must start with 0x".to_string()))?;
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ServiceError::Validation(
            "transaction hash must be 32 bytes of hex".to_string(),
        ));
    }
    Ok(format!("0x{}", hex.to_lowercase()))
}
