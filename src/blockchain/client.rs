// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM ledger client.

use std::str::FromStr;

use alloy::{
    network::EthereumWallet,
    primitives::{Address, B256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::{BlockId, Filter, TransactionReceipt, TransactionRequest},
    signers::local::PrivateKeySigner,
    transports::TransportError,
};
use tokio::sync::Mutex;

use super::contracts::{decode_rpc_log, encode_call, watched_event_topics, ICampaign};
use super::types::*;
use crate::error::{ServiceError, ServiceResult};

/// Client for the campaign contracts.
///
/// Reads go straight to the node. Submissions are signed with the
/// configured service key and serialized so nonces are assigned in order.
pub struct LedgerClient {
    network: NetworkSettings,
    provider: DynProvider,
    signer: Option<Address>,
    policy: ConfirmationPolicy,
    submit_lock: Mutex<()>,
}

impl LedgerClient {
    /// Create a client. Without a signer the client is read-only and
    /// can still encode calls for client-side signing.
    pub fn new(
        network: NetworkSettings,
        signer: Option<PrivateKeySigner>,
        policy: ConfirmationPolicy,
    ) -> ServiceResult<Self> {
        let url: url::Url = network.rpc_url.parse().map_err(|e: url::ParseError| {
            ServiceError::Validation(format!("invalid RPC URL: {e}"))
        })?;

        let signer_address = signer.as_ref().map(|s| s.address());
        let provider = match signer {
            Some(signer) => ProviderBuilder::new()
                .wallet(EthereumWallet::from(signer))
                .connect_http(url)
                .erased(),
            None => ProviderBuilder::new().connect_http(url).erased(),
        };

        Ok(Self {
            network,
            provider,
            signer: signer_address,
            policy,
            submit_lock: Mutex::new(()),
        })
    }

    pub fn network(&self) -> &NetworkSettings {
        &self.network
    }

    pub fn factory(&self) -> Option<Address> {
        self.network.factory
    }

    pub fn signer_address(&self) -> Option<Address> {
        self.signer
    }

    /// Encode a call without sending it.
    pub fn build_call_data(&self, call: &ContractCall) -> ServiceResult<PreparedCall> {
        encode_call(call, self.network.factory)
    }

    /// Sign and send a call from the service key.
    pub async fn submit(&self, call: &ContractCall) -> ServiceResult<SubmittedTx> {
        let from = self.signer.ok_or_else(|| {
            ServiceError::LedgerUnavailable("no service signing key configured".to_string())
        })?;
        let prepared = self.build_call_data(call)?;

        let tx = TransactionRequest::default()
            .from(from)
            .to(prepared.to)
            .input(prepared.data.into())
            .value(prepared.value);

        let _guard = self.submit_lock.lock().await;
        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(classify_rpc_error)?;

        let tx_hash = format!("{:#x}", pending.tx_hash());
        tracing::info!(tx_hash = %tx_hash, to = %prepared.to, "Transaction submitted");

        Ok(SubmittedTx {
            explorer_url: self.network.explorer_tx_url(&tx_hash),
            tx_hash,
            from,
            to: prepared.to,
        })
    }

    /// Wait until the transaction is included or the confirmation ceiling passes.
    ///
    /// Polls with exponential backoff. RPC errors while polling are treated
    /// as transient.
    pub async fn await_confirmation(&self, tx_hash: &str) -> ServiceResult<LedgerReceipt> {
        let hash = parse_tx_hash(tx_hash)?;
        let ceiling = self.policy.ceiling;

        match tokio::time::timeout(ceiling, self.poll_receipt(hash)).await {
            Ok(receipt) => Ok(receipt),
            Err(_) => Err(ServiceError::ConfirmationTimeout {
                tx_hash: tx_hash.to_string(),
                waited_secs: ceiling.as_secs(),
            }),
        }
    }

    async fn poll_receipt(&self, hash: B256) -> LedgerReceipt {
        let mut interval = self.policy.initial_interval;
        loop {
            match self.provider.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => return to_ledger_receipt(receipt),
                Ok(None) => {}
                Err(e) => tracing::debug!(tx_hash = %hash, error = %e, "Receipt poll failed"),
            }
            tokio::time::sleep(interval).await;
            interval = (interval * 2).min(self.policy.max_interval);
        }
    }

    /// Fetch a receipt once. `None` while the transaction is pending.
    pub async fn transaction_receipt(&self, tx_hash: &str) -> ServiceResult<Option<LedgerReceipt>> {
        let hash = parse_tx_hash(tx_hash)?;
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(classify_rpc_error)?;
        Ok(receipt.map(to_ledger_receipt))
    }

    pub async fn block_number(&self) -> ServiceResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(classify_rpc_error)
    }

    /// Campaign events in `from..=to`, in ledger order.
    pub async fn logs(&self, from: u64, to: u64) -> ServiceResult<Vec<ChainEvent>> {
        let filter = Filter::new()
            .event_signature(watched_event_topics())
            .from_block(from)
            .to_block(to);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(classify_rpc_error)?;

        let mut events: Vec<ChainEvent> = logs.iter().filter_map(decode_rpc_log).collect();
        events.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(events)
    }

    /// Read a campaign contract's own view of its state, at `block` or at
    /// the latest block.
    pub async fn campaign_info(
        &self,
        campaign: Address,
        block: Option<u64>,
    ) -> ServiceResult<CampaignInfo> {
        let contract = ICampaign::new(campaign, self.provider.clone());
        let mut call = contract.getCampaignInfo();
        if let Some(block) = block {
            call = call.block(BlockId::number(block));
        }
        let info = call.call().await.map_err(classify_call_error)?;

        Ok(CampaignInfo {
            startup: info.startup,
            title: info.title,
            description: info.description,
            goal: info.goal,
            deadline: info.deadline,
            total_raised: info.totalRaised,
            state: info.state,
            contributors: info.contributorsCount,
        })
    }

    pub async fn network_info(&self) -> ServiceResult<NetworkInfo> {
        let chain_id = self
            .provider
            .get_chain_id()
            .await
            .map_err(classify_rpc_error)?;
        let block_number = self.block_number().await?;

        Ok(NetworkInfo {
            name: self.network.name.clone(),
            chain_id,
            block_number,
            factory_address: self.network.factory.map(|a| a.to_checksum(None)),
            signer_address: self.signer.map(|a| a.to_checksum(None)),
            explorer_url: self.network.explorer_url.clone(),
        })
    }
}

fn parse_tx_hash(tx_hash: &str) -> ServiceResult<B256> {
    B256::from_str(tx_hash)
        .map_err(|_| ServiceError::Validation(format!("invalid transaction hash: {tx_hash}")))
}

fn to_ledger_receipt(receipt: TransactionReceipt) -> LedgerReceipt {
    let events = receipt
        .inner
        .logs()
        .iter()
        .filter_map(decode_rpc_log)
        .collect();

    LedgerReceipt {
        tx_hash: format!("{:#x}", receipt.transaction_hash),
        from: receipt.from,
        to: receipt.to,
        block_number: receipt.block_number.unwrap_or_default(),
        gas_used: receipt.gas_used,
        gas_price: receipt.effective_gas_price,
        success: receipt.status(),
        contract_address: receipt.contract_address,
        events,
    }
}

/// Node error responses are rejections; anything else means the node
/// could not be reached.
fn classify_rpc_error(err: TransportError) -> ServiceError {
    match err.as_error_resp() {
        Some(payload) => ServiceError::LedgerRejected(payload.message.to_string()),
        None => ServiceError::LedgerUnavailable(err.to_string()),
    }
}

/// Contract call failures: transport problems are classified as above,
/// anything else (revert, empty return data, decode failure) is a rejection.
fn classify_call_error(err: alloy::contract::Error) -> ServiceError {
    match err {
        alloy::contract::Error::TransportError(e) => classify_rpc_error(e),
        other => ServiceError::LedgerRejected(other.to_string()),
    }
}
