// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Campaign factory and campaign contract bindings.

use alloy::{
    primitives::{Address, LogData, B256, U256},
    sol,
    sol_types::{SolCall, SolEvent},
};

use super::types::{ChainEvent, ChainEventKind, ContractCall, PreparedCall};
use crate::error::{ServiceError, ServiceResult};

sol! {
    interface ICampaignFactory {
        function createCampaign(
            address startup,
            string title,
            string description,
            uint256 goal,
            uint256 duration,
            string[] milestoneDescriptions,
            uint256[] milestoneAmounts
        ) external returns (address);

        event CampaignCreated(
            address indexed campaignAddress,
            address indexed startup,
            string title,
            uint256 goal,
            uint256 deadline,
            uint256 timestamp
        );
    }

    #[sol(rpc)]
    interface ICampaign {
        function contribute() external payable;
        function getRefund() external;
        function completeMilestone(uint256 milestoneIndex) external;
        function withdrawMilestoneFunds(uint256 milestoneIndex) external;
        function getCampaignInfo() external view returns (
            address startup,
            string title,
            string description,
            uint256 goal,
            uint256 deadline,
            uint256 totalRaised,
            uint8 state,
            uint256 contributorsCount
        );

        event ContributionMade(address indexed contributor, uint256 amount, uint256 totalRaised);
    }
}

/// Topics of every event the reconciler consumes.
pub fn watched_event_topics() -> Vec<B256> {
    vec![
        ICampaignFactory::CampaignCreated::SIGNATURE_HASH,
        ICampaign::ContributionMade::SIGNATURE_HASH,
    ]
}

/// ABI-encode a contract call. Pure: nothing is sent.
pub fn encode_call(call: &ContractCall, factory: Option<Address>) -> ServiceResult<PreparedCall> {
    let prepared = match call {
        ContractCall::CreateCampaign {
            startup,
            title,
            description,
            goal,
            duration_secs,
            milestone_descriptions,
            milestone_amounts,
        } => {
            let factory = factory.ok_or_else(|| {
                ServiceError::LedgerUnavailable("no campaign factory configured".to_string())
            })?;
            if milestone_descriptions.len() != milestone_amounts.len() {
                return Err(ServiceError::Validation(
                    "each milestone needs a description and an amount".to_string(),
                ));
            }
            let data = ICampaignFactory::createCampaignCall {
                startup: *startup,
                title: title.clone(),
                description: description.clone(),
                goal: *goal,
                duration: U256::from(*duration_secs),
                milestoneDescriptions: milestone_descriptions.clone(),
                milestoneAmounts: milestone_amounts.clone(),
            }
            .abi_encode();
            PreparedCall {
                to: factory,
                value: U256::ZERO,
                data: data.into(),
            }
        }
        ContractCall::Contribute { campaign, value } => PreparedCall {
            to: *campaign,
            value: *value,
            data: ICampaign::contributeCall {}.abi_encode().into(),
        },
        ContractCall::Refund { campaign } => PreparedCall {
            to: *campaign,
            value: U256::ZERO,
            data: ICampaign::getRefundCall {}.abi_encode().into(),
        },
        ContractCall::CompleteMilestone { campaign, index } => PreparedCall {
            to: *campaign,
            value: U256::ZERO,
            data: ICampaign::completeMilestoneCall {
                milestoneIndex: U256::from(*index),
            }
            .abi_encode()
            .into(),
        },
        ContractCall::WithdrawMilestoneFunds { campaign, index } => PreparedCall {
            to: *campaign,
            value: U256::ZERO,
            data: ICampaign::withdrawMilestoneFundsCall {
                milestoneIndex: U256::from(*index),
            }
            .abi_encode()
            .into(),
        },
    };
    Ok(prepared)
}

/// Position of a log on the ledger.
#[derive(Debug, Clone, Copy)]
pub struct LogPosition {
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
}

/// Decode a campaign event. Logs with other topics return `None`.
pub fn decode_event(emitter: Address, data: &LogData, position: LogPosition) -> Option<ChainEvent> {
    let topic0 = *data.topics().first()?;

    let kind = if topic0 == ICampaignFactory::CampaignCreated::SIGNATURE_HASH {
        let event = ICampaignFactory::CampaignCreated::decode_log_data(data)
            .map_err(|e| tracing::warn!(error = %e, "Undecodable CampaignCreated log"))
            .ok()?;
        ChainEventKind::CampaignCreated {
            campaign_address: event.campaignAddress,
            startup: event.startup,
            title: event.title,
            goal: event.goal,
            deadline: event.deadline,
        }
    } else if topic0 == ICampaign::ContributionMade::SIGNATURE_HASH {
        let event = ICampaign::ContributionMade::decode_log_data(data)
            .map_err(|e| tracing::warn!(error = %e, "Undecodable ContributionMade log"))
            .ok()?;
        ChainEventKind::ContributionMade {
            contributor: event.contributor,
            amount: event.amount,
            total_raised: event.totalRaised,
        }
    } else {
        return None;
    };

    Some(ChainEvent {
        tx_hash: format!("{:#x}", position.tx_hash),
        log_index: position.log_index,
        block_number: position.block_number,
        emitter,
        kind,
    })
}

/// Decode an RPC log, skipping logs that are not yet mined.
pub fn decode_rpc_log(log: &alloy::rpc::types::Log) -> Option<ChainEvent> {
    let position = LogPosition {
        tx_hash: log.transaction_hash?,
        log_index: log.log_index?,
        block_number: log.block_number?,
    };
    decode_event(log.address(), log.data(), position)
}
