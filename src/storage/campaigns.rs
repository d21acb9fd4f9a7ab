// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Campaign aggregates and their binding to deployed contracts.
//!
//! Amounts are kept as decimal wei strings and summed as `U256`, so the
//! stored value never loses precision regardless of the goal size.

use std::str::FromStr;

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::database::{
    claim_in, Database, StoreError, StoreResult, CAMPAIGNS, CAMPAIGN_ADDRESS_INDEX,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Funded,
    Failed,
    Cancelled,
}

impl Default for CampaignStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl CampaignStatus {
    /// Map the contract's `state` enum. Unknown values read as active.
    pub fn from_contract_state(state: u8) -> Self {
        match state {
            1 => Self::Funded,
            2 => Self::Failed,
            3 => Self::Cancelled,
            _ => Self::Active,
        }
    }
}

/// Campaign record as seen by the ledger side of the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CampaignRecord {
    pub id: String,
    /// Lowercase wallet address of the owning startup
    pub startup: String,
    pub title: String,
    /// Funding goal in wei (decimal string)
    pub goal_wei: String,
    /// Amount raised so far in wei (decimal string)
    pub raised_wei: String,
    pub backers: u64,
    pub status: CampaignStatus,
    /// Deployed campaign contract, set at most once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Block at which the totals were last overwritten from the contract.
    /// Contributions at or below it are already part of those totals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_block: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignRecord {
    pub fn new(startup: &str, title: &str, goal: U256) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            startup: startup.to_lowercase(),
            title: title.to_string(),
            goal_wei: goal.to_string(),
            raised_wei: "0".to_string(),
            backers: 0,
            status: CampaignStatus::Active,
            address: None,
            synced_block: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn goal(&self) -> StoreResult<U256> {
        parse_wei(&self.goal_wei)
    }

    pub fn raised(&self) -> StoreResult<U256> {
        parse_wei(&self.raised_wei)
    }
}

fn parse_wei(value: &str) -> StoreResult<U256> {
    U256::from_str(value).map_err(|_| StoreError::Corrupt(format!("wei amount {value}")))
}

/// Persistence seam for the campaign aggregate.
pub trait CampaignStore: Send + Sync {
    fn insert_campaign(&self, campaign: &CampaignRecord) -> StoreResult<()>;

    fn get_campaign(&self, id: &str) -> StoreResult<Option<CampaignRecord>>;

    fn find_campaign_by_address(&self, address: &str) -> StoreResult<Option<CampaignRecord>>;

    /// Most recently created campaign of `startup` titled `title` that has
    /// no contract address yet.
    fn find_unbound_campaign(&self, startup: &str, title: &str)
        -> StoreResult<Option<CampaignRecord>>;

    /// Add `delta` wei, count one more backer, and flip `active` to `funded`
    /// once the goal is reached. Runs as one atomic update.
    fn increment_campaign_amount(&self, id: &str, delta: U256) -> StoreResult<CampaignRecord>;

    /// Set the contract address if the campaign has none. Returns `false` when
    /// the campaign is already bound elsewhere or the address belongs to
    /// another campaign.
    fn bind_campaign_address(&self, id: &str, address: &str) -> StoreResult<bool>;

    /// Overwrite the lifecycle status. Returns `None` for an unknown id.
    fn set_campaign_status(
        &self,
        id: &str,
        status: CampaignStatus,
    ) -> StoreResult<Option<CampaignRecord>>;

    /// Claim `event_key` and apply a contribution of `delta` in the same
    /// transaction. Returns `None` when the event was already claimed. A
    /// contribution in a block the totals were synced at is claimed without
    /// touching the counters.
    fn apply_contribution_once(
        &self,
        event_key: &str,
        id: &str,
        delta: U256,
        block_number: u64,
    ) -> StoreResult<Option<CampaignRecord>>;

    /// Claim `event_key` and bind the address in the same transaction.
    /// Returns `None` when the event was already claimed.
    fn bind_campaign_address_once(
        &self,
        event_key: &str,
        id: &str,
        address: &str,
    ) -> StoreResult<Option<bool>>;

    /// Replace the counters and status with the contract's view at `block`.
    /// A sync older than the last one is ignored. Returns `None` for an
    /// unknown id.
    fn sync_campaign_totals(
        &self,
        id: &str,
        raised: U256,
        backers: u64,
        status: CampaignStatus,
        block: u64,
    ) -> StoreResult<Option<CampaignRecord>>;
}

fn read_campaign<T>(table: &T, id: &str) -> StoreResult<Option<CampaignRecord>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(id)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

fn write_campaign(txn: &WriteTransaction, campaign: &CampaignRecord) -> StoreResult<()> {
    let json = serde_json::to_vec(campaign)?;
    let mut table = txn.open_table(CAMPAIGNS)?;
    table.insert(campaign.id.as_str(), json.as_slice())?;
    Ok(())
}

fn increment_in(
    txn: &WriteTransaction,
    id: &str,
    delta: U256,
    block_number: Option<u64>,
) -> StoreResult<CampaignRecord> {
    let mut campaign = {
        let table = txn.open_table(CAMPAIGNS)?;
        read_campaign(&table, id)?
    }
    .ok_or_else(|| StoreError::NotFound(format!("Campaign {id}")))?;

    if let (Some(block), Some(synced)) = (block_number, campaign.synced_block) {
        if block <= synced {
            return Ok(campaign);
        }
    }

    let raised = campaign.raised()?.saturating_add(delta);
    campaign.raised_wei = raised.to_string();
    campaign.backers += 1;
    if campaign.status == CampaignStatus::Active && raised >= campaign.goal()? {
        campaign.status = CampaignStatus::Funded;
    }
    campaign.updated_at = Utc::now();
    write_campaign(txn, &campaign)?;
    Ok(campaign)
}

fn bind_in(txn: &WriteTransaction, id: &str, address: &str) -> StoreResult<bool> {
    let addr = address.to_lowercase();
    let mut campaign = {
        let table = txn.open_table(CAMPAIGNS)?;
        read_campaign(&table, id)?
    }
    .ok_or_else(|| StoreError::NotFound(format!("Campaign {id}")))?;

    let mut index = txn.open_table(CAMPAIGN_ADDRESS_INDEX)?;
    if let Some(existing) = &campaign.address {
        return Ok(*existing == addr);
    }
    if index.get(addr.as_str())?.is_some() {
        return Ok(false);
    }

    index.insert(addr.as_str(), id)?;
    campaign.address = Some(addr);
    campaign.updated_at = Utc::now();
    write_campaign(txn, &campaign)?;
    Ok(true)
}

impl CampaignStore for Database {
    fn insert_campaign(&self, campaign: &CampaignRecord) -> StoreResult<()> {
        let json = serde_json::to_vec(campaign)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CAMPAIGNS)?;
            table.insert(campaign.id.as_str(), json.as_slice())?;

            if let Some(address) = &campaign.address {
                let mut index = write_txn.open_table(CAMPAIGN_ADDRESS_INDEX)?;
                index.insert(address.to_lowercase().as_str(), campaign.id.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_campaign(&self, id: &str) -> StoreResult<Option<CampaignRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CAMPAIGNS)?;
        read_campaign(&table, id)
    }

    fn find_campaign_by_address(&self, address: &str) -> StoreResult<Option<CampaignRecord>> {
        let addr = address.to_lowercase();
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(CAMPAIGN_ADDRESS_INDEX)?;
        let id = match index.get(addr.as_str())? {
            Some(v) => v.value().to_string(),
            None => return Ok(None),
        };
        let table = read_txn.open_table(CAMPAIGNS)?;
        read_campaign(&table, &id)
    }

    fn find_unbound_campaign(
        &self,
        startup: &str,
        title: &str,
    ) -> StoreResult<Option<CampaignRecord>> {
        let startup = startup.to_lowercase();
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CAMPAIGNS)?;

        let mut best: Option<CampaignRecord> = None;
        for entry in table.iter()? {
            let (_, value) = entry?;
            let campaign: CampaignRecord = serde_json::from_slice(value.value())?;
            if campaign.address.is_some()
                || campaign.status != CampaignStatus::Active
                || campaign.startup != startup
                || campaign.title != title
            {
                continue;
            }
            if best
                .as_ref()
                .map_or(true, |b| campaign.created_at > b.created_at)
            {
                best = Some(campaign);
            }
        }
        Ok(best)
    }

    fn increment_campaign_amount(&self, id: &str, delta: U256) -> StoreResult<CampaignRecord> {
        let write_txn = self.db.begin_write()?;
        let updated = increment_in(&write_txn, id, delta, None)?;
        write_txn.commit()?;
        Ok(updated)
    }

    fn bind_campaign_address(&self, id: &str, address: &str) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let bound = bind_in(&write_txn, id, address)?;
        write_txn.commit()?;
        Ok(bound)
    }

    fn set_campaign_status(
        &self,
        id: &str,
        status: CampaignStatus,
    ) -> StoreResult<Option<CampaignRecord>> {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(CAMPAIGNS)?;
            match read_campaign(&table, id)? {
                Some(mut campaign) => {
                    campaign.status = status;
                    campaign.updated_at = Utc::now();
                    let json = serde_json::to_vec(&campaign)?;
                    table.insert(id, json.as_slice())?;
                    Some(campaign)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    fn apply_contribution_once(
        &self,
        event_key: &str,
        id: &str,
        delta: U256,
        block_number: u64,
    ) -> StoreResult<Option<CampaignRecord>> {
        let write_txn = self.db.begin_write()?;
        if !claim_in(&write_txn, event_key)? {
            write_txn.abort()?;
            return Ok(None);
        }
        let updated = increment_in(&write_txn, id, delta, Some(block_number))?;
        write_txn.commit()?;
        Ok(Some(updated))
    }

    fn bind_campaign_address_once(
        &self,
        event_key: &str,
        id: &str,
        address: &str,
    ) -> StoreResult<Option<bool>> {
        let write_txn = self.db.begin_write()?;
        if !claim_in(&write_txn, event_key)? {
            write_txn.abort()?;
            return Ok(None);
        }
        let bound = bind_in(&write_txn, id, address)?;
        write_txn.commit()?;
        Ok(Some(bound))
    }

    fn sync_campaign_totals(
        &self,
        id: &str,
        raised: U256,
        backers: u64,
        status: CampaignStatus,
        block: u64,
    ) -> StoreResult<Option<CampaignRecord>> {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let current = {
                let table = write_txn.open_table(CAMPAIGNS)?;
                read_campaign(&table, id)?
            };
            match current {
                Some(campaign) if campaign.synced_block.is_some_and(|synced| synced > block) => {
                    Some(campaign)
                }
                Some(mut campaign) => {
                    campaign.raised_wei = raised.to_string();
                    campaign.backers = backers;
                    campaign.status = status;
                    campaign.synced_block = Some(block);
                    campaign.updated_at = Utc::now();
                    write_campaign(&write_txn, &campaign)?;
                    Some(campaign)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }
}
