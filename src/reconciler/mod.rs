// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Chain Event Reconciler
//!
//! Applies campaign events observed on the ledger to the off-chain records.
//!
//! ## Delivery
//!
//! Events arrive from two sources: the [`listener::EventListener`] polling
//! `eth_getLogs`, and confirmation tracking forwarding the events found in a
//! receipt. The same event may therefore be delivered more than once.
//!
//! ## Deduplication
//!
//! Every event is claimed by `(tx_hash, log_index)` in the processed-events
//! table in the same write transaction as the campaign mutation, so a failed
//! mutation leaves the event unclaimed for a later delivery. Events from a
//! contract that is not a bound campaign, or a creation from another
//! factory, are left unclaimed. A factory creation with no matching record is
//! claimed and dropped.
//!
//! ## Checkpoints
//!
//! The listener does not persist its block checkpoint itself. It queues a
//! [`ReconcilerMessage::Checkpoint`] behind the events of each chunk, and the
//! reconciler stores it once those events are applied. After a failed event
//! the checkpoint is held so a restart rescans from before it. On shutdown
//! the channel is closed and everything already queued is drained.

pub mod listener;

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::blockchain::{format_amount, ChainEvent, ChainEventKind, NetworkSettings, ETHER_DECIMALS};
use crate::error::ServiceResult;
use crate::storage::{
    event_key, CampaignStore, Database, PendingTransaction, TerminalUpdate, TransactionRecorder,
    TxType,
};

pub use listener::{EventListener, ListenerHandle};

/// Channel capacity between the event sources and the reconciler task.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Work queued for the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcilerMessage {
    Event(ChainEvent),
    /// Every event of `scope` up to and including `block` is queued ahead
    Checkpoint { scope: String, block: u64 },
}

/// What happened to a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Already processed by an earlier delivery
    Duplicate,
    /// Could not be matched to any campaign
    Dropped,
}

pub struct Reconciler {
    db: Arc<Database>,
    campaigns: Arc<dyn CampaignStore>,
    recorder: TransactionRecorder,
    network: NetworkSettings,
}

impl Reconciler {
    pub fn new(
        db: Arc<Database>,
        campaigns: Arc<dyn CampaignStore>,
        recorder: TransactionRecorder,
        network: NetworkSettings,
    ) -> Self {
        Self {
            db,
            campaigns,
            recorder,
            network,
        }
    }

    /// Apply one event at most once.
    pub fn apply(&self, event: &ChainEvent) -> ServiceResult<Outcome> {
        let key = event_key(&event.tx_hash, event.log_index);
        if self.db.is_event_processed(&key)? {
            tracing::debug!(event = %key, "Event already processed");
            return Ok(Outcome::Duplicate);
        }

        match &event.kind {
            ChainEventKind::CampaignCreated {
                campaign_address,
                startup,
                title,
                ..
            } => self.apply_creation(event, &key, *campaign_address, *startup, title),
            ChainEventKind::ContributionMade {
                contributor,
                amount,
                total_raised,
            } => self.apply_contribution(event, &key, *contributor, *amount, *total_raised),
        }
    }

    fn apply_creation(
        &self,
        event: &ChainEvent,
        key: &str,
        campaign_address: Address,
        startup: Address,
        title: &str,
    ) -> ServiceResult<Outcome> {
        if self.network.factory != Some(event.emitter) {
            tracing::debug!(
                emitter = %event.emitter,
                tx_hash = %event.tx_hash,
                "CampaignCreated from an unknown factory, ignoring"
            );
            return Ok(Outcome::Dropped);
        }

        let startup = format!("{startup:#x}");
        let address = format!("{campaign_address:#x}");

        let Some(campaign) = self.campaigns.find_unbound_campaign(&startup, title)? else {
            if !self.db.claim_event(key)? {
                return Ok(Outcome::Duplicate);
            }
            tracing::warn!(
                startup = %startup,
                title = %title,
                campaign_address = %address,
                "No unbound campaign for creation event, dropping"
            );
            return Ok(Outcome::Dropped);
        };

        match self
            .campaigns
            .bind_campaign_address_once(key, &campaign.id, &address)?
        {
            None => return Ok(Outcome::Duplicate),
            Some(false) => {
                tracing::warn!(
                    campaign_id = %campaign.id,
                    campaign_address = %address,
                    "Campaign address already taken, dropping"
                );
                return Ok(Outcome::Dropped);
            }
            Some(true) => {}
        }
        tracing::info!(campaign_id = %campaign.id, campaign_address = %address, "Campaign bound to contract");

        let update = TerminalUpdate::confirmed(event.block_number).with_contract_address(address);
        if let Err(e) = self.recorder.mark_terminal(&event.tx_hash, update) {
            tracing::error!(tx_hash = %event.tx_hash, error = %e, "Could not confirm creation transaction");
        }

        Ok(Outcome::Applied)
    }

    fn apply_contribution(
        &self,
        event: &ChainEvent,
        key: &str,
        contributor: Address,
        amount: U256,
        total_raised: U256,
    ) -> ServiceResult<Outcome> {
        let emitter = format!("{:#x}", event.emitter);
        let Some(campaign) = self.campaigns.find_campaign_by_address(&emitter)? else {
            tracing::debug!(emitter = %emitter, tx_hash = %event.tx_hash, "Contribution from an unbound contract, ignoring");
            return Ok(Outcome::Dropped);
        };

        let Some(updated) = self.campaigns.apply_contribution_once(
            key,
            &campaign.id,
            amount,
            event.block_number,
        )?
        else {
            return Ok(Outcome::Duplicate);
        };
        tracing::info!(
            campaign_id = %updated.id,
            amount = %amount,
            raised = %updated.raised_wei,
            status = ?updated.status,
            "Contribution applied"
        );
        if updated.raised()? != total_raised {
            tracing::warn!(
                campaign_id = %updated.id,
                recorded = %updated.raised_wei,
                on_chain = %total_raised,
                "Recorded total differs from contract total"
            );
        }

        self.record_contribution(event, contributor, amount, total_raised, &campaign.id);
        Ok(Outcome::Applied)
    }

    /// The campaign is already updated at this point, so failures here are
    /// logged and the event stays claimed.
    fn record_contribution(
        &self,
        event: &ChainEvent,
        contributor: Address,
        amount: U256,
        total_raised: U256,
        campaign_id: &str,
    ) {
        let entry = PendingTransaction {
            tx_hash: event.tx_hash.clone(),
            tx_type: TxType::Contribution,
            from: format!("{contributor:#x}"),
            to: format!("{:#x}", event.emitter),
            amount: format_amount(amount, ETHER_DECIMALS),
            campaign_id: Some(campaign_id.to_string()),
            metadata: Some(serde_json::json!({
                "log_index": event.log_index,
                "total_raised_wei": total_raised.to_string(),
            })),
            explorer_url: self.network.explorer_tx_url(&event.tx_hash),
        };

        if let Err(e) = self
            .recorder
            .record_confirmed(entry, TerminalUpdate::confirmed(event.block_number))
        {
            tracing::error!(tx_hash = %event.tx_hash, error = %e, "Could not record contribution");
        }
    }

    fn handle(&self, message: ReconcilerMessage, stalled: &mut bool) {
        match message {
            ReconcilerMessage::Event(event) => {
                if let Err(e) = self.apply(&event) {
                    tracing::error!(
                        tx_hash = %event.tx_hash,
                        log_index = event.log_index,
                        error = %e,
                        "Failed to reconcile event"
                    );
                    *stalled = true;
                }
            }
            ReconcilerMessage::Checkpoint { scope, block } => {
                if *stalled {
                    tracing::warn!(scope = %scope, block, "Holding listener checkpoint after a failed event");
                    return;
                }
                if let Err(e) = self.db.set_last_processed_block(&scope, block) {
                    tracing::error!(scope = %scope, block, error = %e, "Failed to persist listener checkpoint");
                }
            }
        }
    }

    /// Consume messages until the channel closes. Shutdown closes the
    /// channel and drains what is already queued.
    pub async fn run(self, mut inbox: mpsc::Receiver<ReconcilerMessage>, shutdown: CancellationToken) {
        tracing::info!("Event reconciler starting");
        let mut closed = false;
        let mut stalled = false;
        loop {
            tokio::select! {
                maybe = inbox.recv() => {
                    let Some(message) = maybe else { break };
                    self.handle(message, &mut stalled);
                }
                _ = shutdown.cancelled(), if !closed => {
                    tracing::info!(queued = inbox.len(), "Draining reconciler queue before shutdown");
                    inbox.close();
                    closed = true;
                }
            }
        }
        tracing::info!("Event reconciler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::contracts::tests::{
        contribution_log, creation_log, position, CAMPAIGN, FACTORY, STARTUP,
    };
    use crate::blockchain::contracts::decode_event;
    use crate::storage::database::tests::temp_db;
    use crate::storage::{CampaignRecord, CampaignStatus, TxStatus};
    use alloy::primitives::address;
    use tempfile::TempDir;

    const INVESTOR: Address = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");

    fn network() -> NetworkSettings {
        NetworkSettings {
            name: "test".into(),
            rpc_url: "http://127.0.0.1:9".into(),
            explorer_url: "https://explorer.test".into(),
            factory: Some(FACTORY),
        }
    }

    fn reconciler() -> (Reconciler, Arc<Database>, TempDir) {
        let (db, dir) = temp_db();
        let db = Arc::new(db);
        let reconciler = Reconciler::new(
            db.clone(),
            db.clone(),
            TransactionRecorder::new(db.clone()),
            network(),
        );
        (reconciler, db, dir)
    }

    fn creation(tx: u8) -> ChainEvent {
        decode_event(FACTORY, &creation_log("Solar", 500), position(tx, 0, 10)).unwrap()
    }

    fn contribution(tx: u8, amount: u64, total: u64) -> ChainEvent {
        decode_event(CAMPAIGN, &contribution_log(INVESTOR, amount, total), position(tx, 1, 11))
            .unwrap()
    }

    fn startup() -> String {
        format!("{STARTUP:#x}")
    }

    fn bound_campaign_record(raised: &str) -> CampaignRecord {
        let mut campaign = CampaignRecord::new(&startup(), "Solar", U256::from(500));
        campaign.raised_wei = raised.to_string();
        campaign.address = Some(format!("{CAMPAIGN:#x}"));
        campaign
    }

    fn bound_campaign(db: &Database, raised: &str) -> CampaignRecord {
        let campaign = bound_campaign_record(raised);
        db.insert_campaign(&campaign).unwrap();
        campaign
    }

    #[test]
    fn duplicate_contribution_is_applied_once() {
        let (reconciler, db, _dir) = reconciler();
        let campaign = bound_campaign(&db, "450");
        let event = contribution(2, 100, 550);

        assert_eq!(reconciler.apply(&event).unwrap(), Outcome::Applied);
        assert_eq!(reconciler.apply(&event).unwrap(), Outcome::Duplicate);

        let stored = db.get_campaign(&campaign.id).unwrap().unwrap();
        assert_eq!(stored.raised_wei, "550");
        assert_eq!(stored.backers, 1);
        assert_eq!(stored.status, CampaignStatus::Funded);
    }

    #[test]
    fn contribution_is_recorded_as_confirmed() {
        let (reconciler, db, _dir) = reconciler();
        let campaign = bound_campaign(&db, "0");
        let event = contribution(3, 100, 100);
        reconciler.apply(&event).unwrap();

        let recorder = TransactionRecorder::new(db.clone());
        let tx = recorder.get(&event.tx_hash).unwrap().unwrap();
        assert_eq!(tx.tx_type, TxType::Contribution);
        assert_eq!(tx.status, TxStatus::Confirmed);
        assert_eq!(tx.block_number, Some(11));
        assert_eq!(tx.campaign_id.as_deref(), Some(campaign.id.as_str()));
        assert_eq!(tx.from, format!("{INVESTOR:#x}"));
    }

    #[test]
    fn contribution_to_unknown_campaign_is_left_unclaimed() {
        let (reconciler, db, _dir) = reconciler();
        let event = contribution(4, 100, 100);

        assert_eq!(reconciler.apply(&event).unwrap(), Outcome::Dropped);
        let key = event_key(&event.tx_hash, event.log_index);
        assert!(!db.is_event_processed(&key).unwrap());

        // once the contract is bound a redelivery applies it
        let campaign = bound_campaign(&db, "0");
        assert_eq!(reconciler.apply(&event).unwrap(), Outcome::Applied);
        assert_eq!(db.get_campaign(&campaign.id).unwrap().unwrap().raised_wei, "100");
    }

    #[test]
    fn failed_contribution_is_retried_on_redelivery() {
        let (reconciler, db, _dir) = reconciler();
        let mut campaign = bound_campaign_record("0");
        campaign.goal_wei = "not-a-number".to_string();
        db.insert_campaign(&campaign).unwrap();
        let event = contribution(12, 100, 100);

        assert!(reconciler.apply(&event).is_err());
        let key = event_key(&event.tx_hash, event.log_index);
        assert!(!db.is_event_processed(&key).unwrap());
        assert_eq!(db.get_campaign(&campaign.id).unwrap().unwrap().backers, 0);

        let mut repaired = db.get_campaign(&campaign.id).unwrap().unwrap();
        repaired.goal_wei = "500".to_string();
        db.insert_campaign(&repaired).unwrap();
        assert_eq!(reconciler.apply(&event).unwrap(), Outcome::Applied);
        assert_eq!(db.get_campaign(&campaign.id).unwrap().unwrap().backers, 1);
    }

    #[test]
    fn contribution_event_corrects_a_claimed_refund() {
        let (reconciler, db, _dir) = reconciler();
        let campaign = bound_campaign(&db, "0");
        let event = contribution(13, 100, 100);

        let recorder = TransactionRecorder::new(db.clone());
        recorder
            .record_pending(PendingTransaction {
                tx_hash: event.tx_hash.clone(),
                tx_type: TxType::Refund,
                from: "0x000000000000000000000000000000000000dead".into(),
                to: format!("{CAMPAIGN:#x}"),
                amount: "0".into(),
                campaign_id: None,
                metadata: None,
                explorer_url: String::new(),
            })
            .unwrap();

        assert_eq!(reconciler.apply(&event).unwrap(), Outcome::Applied);
        let tx = recorder.get(&event.tx_hash).unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Confirmed);
        assert_eq!(tx.tx_type, TxType::Contribution);
        assert_eq!(tx.from, format!("{INVESTOR:#x}"));
        assert_eq!(tx.campaign_id.as_deref(), Some(campaign.id.as_str()));
    }

    #[test]
    fn creation_binds_unbound_campaign_and_confirms_tx() {
        let (reconciler, db, _dir) = reconciler();
        let campaign = CampaignRecord::new(&startup(), "Solar", U256::from(500));
        db.insert_campaign(&campaign).unwrap();

        let event = creation(5);
        let recorder = TransactionRecorder::new(db.clone());
        recorder
            .record_pending(PendingTransaction {
                tx_hash: event.tx_hash.clone(),
                tx_type: TxType::CampaignCreation,
                from: startup(),
                to: format!("{FACTORY:#x}"),
                amount: "0".into(),
                campaign_id: Some(campaign.id.clone()),
                metadata: None,
                explorer_url: String::new(),
            })
            .unwrap();

        assert_eq!(reconciler.apply(&event).unwrap(), Outcome::Applied);

        let bound = db.find_campaign_by_address(&format!("{CAMPAIGN:#x}")).unwrap().unwrap();
        assert_eq!(bound.id, campaign.id);

        let tx = recorder.get(&event.tx_hash).unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Confirmed);
        assert_eq!(tx.contract_address, Some(format!("{CAMPAIGN:#x}")));
    }

    #[test]
    fn creation_without_record_is_dropped_until_a_new_event() {
        let (reconciler, db, _dir) = reconciler();
        assert_eq!(reconciler.apply(&creation(6)).unwrap(), Outcome::Dropped);

        db.insert_campaign(&CampaignRecord::new(&startup(), "Solar", U256::from(500)))
            .unwrap();
        // redelivery of the dropped event stays a no-op
        assert_eq!(reconciler.apply(&creation(6)).unwrap(), Outcome::Duplicate);
        assert_eq!(reconciler.apply(&creation(7)).unwrap(), Outcome::Applied);
    }

    #[test]
    fn creation_from_other_factory_is_dropped() {
        let (reconciler, db, _dir) = reconciler();
        db.insert_campaign(&CampaignRecord::new(&startup(), "Solar", U256::from(500)))
            .unwrap();
        let event = decode_event(CAMPAIGN, &creation_log("Solar", 500), position(8, 0, 10)).unwrap();

        assert_eq!(reconciler.apply(&event).unwrap(), Outcome::Dropped);
        assert!(db.find_campaign_by_address(&format!("{CAMPAIGN:#x}")).unwrap().is_none());
        let key = event_key(&event.tx_hash, event.log_index);
        assert!(!db.is_event_processed(&key).unwrap());
    }

    #[tokio::test]
    async fn run_drains_channel_until_closed() {
        let (reconciler, db, _dir) = reconciler();
        let campaign = bound_campaign(&db, "0");

        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(reconciler.run(rx, CancellationToken::new()));
        for event in [contribution(9, 100, 100), contribution(9, 100, 100), contribution(10, 50, 150)] {
            tx.send(ReconcilerMessage::Event(event)).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let stored = db.get_campaign(&campaign.id).unwrap().unwrap();
        assert_eq!(stored.raised_wei, "150");
        assert_eq!(stored.backers, 2);
    }

    #[tokio::test]
    async fn shutdown_drains_queued_events_and_checkpoint() {
        let (reconciler, db, _dir) = reconciler();
        let mut campaign = bound_campaign_record("0");
        campaign.goal_wei = "1000000".to_string();
        db.insert_campaign(&campaign).unwrap();

        let (tx, rx) = mpsc::channel(64);
        for n in 0..50u8 {
            tx.send(ReconcilerMessage::Event(contribution(100 + n, 1, 0)))
                .await
                .unwrap();
        }
        tx.send(ReconcilerMessage::Checkpoint {
            scope: "events_test".into(),
            block: 11,
        })
        .await
        .unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(10), reconciler.run(rx, shutdown))
            .await
            .unwrap();

        let stored = db.get_campaign(&campaign.id).unwrap().unwrap();
        assert_eq!(stored.backers, 50);
        assert_eq!(stored.raised_wei, "50");
        assert_eq!(db.get_last_processed_block("events_test").unwrap(), Some(11));
        // senders still alive do not keep the reconciler running
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn checkpoint_is_held_after_a_failed_event() {
        let (reconciler, db, _dir) = reconciler();
        let mut campaign = bound_campaign_record("0");
        campaign.goal_wei = "not-a-number".to_string();
        db.insert_campaign(&campaign).unwrap();

        let (tx, rx) = mpsc::channel(8);
        tx.send(ReconcilerMessage::Checkpoint {
            scope: "events_test".into(),
            block: 10,
        })
        .await
        .unwrap();
        tx.send(ReconcilerMessage::Event(contribution(14, 100, 100)))
            .await
            .unwrap();
        tx.send(ReconcilerMessage::Checkpoint {
            scope: "events_test".into(),
            block: 11,
        })
        .await
        .unwrap();
        drop(tx);
        reconciler.run(rx, CancellationToken::new()).await;

        assert_eq!(db.get_last_processed_block("events_test").unwrap(), Some(10));
    }
}
