// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    auth::{CredentialIssuer, NonceAuthenticator},
    blockchain::LedgerClient,
    funding::{ConfirmationTracker, FundingService},
    reconciler::{Reconciler, ReconcilerMessage, EVENT_CHANNEL_CAPACITY},
    storage::{CampaignStore, Database, IdentityStore, TransactionRecorder},
};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub identities: Arc<dyn IdentityStore>,
    pub campaigns: Arc<dyn CampaignStore>,
    pub credentials: Arc<CredentialIssuer>,
    pub authenticator: Arc<NonceAuthenticator>,
    pub recorder: TransactionRecorder,
    pub ledger: Arc<LedgerClient>,
    pub funding: Arc<FundingService>,
    /// Sender side of the reconciler channel
    pub events: mpsc::Sender<ReconcilerMessage>,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the services around one database. The returned receiver feeds
    /// the [`Reconciler`] built by [`AppState::reconciler`].
    pub fn new(
        db: Arc<Database>,
        credentials: CredentialIssuer,
        ledger: LedgerClient,
        shutdown: CancellationToken,
    ) -> (Self, mpsc::Receiver<ReconcilerMessage>) {
        let identities: Arc<dyn IdentityStore> = db.clone();
        let campaigns: Arc<dyn CampaignStore> = db.clone();
        let credentials = Arc::new(credentials);
        let authenticator = Arc::new(NonceAuthenticator::new(
            identities.clone(),
            credentials.clone(),
        ));
        let recorder = TransactionRecorder::new(db.clone());
        let ledger = Arc::new(ledger);

        let (events, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let tracker = ConfirmationTracker::new(
            ledger.clone(),
            recorder.clone(),
            events.clone(),
            shutdown.clone(),
        );
        let funding = Arc::new(FundingService::new(
            ledger.clone(),
            campaigns.clone(),
            recorder.clone(),
            tracker,
        ));

        let state = Self {
            db,
            identities,
            campaigns,
            credentials,
            authenticator,
            recorder,
            ledger,
            funding,
            events,
            shutdown,
        };
        (state, receiver)
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.db.clone(),
            self.campaigns.clone(),
            self.recorder.clone(),
            self.ledger.network().clone(),
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::blockchain::contracts::tests::FACTORY;
    use crate::blockchain::{ConfirmationPolicy, NetworkSettings};
    use crate::storage::database::tests::temp_db;
    use std::time::Duration;
    use tempfile::TempDir;

    pub(crate) const TEST_SECRET: &[u8] = b"test-secret-with-enough-entropy-0123456789";

    /// State backed by a temporary database and an unreachable ledger node.
    pub(crate) fn test_state() -> (AppState, TempDir) {
        let (db, dir) = temp_db();
        let credentials =
            CredentialIssuer::new(TEST_SECRET, "crowdfund-ledger-test", chrono::Duration::hours(24));
        let ledger = LedgerClient::new(
            NetworkSettings {
                name: "test".into(),
                rpc_url: "http://127.0.0.1:9".into(),
                explorer_url: "https://explorer.test".into(),
                factory: Some(FACTORY),
            },
            None,
            ConfirmationPolicy {
                initial_interval: Duration::from_millis(10),
                max_interval: Duration::from_millis(20),
                ceiling: Duration::from_millis(100),
            },
        )
        .expect("valid test ledger");
        let (state, _events) = AppState::new(Arc::new(db), credentials, ledger, CancellationToken::new());
        (state, dir)
    }

    #[test]
    fn stores_share_one_database() {
        use crate::auth::Role;
        use crate::storage::{Identity, Profile};

        let (state, _dir) = test_state();
        let identity = Identity::new(
            "0x1111111111111111111111111111111111111111".to_string(),
            Role::Unspecified,
            Profile::Basic,
        );
        state.db.insert_identity(&identity).unwrap();

        let found = state
            .identities
            .find_identity(&identity.address, Role::Unspecified)
            .unwrap();
        assert_eq!(found, Some(identity));
    }
}
