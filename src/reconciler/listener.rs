// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger event listener.
//!
//! Polls `eth_getLogs` for campaign events from a persisted block
//! checkpoint and forwards them to the reconciler. The checkpoint is read
//! once at startup; after that the listener follows an in-memory cursor and
//! leaves persisting the checkpoint to the reconciler, which stores it only
//! after the chunk's events are applied. RPC failures back off
//! exponentially; the listener only stops on shutdown or when the
//! reconciler goes away.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::ReconcilerMessage;
use crate::blockchain::LedgerClient;
use crate::error::ServiceError;
use crate::storage::{Database, StoreError};

/// Default block chunk size per `eth_getLogs` query.
const DEFAULT_CHUNK_SIZE: u64 = 2000;

/// How far back to look when starting without a checkpoint.
const INITIAL_LOOKBACK_BLOCKS: u64 = 10_000;

/// Upper bound on the retry delay after repeated failures.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("RPC error: {0}")]
    Rpc(#[from] ServiceError),

    #[error("Database error: {0}")]
    Db(#[from] StoreError),

    #[error("reconciler channel closed")]
    ChannelClosed,
}

pub struct EventListener {
    ledger: Arc<LedgerClient>,
    db: Arc<Database>,
    events: mpsc::Sender<ReconcilerMessage>,
    scope: String,
    poll_interval: Duration,
    chunk_size: u64,
    start_block: Option<u64>,
    /// First block not yet queued, once known
    next_block: Option<u64>,
}

impl EventListener {
    pub fn new(
        ledger: Arc<LedgerClient>,
        db: Arc<Database>,
        events: mpsc::Sender<ReconcilerMessage>,
        poll_interval: Duration,
        start_block: Option<u64>,
    ) -> Self {
        let scope = format!(
            "events_{}",
            ledger.network().name.to_lowercase().replace(' ', "_")
        );
        Self {
            ledger,
            db,
            events,
            scope,
            poll_interval,
            chunk_size: DEFAULT_CHUNK_SIZE,
            start_block,
            next_block: None,
        }
    }

    /// Start the listener as a background task. It stops when `shutdown`
    /// is cancelled or when [`ListenerHandle::stop`] is called.
    pub fn spawn(self, shutdown: &CancellationToken) -> ListenerHandle {
        let token = shutdown.child_token();
        let task = tokio::spawn(self.run(token.clone()));
        ListenerHandle { token, task }
    }

    async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(
            network = %self.ledger.network().name,
            factory = ?self.ledger.factory(),
            "Event listener starting"
        );

        let mut failures: u32 = 0;
        loop {
            let delay = match self.poll_once().await {
                Ok(forwarded) => {
                    if forwarded > 0 {
                        tracing::debug!(events = forwarded, "Forwarded ledger events");
                    }
                    failures = 0;
                    self.poll_interval
                }
                Err(ListenerError::ChannelClosed) => {
                    tracing::info!("Reconciler gone, event listener stopping");
                    return;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = backoff_delay(self.poll_interval, failures);
                    tracing::warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Listener poll failed");
                    delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {},
                _ = shutdown.cancelled() => {
                    tracing::info!("Event listener shutting down");
                    return;
                }
            }
        }
    }

    /// Where the next poll starts: the cursor, else the persisted
    /// checkpoint, else the configured or default lookback.
    fn resume_from(&self, head: u64) -> Result<u64, ListenerError> {
        if let Some(next) = self.next_block {
            return Ok(next);
        }
        Ok(match self.db.get_last_processed_block(&self.scope)? {
            Some(block) => block + 1,
            None => self
                .start_block
                .unwrap_or_else(|| head.saturating_sub(INITIAL_LOOKBACK_BLOCKS)),
        })
    }

    /// Queue events from the cursor to the chain head, each chunk followed
    /// by its checkpoint.
    async fn poll_once(&mut self) -> Result<usize, ListenerError> {
        let head = self.ledger.block_number().await?;
        let start = self.resume_from(head)?;
        if start > head {
            return Ok(0);
        }

        let mut forwarded = 0;
        let mut from = start;
        while from <= head {
            let to = (from + self.chunk_size - 1).min(head);

            for event in self.ledger.logs(from, to).await? {
                self.send(ReconcilerMessage::Event(event)).await?;
                forwarded += 1;
            }
            self.send(ReconcilerMessage::Checkpoint {
                scope: self.scope.clone(),
                block: to,
            })
            .await?;

            self.next_block = Some(to + 1);
            from = to + 1;
        }

        Ok(forwarded)
    }

    async fn send(&self, message: ReconcilerMessage) -> Result<(), ListenerError> {
        self.events
            .send(message)
            .await
            .map_err(|_| ListenerError::ChannelClosed)
    }
}

/// Delay before the next poll after `failures` consecutive failures.
fn backoff_delay(base: Duration, failures: u32) -> Duration {
    let factor = 1u32 << failures.min(6);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

/// Handle to a running listener.
pub struct ListenerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stop the listener and wait for it to finish.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Event listener task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{ConfirmationPolicy, NetworkSettings};
    use crate::storage::database::tests::temp_db;

    fn listener(
        tx: mpsc::Sender<ReconcilerMessage>,
    ) -> (EventListener, Arc<Database>, tempfile::TempDir) {
        let (db, dir) = temp_db();
        let db = Arc::new(db);
        let ledger = LedgerClient::new(
            NetworkSettings {
                name: "Local Dev".into(),
                rpc_url: "http://127.0.0.1:9".into(),
                explorer_url: String::new(),
                factory: None,
            },
            None,
            ConfirmationPolicy::default(),
        )
        .unwrap();
        let listener = EventListener::new(
            Arc::new(ledger),
            db.clone(),
            tx,
            Duration::from_millis(10),
            None,
        );
        (listener, db, dir)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(8));
        assert_eq!(backoff_delay(base, 30), MAX_BACKOFF);
    }

    #[test]
    fn scope_is_derived_from_network_name() {
        let (tx, _rx) = mpsc::channel(1);
        let (listener, _db, _dir) = listener(tx);
        assert_eq!(listener.scope, "events_local_dev");
    }

    #[tokio::test]
    async fn poll_failure_leaves_checkpoint_untouched() {
        let (tx, _rx) = mpsc::channel(1);
        let (mut listener, db, _dir) = listener(tx);

        assert!(matches!(listener.poll_once().await, Err(ListenerError::Rpc(_))));
        assert_eq!(db.get_last_processed_block(&listener.scope).unwrap(), None);
        assert_eq!(listener.next_block, None);
    }

    #[test]
    fn resumes_from_cursor_then_checkpoint_then_start_block() {
        let (tx, _rx) = mpsc::channel(1);
        let (mut listener, db, _dir) = listener(tx);

        assert_eq!(listener.resume_from(50_000).unwrap(), 40_000);
        listener.start_block = Some(7);
        assert_eq!(listener.resume_from(50_000).unwrap(), 7);

        db.set_last_processed_block(&listener.scope, 41).unwrap();
        assert_eq!(listener.resume_from(50_000).unwrap(), 42);

        // the queued position wins over a checkpoint the reconciler has not
        // caught up to
        listener.next_block = Some(90);
        assert_eq!(listener.resume_from(50_000).unwrap(), 90);
    }

    #[tokio::test]
    async fn closed_reconciler_stops_sending() {
        let (tx, rx) = mpsc::channel(1);
        let (listener, _db, _dir) = listener(tx);
        drop(rx);

        let result = listener
            .send(ReconcilerMessage::Checkpoint {
                scope: listener.scope.clone(),
                block: 1,
            })
            .await;
        assert!(matches!(result, Err(ListenerError::ChannelClosed)));
    }

    #[tokio::test]
    async fn keeps_retrying_until_stopped() {
        let (tx, _rx) = mpsc::channel(1);
        let (listener, _db, _dir) = listener(tx);
        let shutdown = CancellationToken::new();

        let handle = listener.spawn(&shutdown);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());

        tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn parent_shutdown_stops_listener() {
        let (tx, _rx) = mpsc::channel(1);
        let (listener, _db, _dir) = listener(tx);
        let shutdown = CancellationToken::new();

        let handle = listener.spawn(&shutdown);
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle.task)
            .await
            .unwrap()
            .unwrap();
    }
}
