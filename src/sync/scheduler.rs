use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::error::{AggregateSyncError, FeedFailure, SyncError};
use super::orchestrator::{SyncReport, Syncer};
use crate::feed::DocumentFetcher;
use crate::storage::{FeedEntry, FeedStore, Ownership};

/// Which feeds a batch sync covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    /// Feeds owned by the current principal
    Personal,
    /// Feeds owned by the named group
    Group(String),
}

/// Outcome of [`Syncer::sync_all`].
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Every feed that synced successfully, with or without new entries
    pub synced: Vec<String>,
    /// New entries keyed by feed id; feeds with nothing new are omitted
    pub new_entries: HashMap<String, Vec<FeedEntry>>,
    /// Feeds that failed, when some (but not all) did
    pub error: Option<AggregateSyncError>,
}

impl BatchReport {
    pub fn total_new(&self) -> usize {
        self.new_entries.values().map(Vec::len).sum()
    }
}

/// Stops a [`Syncer::run_periodic`] loop. Dropping the handle stops it too.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// The loop's side of a [`CancelHandle`].
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelToken { rx })
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once cancelled (or once the handle is dropped).
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl<S, F> Syncer<S, F>
where
    S: FeedStore,
    F: DocumentFetcher,
{
    pub(crate) async fn resolve_scope(&self, scope: &SyncScope) -> Result<Ownership, SyncError> {
        match scope {
            SyncScope::Personal => self
                .store
                .current_principal()
                .await
                .map(Ownership::User)
                .map_err(SyncError::Authentication),
            SyncScope::Group(group) => Ok(Ownership::Group(group.clone())),
        }
    }

    /// Sync every feed in `scope` concurrently and wait for all of them.
    ///
    /// Per-feed failures never abort the batch. They are collected into
    /// [`BatchReport::error`]; only when every feed failed does the call
    /// itself return `Err(SyncError::Aggregate)`. An empty scope is `Ok`.
    pub async fn sync_all(&self, scope: SyncScope) -> Result<BatchReport, SyncError> {
        let ownership = self.resolve_scope(&scope).await?;
        let feeds = self
            .store
            .feeds_in_scope(&ownership)
            .await
            .map_err(SyncError::StoreRead)?;

        if feeds.is_empty() {
            tracing::debug!(scope = %ownership, "No feeds to sync");
            return Ok(BatchReport::default());
        }

        let total = feeds.len();
        let results: Vec<(String, Result<SyncReport, SyncError>)> = stream::iter(feeds)
            .map(|feed| async move {
                let result = self.sync_feed(&feed.id).await;
                (feed.id, result)
            })
            .buffer_unordered(self.options.max_concurrent_syncs.max(1))
            .collect()
            .await;

        let mut report = BatchReport::default();
        let mut failures = Vec::new();

        for (feed_id, result) in results {
            match result {
                Ok(sync) => {
                    if !sync.new_entries.is_empty() {
                        report.new_entries.insert(feed_id.clone(), sync.new_entries);
                    }
                    report.synced.push(feed_id);
                }
                Err(error) => {
                    tracing::warn!(
                        feed_id = %feed_id,
                        kind = %error.kind(),
                        error = %error,
                        "Feed sync failed"
                    );
                    failures.push(FeedFailure { feed_id, error });
                }
            }
        }

        tracing::info!(
            scope = %ownership,
            total = total,
            synced = report.synced.len(),
            failed = failures.len(),
            new_entries = report.total_new(),
            "Batch sync complete"
        );

        if failures.is_empty() {
            return Ok(report);
        }
        let aggregate = AggregateSyncError { failures };
        if report.synced.is_empty() {
            return Err(SyncError::Aggregate(aggregate));
        }
        report.error = Some(aggregate);
        Ok(report)
    }

    /// Run `sync_all` every `period` until `cancel` fires.
    ///
    /// The first batch runs immediately. Ticks missed while a batch is still
    /// running are skipped rather than queued. Cancellation is observed between
    /// batches; a batch in flight is allowed to finish. Returns the number of
    /// batches run.
    pub async fn run_periodic(
        &self,
        scope: SyncScope,
        period: Duration,
        mut cancel: CancelToken,
    ) -> u64 {
        // tokio::time::interval panics on a zero period
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut batches = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if cancel.is_cancelled() {
                break;
            }

            match self.sync_all(scope.clone()).await {
                Ok(report) => {
                    if let Some(error) = &report.error {
                        tracing::warn!(error = %error, "Periodic sync finished with failures");
                    }
                }
                Err(e) => {
                    tracing::warn!(kind = %e.kind(), error = %e, "Periodic sync failed");
                }
            }
            batches += 1;
        }

        tracing::info!(batches = batches, "Periodic sync stopped");
        batches
    }
}
