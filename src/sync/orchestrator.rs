use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use std::collections::HashSet;

use super::error::SyncError;
use crate::feed::{derive_id, parse_document, DocumentFetcher, ParsedFeed, RawEntry};
use crate::storage::{FeedEntry, FeedSource, FeedStore, StoreError};
use crate::util::excerpt;

pub const DEFAULT_MAX_CONCURRENT_SYNCS: usize = 10;
pub const DEFAULT_EXCERPT_WIDTH: usize = 280;

/// Tuning knobs for a [`Syncer`].
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Upper bound on feeds synced at once by `sync_all`
    pub max_concurrent_syncs: usize,
    /// Display width of `content_snippet`
    pub excerpt_width: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_concurrent_syncs: DEFAULT_MAX_CONCURRENT_SYNCS,
            excerpt_width: DEFAULT_EXCERPT_WIDTH,
        }
    }
}

/// A recovered problem while committing a feed's delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitWarning {
    /// The store refused the insert; nothing was committed for this sync.
    PermissionDenied { attempted: usize, reason: String },
}

/// Outcome of syncing one feed.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub feed_id: String,
    /// Entries committed by this call, in document order
    pub new_entries: Vec<FeedEntry>,
    pub warnings: Vec<CommitWarning>,
}

/// Drives fetch, parse, dedup and commit for feeds in a [`FeedStore`].
///
/// Cheap to share by reference: every method takes `&self`, and concurrent
/// calls for the same feed are safe because the store's unique entry id
/// absorbs the overlap.
pub struct Syncer<S, F> {
    pub(crate) store: S,
    pub(crate) fetcher: F,
    pub(crate) options: SyncOptions,
}

impl<S, F> Syncer<S, F>
where
    S: FeedStore,
    F: DocumentFetcher,
{
    pub fn new(store: S, fetcher: F) -> Self {
        Self {
            store,
            fetcher,
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Sync one registered feed: fetch, parse, commit the entries not yet
    /// stored, then stamp `last_fetched`.
    ///
    /// Idempotent: a second call against an unchanged document commits
    /// nothing and only moves `last_fetched`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown feed id; fetch and parse failures as their
    /// own kinds; `StoreRead`/`StoreWrite` for store failures other than the
    /// recovered duplicate-key and permission-denied cases.
    pub async fn sync_feed(&self, feed_id: &str) -> Result<SyncReport, SyncError> {
        let feed = self
            .store
            .feed(feed_id)
            .await
            .map_err(|e| SyncError::from_feed_lookup(feed_id, e))?;

        let parsed = self.fetch_and_parse(&feed.url).await?;
        self.commit_delta(&feed, &parsed.entries).await
    }

    pub(crate) async fn fetch_and_parse(&self, url: &str) -> Result<ParsedFeed, SyncError> {
        let document = self
            .fetcher
            .fetch_document(url)
            .await
            .map_err(|e| SyncError::from_fetch(url, e))?;

        parse_document(&document, url).map_err(|source| SyncError::Parse {
            url: url.to_string(),
            source,
        })
    }

    /// Diff `entries` against the store and commit the new ones.
    pub(crate) async fn commit_delta(
        &self,
        feed: &FeedSource,
        entries: &[RawEntry],
    ) -> Result<SyncReport, SyncError> {
        let known = self
            .store
            .entry_ids(&feed.id)
            .await
            .map_err(SyncError::StoreRead)?;

        let now = Utc::now();
        let mut seen = HashSet::with_capacity(entries.len());
        let delta: Vec<FeedEntry> = entries
            .iter()
            .enumerate()
            .filter_map(|(position, raw)| {
                let id = derive_id(raw, &feed.url, Some(&feed.id), position);
                // First occurrence wins when a document repeats an entry
                if known.contains(&id) || !seen.insert(id.clone()) {
                    return None;
                }
                Some(self.materialize(raw, id, feed, now))
            })
            .collect();

        let attempted = delta.len();
        let mut warnings = Vec::new();
        let committed = if delta.is_empty() {
            delta
        } else {
            match self.store.insert_entries(&delta).await {
                Ok(()) => delta,
                Err(StoreError::DuplicateKey { conflicting }) => {
                    tracing::warn!(
                        feed_id = %feed.id,
                        conflicting = conflicting.len(),
                        attempted = attempted,
                        "Entries already stored by an overlapping sync, skipped"
                    );
                    // A backend that cannot name the rows rejected the whole batch
                    if conflicting.is_empty() {
                        Vec::new()
                    } else {
                        let conflicting: HashSet<String> = conflicting.into_iter().collect();
                        delta
                            .into_iter()
                            .filter(|e| !conflicting.contains(&e.id))
                            .collect()
                    }
                }
                Err(StoreError::PermissionDenied(reason)) => {
                    tracing::warn!(
                        feed_id = %feed.id,
                        attempted = attempted,
                        reason = %reason,
                        "Store denied entry insert; no entries committed for this feed"
                    );
                    warnings.push(CommitWarning::PermissionDenied { attempted, reason });
                    Vec::new()
                }
                Err(e) => {
                    tracing::warn!(feed_id = %feed.id, error = %e, "Failed to insert entries");
                    return Err(SyncError::StoreWrite(e));
                }
            }
        };

        self.store
            .touch_feed(&feed.id, now.timestamp())
            .await
            .map_err(SyncError::StoreWrite)?;

        tracing::info!(
            feed_id = %feed.id,
            url = %feed.url,
            parsed = entries.len(),
            new_entries = committed.len(),
            "Feed synced"
        );

        Ok(SyncReport {
            feed_id: feed.id.clone(),
            new_entries: committed,
            warnings,
        })
    }

    /// Build the stored row for a raw entry, copying name, alias and
    /// ownership from the feed.
    pub(crate) fn materialize(
        &self,
        raw: &RawEntry,
        id: String,
        feed: &FeedSource,
        now: DateTime<Utc>,
    ) -> FeedEntry {
        FeedEntry {
            id,
            feed_id: feed.id.clone(),
            title: raw.title.clone().unwrap_or_default(),
            link: raw.link.clone().unwrap_or_default(),
            content: raw.body().unwrap_or_default().to_string(),
            content_snippet: excerpt(
                raw.snippet_source().unwrap_or_default(),
                self.options.excerpt_width,
            ),
            pub_date: normalize_pub_date(raw.published.as_deref(), now),
            integration_name: feed.integration_name.clone(),
            integration_alias: feed.integration_alias.clone(),
            ownership: feed.ownership.clone(),
            created_at: now.timestamp(),
        }
    }
}

/// RFC 3339 (UTC) when the source date parses, the source text otherwise,
/// ingestion time when absent.
pub(crate) fn normalize_pub_date(published: Option<&str>, now: DateTime<Utc>) -> String {
    let Some(text) = published.map(str::trim).filter(|s| !s.is_empty()) else {
        return now.to_rfc3339_opts(SecondsFormat::Secs, true);
    };

    parse_timestamp(text)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| text.to_string())
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    // Timezone-less ISO 8601 as seen in some dc:date values
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}
