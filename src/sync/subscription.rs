use chrono::Utc;
use uuid::Uuid;

use super::error::SyncError;
use super::orchestrator::{SyncReport, Syncer};
use super::scheduler::SyncScope;
use crate::feed::{derive_id, DocumentFetcher};
use crate::storage::{FeedEntry, FeedSource, FeedStore, Ownership, StoreError};
use crate::util::validate_url;

/// A request to register a feed.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub url: String,
    /// Display name; the feed's own title is used when blank
    pub name: String,
    pub alias: Option<String>,
    pub scope: SyncScope,
}

/// A registered feed together with its initial sync.
#[derive(Debug, Clone)]
pub struct Subscribed {
    pub feed: FeedSource,
    pub report: SyncReport,
}

impl<S, F> Syncer<S, F>
where
    S: FeedStore,
    F: DocumentFetcher,
{
    /// Fetch and parse a feed without registering it.
    ///
    /// Entries carry un-namespaced identities and an empty `feed_id`, and are
    /// attributed to the current principal.
    pub async fn preview(&self, url: &str) -> Result<Vec<FeedEntry>, SyncError> {
        let url = validate_url(url)?.to_string();
        let owner = self.resolve_scope(&SyncScope::Personal).await?;
        let parsed = self.fetch_and_parse(&url).await?;

        let now = Utc::now();
        let draft = FeedSource {
            id: String::new(),
            url: url.clone(),
            title: parsed.title.clone().unwrap_or_else(|| url.clone()),
            integration_name: parsed.title.clone().unwrap_or_else(|| url.clone()),
            integration_alias: None,
            last_fetched: None,
            ownership: owner,
            created_at: now.timestamp(),
            updated_at: now.timestamp(),
        };

        Ok(parsed
            .entries
            .iter()
            .enumerate()
            .map(|(position, raw)| {
                let id = derive_id(raw, &url, None, position);
                self.materialize(raw, id, &draft, now)
            })
            .collect())
    }

    /// Validate, register and initially sync a feed.
    ///
    /// The document is fetched and parsed before anything is written, so an
    /// unreachable or malformed feed is never registered.
    pub async fn subscribe(&self, request: NewSubscription) -> Result<Subscribed, SyncError> {
        let url = validate_url(&request.url)?.to_string();
        let ownership = self.resolve_scope(&request.scope).await?;
        let parsed = self.fetch_and_parse(&url).await?;

        let name = Some(request.name.trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| parsed.title.clone())
            .unwrap_or_else(|| url.clone());
        let alias = request
            .alias
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());

        let now = Utc::now().timestamp();
        let feed = FeedSource {
            id: Uuid::new_v4().to_string(),
            url,
            title: parsed.title.clone().unwrap_or_else(|| name.clone()),
            integration_name: name,
            integration_alias: alias,
            last_fetched: None,
            ownership,
            created_at: now,
            updated_at: now,
        };

        self.store
            .insert_feed(&feed)
            .await
            .map_err(SyncError::StoreWrite)?;
        tracing::info!(feed_id = %feed.id, url = %feed.url, owner = %feed.ownership, "Feed subscribed");

        let report = self.commit_delta(&feed, &parsed.entries).await?;
        let feed = self
            .store
            .feed(&feed.id)
            .await
            .map_err(|e| SyncError::from_feed_lookup(&feed.id, e))?;

        Ok(Subscribed { feed, report })
    }

    pub async fn rename(
        &self,
        feed_id: &str,
        name: &str,
        alias: Option<&str>,
    ) -> Result<(), SyncError> {
        let alias = alias.map(str::trim).filter(|a| !a.is_empty());
        self.store
            .rename_feed(feed_id, name.trim(), alias)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => SyncError::NotFound {
                    feed_id: feed_id.to_string(),
                },
                other => SyncError::StoreWrite(other),
            })
    }

    /// Remove a feed and every entry it produced. Returns the number of
    /// entries deleted.
    pub async fn unsubscribe(&self, feed_id: &str) -> Result<u64, SyncError> {
        let removed = self
            .store
            .delete_feed(feed_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => SyncError::NotFound {
                    feed_id: feed_id.to_string(),
                },
                other => SyncError::StoreWrite(other),
            })?;
        tracing::info!(feed_id = %feed_id, removed_entries = removed, "Feed unsubscribed");
        Ok(removed)
    }

    /// Resolve a scope to its owner, for listing callers.
    pub async fn ownership(&self, scope: &SyncScope) -> Result<Ownership, SyncError> {
        self.resolve_scope(scope).await
    }
}
