use std::collections::HashSet;
use std::future::Future;

use super::types::{EntryPage, EntryQuery, FeedEntry, FeedSource, Ownership, StoreError};

/// The persistence surface the sync pipeline depends on.
///
/// Implementations must enforce uniqueness of [`FeedEntry::id`] across the
/// whole store: it is the only concurrency control between overlapping syncs
/// of the same feed.
pub trait FeedStore: Send + Sync {
    /// The authenticated principal, used to resolve personal scope.
    fn current_principal(&self) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Select one feed by id; [`StoreError::NotFound`] when absent.
    fn feed(&self, feed_id: &str) -> impl Future<Output = Result<FeedSource, StoreError>> + Send;

    fn feeds_in_scope(
        &self,
        ownership: &Ownership,
    ) -> impl Future<Output = Result<Vec<FeedSource>, StoreError>> + Send;

    /// Identities of every entry already stored for `feed_id`.
    fn entry_ids(
        &self,
        feed_id: &str,
    ) -> impl Future<Output = Result<HashSet<String>, StoreError>> + Send;

    /// Insert entries, committing every row whose id is new.
    ///
    /// Rows whose id already exists are skipped and reported through
    /// [`StoreError::DuplicateKey`]; the other rows of the call stay committed.
    fn insert_entries(
        &self,
        entries: &[FeedEntry],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Record a successful sync at `at` (Unix seconds).
    fn touch_feed(
        &self,
        feed_id: &str,
        at: i64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn insert_feed(&self, feed: &FeedSource) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn rename_feed(
        &self,
        feed_id: &str,
        name: &str,
        alias: Option<&str>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete a feed and all of its entries. Returns the number of entries removed.
    fn delete_feed(&self, feed_id: &str) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// One page of the unified listing, newest first.
    fn entries(
        &self,
        query: &EntryQuery,
    ) -> impl Future<Output = Result<EntryPage, StoreError>> + Send;
}

impl FeedStore for super::Database {
    async fn current_principal(&self) -> Result<String, StoreError> {
        self.principal
            .as_deref()
            .map(str::to_string)
            .ok_or(StoreError::Unauthenticated)
    }

    async fn feed(&self, feed_id: &str) -> Result<FeedSource, StoreError> {
        self.get_feed(feed_id).await
    }

    async fn feeds_in_scope(&self, ownership: &Ownership) -> Result<Vec<FeedSource>, StoreError> {
        self.get_feeds_for(ownership).await
    }

    async fn entry_ids(&self, feed_id: &str) -> Result<HashSet<String>, StoreError> {
        self.get_entry_ids(feed_id).await
    }

    async fn insert_entries(&self, entries: &[FeedEntry]) -> Result<(), StoreError> {
        self.insert_entry_batch(entries).await
    }

    async fn touch_feed(&self, feed_id: &str, at: i64) -> Result<(), StoreError> {
        self.update_feed_fetched(feed_id, at).await
    }

    async fn insert_feed(&self, feed: &FeedSource) -> Result<(), StoreError> {
        self.create_feed(feed).await
    }

    async fn rename_feed(
        &self,
        feed_id: &str,
        name: &str,
        alias: Option<&str>,
    ) -> Result<(), StoreError> {
        self.update_feed_name(feed_id, name, alias).await
    }

    async fn delete_feed(&self, feed_id: &str) -> Result<u64, StoreError> {
        self.delete_feed_cascade(feed_id).await
    }

    async fn entries(&self, query: &EntryQuery) -> Result<EntryPage, StoreError> {
        self.get_entries_page(query).await
    }
}
