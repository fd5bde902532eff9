//! Shared fixtures for the sync pipeline integration tests.
//!
//! - [`StaticFetcher`]: serves canned documents per URL, no network
//! - [`FaultyStore`]: wraps an in-memory [`Database`] and injects store
//!   failures (overlapping-sync duplicates, permission denial, write errors)

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use feedsync::feed::{DocumentFetcher, FetchError};
use feedsync::storage::{
    Database, EntryPage, EntryQuery, FeedEntry, FeedSource, FeedStore, Ownership, StoreError,
};

pub const PRINCIPAL: &str = "alice";

pub async fn test_db() -> Database {
    Database::open(":memory:")
        .await
        .unwrap()
        .with_principal(PRINCIPAL)
}

pub fn feed_source(id: &str, url: &str, ownership: Ownership) -> FeedSource {
    FeedSource {
        id: id.to_string(),
        url: url.to_string(),
        title: format!("Feed {id}"),
        integration_name: format!("Name {id}"),
        integration_alias: Some(format!("alias-{id}")),
        last_fetched: None,
        ownership,
        created_at: 1_700_000_000,
        updated_at: 1_700_000_000,
    }
}

pub fn personal_feed(id: &str, url: &str) -> FeedSource {
    feed_source(id, url, Ownership::User(PRINCIPAL.to_string()))
}

/// RSS 2.0 document with one `<item>` per `(guid, title)`.
pub fn rss(items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(guid, title)| {
            format!(
                "<item><guid>{guid}</guid><title>{title}</title>\
                 <link>https://news.example.com/{guid}</link>\
                 <description>&lt;p&gt;About {title}&lt;/p&gt;</description>\
                 <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>News</title>{items}</channel></rss>"#
    )
}

// ============================================================================
// StaticFetcher
// ============================================================================

#[derive(Debug, Clone)]
pub enum Canned {
    Document(String),
    Status(u16),
    Timeout,
}

#[derive(Default)]
pub struct StaticFetcher {
    responses: Mutex<HashMap<String, Canned>>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: &str, response: Canned) -> Self {
        self.set(url, response);
        self
    }

    pub fn set(&self, url: &str, response: Canned) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DocumentFetcher for StaticFetcher {
    async fn fetch_document(&self, url: &str) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self.responses.lock().unwrap().get(url).cloned();
        match response {
            Some(Canned::Document(body)) => Ok(body),
            Some(Canned::Status(code)) => Err(FetchError::HttpStatus(code)),
            Some(Canned::Timeout) => Err(FetchError::Timeout {
                url: url.to_string(),
                timeout_ms: 30_000,
            }),
            None => Err(FetchError::HttpStatus(404)),
        }
    }
}

// ============================================================================
// FaultyStore
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    /// Another sync commits the first `n` rows of the batch just before ours
    RaceFirst(usize),
    /// Every entry insert is refused for the principal
    DenyInsert,
    /// Entry insert fails with a backend error
    FailInsert,
    /// Freshness update fails
    FailTouch,
}

pub struct FaultyStore {
    pub inner: Database,
    fault: Mutex<Fault>,
}

impl FaultyStore {
    pub fn new(inner: Database, fault: Fault) -> Self {
        Self {
            inner,
            fault: Mutex::new(fault),
        }
    }

    pub fn set_fault(&self, fault: Fault) {
        *self.fault.lock().unwrap() = fault;
    }

    fn fault(&self) -> Fault {
        *self.fault.lock().unwrap()
    }
}

impl FeedStore for FaultyStore {
    async fn current_principal(&self) -> Result<String, StoreError> {
        self.inner.current_principal().await
    }

    async fn feed(&self, feed_id: &str) -> Result<FeedSource, StoreError> {
        self.inner.feed(feed_id).await
    }

    async fn feeds_in_scope(&self, ownership: &Ownership) -> Result<Vec<FeedSource>, StoreError> {
        self.inner.feeds_in_scope(ownership).await
    }

    async fn entry_ids(&self, feed_id: &str) -> Result<HashSet<String>, StoreError> {
        self.inner.entry_ids(feed_id).await
    }

    async fn insert_entries(&self, entries: &[FeedEntry]) -> Result<(), StoreError> {
        match self.fault() {
            Fault::RaceFirst(n) => {
                let raced = &entries[..n.min(entries.len())];
                self.inner.insert_entries(raced).await?;
                self.inner.insert_entries(entries).await
            }
            Fault::DenyInsert => Err(StoreError::PermissionDenied(
                "new row violates row-level security policy".to_string(),
            )),
            Fault::FailInsert => Err(StoreError::Backend(sqlx::Error::PoolTimedOut)),
            Fault::None | Fault::FailTouch => self.inner.insert_entries(entries).await,
        }
    }

    async fn touch_feed(&self, feed_id: &str, at: i64) -> Result<(), StoreError> {
        if self.fault() == Fault::FailTouch {
            return Err(StoreError::Backend(sqlx::Error::PoolTimedOut));
        }
        self.inner.touch_feed(feed_id, at).await
    }

    async fn insert_feed(&self, feed: &FeedSource) -> Result<(), StoreError> {
        self.inner.insert_feed(feed).await
    }

    async fn rename_feed(
        &self,
        feed_id: &str,
        name: &str,
        alias: Option<&str>,
    ) -> Result<(), StoreError> {
        self.inner.rename_feed(feed_id, name, alias).await
    }

    async fn delete_feed(&self, feed_id: &str) -> Result<u64, StoreError> {
        self.inner.delete_feed(feed_id).await
    }

    async fn entries(&self, query: &EntryQuery) -> Result<EntryPage, StoreError> {
        self.inner.entries(query).await
    }
}
