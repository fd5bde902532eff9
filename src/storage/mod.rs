//! Persistence for feeds and entries.
//!
//! The sync pipeline talks to storage only through the [`FeedStore`] trait;
//! [`Database`] is the SQLite implementation shipped with the binary.

mod entries;
mod feeds;
mod schema;
mod store;
mod types;

pub use schema::Database;
pub use store::FeedStore;
pub use types::{EntryPage, EntryQuery, FeedEntry, FeedSource, Ownership, StoreError};
