//! The sync pipeline: per-feed orchestration, fan-out across a scope, the
//! periodic loop, and the subscription lifecycle around them.
//!
//! ```text
//! sync_all(scope) ──► sync_feed(id) ×N (bounded, concurrent)
//!                        │
//!                        ├─ DocumentFetcher::fetch_document
//!                        ├─ parse_document ─► derive_id
//!                        ├─ FeedStore::entry_ids   (diff)
//!                        ├─ FeedStore::insert_entries (delta)
//!                        └─ FeedStore::touch_feed
//! ```

mod error;
mod orchestrator;
mod scheduler;
mod subscription;

pub use error::{AggregateSyncError, FeedFailure, SyncError, SyncErrorKind};
pub use orchestrator::{
    CommitWarning, SyncOptions, SyncReport, Syncer, DEFAULT_EXCERPT_WIDTH,
    DEFAULT_MAX_CONCURRENT_SYNCS,
};
pub use scheduler::{BatchReport, CancelHandle, CancelToken, SyncScope};
pub use subscription::{NewSubscription, Subscribed};
