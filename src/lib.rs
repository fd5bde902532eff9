//! Feed synchronization and deduplication.
//!
//! Registered RSS/Atom feeds are fetched (directly, or through relays on
//! restricted networks), parsed into a canonical entry model, given stable
//! identities, diffed against what is already stored, and only the delta is
//! committed. See [`sync::Syncer`] for the entry point.

pub mod config;
pub mod feed;
pub mod storage;
pub mod sync;
pub mod util;
