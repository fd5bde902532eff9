//! Feed retrieval and normalization.
//!
//! - **Fetching**: [`DocumentFetcher`] with a direct backend and a relayed
//!   backend for restricted networks
//! - **Parsing**: RSS 2.0, RSS 1.0/RDF and Atom documents into [`RawEntry`]
//! - **Identity**: stable deduplication keys via [`derive_id`]
//!
//! # Example
//!
//! ```
//! use feedsync::feed::{derive_id, parse_document};
//!
//! let doc = r#"<rss><channel><item><guid>a-1</guid><title>Hi</title></item></channel></rss>"#;
//! let parsed = parse_document(doc, "https://example.com/rss").unwrap();
//! let id = derive_id(&parsed.entries[0], "https://example.com/rss", Some("feed-1"), 0);
//! assert_eq!(id, "feed-1-a-1");
//! ```

mod fetcher;
mod identity;
mod parser;

pub use fetcher::{
    DirectFetcher, DocumentFetcher, FetchError, FetchSettings, Fetcher, Intermediary,
    RelayFetcher, RouteFailure, DEFAULT_BACKOFF_MS, DEFAULT_TIMEOUT_MS, MAX_DOCUMENT_SIZE,
};
pub use identity::derive_id;
pub use parser::{parse_document, ParseError, ParsedFeed, RawEntry};
