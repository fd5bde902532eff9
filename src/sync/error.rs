use thiserror::Error;

use crate::feed::{FetchError, ParseError, RouteFailure};
use crate::storage::StoreError;
use crate::util::UrlValidationError;

/// Everything that can go wrong in the sync pipeline.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No principal to resolve personal scope
    #[error("Authentication required: {0}")]
    Authentication(#[source] StoreError),

    #[error("Feed {feed_id} not found")]
    NotFound { feed_id: String },

    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),

    #[error("Failed to read from store: {0}")]
    StoreRead(#[source] StoreError),

    #[error("Failed to write to store: {0}")]
    StoreWrite(#[source] StoreError),

    #[error("Failed to parse feed {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: ParseError,
    },

    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Failed to fetch {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("All retrieval routes failed for {url}: {}", join_routes(.failures))]
    AllRoutesFailed {
        url: String,
        failures: Vec<RouteFailure>,
    },

    #[error(transparent)]
    Aggregate(#[from] AggregateSyncError),
}

/// The tag of a [`SyncError`], for callers that branch on the kind only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncErrorKind {
    Authentication,
    NotFound,
    InvalidUrl,
    StoreRead,
    StoreWrite,
    Parse,
    Timeout,
    Network,
    AllRoutesFailed,
    Aggregate,
}

impl SyncErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncErrorKind::Authentication => "authentication",
            SyncErrorKind::NotFound => "not_found",
            SyncErrorKind::InvalidUrl => "invalid_url",
            SyncErrorKind::StoreRead => "store_read",
            SyncErrorKind::StoreWrite => "store_write",
            SyncErrorKind::Parse => "parse",
            SyncErrorKind::Timeout => "timeout",
            SyncErrorKind::Network => "network",
            SyncErrorKind::AllRoutesFailed => "all_routes_failed",
            SyncErrorKind::Aggregate => "aggregate",
        }
    }
}

impl std::fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SyncError {
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            SyncError::Authentication(_) => SyncErrorKind::Authentication,
            SyncError::NotFound { .. } => SyncErrorKind::NotFound,
            SyncError::InvalidUrl(_) => SyncErrorKind::InvalidUrl,
            SyncError::StoreRead(_) => SyncErrorKind::StoreRead,
            SyncError::StoreWrite(_) => SyncErrorKind::StoreWrite,
            SyncError::Parse { .. } => SyncErrorKind::Parse,
            SyncError::Timeout { .. } => SyncErrorKind::Timeout,
            SyncError::Network { .. } => SyncErrorKind::Network,
            SyncError::AllRoutesFailed { .. } => SyncErrorKind::AllRoutesFailed,
            SyncError::Aggregate(_) => SyncErrorKind::Aggregate,
        }
    }

    /// Lifts a fetch-layer error, keeping timeouts and route exhaustion as
    /// their own kinds.
    pub(crate) fn from_fetch(url: &str, err: FetchError) -> Self {
        match err {
            FetchError::Timeout { url, timeout_ms } => SyncError::Timeout { url, timeout_ms },
            FetchError::AllRoutesFailed { url, failures } => {
                SyncError::AllRoutesFailed { url, failures }
            }
            source => SyncError::Network {
                url: url.to_string(),
                source,
            },
        }
    }

    /// Maps a failed select-one so a missing feed surfaces as `NotFound`.
    pub(crate) fn from_feed_lookup(feed_id: &str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => SyncError::NotFound {
                feed_id: feed_id.to_string(),
            },
            other => SyncError::StoreRead(other),
        }
    }
}

/// One feed's failure inside a batch.
#[derive(Debug)]
pub struct FeedFailure {
    pub feed_id: String,
    pub error: SyncError,
}

/// Per-feed failures collected by a batch sync.
#[derive(Debug, Error)]
#[error("{} feed(s) failed to sync: {}", failures.len(), join_feed_failures(.failures))]
pub struct AggregateSyncError {
    pub failures: Vec<FeedFailure>,
}

fn join_routes(failures: &[RouteFailure]) -> String {
    failures
        .iter()
        .map(RouteFailure::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_feed_failures(failures: &[FeedFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.feed_id, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}
