use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

// SQLite primary result codes (extended codes carry these in the low byte)
const SQLITE_PERM: i32 = 3;
const SQLITE_READONLY: i32 = 8;
const SQLITE_CONSTRAINT: i32 = 19;
const SQLITE_AUTH: i32 = 23;

/// Errors reported by a [`FeedStore`](super::FeedStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// No row matched (select-one on a missing id)
    #[error("{what} not found")]
    NotFound { what: String },

    /// Some rows were rejected by the primary-key constraint. The remaining
    /// rows of the same call were committed.
    #[error("{} row(s) already exist", conflicting.len())]
    DuplicateKey { conflicting: Vec<String> },

    /// The backend refused the write for the current principal
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No authenticated principal is available
    #[error("No authenticated principal")]
    Unauthenticated,

    /// Another process holds the database lock
    #[error("Another feedsync process appears to hold the database. Please close it and try again.")]
    Locked,

    /// A stored row violates an invariant (e.g. both or neither owner column set)
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Backend(#[from] sqlx::Error),
}

impl StoreError {
    /// Classifies a sqlx error by its SQLite result code.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let primary = db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);

            match primary {
                Some(SQLITE_READONLY | SQLITE_AUTH | SQLITE_PERM) => {
                    return StoreError::PermissionDenied(db_err.message().to_string());
                }
                Some(SQLITE_CONSTRAINT) if db_err.is_unique_violation() => {
                    return StoreError::DuplicateKey {
                        conflicting: Vec::new(),
                    };
                }
                _ => {}
            }
        }

        let error_string = err.to_string().to_lowercase();
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
        {
            return StoreError::Locked;
        }

        StoreError::Backend(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Who a feed (and every entry copied from it) belongs to. Exactly one owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ownership {
    User(String),
    Group(String),
}

impl Ownership {
    /// `(owner_user_id, group_id)` column values
    pub(crate) fn columns(&self) -> (Option<&str>, Option<&str>) {
        match self {
            Ownership::User(user) => (Some(user.as_str()), None),
            Ownership::Group(group) => (None, Some(group.as_str())),
        }
    }

    pub(crate) fn from_columns(
        owner_user_id: Option<String>,
        group_id: Option<String>,
    ) -> Result<Self, StoreError> {
        match (owner_user_id, group_id) {
            (Some(user), None) => Ok(Ownership::User(user)),
            (None, Some(group)) => Ok(Ownership::Group(group)),
            (Some(_), Some(_)) => Err(StoreError::Corrupt(
                "row has both owner_user_id and group_id".to_string(),
            )),
            (None, None) => Err(StoreError::Corrupt(
                "row has neither owner_user_id nor group_id".to_string(),
            )),
        }
    }
}

impl std::fmt::Display for Ownership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ownership::User(user) => write!(f, "user:{user}"),
            Ownership::Group(group) => write!(f, "group:{group}"),
        }
    }
}

/// A subscribed feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub id: String,
    pub url: String,
    /// Channel/feed title captured at subscription time
    pub title: String,
    pub integration_name: String,
    pub integration_alias: Option<String>,
    /// Unix seconds of the last successful sync
    pub last_fetched: Option<i64>,
    pub ownership: Ownership,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A stored feed entry. Created once by the sync pipeline, never updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub id: String,
    pub feed_id: String,
    pub title: String,
    pub link: String,
    pub content: String,
    pub content_snippet: String,
    /// RFC 3339 when the source date parsed, the source text otherwise
    pub pub_date: String,
    pub integration_name: String,
    pub integration_alias: Option<String>,
    pub ownership: Ownership,
    pub created_at: i64,
}

/// Filters and window for [`FeedStore::entries`](super::FeedStore::entries).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryQuery {
    pub ownership: Ownership,
    pub feed_id: Option<String>,
    /// Case-insensitive substring match over title and content
    pub search: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl EntryQuery {
    pub const DEFAULT_LIMIT: u32 = 50;

    pub fn new(ownership: Ownership) -> Self {
        Self {
            ownership,
            feed_id: None,
            search: None,
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// One page of the unified listing.
#[derive(Debug, Clone, Default)]
pub struct EntryPage {
    pub entries: Vec<FeedEntry>,
    /// Matching rows across all pages
    pub total: u64,
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: String,
    pub url: String,
    pub title: String,
    pub integration_name: String,
    pub integration_alias: Option<String>,
    pub last_fetched: Option<i64>,
    pub owner_user_id: Option<String>,
    pub group_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self) -> Result<FeedSource, StoreError> {
        Ok(FeedSource {
            ownership: Ownership::from_columns(self.owner_user_id, self.group_id)?,
            id: self.id,
            url: self.url,
            title: self.title,
            integration_name: self.integration_name,
            integration_alias: self.integration_alias,
            last_fetched: self.last_fetched,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryDbRow {
    pub id: String,
    pub feed_id: String,
    pub title: String,
    pub link: String,
    pub content: String,
    pub content_snippet: String,
    pub pub_date: String,
    pub integration_name: String,
    pub integration_alias: Option<String>,
    pub owner_user_id: Option<String>,
    pub group_id: Option<String>,
    pub created_at: i64,
}

impl EntryDbRow {
    pub(crate) fn into_entry(self) -> Result<FeedEntry, StoreError> {
        Ok(FeedEntry {
            ownership: Ownership::from_columns(self.owner_user_id, self.group_id)?,
            id: self.id,
            feed_id: self.feed_id,
            title: self.title,
            link: self.link,
            content: self.content,
            content_snippet: self.content_snippet,
            pub_date: self.pub_date,
            integration_name: self.integration_name,
            integration_alias: self.integration_alias,
            created_at: self.created_at,
        })
    }
}
