use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::types::StoreError;

// ============================================================================
// Database
// ============================================================================

/// SQLite-backed [`FeedStore`](super::FeedStore).
///
/// The principal used for personal-scope operations is fixed at construction
/// (see [`Database::with_principal`]); this store has no session of its own.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    pub(crate) principal: Option<Arc<str>>,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `":memory:"` opens a private in-memory database (used by tests).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Locked` if another process holds the database
    /// lock, `StoreError::Migration` if the schema cannot be created.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        // SEC-010: Pre-create DB file with mode 0600 so entries are not world-readable
        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    tracing::warn!(path = %path, error = %e, "SEC-010: Failed to set database file permissions");
                }
            } else if db_path.parent().is_some_and(|p| p.as_os_str().is_empty() || p.exists()) {
                // If creation fails, SQLite reports the error at connect_with.
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok();
            }
        }

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        // A shared-cache in-memory database reports SQLITE_LOCKED instead of
        // waiting on busy_timeout, so memory databases get a single connection.
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        let db = Self {
            pool,
            principal: None,
        };
        db.migrate().await.map_err(|e| match StoreError::from_sqlx(e) {
            StoreError::Locked => StoreError::Locked,
            other => StoreError::Migration(other.to_string()),
        })?;
        Ok(db)
    }

    /// Sets the principal returned by `current_principal`.
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        let principal = principal.into();
        self.principal = if principal.trim().is_empty() {
            None
        } else {
            Some(Arc::from(principal))
        };
        self
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                title TEXT NOT NULL,
                integration_name TEXT NOT NULL,
                integration_alias TEXT,
                last_fetched INTEGER,
                owner_user_id TEXT,
                group_id TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                CHECK ((owner_user_id IS NULL) <> (group_id IS NULL))
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Entry ids are unique across the whole store; the primary key is the
        // only concurrency control between overlapping syncs.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id TEXT PRIMARY KEY,
                feed_id TEXT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                link TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                content_snippet TEXT NOT NULL DEFAULT '',
                pub_date TEXT NOT NULL,
                integration_name TEXT NOT NULL,
                integration_alias TEXT,
                created_at INTEGER NOT NULL,
                owner_user_id TEXT,
                group_id TEXT,
                CHECK ((owner_user_id IS NULL) <> (group_id IS NULL))
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_owner ON feeds(owner_user_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_group ON feeds(group_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_feed ON entries(feed_id)")
            .execute(&mut *tx)
            .await?;

        // Listing order: newest publication first, ingestion time as tie-breaker
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_owner_recent ON entries(owner_user_id, pub_date DESC, created_at DESC)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_group_recent ON entries(group_id, pub_date DESC, created_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
