use super::schema::Database;
use super::types::{FeedDbRow, FeedSource, Ownership, StoreError};

const FEED_COLUMNS: &str = "id, url, title, integration_name, integration_alias, last_fetched, \
                            owner_user_id, group_id, created_at, updated_at";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    pub async fn get_feed(&self, feed_id: &str) -> Result<FeedSource, StoreError> {
        let row: Option<FeedDbRow> =
            sqlx::query_as(&format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"))
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;

        row.ok_or_else(|| StoreError::NotFound {
            what: format!("feed {feed_id}"),
        })?
        .into_feed()
    }

    /// Feeds owned by `ownership`, oldest subscription first.
    pub async fn get_feeds_for(&self, ownership: &Ownership) -> Result<Vec<FeedSource>, StoreError> {
        let column = match ownership {
            Ownership::User(_) => "owner_user_id",
            Ownership::Group(_) => "group_id",
        };
        let owner = match ownership {
            Ownership::User(id) | Ownership::Group(id) => id.as_str(),
        };

        let rows: Vec<FeedDbRow> = sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE {column} = ? ORDER BY created_at, id"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        rows.into_iter().map(FeedDbRow::into_feed).collect()
    }

    pub async fn create_feed(&self, feed: &FeedSource) -> Result<(), StoreError> {
        let (owner_user_id, group_id) = feed.ownership.columns();
        sqlx::query(
            r#"
            INSERT INTO feeds (id, url, title, integration_name, integration_alias,
                               last_fetched, owner_user_id, group_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&feed.id)
        .bind(&feed.url)
        .bind(&feed.title)
        .bind(&feed.integration_name)
        .bind(&feed.integration_alias)
        .bind(feed.last_fetched)
        .bind(owner_user_id)
        .bind(group_id)
        .bind(feed.created_at)
        .bind(feed.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    pub async fn update_feed_name(
        &self,
        feed_id: &str,
        name: &str,
        alias: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE feeds SET integration_name = ?, integration_alias = ?, updated_at = ? WHERE id = ?",
        )
        .bind(name)
        .bind(alias)
        .bind(now)
        .bind(feed_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: format!("feed {feed_id}"),
            });
        }
        Ok(())
    }

    /// Update the last_fetched timestamp for a feed
    pub async fn update_feed_fetched(&self, feed_id: &str, at: i64) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE feeds SET last_fetched = ? WHERE id = ?")
            .bind(at)
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: format!("feed {feed_id}"),
            });
        }
        Ok(())
    }

    /// Delete a feed and its entries in one transaction.
    ///
    /// Entries are deleted explicitly rather than relying on `ON DELETE
    /// CASCADE` alone, so databases created with foreign keys off are cleaned
    /// up too.
    pub async fn delete_feed_cascade(&self, feed_id: &str) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        let removed = sqlx::query("DELETE FROM entries WHERE feed_id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_sqlx)?
            .rows_affected();

        let deleted = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_sqlx)?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await.map_err(StoreError::from_sqlx)?;
            return Err(StoreError::NotFound {
                what: format!("feed {feed_id}"),
            });
        }

        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(removed)
    }
}
