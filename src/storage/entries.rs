use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashSet;

use super::schema::Database;
use super::types::{EntryDbRow, EntryPage, EntryQuery, FeedEntry, Ownership, StoreError};

/// 12 bound columns per row keeps a batch far below SQLite's variable limit
const BATCH_SIZE: usize = 50;

/// Upper bound on a single listing page (OOM protection)
const MAX_PAGE_SIZE: u32 = 500;

const ENTRY_COLUMNS: &str = "id, feed_id, title, link, content, content_snippet, pub_date, \
                             integration_name, integration_alias, owner_user_id, group_id, created_at";

impl Database {
    // ========================================================================
    // Entry Operations
    // ========================================================================

    pub async fn get_entry_ids(&self, feed_id: &str) -> Result<HashSet<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM entries WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Batch insert in one transaction, skipping rows whose id already exists.
    ///
    /// Returns `DuplicateKey` listing the skipped ids when any row conflicted;
    /// the non-conflicting rows are committed either way.
    pub async fn insert_entry_batch(&self, entries: &[FeedEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;
        let mut inserted: HashSet<String> = HashSet::with_capacity(entries.len());

        for chunk in entries.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("INSERT OR IGNORE INTO entries ({ENTRY_COLUMNS}) "));

            builder.push_values(chunk, |mut b, entry| {
                let (owner_user_id, group_id) = entry.ownership.columns();
                b.push_bind(&entry.id)
                    .push_bind(&entry.feed_id)
                    .push_bind(&entry.title)
                    .push_bind(&entry.link)
                    .push_bind(&entry.content)
                    .push_bind(&entry.content_snippet)
                    .push_bind(&entry.pub_date)
                    .push_bind(&entry.integration_name)
                    .push_bind(&entry.integration_alias)
                    .push_bind(owner_user_id)
                    .push_bind(group_id)
                    .push_bind(entry.created_at);
            });
            builder.push(" RETURNING id");

            let rows: Vec<(String,)> = builder
                .build_query_as()
                .fetch_all(&mut *tx)
                .await
                .map_err(StoreError::from_sqlx)?;
            inserted.extend(rows.into_iter().map(|(id,)| id));
        }

        tx.commit().await.map_err(StoreError::from_sqlx)?;

        let conflicting: Vec<String> = entries
            .iter()
            .filter(|e| !inserted.contains(&e.id))
            .map(|e| e.id.clone())
            .collect();

        if conflicting.is_empty() {
            Ok(())
        } else {
            Err(StoreError::DuplicateKey { conflicting })
        }
    }

    /// One page of entries, newest publication first. Entries whose
    /// `pub_date` was kept verbatim sort by ingestion time instead.
    pub async fn get_entries_page(&self, query: &EntryQuery) -> Result<EntryPage, StoreError> {
        let mut count: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM entries");
        push_filters(&mut count, query);
        let (total,): (i64,) = count
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        let mut select: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {ENTRY_COLUMNS} FROM entries"));
        push_filters(&mut select, query);
        select.push(format!(" ORDER BY {SORT_DATE} DESC, created_at DESC, id LIMIT "));
        select.push_bind(i64::from(query.limit.min(MAX_PAGE_SIZE)));
        select.push(" OFFSET ");
        select.push_bind(i64::from(query.offset));

        let rows: Vec<EntryDbRow> = select
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        Ok(EntryPage {
            entries: rows
                .into_iter()
                .map(EntryDbRow::into_entry)
                .collect::<Result<_, _>>()?,
            total: total.max(0) as u64,
        })
    }
}

/// `pub_date` when it is normalized RFC 3339 UTC, else `created_at` in the
/// same format, so text dates never sort against timestamps.
const SORT_DATE: &str = "CASE WHEN pub_date GLOB \
     '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T[0-9][0-9]:[0-9][0-9]:[0-9][0-9]Z' \
     THEN pub_date ELSE strftime('%Y-%m-%dT%H:%M:%SZ', created_at, 'unixepoch') END";

fn push_filters<'a>(builder: &mut QueryBuilder<'a, Sqlite>, query: &'a EntryQuery) {
    match &query.ownership {
        Ownership::User(user) => builder.push(" WHERE owner_user_id = ").push_bind(user),
        Ownership::Group(group) => builder.push(" WHERE group_id = ").push_bind(group),
    };

    if let Some(feed_id) = &query.feed_id {
        builder.push(" AND feed_id = ").push_bind(feed_id);
    }

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", escape_like(search));
        builder
            .push(" AND (title LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR content LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

/// Escape LIKE wildcards so user search text matches literally
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
