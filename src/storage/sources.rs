use anyhow::Result;

use super::schema::Database;
use super::types::{DatabaseError, IconType, Source, SourceDbRow, SourceMetadata};

const SOURCE_COLUMNS: &str = "id, url, title, description, site_url, icon_url, icon_type, \
                              last_fetched, last_error, consecutive_failures";

impl Database {
    // ========================================================================
    // Source Operations
    // ========================================================================

    /// Insert a source, or return the id of the existing source with this URL.
    pub async fn insert_source(&self, url: &str, title: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO sources (url, title) VALUES (?, ?)
             ON CONFLICT(url) DO UPDATE SET url = excluded.url
             RETURNING id",
        )
        .bind(url)
        .bind(title)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn get_source(&self, source_id: i64) -> Result<Option<Source>> {
        let row: Option<SourceDbRow> =
            sqlx::query_as(&format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?"))
                .bind(source_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(SourceDbRow::into_source))
    }

    pub async fn get_source_by_url(&self, url: &str) -> Result<Option<Source>> {
        let row: Option<SourceDbRow> =
            sqlx::query_as(&format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE url = ?"))
                .bind(url)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(SourceDbRow::into_source))
    }

    /// Select the sources due for a fetch, least recently fetched first.
    ///
    /// Never-fetched sources always sort ahead of fetched ones. With a
    /// `cutoff` (unix seconds), sources fetched after it are excluded;
    /// never-fetched sources are always included.
    pub async fn get_stale_sources(&self, cutoff: Option<i64>, limit: usize) -> Result<Vec<Source>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<SourceDbRow> = sqlx::query_as(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources
             WHERE ? IS NULL OR last_fetched IS NULL OR last_fetched <= ?
             ORDER BY last_fetched ASC NULLS FIRST, id ASC
             LIMIT ?"
        ))
        .bind(cutoff)
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SourceDbRow::into_source).collect())
    }

    /// Write feed metadata after a successful fetch.
    ///
    /// Title, description and site URL are replaced when present. The icon is
    /// replaced only when the stored icon type is `auto` and the URL differs.
    /// `last_fetched` is stamped and the failure state is cleared.
    ///
    /// Returns whether the icon changed.
    pub async fn update_source_metadata(
        &self,
        source_id: i64,
        metadata: &SourceMetadata,
        fetched_at: i64,
    ) -> Result<bool, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(String, Option<String>)> =
            sqlx::query_as("SELECT icon_type, icon_url FROM sources WHERE id = ?")
                .bind(source_id)
                .fetch_optional(&mut *tx)
                .await?;

        let icon_changed = match (&current, &metadata.icon_url) {
            (Some((icon_type, stored)), Some(discovered)) => {
                icon_type == IconType::Auto.as_str() && stored.as_deref() != Some(discovered.as_str())
            }
            _ => false,
        };

        sqlx::query(
            "UPDATE sources SET
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                site_url = COALESCE(?, site_url),
                last_fetched = ?,
                last_error = NULL,
                consecutive_failures = 0
             WHERE id = ?",
        )
        .bind(metadata.title.as_deref().filter(|t| !t.is_empty()))
        .bind(metadata.description.as_deref().filter(|d| !d.is_empty()))
        .bind(metadata.site_url.as_deref())
        .bind(fetched_at)
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

        if icon_changed {
            sqlx::query("UPDATE sources SET icon_url = ? WHERE id = ?")
                .bind(metadata.icon_url.as_deref())
                .bind(source_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(icon_changed)
    }

    /// Stamp `last_fetched` without touching anything else.
    ///
    /// Used for blocked sources so they rotate out of the head of the batch.
    pub async fn touch_source(&self, source_id: i64, fetched_at: i64) -> Result<()> {
        sqlx::query("UPDATE sources SET last_fetched = ? WHERE id = ?")
            .bind(fetched_at)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a failed fetch. Returns the new consecutive failure count.
    pub async fn record_fetch_failure(
        &self,
        source_id: i64,
        error: &str,
        fetched_at: i64,
    ) -> Result<i64, DatabaseError> {
        let result: (i64,) = sqlx::query_as(
            "UPDATE sources SET
                last_error = ?,
                last_fetched = ?,
                consecutive_failures = consecutive_failures + 1
             WHERE id = ? RETURNING consecutive_failures",
        )
        .bind(error)
        .bind(fetched_at)
        .bind(source_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(result.0)
    }

    /// Set the icon explicitly, e.g. a user-chosen custom icon.
    pub async fn set_source_icon(
        &self,
        source_id: i64,
        icon_url: Option<&str>,
        icon_type: IconType,
    ) -> Result<()> {
        sqlx::query("UPDATE sources SET icon_url = ?, icon_type = ? WHERE id = ?")
            .bind(icon_url)
            .bind(icon_type.as_str())
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
