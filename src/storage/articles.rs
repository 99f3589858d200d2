use anyhow::Result;
use sqlx::QueryBuilder;
use std::collections::HashSet;

use super::schema::Database;
use super::types::{Article, DatabaseError, NewArticle};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Bound-parameter ceiling per statement. Every chunked query stays under it.
pub const MAX_BOUND_PARAMS: usize = 100;

/// Columns bound per row by [`Database::insert_articles_batch`].
const ARTICLE_INSERT_COLUMNS: usize = 12;

/// Rows per multi-row INSERT so one statement never exceeds [`MAX_BOUND_PARAMS`].
pub const ARTICLE_INSERT_CHUNK: usize = MAX_BOUND_PARAMS / ARTICLE_INSERT_COLUMNS;

/// `IN (...)` lookups bind `source_id` plus one GUID each.
const GUID_LOOKUP_CHUNK: usize = MAX_BOUND_PARAMS - 1;

/// Maximum number of articles to return from any single listing (OOM protection)
const MAX_ARTICLES: i64 = 2000;

impl Database {
    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Returns the subset of `guids` already stored for `source_id`.
    ///
    /// PERF-001: Chunks the `IN (...)` list to stay under the bound-parameter ceiling.
    pub async fn existing_guids(&self, source_id: i64, guids: &[String]) -> Result<HashSet<String>> {
        let mut existing = HashSet::new();
        if guids.is_empty() {
            return Ok(existing);
        }

        for chunk in guids.chunks(GUID_LOOKUP_CHUNK) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("SELECT guid FROM articles WHERE source_id = ");
            builder.push_bind(source_id);
            builder.push(" AND guid IN (");

            let mut separated = builder.separated(", ");
            for guid in chunk {
                separated.push_bind(guid);
            }
            separated.push_unseparated(")");

            let rows: Vec<(String,)> = builder.build_query_as().fetch_all(&self.pool).await?;
            existing.extend(rows.into_iter().map(|(guid,)| guid));
        }

        Ok(existing)
    }

    /// Insert articles through multi-row INSERTs inside one transaction.
    ///
    /// This is a plain INSERT: any conflicting row fails the whole call and
    /// nothing is written, so callers can fall back to [`Database::insert_article`]
    /// row by row. Returns the number of rows inserted.
    pub async fn insert_articles_batch(
        &self,
        source_id: i64,
        articles: &[NewArticle],
        created_at: i64,
    ) -> Result<usize, DatabaseError> {
        if articles.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for chunk in articles.chunks(ARTICLE_INSERT_CHUNK) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO articles (source_id, guid, title, link, content, description, \
                 author, image_url, audio_url, comment_link, published_at, created_at) ",
            );

            builder.push_values(chunk, |mut b, article| {
                b.push_bind(source_id)
                    .push_bind(&article.guid)
                    .push_bind(&article.title)
                    .push_bind(&article.link)
                    .push_bind(&article.content)
                    .push_bind(&article.description)
                    .push_bind(&article.author)
                    .push_bind(&article.image_url)
                    .push_bind(&article.audio_url)
                    .push_bind(&article.comment_link)
                    .push_bind(article.published_at)
                    .push_bind(created_at);
            });

            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Insert a single article. Fails on a duplicate `(source_id, guid)`.
    pub async fn insert_article(
        &self,
        source_id: i64,
        article: &NewArticle,
        created_at: i64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO articles (source_id, guid, title, link, content, description, \
             author, image_url, audio_url, comment_link, published_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(source_id)
        .bind(&article.guid)
        .bind(&article.title)
        .bind(&article.link)
        .bind(&article.content)
        .bind(&article.description)
        .bind(&article.author)
        .bind(&article.image_url)
        .bind(&article.audio_url)
        .bind(&article.comment_link)
        .bind(article.published_at)
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Articles for a source, newest first.
    pub async fn get_articles_for_source(&self, source_id: i64, limit: Option<i64>) -> Result<Vec<Article>> {
        let limit = limit.unwrap_or(500).min(MAX_ARTICLES);
        let articles = sqlx::query_as::<_, Article>(
            "SELECT id, source_id, guid, title, link, content, description, author, image_url, \
             audio_url, comment_link, published_at, created_at
             FROM articles WHERE source_id = ?
             ORDER BY published_at DESC, id DESC
             LIMIT ?",
        )
        .bind(source_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    pub async fn count_articles(&self, source_id: i64) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{ARTICLE_INSERT_CHUNK, MAX_BOUND_PARAMS};
    use crate::storage::{Database, NewArticle};
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_article(guid: &str) -> NewArticle {
        NewArticle {
            guid: guid.to_string(),
            title: format!("Title {guid}"),
            link: Some(format!("https://example.com/{guid}")),
            content: "Body".to_string(),
            description: "Summary".to_string(),
            author: None,
            image_url: None,
            audio_url: None,
            comment_link: None,
            published_at: 1_704_067_200,
        }
    }

    #[test]
    fn test_insert_chunk_fits_parameter_ceiling() {
        assert!(ARTICLE_INSERT_CHUNK >= 1);
        assert!(ARTICLE_INSERT_CHUNK * 12 <= MAX_BOUND_PARAMS);
    }

    #[tokio::test]
    async fn test_batch_insert_across_chunks() {
        let db = test_db().await;
        let source = db.insert_source("https://a.example.com/rss", "A").await.unwrap();

        let articles: Vec<NewArticle> = (0..25).map(|i| test_article(&format!("g{i}"))).collect();
        let inserted = db.insert_articles_batch(source, &articles, 1).await.unwrap();
        assert_eq!(inserted, 25);
        assert_eq!(db.count_articles(source).await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_batch_insert_is_all_or_nothing() {
        let db = test_db().await;
        let source = db.insert_source("https://a.example.com/rss", "A").await.unwrap();
        db.insert_article(source, &test_article("dup"), 1).await.unwrap();

        let batch = vec![test_article("new-1"), test_article("dup"), test_article("new-2")];
        assert!(db.insert_articles_batch(source, &batch, 1).await.is_err());
        assert_eq!(db.count_articles(source).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_guid_allowed_across_sources() {
        let db = test_db().await;
        let a = db.insert_source("https://a.example.com/rss", "A").await.unwrap();
        let b = db.insert_source("https://b.example.com/rss", "B").await.unwrap();

        db.insert_article(a, &test_article("shared-guid-123"), 1).await.unwrap();
        db.insert_article(b, &test_article("shared-guid-123"), 1).await.unwrap();
        assert!(db.insert_article(a, &test_article("shared-guid-123"), 1).await.is_err());

        assert_eq!(db.count_articles(a).await.unwrap(), 1);
        assert_eq!(db.count_articles(b).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_existing_guids_chunks_large_lists() {
        let db = test_db().await;
        let source = db.insert_source("https://a.example.com/rss", "A").await.unwrap();
        let stored: Vec<NewArticle> = (0..150).step_by(3).map(|i| test_article(&format!("g{i}"))).collect();
        db.insert_articles_batch(source, &stored, 1).await.unwrap();

        let candidates: Vec<String> = (0..250).map(|i| format!("g{i}")).collect();
        let existing = db.existing_guids(source, &candidates).await.unwrap();
        assert_eq!(existing.len(), 50);
        assert!(existing.contains("g0"));
        assert!(existing.contains("g147"));
        assert!(!existing.contains("g1"));
    }

    #[tokio::test]
    async fn test_existing_guids_scoped_to_source() {
        let db = test_db().await;
        let a = db.insert_source("https://a.example.com/rss", "A").await.unwrap();
        let b = db.insert_source("https://b.example.com/rss", "B").await.unwrap();
        db.insert_article(a, &test_article("only-a"), 1).await.unwrap();

        let guids = vec!["only-a".to_string()];
        assert_eq!(db.existing_guids(a, &guids).await.unwrap().len(), 1);
        assert!(db.existing_guids(b, &guids).await.unwrap().is_empty());
        assert!(db.existing_guids(a, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_articles_for_source_newest_first() {
        let db = test_db().await;
        let source = db.insert_source("https://a.example.com/rss", "A").await.unwrap();
        let mut old = test_article("old");
        old.published_at = 100;
        let mut new = test_article("new");
        new.published_at = 200;
        db.insert_articles_batch(source, &[old, new], 1).await.unwrap();

        let articles = db.get_articles_for_source(source, None).await.unwrap();
        let guids: Vec<&str> = articles.iter().map(|a| a.guid.as_str()).collect();
        assert_eq!(guids, vec!["new", "old"]);
    }
}
