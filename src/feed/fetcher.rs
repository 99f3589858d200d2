use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use super::extract::{extract_article, resolve_guid, scrape_og_image};
use super::http::{fetch_body, is_feed_content_type, FEED_ACCEPT};
use super::parser::{parse_feed, FeedFormat, ParseError, ParsedFeed};
use super::settings::IngestSettings;
use crate::storage::{BlockedDomain, Database, NewArticle, SourceMetadata, ARTICLE_INSERT_CHUNK};
use crate::telemetry::Telemetry;
use crate::util::{extract_domain, is_domain_blocked, strip_control_chars};

/// Errors that can occur during feed fetching operations.
///
/// These errors cover the full lifecycle of a fetch: network issues,
/// HTTP errors, parsing failures, and database problems.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Body could not be parsed as RSS, Atom, RDF or JSON Feed
    #[error("Parse error: {message}")]
    Parse {
        message: String,
        /// Leading bytes of the body, for diagnosing HTML error pages and the like
        sample: Option<String>,
    },
    /// Database operation failed during article storage
    #[error("Database error: {0}")]
    Database(String),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl From<ParseError> for FetchError {
    fn from(e: ParseError) -> Self {
        FetchError::Parse {
            sample: e.sample().map(str::to_owned),
            message: e.to_string(),
        }
    }
}

impl FetchError {
    /// Short label for metrics tags.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network",
            FetchError::HttpStatus(_) => "http_status",
            FetchError::Timeout => "timeout",
            FetchError::Parse { .. } => "parse",
            FetchError::Database(_) => "database",
            FetchError::ResponseTooLarge => "too_large",
            FetchError::IncompleteResponse { .. } => "incomplete",
        }
    }
}

/// Outcome of one successful single-feed fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchSingleResult {
    pub articles_added: usize,
    /// Items without a GUID, already stored, repeated within the feed,
    /// unextractable, or rejected on insert
    pub articles_skipped: usize,
    /// Whether source metadata was written back
    pub source_updated: bool,
}

/// A fetched and parsed feed that was not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct FeedPreview {
    /// Feed URL after redirects
    pub url: String,
    pub format: FeedFormat,
    pub title: Option<String>,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub icon_url: Option<String>,
    pub articles: Vec<NewArticle>,
}

/// Fetches feeds and stores their new items.
///
/// Cloning is cheap: the database pool and HTTP client are reference counted.
#[derive(Clone)]
pub struct Ingestor {
    db: Database,
    client: reqwest::Client,
    telemetry: Telemetry,
    settings: IngestSettings,
}

impl Ingestor {
    pub fn new(db: Database, client: reqwest::Client, settings: IngestSettings) -> Self {
        Self {
            db,
            client,
            telemetry: Telemetry::disabled(),
            settings,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Fetches one source and stores the items not seen before.
    ///
    /// `cached_blocked` lets batch callers load the blocklist once; when
    /// `None` it is read from the database.
    ///
    /// A blocked source returns an all-zero result without any network
    /// request. Fetch and parse failures are recorded on the source and
    /// returned; everything after parsing degrades per item.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`] - Connection or TLS errors
    /// - [`FetchError::Timeout`] - Request exceeded the fetch timeout
    /// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
    /// - [`FetchError::ResponseTooLarge`] - Response exceeded the body limit
    /// - [`FetchError::Parse`] - Not a recognizable feed
    /// - [`FetchError::Database`] - The existing-GUID lookup failed
    pub async fn fetch_single_feed(
        &self,
        source_id: i64,
        url: &str,
        cached_blocked: Option<&[BlockedDomain]>,
    ) -> Result<FetchSingleResult, FetchError> {
        self.fetch_source(source_id, url, cached_blocked, self.settings.fetch_og_images)
            .await
    }

    /// Single-feed fetch with the Open Graph fallback chosen by the caller.
    /// Batch runs pass `false` to save a page request per imageless item.
    pub(crate) async fn fetch_source(
        &self,
        source_id: i64,
        url: &str,
        cached_blocked: Option<&[BlockedDomain]>,
        scrape_images: bool,
    ) -> Result<FetchSingleResult, FetchError> {
        self.telemetry
            .span("feed.fetch_single", async {
                self.telemetry.breadcrumb("feed", &format!("fetching source {source_id}"));
                let now = Utc::now().timestamp();

                if self.is_blocked(source_id, url, cached_blocked).await {
                    tracing::info!(source_id, url = %url, "Source domain is blocked, skipping");
                    self.telemetry.increment("feeds.blocked", &[]);
                    // Stamp so the source rotates out of the head of the batch
                    if let Err(e) = self.db.touch_source(source_id, now).await {
                        tracing::warn!(source_id, error = %e, "Failed to stamp blocked source");
                    }
                    return Ok(FetchSingleResult::default());
                }

                let (_, parsed) = match self.download(url).await {
                    Ok(downloaded) => downloaded,
                    Err(e) => {
                        self.record_failure(source_id, url, &e, now).await;
                        return Err(e);
                    }
                };

                let result = self.store(source_id, &parsed, now, scrape_images).await;
                match &result {
                    Ok(r) => {
                        self.telemetry.increment("feeds.fetch", &[("status", "ok")]);
                        self.telemetry.counter("articles.added", r.articles_added as u64, &[]);
                        self.telemetry.counter("articles.skipped", r.articles_skipped as u64, &[]);
                        tracing::debug!(
                            source_id,
                            added = r.articles_added,
                            skipped = r.articles_skipped,
                            "Feed fetched"
                        );
                    }
                    Err(e) => self.capture(source_id, e),
                }
                result
            })
            .await
    }

    /// Fetches and parses a feed without touching the database.
    pub async fn fetch_and_parse_feed(&self, url: &str) -> Result<FeedPreview, FetchError> {
        let (final_url, parsed) = self.download(url).await?;
        let now = Utc::now().timestamp();

        let mut seen = HashSet::new();
        let articles = parsed
            .feed
            .entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                let guid = resolve_guid(entry, parsed.extras(index), parsed.format, 0)?;
                if !seen.insert(guid.clone()) {
                    return None;
                }
                extract_article(&parsed, index, guid, self.settings.description_max_chars, now).ok()
            })
            .collect();

        let metadata = source_metadata(&parsed);
        Ok(FeedPreview {
            url: final_url,
            format: parsed.format,
            title: metadata.title,
            description: metadata.description,
            site_url: metadata.site_url,
            icon_url: metadata.icon_url,
            articles,
        })
    }

    // ========================================================================
    // Stages
    // ========================================================================

    /// Blocklist gate. Any storage problem lets the fetch through.
    async fn is_blocked(
        &self,
        source_id: i64,
        url: &str,
        cached_blocked: Option<&[BlockedDomain]>,
    ) -> bool {
        let Some(domain) = extract_domain(url) else {
            return false;
        };

        match self.db.has_elevated_subscriber(source_id).await {
            Ok(true) => {
                tracing::debug!(source_id, "Elevated subscriber, blocklist bypassed");
                return false;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(source_id, error = %e, "Failed to read subscriber plans");
            }
        }

        let fresh;
        let blocked = match cached_blocked {
            Some(list) => list,
            None => {
                fresh = self.db.get_blocked_domains().await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Failed to load blocklist, continuing without it");
                    Vec::new()
                });
                fresh.as_slice()
            }
        };

        is_domain_blocked(&domain, blocked, None)
    }

    async fn download(&self, url: &str) -> Result<(String, ParsedFeed), FetchError> {
        let body = fetch_body(
            &self.client,
            url,
            FEED_ACCEPT,
            &self.settings,
            self.settings.fetch_timeout,
        )
        .await?;

        if let Some(content_type) = body.content_type.as_deref() {
            if !is_feed_content_type(content_type) {
                tracing::warn!(url = %url, content_type, "Unexpected content type for feed");
            }
        }

        let parsed = parse_feed(&body.bytes, Some(&body.final_url))?;
        Ok((body.final_url, parsed))
    }

    async fn store(
        &self,
        source_id: i64,
        parsed: &ParsedFeed,
        now: i64,
        scrape_images: bool,
    ) -> Result<FetchSingleResult, FetchError> {
        let source_updated = match self
            .db
            .update_source_metadata(source_id, &source_metadata(parsed), now)
            .await
        {
            Ok(icon_changed) => {
                if icon_changed {
                    tracing::debug!(source_id, "Source icon refreshed");
                }
                true
            }
            Err(e) => {
                tracing::warn!(source_id, error = %e, "Failed to update source metadata");
                false
            }
        };

        let mut skipped = 0;
        let mut in_feed = HashSet::new();
        let mut candidates = Vec::with_capacity(parsed.feed.entries.len());
        for (index, entry) in parsed.feed.entries.iter().enumerate() {
            match resolve_guid(entry, parsed.extras(index), parsed.format, source_id) {
                Some(guid) if in_feed.insert(guid.clone()) => candidates.push((index, guid)),
                Some(guid) => {
                    tracing::debug!(source_id, guid = %guid, "Duplicate GUID within feed");
                    skipped += 1;
                }
                None => skipped += 1,
            }
        }

        let guids: Vec<String> = candidates.iter().map(|(_, guid)| guid.clone()).collect();
        let existing = self
            .db
            .existing_guids(source_id, &guids)
            .await
            .map_err(|e| FetchError::Database(e.to_string()))?;

        // Only new GUIDs pay for extraction
        let mut articles = Vec::new();
        for (index, guid) in candidates {
            if existing.contains(&guid) {
                skipped += 1;
                continue;
            }

            match extract_article(parsed, index, guid, self.settings.description_max_chars, now) {
                Ok(mut article) => {
                    if scrape_images && article.image_url.is_none() {
                        if let Some(link) = article.link.as_deref() {
                            article.image_url =
                                scrape_og_image(&self.client, link, &self.settings, &self.telemetry)
                                    .await;
                        }
                    }
                    articles.push(article);
                }
                Err(e) => {
                    tracing::debug!(source_id, index, error = %e, "Skipping item");
                    skipped += 1;
                }
            }
        }

        let (added, rejected) = self.persist(source_id, &articles, now).await;

        Ok(FetchSingleResult {
            articles_added: added,
            articles_skipped: skipped + rejected,
            source_updated,
        })
    }

    /// Inserts in chunks; a failed chunk is retried row by row.
    /// Returns `(inserted, rejected)`.
    async fn persist(&self, source_id: i64, articles: &[NewArticle], now: i64) -> (usize, usize) {
        let mut inserted = 0;
        let mut rejected = 0;

        for chunk in articles.chunks(ARTICLE_INSERT_CHUNK) {
            match self.db.insert_articles_batch(source_id, chunk, now).await {
                Ok(n) => inserted += n,
                Err(e) => {
                    tracing::warn!(
                        source_id,
                        rows = chunk.len(),
                        error = %e,
                        "Batch insert failed, falling back to row inserts"
                    );
                    for article in chunk {
                        match self.db.insert_article(source_id, article, now).await {
                            Ok(()) => inserted += 1,
                            Err(e) => {
                                tracing::debug!(source_id, guid = %article.guid, error = %e, "Row insert rejected");
                                rejected += 1;
                            }
                        }
                    }
                }
            }
        }

        (inserted, rejected)
    }

    async fn record_failure(&self, source_id: i64, url: &str, error: &FetchError, now: i64) {
        match self
            .db
            .record_fetch_failure(source_id, &error.to_string(), now)
            .await
        {
            Ok(failures) => {
                tracing::warn!(source_id, url = %url, failures, error = %error, "Feed fetch failed");
            }
            Err(db_err) => {
                tracing::warn!(source_id, error = %db_err, "Failed to record fetch failure");
            }
        }
        self.capture(source_id, error);
    }

    fn capture(&self, source_id: i64, error: &FetchError) {
        let id = source_id.to_string();
        self.telemetry
            .capture(error, &[("source_id", id.as_str()), ("kind", error.kind())]);
        self.telemetry
            .increment("feeds.fetch", &[("status", "error"), ("kind", error.kind())]);
    }
}

fn source_metadata(parsed: &ParsedFeed) -> SourceMetadata {
    SourceMetadata {
        title: parsed.title().map(|t| strip_control_chars(t).into_owned()),
        description: parsed
            .description()
            .map(|d| strip_control_chars(d).into_owned()),
        site_url: parsed.site_url().map(str::to_owned),
        icon_url: parsed.icon_url().map(str::to_owned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::IconType;
    use crate::telemetry::InMemoryMetrics;
    use crate::util::Plan;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Test Feed</title>
    <link>https://example.com/</link>
    <description>Testing</description>
    <item><guid>1</guid><title>First</title><link>https://example.com/1</link></item>
    <item><guid>2</guid><title>Second</title><link>https://example.com/2</link></item>
</channel></rss>"#;

    async fn setup(url: &str) -> (Ingestor, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let source_id = db.insert_source(url, "Placeholder").await.unwrap();
        let ingestor = Ingestor::new(db, reqwest::Client::new(), IngestSettings::default());
        (ingestor, source_id)
    }

    async fn serve(server: &MockServer, body: &str) {
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(body)
                    .insert_header("Content-Type", "application/rss+xml"),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetch_success_stores_articles_and_metadata() {
        let mock_server = MockServer::start().await;
        serve(&mock_server, VALID_RSS).await;

        let url = format!("{}/feed", mock_server.uri());
        let (ingestor, source_id) = setup(&url).await;

        let result = ingestor.fetch_single_feed(source_id, &url, None).await.unwrap();
        assert_eq!(
            result,
            FetchSingleResult {
                articles_added: 2,
                articles_skipped: 0,
                source_updated: true,
            }
        );

        let source = ingestor.db().get_source(source_id).await.unwrap().unwrap();
        assert_eq!(source.title, "Test Feed");
        assert_eq!(source.description.as_deref(), Some("Testing"));
        assert!(source.last_fetched.is_some());
        assert_eq!(ingestor.db().count_articles(source_id).await.unwrap(), 2);
    }

    fn new_article(guid: &str) -> NewArticle {
        NewArticle {
            guid: guid.to_string(),
            title: format!("Item {guid}"),
            link: Some(format!("https://example.com/{guid}")),
            content: String::new(),
            description: String::new(),
            author: None,
            image_url: None,
            audio_url: None,
            comment_link: None,
            published_at: 1_704_067_200,
        }
    }

    #[tokio::test]
    async fn test_conflicting_row_falls_back_to_row_inserts() {
        let (ingestor, source_id) = setup("https://example.com/feed").await;
        // Stored by a concurrent writer after the existing-GUID lookup
        ingestor
            .db()
            .insert_article(source_id, &new_article("b"), 1)
            .await
            .unwrap();

        let batch = vec![new_article("a"), new_article("b"), new_article("c")];
        let (inserted, rejected) = ingestor.persist(source_id, &batch, 2).await;
        assert_eq!((inserted, rejected), (2, 1));

        let mut guids: Vec<_> = ingestor
            .db()
            .get_articles_for_source(source_id, None)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.guid)
            .collect();
        guids.sort();
        assert_eq!(guids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_refetch_is_idempotent() {
        let mock_server = MockServer::start().await;
        serve(&mock_server, VALID_RSS).await;

        let url = format!("{}/feed", mock_server.uri());
        let (ingestor, source_id) = setup(&url).await;

        ingestor.fetch_single_feed(source_id, &url, None).await.unwrap();
        let second = ingestor.fetch_single_feed(source_id, &url, None).await.unwrap();

        assert_eq!(second.articles_added, 0);
        assert_eq!(second.articles_skipped, 2);
        assert_eq!(ingestor.db().count_articles(source_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_guid_within_feed_kept_once() {
        let mock_server = MockServer::start().await;
        serve(
            &mock_server,
            r#"<rss version="2.0"><channel><title>Dup</title>
                <item><guid>same</guid><title>A</title></item>
                <item><guid>same</guid><title>B</title></item>
            </channel></rss>"#,
        )
        .await;

        let url = format!("{}/feed", mock_server.uri());
        let (ingestor, source_id) = setup(&url).await;

        let result = ingestor.fetch_single_feed(source_id, &url, None).await.unwrap();
        assert_eq!(result.articles_added, 1);
        assert_eq!(result.articles_skipped, 1);

        let stored = ingestor.db().get_articles_for_source(source_id, None).await.unwrap();
        assert_eq!(stored[0].title, "A");
    }

    #[tokio::test]
    async fn test_404_recorded_on_source() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let (ingestor, source_id) = setup(&url).await;

        let result = ingestor.fetch_single_feed(source_id, &url, None).await;
        match result {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other),
        }

        let source = ingestor.db().get_source(source_id).await.unwrap().unwrap();
        assert_eq!(source.consecutive_failures, 1);
        assert!(source.last_error.unwrap().contains("404"));
        assert!(source.last_fetched.is_some());
    }

    #[tokio::test]
    async fn test_malformed_feed_parse_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>Not a feed</body></html>"))
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let (ingestor, source_id) = setup(&url).await;

        match ingestor.fetch_single_feed(source_id, &url, None).await {
            Err(FetchError::Parse { .. }) => {}
            other => panic!("Expected Parse error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_feed_success() {
        let mock_server = MockServer::start().await;
        serve(&mock_server, r#"<rss version="2.0"><channel><title>Empty</title></channel></rss>"#).await;

        let url = format!("{}/feed", mock_server.uri());
        let (ingestor, source_id) = setup(&url).await;

        let result = ingestor.fetch_single_feed(source_id, &url, None).await.unwrap();
        assert_eq!(result.articles_added, 0);
        assert_eq!(result.articles_skipped, 0);
        assert!(result.source_updated);
    }

    #[tokio::test]
    async fn test_blocked_domain_skips_network() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(0)
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let (ingestor, source_id) = setup(&url).await;
        ingestor.db().block_domain("127.0.0.1", Some("test")).await.unwrap();

        let result = ingestor.fetch_single_feed(source_id, &url, None).await.unwrap();
        assert_eq!(result, FetchSingleResult::default());

        let source = ingestor.db().get_source(source_id).await.unwrap().unwrap();
        assert!(source.last_fetched.is_some());
        assert_eq!(source.title, "Placeholder");
    }

    #[tokio::test]
    async fn test_cached_blocklist_is_used() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(0)
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let (ingestor, source_id) = setup(&url).await;
        let cached = vec![BlockedDomain {
            domain: "127.0.0.1".into(),
            reason: None,
        }];

        let result = ingestor
            .fetch_single_feed(source_id, &url, Some(cached.as_slice()))
            .await
            .unwrap();
        assert_eq!(result.articles_added, 0);
    }

    #[tokio::test]
    async fn test_enterprise_subscriber_bypasses_blocklist() {
        let mock_server = MockServer::start().await;
        serve(&mock_server, VALID_RSS).await;

        let url = format!("{}/feed", mock_server.uri());
        let (ingestor, source_id) = setup(&url).await;
        ingestor.db().block_domain("127.0.0.1", None).await.unwrap();
        let user = ingestor.db().add_user(Plan::Enterprise).await.unwrap();
        ingestor.db().subscribe(user, source_id).await.unwrap();

        let result = ingestor.fetch_single_feed(source_id, &url, None).await.unwrap();
        assert_eq!(result.articles_added, 2);
    }

    #[tokio::test]
    async fn test_missing_blocklist_table_fails_open() {
        let mock_server = MockServer::start().await;
        serve(&mock_server, VALID_RSS).await;

        let url = format!("{}/feed", mock_server.uri());
        let (ingestor, source_id) = setup(&url).await;
        sqlx::query("DROP TABLE blocked_domains")
            .execute(&ingestor.db().pool)
            .await
            .unwrap();

        let result = ingestor.fetch_single_feed(source_id, &url, None).await.unwrap();
        assert_eq!(result.articles_added, 2);
    }

    #[tokio::test]
    async fn test_custom_icon_not_overwritten() {
        let mock_server = MockServer::start().await;
        serve(
            &mock_server,
            r#"<rss version="2.0"><channel><title>Icons</title>
                <image><url>https://example.com/logo.png</url><title>Icons</title><link>https://example.com/</link></image>
            </channel></rss>"#,
        )
        .await;

        let url = format!("{}/feed", mock_server.uri());
        let (ingestor, source_id) = setup(&url).await;
        ingestor
            .db()
            .set_source_icon(source_id, Some("https://mine.example/icon.png"), IconType::Custom)
            .await
            .unwrap();

        ingestor.fetch_single_feed(source_id, &url, None).await.unwrap();
        let source = ingestor.db().get_source(source_id).await.unwrap().unwrap();
        assert_eq!(source.icon_url.as_deref(), Some("https://mine.example/icon.png"));
    }

    #[tokio::test]
    async fn test_og_image_fallback_when_enabled() {
        let mock_server = MockServer::start().await;
        let feed = format!(
            r#"<rss version="2.0"><channel><title>OG</title>
                <item><guid>1</guid><title>Post</title><link>{}/post</link></item>
            </channel></rss>"#,
            mock_server.uri()
        );
        serve(&mock_server, &feed).await;
        Mock::given(method("GET"))
            .and(path("/post"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><head><meta property="og:image" content="/cover.jpg"></head></html>"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let db = Database::open(":memory:").await.unwrap();
        let source_id = db.insert_source(&url, "OG").await.unwrap();
        let settings = IngestSettings {
            fetch_og_images: true,
            ..Default::default()
        };
        let ingestor = Ingestor::new(db, reqwest::Client::new(), settings);

        ingestor.fetch_single_feed(source_id, &url, None).await.unwrap();
        let stored = ingestor.db().get_articles_for_source(source_id, None).await.unwrap();
        assert_eq!(
            stored[0].image_url.as_deref(),
            Some(format!("{}/cover.jpg", mock_server.uri()).as_str())
        );
    }

    #[tokio::test]
    async fn test_metrics_recorded() {
        let mock_server = MockServer::start().await;
        serve(&mock_server, VALID_RSS).await;

        let url = format!("{}/feed", mock_server.uri());
        let (ingestor, source_id) = setup(&url).await;
        let metrics = Arc::new(InMemoryMetrics::new());
        let ingestor = ingestor.with_telemetry(Telemetry::disabled().with_metrics(metrics.clone()));

        ingestor.fetch_single_feed(source_id, &url, None).await.unwrap();
        assert_eq!(metrics.counter_total("feeds.fetch"), 1);
        assert_eq!(metrics.counter_total("articles.added"), 2);
    }

    #[tokio::test]
    async fn test_preview_does_not_persist() {
        let mock_server = MockServer::start().await;
        serve(&mock_server, VALID_RSS).await;

        let url = format!("{}/feed", mock_server.uri());
        let (ingestor, source_id) = setup(&url).await;

        let preview = ingestor.fetch_and_parse_feed(&url).await.unwrap();
        assert_eq!(preview.format, FeedFormat::Rss);
        assert_eq!(preview.title.as_deref(), Some("Test Feed"));
        assert_eq!(preview.articles.len(), 2);
        assert_eq!(preview.articles[0].guid, "1");

        assert_eq!(ingestor.db().count_articles(source_id).await.unwrap(), 0);
        let source = ingestor.db().get_source(source_id).await.unwrap().unwrap();
        assert!(source.last_fetched.is_none());
    }
}
