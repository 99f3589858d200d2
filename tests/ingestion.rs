//! Integration tests for ingestion: single-feed fetches, batch runs, staleness
//! and per-source deduplication.
//!
//! Each test creates its own in-memory SQLite database and mock HTTP server.

use std::time::Duration;

use feedmill::feed::{
    is_source_stale, FetchAllOptions, FetchError, IngestSettings, Ingestor, Pacer,
};
use feedmill::storage::Database;
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MINUTE: Duration = Duration::from_secs(60);

fn rss(title: &str, guids: &[&str]) -> String {
    let items: String = guids
        .iter()
        .map(|g| format!("<item><guid>{g}</guid><title>Item {g}</title><description>&lt;p&gt;Body of {g}&lt;/p&gt;</description></item>"))
        .collect();
    format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>{title}</title><link>https://example.com/</link>{items}</channel></rss>"#)
}

async fn mount_feed(server: &MockServer, at: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("Content-Type", "application/rss+xml"),
        )
        .mount(server)
        .await;
}

async fn ingestor() -> Ingestor {
    let db = Database::open(":memory:").await.unwrap();
    Ingestor::new(db, reqwest::Client::new(), IngestSettings::default())
}

fn quick_options() -> FetchAllOptions {
    FetchAllOptions {
        pacer: Pacer::new(Duration::ZERO, Duration::ZERO),
        ..Default::default()
    }
}

// ============================================================================
// Single-feed fetches
// ============================================================================

#[tokio::test]
async fn test_refetch_unchanged_feed_adds_nothing() {
    let server = MockServer::start().await;
    mount_feed(&server, "/feed", rss("Daily", &["a", "b", "c"])).await;

    let ingestor = ingestor().await;
    let url = format!("{}/feed", server.uri());
    let source_id = ingestor.db().insert_source(&url, "Daily").await.unwrap();

    let first = ingestor.fetch_single_feed(source_id, &url, None).await.unwrap();
    let second = ingestor.fetch_single_feed(source_id, &url, None).await.unwrap();

    assert_eq!(first.articles_added, 3);
    assert_eq!(second.articles_added, 0);
    assert_eq!(second.articles_skipped, first.articles_added);
}

#[tokio::test]
async fn test_same_guid_in_two_sources_stored_twice() {
    let server = MockServer::start().await;
    mount_feed(&server, "/one", rss("One", &["shared-guid-123"])).await;
    mount_feed(&server, "/two", rss("Two", &["shared-guid-123"])).await;

    let ingestor = ingestor().await;
    let mut total = 0;
    for name in ["one", "two"] {
        let url = format!("{}/{name}", server.uri());
        let id = ingestor.db().insert_source(&url, name).await.unwrap();
        let result = ingestor.fetch_single_feed(id, &url, None).await.unwrap();
        assert_eq!(result.articles_added, 1);
        total += ingestor.db().count_articles(id).await.unwrap();
    }

    assert_eq!(total, 2);
}

#[tokio::test]
async fn test_repeated_guid_within_feed_stored_once() {
    let server = MockServer::start().await;
    mount_feed(&server, "/feed", rss("Dup", &["x", "x"])).await;

    let ingestor = ingestor().await;
    let url = format!("{}/feed", server.uri());
    let id = ingestor.db().insert_source(&url, "Dup").await.unwrap();

    ingestor.fetch_single_feed(id, &url, None).await.unwrap();
    assert_eq!(ingestor.db().count_articles(id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_descriptions_are_sanitized() {
    let server = MockServer::start().await;
    mount_feed(&server, "/feed", rss("Html", &["a"])).await;

    let ingestor = ingestor().await;
    let url = format!("{}/feed", server.uri());
    let id = ingestor.db().insert_source(&url, "Html").await.unwrap();
    ingestor.fetch_single_feed(id, &url, None).await.unwrap();

    let articles = ingestor.db().get_articles_for_source(id, None).await.unwrap();
    assert_eq!(articles[0].title, "Item a");
    assert!(articles[0].description.contains("Body of a"));
    assert!(!articles[0].content.contains("<p>"));
}

#[tokio::test]
async fn test_more_items_than_one_insert_chunk() {
    let server = MockServer::start().await;
    let guids: Vec<String> = (0..250).map(|i| format!("item-{i}")).collect();
    let refs: Vec<&str> = guids.iter().map(String::as_str).collect();
    mount_feed(&server, "/feed", rss("Big", &refs)).await;

    let ingestor = ingestor().await;
    let url = format!("{}/feed", server.uri());
    let id = ingestor.db().insert_source(&url, "Big").await.unwrap();

    let first = ingestor.fetch_single_feed(id, &url, None).await.unwrap();
    assert_eq!(first.articles_added, 250);

    let second = ingestor.fetch_single_feed(id, &url, None).await.unwrap();
    assert_eq!(second.articles_skipped, 250);
}

// ============================================================================
// Batch runs
// ============================================================================

#[tokio::test]
async fn test_batch_with_one_failing_source() {
    let server = MockServer::start().await;
    mount_feed(&server, "/ok-1", rss("Ok 1", &["1"])).await;
    mount_feed(&server, "/ok-2", rss("Ok 2", &["2"])).await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let ingestor = ingestor().await;
    let mut ids = Vec::new();
    for name in ["ok-1", "gone", "ok-2"] {
        let url = format!("{}/{name}", server.uri());
        ids.push(ingestor.db().insert_source(&url, name).await.unwrap());
    }

    let result = ingestor.fetch_all_feeds(&quick_options()).await.unwrap();
    assert_eq!(result.success_count, 2);
    assert_eq!(result.error_count, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.total, 3);

    // Every source was attempted
    for id in ids {
        let source = ingestor.db().get_source(id).await.unwrap().unwrap();
        assert!(source.last_fetched.is_some());
    }
}

#[tokio::test]
async fn test_batch_respects_blocklist() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss("Blocked", &["1"])))
        .expect(0)
        .mount(&server)
        .await;

    let ingestor = ingestor().await;
    let url = format!("{}/feed", server.uri());
    let id = ingestor.db().insert_source(&url, "Blocked").await.unwrap();
    ingestor.db().block_domain("127.0.0.1", Some("spam")).await.unwrap();

    let result = ingestor.fetch_all_feeds(&quick_options()).await.unwrap();
    assert_eq!(result.success_count, 1);
    assert_eq!(ingestor.db().count_articles(id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_batch_error_is_typed_for_single_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let ingestor = ingestor().await;
    let url = format!("{}/feed", server.uri());
    let id = ingestor.db().insert_source(&url, "Down").await.unwrap();

    let err = ingestor.fetch_single_feed(id, &url, None).await.unwrap_err();
    assert!(matches!(err, FetchError::HttpStatus(503)));
}

// ============================================================================
// Staleness
// ============================================================================

#[tokio::test]
async fn test_stale_selection() {
    let ingestor = ingestor().await;
    let db = ingestor.db();
    let now = chrono::Utc::now().timestamp();

    let never = db.insert_source("https://example.com/never", "never").await.unwrap();
    let fresh = db.insert_source("https://example.com/fresh", "fresh").await.unwrap();
    let old = db.insert_source("https://example.com/old", "old").await.unwrap();
    db.touch_source(fresh, now - 5 * 60).await.unwrap();
    db.touch_source(old, now - 35 * 60).await.unwrap();

    let threshold = 30 * MINUTE;
    let cutoff = now - threshold.as_secs() as i64;
    let stale: Vec<i64> = db
        .get_stale_sources(Some(cutoff), 100)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(stale, vec![never, old]);

    assert!(is_source_stale(None, threshold, now));
    assert!(!is_source_stale(Some(now - 5 * 60), threshold, now));
    assert!(is_source_stale(Some(now - 35 * 60), threshold, now));
}
