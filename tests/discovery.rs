//! Integration tests for discovery: validator coalescing, registry runs and
//! blocklist matching.

use std::sync::Arc;
use std::time::Duration;

use feedmill::feed::{DiscoveryRegistry, FeedFormat, FeedValidator, IngestSettings};
use feedmill::util::{is_domain_blocked, truncate_text, Plan, TRUNCATION_SUFFIX};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <id>urn:uuid:60a76c80-d399-11d9-b93C-0003939e0af6</id>
    <title>Example Atom</title>
    <subtitle>Things happen</subtitle>
    <updated>2024-01-01T00:00:00Z</updated>
    <link rel="alternate" href="https://example.org/"/>
</feed>"#;

#[tokio::test]
async fn test_concurrent_validations_make_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/atom.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(ATOM)
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let validator = Arc::new(FeedValidator::new(
        reqwest::Client::new(),
        IngestSettings::default(),
    ));
    let url = format!("{}/atom.xml", server.uri());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let validator = Arc::clone(&validator);
            let url = url.clone();
            tokio::spawn(async move { validator.validate(&url).await })
        })
        .collect();

    let mut found = 0;
    for handle in handles {
        if let Some(feed) = handle.await.unwrap() {
            assert_eq!(feed.feed_type, FeedFormat::Atom);
            assert_eq!(feed.description.as_deref(), Some("Things happen"));
            found += 1;
        }
    }
    assert!(found >= 1);
}

#[tokio::test]
async fn test_registry_finds_linked_feed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><head><link rel="alternate" type="application/atom+xml" title="News" href="/news.atom"></head></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/news.atom"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ATOM))
        .expect(1)
        .mount(&server)
        .await;

    let registry = DiscoveryRegistry::new(reqwest::Client::new(), IngestSettings::default());
    let feeds = registry.discover(&server.uri()).await.unwrap();

    assert_eq!(feeds.len(), 1);
    assert_eq!(feeds[0].url, format!("{}/news.atom", server.uri()));
    assert_eq!(feeds[0].title, "Example Atom");
}

#[tokio::test]
async fn test_discovery_requests_input_page_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blog"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><head><title>Blog</title></head><body>No feeds</body></html>")
                .insert_header("Content-Type", "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let registry = DiscoveryRegistry::new(reqwest::Client::new(), IngestSettings::default());
    let feeds = registry
        .discover(&format!("{}/blog", server.uri()))
        .await
        .unwrap();

    assert!(feeds.is_empty());
}

#[test]
fn test_blocklist_matching() {
    assert!(is_domain_blocked("sub.example.com", &["example.com"], None));
    assert!(!is_domain_blocked("x.com", &["example.com"], Some(Plan::Enterprise)));
    assert!(!is_domain_blocked("example.com", &["example.com"], Some(Plan::Enterprise)));
    assert!(is_domain_blocked("example.com", &["example.com"], Some(Plan::Pro)));
    assert!(is_domain_blocked("a.b.example.com", &["*.example.com"], None));
}

#[test]
fn test_truncate_text_prefers_word_boundary() {
    let text = "Hello World and more text here";
    let out = truncate_text(text, 28, TRUNCATION_SUFFIX);
    assert!(out.ends_with(TRUNCATION_SUFFIX));
    assert!(out.chars().count() <= 28);
    let body = out.trim_end_matches(TRUNCATION_SUFFIX);
    assert!(text.starts_with(body));
    assert!(!body.ends_with(' '));
    assert_eq!(text.as_bytes().get(body.len()), Some(&b' '));
}
