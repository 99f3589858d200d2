//! Candidate feed validation with per-session deduplication.
//!
//! A [`FeedValidator`] is bound to one dedup scope: a set of normalized URLs
//! already seen and a set of Atom feed ids already seen. Every body it
//! downloads is keyed by normalized URL and shared, so a URL is requested at
//! most once per validator whether it is validated, scraped as a page, or
//! both.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;

use super::extract::DEFAULT_TITLE;
use super::http::{fetch_body, FetchedBody, FEED_ACCEPT};
use super::parser::{parse_feed, FeedFormat};
use super::settings::IngestSettings;
use crate::util::{normalize_parsed, normalize_url, parse_http_url, strip_control_chars};

/// Shared set of dedup keys.
pub type SeenSet = Arc<Mutex<HashSet<String>>>;

type SharedValidation = Shared<BoxFuture<'static, Option<DiscoveredFeed>>>;

type SharedBody = Shared<BoxFuture<'static, Option<Arc<FetchedBody>>>>;

/// A validated feed found during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredFeed {
    /// Feed URL after redirects
    pub url: String,
    pub title: String,
    pub feed_type: FeedFormat,
    pub description: Option<String>,
    /// Website the feed belongs to
    pub site_url: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ValidatorInner {
    client: reqwest::Client,
    settings: IngestSettings,
    seen_urls: SeenSet,
    seen_feed_ids: SeenSet,
    in_flight: Mutex<HashMap<String, SharedValidation>>,
    /// Downloads by normalized URL, kept for the validator's lifetime
    bodies: Mutex<HashMap<String, SharedBody>>,
}

/// Releases an in-flight slot when the validation future finishes or is dropped.
struct InFlightGuard {
    inner: Arc<ValidatorInner>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.inner.in_flight).remove(&self.key);
    }
}

/// Fetches, parses and classifies candidate feed URLs.
///
/// Cloning shares the dedup scope and the in-flight map.
#[derive(Clone)]
pub struct FeedValidator {
    inner: Arc<ValidatorInner>,
}

impl FeedValidator {
    /// A validator with a fresh dedup scope.
    pub fn new(client: reqwest::Client, settings: IngestSettings) -> Self {
        Self::with_scope(client, settings, SeenSet::default(), SeenSet::default())
    }

    /// A validator bound to a caller-owned dedup scope, so several
    /// validators (or discovery sessions) can share what has been seen.
    pub fn with_scope(
        client: reqwest::Client,
        settings: IngestSettings,
        seen_urls: SeenSet,
        seen_feed_ids: SeenSet,
    ) -> Self {
        Self {
            inner: Arc::new(ValidatorInner {
                client,
                settings,
                seen_urls,
                seen_feed_ids,
                in_flight: Mutex::new(HashMap::new()),
                bodies: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.inner.client
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.inner.settings
    }

    /// Whether a URL's normalized form has already been seen in this scope.
    pub fn is_seen(&self, url: &str) -> bool {
        normalize_url(url)
            .map(|key| lock(&self.inner.seen_urls).contains(&key))
            .unwrap_or(false)
    }

    /// Downloads a page for scraping, sharing the body with any validation
    /// of the same URL. Failures are logged and yield `None`.
    ///
    /// Fetching a page does not mark it seen.
    pub async fn fetch_page(&self, url: &str) -> Option<Arc<FetchedBody>> {
        let parsed = match parse_http_url(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Skipping unusable page URL");
                return None;
            }
        };
        self.inner
            .body(&normalize_parsed(&parsed), parsed.as_str())
            .await
    }

    /// Validates a candidate URL.
    ///
    /// Returns `None` when the URL is unusable, already seen in this scope,
    /// a duplicate of a seen feed after redirects, or not a feed. Never errors.
    pub async fn validate(&self, url: &str) -> Option<DiscoveredFeed> {
        let parsed = match parse_http_url(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Skipping unusable candidate URL");
                return None;
            }
        };
        let key = normalize_parsed(&parsed);

        let shared = {
            let mut in_flight = lock(&self.inner.in_flight);
            match in_flight.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    if !lock(&self.inner.seen_urls).insert(key.clone()) {
                        return None;
                    }

                    let inner = Arc::clone(&self.inner);
                    let guard_key = key.clone();
                    let request_url = parsed.to_string();
                    let validation = async move {
                        let _guard = InFlightGuard {
                            inner: Arc::clone(&inner),
                            key: guard_key.clone(),
                        };
                        inner.fetch_and_classify(&request_url, &guard_key).await
                    }
                    .boxed()
                    .shared();

                    in_flight.insert(key, validation.clone());
                    validation
                }
            }
        };

        shared.await
    }
}

impl ValidatorInner {
    /// The download for `key`, started on first use.
    ///
    /// The request accepts feeds first but falls back to anything, so the
    /// same body serves feed parsing and HTML scanning.
    fn body(&self, key: &str, request_url: &str) -> SharedBody {
        let mut bodies = lock(&self.bodies);
        if let Some(existing) = bodies.get(key) {
            return existing.clone();
        }

        let client = self.client.clone();
        let settings = self.settings.clone();
        let url = request_url.to_string();
        let download = async move {
            match fetch_body(&client, &url, FEED_ACCEPT, &settings, settings.discovery_timeout).await {
                Ok(body) => Some(Arc::new(body)),
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "Discovery fetch failed");
                    None
                }
            }
        }
        .boxed()
        .shared();

        bodies.insert(key.to_string(), download.clone());
        download
    }

    async fn fetch_and_classify(&self, request_url: &str, key: &str) -> Option<DiscoveredFeed> {
        let body = self.body(key, request_url).await?;

        let final_key = normalize_url(&body.final_url).ok()?;
        if final_key != key && !lock(&self.seen_urls).insert(final_key) {
            tracing::debug!(
                url = %request_url,
                final_url = %body.final_url,
                "Candidate redirects to an already seen feed"
            );
            return None;
        }

        let parsed = match parse_feed(&body.bytes, Some(&body.final_url)) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(url = %body.final_url, error = %e, "Candidate is not a feed");
                return None;
            }
        };

        // RSS has no reliable content-level id; Atom's <id> is required and stable.
        if parsed.format == FeedFormat::Atom {
            let feed_id = parsed.feed.id.trim();
            if !feed_id.is_empty() && !lock(&self.seen_feed_ids).insert(feed_id.to_string()) {
                tracing::debug!(url = %body.final_url, feed_id, "Atom feed already found under another URL");
                return None;
            }
        }

        let title = parsed
            .title()
            .map(|t| strip_control_chars(t).into_owned())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());
        let description = parsed
            .description()
            .map(|d| strip_control_chars(d).into_owned());

        Some(DiscoveredFeed {
            title,
            feed_type: parsed.format,
            description,
            site_url: parsed.site_url().map(str::to_string),
            url: body.final_url.clone(),
        })
    }
}
