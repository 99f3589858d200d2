//! Feed discovery: turns an arbitrary URL into validated feed URLs.
//!
//! Each [`DiscoveryService`] proposes candidates for the URLs it understands
//! and validates them through the shared [`DiscoveryContext`]. The
//! [`DiscoveryRegistry`] runs every matching service in ascending priority
//! order against one dedup scope, so a feed proposed by several services is
//! fetched once and reported once.

mod generic;
mod platforms;
mod youtube;

pub use generic::{find_feed_links, GenericDiscovery};
pub use platforms::{GitHubDiscovery, MediumDiscovery, RedditDiscovery, SubstackDiscovery};
pub use youtube::{extract_channel_id, YouTubeDiscovery};

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use url::Url;

use super::http::FetchedBody;
use super::settings::IngestSettings;
use super::validator::{DiscoveredFeed, FeedValidator};
use crate::util::{normalize_url, parse_http_url, UrlError};

/// A strategy that proposes feed URLs for some family of input URLs.
#[async_trait]
pub trait DiscoveryService: Send + Sync {
    /// Lower runs first.
    fn priority(&self) -> u32;

    fn name(&self) -> &'static str;

    fn can_handle(&self, url: &Url) -> bool;

    /// Validated feeds for `url`. Never fails; unusable candidates are dropped.
    async fn discover(&self, url: &Url, ctx: &DiscoveryContext) -> Vec<DiscoveredFeed>;
}

/// Per-session state handed to every service.
#[derive(Clone)]
pub struct DiscoveryContext {
    validator: FeedValidator,
}

impl DiscoveryContext {
    pub fn new(validator: FeedValidator) -> Self {
        Self { validator }
    }

    pub fn validator(&self) -> &FeedValidator {
        &self.validator
    }

    pub fn settings(&self) -> &IngestSettings {
        self.validator.settings()
    }

    /// Validates all candidates concurrently, keeping proposal order.
    pub async fn validate_all<I>(&self, candidates: I) -> Vec<DiscoveredFeed>
    where
        I: IntoIterator<Item = String>,
    {
        let checks = candidates
            .into_iter()
            .map(|candidate| async move { self.validator.validate(&candidate).await });
        join_all(checks).await.into_iter().flatten().collect()
    }

    /// Fetches a web page for scraping. Failures are logged and yield `None`.
    ///
    /// The body is shared with validations of the same URL in this session,
    /// so scraping the input page and validating it costs one request.
    pub async fn fetch_page(&self, url: &str) -> Option<Arc<FetchedBody>> {
        self.validator.fetch_page(url).await
    }
}

/// Ordered set of discovery services.
pub struct DiscoveryRegistry {
    services: Vec<Box<dyn DiscoveryService>>,
    client: reqwest::Client,
    settings: IngestSettings,
}

impl DiscoveryRegistry {
    /// Registry with the platform services and the generic fallback.
    pub fn new(client: reqwest::Client, settings: IngestSettings) -> Self {
        Self::with_services(
            client,
            settings,
            vec![
                Box::new(RedditDiscovery),
                Box::new(YouTubeDiscovery),
                Box::new(GitHubDiscovery),
                Box::new(MediumDiscovery),
                Box::new(SubstackDiscovery),
                Box::new(GenericDiscovery),
            ],
        )
    }

    pub fn with_services(
        client: reqwest::Client,
        settings: IngestSettings,
        mut services: Vec<Box<dyn DiscoveryService>>,
    ) -> Self {
        // Stable sort keeps registration order between equal priorities
        services.sort_by_key(|s| s.priority());
        Self {
            services,
            client,
            settings,
        }
    }

    /// Service names in the order they run.
    pub fn service_names(&self) -> Vec<&'static str> {
        self.services.iter().map(|s| s.name()).collect()
    }

    /// Discovers feeds for `input` in a fresh dedup scope.
    ///
    /// # Errors
    ///
    /// Only an unparsable input URL is an error; everything after that is
    /// best effort and may return an empty list.
    pub async fn discover(&self, input: &str) -> Result<Vec<DiscoveredFeed>, UrlError> {
        let validator = FeedValidator::new(self.client.clone(), self.settings.clone());
        self.discover_in(input, &DiscoveryContext::new(validator)).await
    }

    /// Discovers feeds for `input` inside a caller-owned dedup scope.
    pub async fn discover_in(
        &self,
        input: &str,
        ctx: &DiscoveryContext,
    ) -> Result<Vec<DiscoveredFeed>, UrlError> {
        let url = parse_http_url(input)?;
        let mut found = Vec::new();
        let mut keys = HashSet::new();

        for service in self.services.iter().filter(|s| s.can_handle(&url)) {
            let feeds = service.discover(&url, ctx).await;
            tracing::debug!(service = service.name(), url = %url, count = feeds.len(), "Discovery service finished");

            for feed in feeds {
                let key = normalize_url(&feed.url).unwrap_or_else(|_| feed.url.clone());
                if keys.insert(key) {
                    found.push(feed);
                }
            }
        }

        tracing::info!(url = %url, count = found.len(), "Discovery complete");
        Ok(found)
    }
}

/// Whether `url`'s host is `domain` or one of its subdomains.
pub(crate) fn host_matches(url: &Url, domain: &str) -> bool {
    url.host_str().is_some_and(|host| {
        let host = host.to_ascii_lowercase();
        host == domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Non-empty path segments of `url`.
pub(crate) fn path_segments(url: &Url) -> Vec<&str> {
    url.path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}
