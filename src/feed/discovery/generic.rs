//! Fallback discovery for any website: path probing plus `<link>` tag scanning.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use url::Url;

use super::{DiscoveryContext, DiscoveryService};
use crate::feed::validator::DiscoveredFeed;
use crate::util::{normalize_url, resolve_url};

/// Paths where sites conventionally publish feeds.
const CONVENTIONAL_PATHS: &[&str] = &[
    "/feed",
    "/rss",
    "/atom.xml",
    "/index.xml",
    "/feed.xml",
    "/rss.xml",
    "/atom",
    "/index.rss",
    "/feed/atom",
    "/?feed=rss2",
    "/blog/feed",
    "/blog/rss",
    "/feeds/posts/default",
    "/feeds/posts/default?alt=rss",
];

const FEED_EXTENSIONS: &[&str] = &[".rss", ".atom", ".xml"];

/// `type` values of `<link>` tags that advertise a feed.
const FEED_LINK_TYPES: &[&str] = &[
    "application/rss+xml",
    "application/atom+xml",
    "application/feed+json",
];

static LINK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<link\b[^>]*>").expect("valid link tag regex"));

/// Probes conventional locations and scrapes the page for feed links.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericDiscovery;

#[async_trait]
impl DiscoveryService for GenericDiscovery {
    fn priority(&self) -> u32 {
        100
    }

    fn name(&self) -> &'static str {
        "generic"
    }

    fn can_handle(&self, _url: &Url) -> bool {
        true
    }

    async fn discover(&self, url: &Url, ctx: &DiscoveryContext) -> Vec<DiscoveredFeed> {
        // The input is a candidate too; its body is fetched once and reused below
        let mut candidates = vec![url.to_string()];
        candidates.extend(probe_candidates(url));

        match ctx.fetch_page(url.as_str()).await {
            Some(page) => {
                let html = String::from_utf8_lossy(&page.bytes);
                candidates.extend(find_feed_links(&html, &page.final_url));
            }
            None => {
                tracing::debug!(url = %url, "No page HTML; relying on path probes");
            }
        }

        ctx.validate_all(dedup_candidates(candidates)).await
    }
}

/// Candidate URLs derived from the input URL alone, in probing order.
pub(crate) fn probe_candidates(url: &Url) -> Vec<String> {
    let mut candidates = Vec::new();
    let path = url.path().trim_end_matches('/');
    let lower_path = path.to_ascii_lowercase();

    if !path.is_empty() && !FEED_EXTENSIONS.iter().any(|ext| lower_path.ends_with(ext)) {
        for ext in FEED_EXTENSIONS {
            let mut with_ext = url.clone();
            with_ext.set_path(&format!("{path}{ext}"));
            with_ext.set_query(None);
            with_ext.set_fragment(None);
            candidates.push(with_ext.to_string());
        }
    }

    let origin = url.origin().ascii_serialization();
    for probe in CONVENTIONAL_PATHS {
        candidates.push(format!("{origin}{probe}"));
    }

    if !path.is_empty() {
        for probe in CONVENTIONAL_PATHS {
            candidates.push(format!("{origin}{path}{probe}"));
        }
    }

    candidates
}

/// Drops candidates that normalize to the same key, keeping the first.
fn dedup_candidates(candidates: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(normalize_url(c).unwrap_or_else(|_| c.clone())))
        .collect()
}

/// Scans HTML for `<link>` tags advertising RSS, Atom or JSON feeds.
///
/// Handles attribute ordering and quoting variations. Relative hrefs are
/// resolved against `base_url`. Returns every match in document order.
pub fn find_feed_links(html: &str, base_url: &str) -> Vec<String> {
    LINK_TAG
        .find_iter(html)
        .filter_map(|m| {
            let tag = m.as_str();
            let feed_type = extract_attr_value(tag, "type")?.trim().to_ascii_lowercase();
            if !FEED_LINK_TYPES.contains(&feed_type.as_str()) {
                return None;
            }
            let href = extract_attr_value(tag, "href")?.trim();
            if href.is_empty() {
                return None;
            }
            Some(resolve_url(href, base_url))
        })
        .collect()
}

/// Extracts the value of an attribute from a tag string (case-preserving).
fn extract_attr_value<'a>(tag: &'a str, attr_name: &str) -> Option<&'a str> {
    let tag_lower = tag.to_ascii_lowercase();
    let mut search_from = 0;

    // Skip matches inside longer names, e.g. `hreflang=` when looking for `href`
    loop {
        let found = tag_lower[search_from..].find(attr_name)?;
        let attr_start = search_from + found;
        search_from = attr_start + attr_name.len();

        let preceded_by_space = tag_lower[..attr_start]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace);
        let rest = tag[search_from..].trim_start();
        if !preceded_by_space || !rest.starts_with('=') {
            continue;
        }

        let value = rest[1..].trim_start();
        let quote = value.chars().next()?;
        if quote != '"' && quote != '\'' {
            // Unquoted value runs to whitespace or tag end
            let end = value
                .find(|c: char| c.is_whitespace() || c == '>')
                .unwrap_or(value.len());
            return Some(&value[..end]);
        }

        let inner = &value[1..];
        let end = inner.find(quote)?;
        return Some(&inner[..end]);
    }
}
