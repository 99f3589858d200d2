//! Per-item field extraction across RSS, RDF, Atom and JSON Feed.
//!
//! Every field is an ordered fallback chain over the places the formats put
//! it; the first populated value wins.

use std::sync::LazyLock;

use feed_rs::model::{Entry, Link, MediaContent};
use regex::Regex;
use thiserror::Error;

use super::http::{fetch_body, HTML_ACCEPT};
use super::parser::{FeedFormat, ItemExtras, ParsedFeed};
use super::settings::IngestSettings;
use crate::storage::NewArticle;
use crate::telemetry::Telemetry;
use crate::util::{
    cap_chars, clean_description, sanitize_html, strip_control_chars, strip_html, truncate_text,
    TRUNCATION_SUFFIX,
};

/// Hard ceiling on stored article content.
pub const CONTENT_MAX_CHARS: usize = 500_000;

pub const DEFAULT_TITLE: &str = "Untitled";

static OG_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<meta\s[^>]*?(?:property|name)\s*=\s*["'](?:og:image|og:image:url|twitter:image)["'][^>]*>"#,
    )
    .unwrap()
});
static META_CONTENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)\bcontent\s*=\s*["']([^"']+)["']"#).unwrap());

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".avif"];

#[derive(Debug, Error)]
pub enum ExtractError {
    /// The item has no title, link or body to build an article from
    #[error("Item has no title, link or content")]
    EmptyItem,
}

// ============================================================================
// GUID
// ============================================================================

/// Resolves the identifier used to deduplicate an item within its source.
///
/// Chain: explicit guid/id, primary link, first link, then a synthesized
/// `"{source_id}-{title}-{published}"` or `"{source_id}-{title}"`. Returns
/// `None` when nothing usable exists.
pub fn resolve_guid(
    entry: &Entry,
    extras: Option<&ItemExtras>,
    format: FeedFormat,
    source_id: i64,
) -> Option<String> {
    // feed-rs synthesizes ids for RSS items without a <guid>, so only the
    // side pass can tell whether one was present.
    let explicit = match format {
        FeedFormat::Rss | FeedFormat::Rdf => extras.and_then(|e| e.guid.clone()),
        FeedFormat::Json => extras
            .and_then(|e| e.guid.clone())
            .or_else(|| non_empty(&entry.id)),
        FeedFormat::Atom => non_empty(&entry.id),
    };

    explicit
        .or_else(|| primary_link(&entry.links).map(|l| l.href.trim().to_string()))
        .or_else(|| entry.links.first().map(|l| l.href.trim().to_string()))
        .filter(|g| !g.is_empty())
        .or_else(|| {
            let title = entry_title(entry)?;
            match entry.published.or(entry.updated) {
                Some(date) => Some(format!("{source_id}-{title}-{}", date.timestamp())),
                None => Some(format!("{source_id}-{title}")),
            }
        })
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// ============================================================================
// Field chains
// ============================================================================

fn entry_title(entry: &Entry) -> Option<String> {
    let raw = entry.title.as_ref()?;
    let text = strip_html(&raw.content);
    let text = strip_control_chars(&text).replace('\n', " ");
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// `rel="alternate"` first, then a link without a `rel`.
fn primary_link(links: &[Link]) -> Option<&Link> {
    links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate"))
        .or_else(|| links.iter().find(|l| l.rel.is_none()))
        .filter(|l| !l.href.trim().is_empty())
}

fn entry_link(entry: &Entry) -> Option<String> {
    primary_link(&entry.links)
        .or_else(|| entry.links.first())
        .map(|l| l.href.trim().to_string())
        .filter(|h| !h.is_empty())
}

fn content_body(entry: &Entry) -> Option<&str> {
    entry
        .content
        .as_ref()
        .and_then(|c| c.body.as_deref())
        .filter(|b| !b.trim().is_empty())
}

fn summary_body(entry: &Entry) -> Option<&str> {
    entry
        .summary
        .as_ref()
        .map(|s| s.content.as_str())
        .filter(|s| !s.trim().is_empty())
}

fn entry_content(entry: &Entry) -> String {
    let raw = content_body(entry).or_else(|| summary_body(entry)).unwrap_or("");
    cap_chars(strip_html(raw), CONTENT_MAX_CHARS)
}

/// Sanitize, strip boilerplate, then truncate on a word boundary.
pub fn build_description(raw: &str, max_chars: usize) -> String {
    let cleaned = clean_description(&sanitize_html(raw));
    let truncated = truncate_text(&cleaned, max_chars, TRUNCATION_SUFFIX);
    if truncated.len() == cleaned.len() {
        cleaned
    } else {
        // The cut may land inside a tag
        sanitize_html(&truncated)
    }
}

fn entry_description(entry: &Entry, max_chars: usize) -> String {
    let raw = summary_body(entry).or_else(|| content_body(entry)).unwrap_or("");
    build_description(raw, max_chars)
}

fn entry_author(entry: &Entry, parsed: &ParsedFeed) -> Option<String> {
    entry
        .authors
        .iter()
        .chain(parsed.feed.authors.iter())
        .map(|p| strip_control_chars(p.name.trim()).into_owned())
        .find(|name| !name.is_empty())
}

fn mime_top_level(media: &MediaContent) -> Option<&str> {
    media.content_type.as_ref().map(|m| m.ty().as_str())
}

fn looks_like_image_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or("").to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn link_of_type<'a>(entry: &'a Entry, rel: &str, top_level: &str) -> Option<&'a str> {
    entry
        .links
        .iter()
        .filter(|l| l.rel.as_deref() == Some(rel))
        .find(|l| {
            l.media_type
                .as_deref()
                .is_some_and(|t| t.to_ascii_lowercase().starts_with(top_level))
        })
        .map(|l| l.href.as_str())
}

fn media_content_of_type<'a>(entry: &'a Entry, top_level: &str) -> Option<&'a str> {
    entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .filter(|c| mime_top_level(c) == Some(top_level))
        .find_map(|c| c.url.as_ref().map(|u| u.as_str()))
}

/// Channel artwork: podcast image, then the RSS `<image>` / Atom `<logo>`.
fn feed_image(parsed: &ParsedFeed) -> Option<&str> {
    parsed
        .podcast_image
        .as_deref()
        .or_else(|| parsed.feed.logo.as_ref().map(|logo| logo.uri.as_str()))
}

/// Image chain without the network step: item podcast image or item image,
/// channel artwork, image enclosure, media thumbnail, then untyped media
/// content that looks like an image.
fn entry_image(entry: &Entry, extras: Option<&ItemExtras>, parsed: &ParsedFeed) -> Option<String> {
    extras
        .and_then(|e| e.podcast_image.as_deref().or(e.image.as_deref()))
        .or_else(|| feed_image(parsed))
        .or_else(|| link_of_type(entry, "enclosure", "image/"))
        .or_else(|| media_content_of_type(entry, "image"))
        .or_else(|| {
            entry
                .media
                .iter()
                .flat_map(|m| m.thumbnails.iter())
                .map(|t| t.image.uri.as_str())
                .next()
        })
        .or_else(|| {
            entry
                .media
                .iter()
                .flat_map(|m| m.content.iter())
                .filter(|c| c.content_type.is_none())
                .filter_map(|c| c.url.as_ref().map(|u| u.as_str()))
                .find(|u| looks_like_image_url(u))
        })
        .map(str::to_string)
}

fn entry_audio(entry: &Entry) -> Option<String> {
    media_content_of_type(entry, "audio")
        .or_else(|| link_of_type(entry, "enclosure", "audio/"))
        .map(str::to_string)
}

fn entry_comment_link(entry: &Entry, extras: Option<&ItemExtras>) -> Option<String> {
    extras
        .and_then(|e| e.comments.clone())
        .or_else(|| {
            entry
                .links
                .iter()
                .find(|l| l.rel.as_deref() == Some("replies"))
                .map(|l| l.href.clone())
        })
}

/// Builds an article from a feed entry. `now` is used when the entry carries no date.
pub fn extract_article(
    parsed: &ParsedFeed,
    index: usize,
    guid: String,
    description_max_chars: usize,
    now: i64,
) -> Result<NewArticle, ExtractError> {
    let entry = parsed
        .feed
        .entries
        .get(index)
        .ok_or(ExtractError::EmptyItem)?;
    let extras = parsed.extras(index);

    let title = entry_title(entry);
    let link = entry_link(entry);
    let content = entry_content(entry);

    if title.is_none() && link.is_none() && content.is_empty() {
        return Err(ExtractError::EmptyItem);
    }

    Ok(NewArticle {
        guid,
        title: title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        link,
        content,
        description: entry_description(entry, description_max_chars),
        author: entry_author(entry, parsed),
        image_url: entry_image(entry, extras, parsed),
        audio_url: entry_audio(entry),
        comment_link: entry_comment_link(entry, extras),
        published_at: entry
            .published
            .or(entry.updated)
            .map(|d| d.timestamp())
            .unwrap_or(now),
    })
}

// ============================================================================
// Open Graph fallback
// ============================================================================

/// Finds an Open Graph (or Twitter card) image URL in an HTML document.
pub fn find_og_image(html: &str) -> Option<String> {
    OG_IMAGE.find_iter(html).find_map(|tag| {
        META_CONTENT
            .captures(tag.as_str())
            .map(|c| c[1].trim().to_string())
            .filter(|u| !u.is_empty())
    })
}

/// Last-resort image lookup by scraping the article page.
///
/// Never fails: any error is counted in the `og_image.failure` metric and
/// yields `None`.
pub async fn scrape_og_image(
    client: &reqwest::Client,
    page_url: &str,
    settings: &IngestSettings,
    telemetry: &Telemetry,
) -> Option<String> {
    match fetch_body(client, page_url, HTML_ACCEPT, settings, settings.discovery_timeout).await {
        Ok(body) => {
            let html = String::from_utf8_lossy(&body.bytes);
            let found = find_og_image(&html)
                .map(|src| crate::util::resolve_url(&src, &body.final_url));
            let outcome = if found.is_some() { "hit" } else { "miss" };
            telemetry.increment("og_image.lookup", &[("outcome", outcome)]);
            found
        }
        Err(e) => {
            tracing::debug!(url = %page_url, error = %e, "Open Graph lookup failed");
            telemetry.increment("og_image.failure", &[]);
            None
        }
    }
}
