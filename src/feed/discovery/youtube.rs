//! YouTube channel, user and playlist feeds.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use url::Url;

use super::{host_matches, path_segments, DiscoveryContext, DiscoveryService};
use crate::feed::validator::DiscoveredFeed;

const FEED_BASE: &str = "https://www.youtube.com/feeds/videos.xml";

static CHANNEL_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:"channelId"\s*:\s*"|"externalId"\s*:\s*"|/channel/|channel_id=)(UC[A-Za-z0-9_-]{22})"#)
        .expect("valid channel id regex")
});

/// Finds the `UC…` channel id embedded in a channel page.
pub fn extract_channel_id(html: &str) -> Option<String> {
    CHANNEL_ID
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Where a YouTube URL's feed comes from.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum YouTubeTarget {
    /// Feed URL follows from the page URL
    Direct(String),
    /// Handle or custom URL; the channel id must be scraped from the page
    Scrape,
    Unsupported,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct YouTubeDiscovery;

impl YouTubeDiscovery {
    pub(crate) fn target(url: &Url) -> YouTubeTarget {
        if url.path() == "/feeds/videos.xml" {
            return YouTubeTarget::Direct(url.to_string());
        }

        match path_segments(url).as_slice() {
            ["channel", id, ..] => YouTubeTarget::Direct(format!("{FEED_BASE}?channel_id={id}")),
            ["user", name, ..] => YouTubeTarget::Direct(format!("{FEED_BASE}?user={name}")),
            ["playlist", ..] => url
                .query_pairs()
                .find(|(k, _)| k == "list")
                .map(|(_, list)| YouTubeTarget::Direct(format!("{FEED_BASE}?playlist_id={list}")))
                .unwrap_or(YouTubeTarget::Unsupported),
            [handle, ..] if handle.starts_with('@') => YouTubeTarget::Scrape,
            ["c", _, ..] => YouTubeTarget::Scrape,
            _ => YouTubeTarget::Unsupported,
        }
    }
}

#[async_trait]
impl DiscoveryService for YouTubeDiscovery {
    fn priority(&self) -> u32 {
        10
    }

    fn name(&self) -> &'static str {
        "youtube"
    }

    fn can_handle(&self, url: &Url) -> bool {
        host_matches(url, "youtube.com")
    }

    async fn discover(&self, url: &Url, ctx: &DiscoveryContext) -> Vec<DiscoveredFeed> {
        let feed_url = match Self::target(url) {
            YouTubeTarget::Direct(feed_url) => feed_url,
            YouTubeTarget::Scrape => {
                let Some(page) = ctx.fetch_page(url.as_str()).await else {
                    return Vec::new();
                };
                match extract_channel_id(&String::from_utf8_lossy(&page.bytes)) {
                    Some(id) => format!("{FEED_BASE}?channel_id={id}"),
                    None => {
                        tracing::debug!(url = %url, "No channel id found on YouTube page");
                        return Vec::new();
                    }
                }
            }
            YouTubeTarget::Unsupported => return Vec::new(),
        };

        ctx.validate_all([feed_url]).await
    }
}
