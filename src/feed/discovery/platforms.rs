//! Discovery for platforms whose feed URLs follow from the page URL.

use async_trait::async_trait;
use url::Url;

use super::{host_matches, path_segments, DiscoveryContext, DiscoveryService};
use crate::feed::validator::DiscoveredFeed;

// ============================================================================
// Reddit
// ============================================================================

/// Subreddit and user feeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct RedditDiscovery;

impl RedditDiscovery {
    pub(crate) fn candidates(url: &Url) -> Vec<String> {
        match path_segments(url).as_slice() {
            ["r", sub, ..] => vec![format!("https://www.reddit.com/r/{sub}/.rss")],
            ["user" | "u", name, ..] => vec![format!("https://www.reddit.com/user/{name}/.rss")],
            [] => vec!["https://www.reddit.com/.rss".to_string()],
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl DiscoveryService for RedditDiscovery {
    fn priority(&self) -> u32 {
        10
    }

    fn name(&self) -> &'static str {
        "reddit"
    }

    fn can_handle(&self, url: &Url) -> bool {
        host_matches(url, "reddit.com")
    }

    async fn discover(&self, url: &Url, ctx: &DiscoveryContext) -> Vec<DiscoveredFeed> {
        ctx.validate_all(Self::candidates(url)).await
    }
}

// ============================================================================
// GitHub
// ============================================================================

/// First path segments that are GitHub site pages, not users.
const GITHUB_RESERVED: &[&str] = &[
    "about",
    "explore",
    "features",
    "login",
    "marketplace",
    "orgs",
    "pricing",
    "settings",
    "topics",
    "trending",
];

/// Repository activity feeds and user activity feeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitHubDiscovery;

impl GitHubDiscovery {
    pub(crate) fn candidates(url: &Url) -> Vec<String> {
        match path_segments(url).as_slice() {
            [owner, ..] if GITHUB_RESERVED.contains(owner) => Vec::new(),
            [owner, repo, ..] => {
                let repo = repo.trim_end_matches(".git");
                ["releases", "tags", "commits"]
                    .iter()
                    .map(|kind| format!("https://github.com/{owner}/{repo}/{kind}.atom"))
                    .collect()
            }
            [user] => vec![format!("https://github.com/{user}.atom")],
            [] => Vec::new(),
        }
    }
}

#[async_trait]
impl DiscoveryService for GitHubDiscovery {
    fn priority(&self) -> u32 {
        10
    }

    fn name(&self) -> &'static str {
        "github"
    }

    fn can_handle(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|h| h.eq_ignore_ascii_case("github.com") || h.eq_ignore_ascii_case("www.github.com"))
    }

    async fn discover(&self, url: &Url, ctx: &DiscoveryContext) -> Vec<DiscoveredFeed> {
        ctx.validate_all(Self::candidates(url)).await
    }
}

// ============================================================================
// Medium
// ============================================================================

/// Medium users, publications and custom subdomains.
#[derive(Debug, Default, Clone, Copy)]
pub struct MediumDiscovery;

impl MediumDiscovery {
    pub(crate) fn candidates(url: &Url) -> Vec<String> {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);

        if host != "medium.com" {
            return vec![format!("https://{host}/feed")];
        }

        match path_segments(url).as_slice() {
            ["feed", ..] => vec![url.to_string()],
            [first, ..] => vec![format!("https://medium.com/feed/{first}")],
            [] => Vec::new(),
        }
    }
}

#[async_trait]
impl DiscoveryService for MediumDiscovery {
    fn priority(&self) -> u32 {
        20
    }

    fn name(&self) -> &'static str {
        "medium"
    }

    fn can_handle(&self, url: &Url) -> bool {
        host_matches(url, "medium.com")
    }

    async fn discover(&self, url: &Url, ctx: &DiscoveryContext) -> Vec<DiscoveredFeed> {
        ctx.validate_all(Self::candidates(url)).await
    }
}

// ============================================================================
// Substack
// ============================================================================

/// Substack newsletters.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubstackDiscovery;

#[async_trait]
impl DiscoveryService for SubstackDiscovery {
    fn priority(&self) -> u32 {
        20
    }

    fn name(&self) -> &'static str {
        "substack"
    }

    fn can_handle(&self, url: &Url) -> bool {
        host_matches(url, "substack.com")
            && url.host_str().is_some_and(|h| !h.eq_ignore_ascii_case("substack.com"))
    }

    async fn discover(&self, url: &Url, ctx: &DiscoveryContext) -> Vec<DiscoveredFeed> {
        let origin = url.origin().ascii_serialization();
        ctx.validate_all([format!("{origin}/feed")]).await
    }
}
