use std::time::Duration;

/// Default client identity sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("feedmill/", env!("CARGO_PKG_VERSION"), " (feed reader)");

/// Knobs shared by discovery, validation and ingestion.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub user_agent: String,
    /// Per-request timeout for feed fetches during ingestion
    pub fetch_timeout: Duration,
    /// Per-request timeout for candidate validation and page scraping
    pub discovery_timeout: Duration,
    /// Response body ceiling
    pub max_body_bytes: usize,
    /// Whether single-feed fetches may scrape article pages for an Open Graph
    /// image. Batch runs never do.
    pub fetch_og_images: bool,
    pub description_max_chars: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            fetch_timeout: Duration::from_secs(30),
            discovery_timeout: Duration::from_secs(10),
            max_body_bytes: 10 * 1024 * 1024, // 10MB
            fetch_og_images: false,
            description_max_chars: 500,
        }
    }
}
