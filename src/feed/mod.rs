//! Feed discovery and ingestion.
//!
//! - **Discovery**: [`DiscoveryRegistry`] turns a page or platform URL into
//!   validated feeds, coalescing duplicate candidates through [`FeedValidator`]
//! - **Ingestion**: [`Ingestor`] fetches one source ([`Ingestor::fetch_single_feed`])
//!   or a paced batch of the stalest ones ([`Ingestor::fetch_all_feeds`])
//! - **Parsing**: [`parse_feed`] auto-detects RSS, Atom, RDF and JSON Feed
//!
//! # Example
//!
//! ```no_run
//! use feedmill::feed::{build_client, DiscoveryRegistry, FetchAllOptions, IngestSettings, Ingestor};
//! use feedmill::storage::Database;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let settings = IngestSettings::default();
//! let client = build_client(&settings)?;
//!
//! let registry = DiscoveryRegistry::new(client.clone(), settings.clone());
//! let feeds = registry.discover("https://blog.rust-lang.org/").await?;
//!
//! let db = Database::open("feeds.db").await?;
//! for feed in &feeds {
//!     db.insert_source(&feed.url, &feed.title).await?;
//! }
//!
//! let ingestor = Ingestor::new(db, client, settings);
//! let summary = ingestor.fetch_all_feeds(&FetchAllOptions::default()).await?;
//! println!("{} ok, {} failed", summary.success_count, summary.error_count);
//! # Ok(())
//! # }
//! ```

mod discovery;
mod extract;
mod fetcher;
mod http;
mod parser;
mod scheduler;
mod settings;
mod validator;

pub use discovery::{
    extract_channel_id, find_feed_links, DiscoveryContext, DiscoveryRegistry, DiscoveryService,
    GenericDiscovery, GitHubDiscovery, MediumDiscovery, RedditDiscovery, SubstackDiscovery,
    YouTubeDiscovery,
};
pub use extract::{
    build_description, extract_article, find_og_image, resolve_guid, scrape_og_image,
    ExtractError, CONTENT_MAX_CHARS, DEFAULT_TITLE,
};
pub use fetcher::{FeedPreview, FetchError, FetchSingleResult, Ingestor};
pub use http::{build_client, fetch_body, is_feed_content_type, FetchedBody, FEED_ACCEPT, HTML_ACCEPT};
pub use parser::{parse_feed, FeedFormat, ItemExtras, ParseError, ParsedFeed};
pub use scheduler::{
    is_source_stale, should_run_task, Clock, FeedFailure, FetchAllOptions, FetchAllResult, Pacer,
    SystemClock,
};
pub use settings::{IngestSettings, DEFAULT_USER_AGENT};
pub use validator::{DiscoveredFeed, FeedValidator, SeenSet};
