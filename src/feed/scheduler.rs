//! Batch ingestion: picks the stalest sources and fetches them one at a time.
//!
//! Sources are processed sequentially with a pause between requests, longer
//! after a failure, so a batch never hammers third-party hosts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use super::fetcher::{FetchError, Ingestor};

/// Time source for the pacer, injectable for tests.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Unix milliseconds.
    fn now_millis(&self) -> i64;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by tokio timers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Delays between sources in a batch.
#[derive(Clone)]
pub struct Pacer {
    pub success_delay: Duration,
    /// Backoff after a failed source
    pub error_delay: Duration,
    clock: Arc<dyn Clock>,
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(2))
    }
}

impl std::fmt::Debug for Pacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacer")
            .field("success_delay", &self.success_delay)
            .field("error_delay", &self.error_delay)
            .finish_non_exhaustive()
    }
}

impl Pacer {
    pub fn new(success_delay: Duration, error_delay: Duration) -> Self {
        Self {
            success_delay,
            error_delay,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Waits before the next source.
    pub async fn pause(&self, succeeded: bool) {
        let delay = if succeeded {
            self.success_delay
        } else {
            self.error_delay
        };
        if !delay.is_zero() {
            self.clock.sleep(delay).await;
        }
    }
}

/// Options for [`Ingestor::fetch_all_feeds`].
#[derive(Debug, Clone)]
pub struct FetchAllOptions {
    /// Upper bound on sources fetched in one run
    pub max_feeds_per_batch: usize,
    /// Skip sources fetched more recently than this. `None` selects
    /// regardless of age, still least recently fetched first.
    pub stale_after: Option<Duration>,
    pub pacer: Pacer,
}

impl Default for FetchAllOptions {
    fn default() -> Self {
        Self {
            max_feeds_per_batch: 100,
            stale_after: None,
            pacer: Pacer::default(),
        }
    }
}

/// A source that failed during a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedFailure {
    pub source_id: i64,
    pub url: String,
    pub error: String,
}

/// Aggregate outcome of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchAllResult {
    pub success_count: usize,
    pub error_count: usize,
    pub total: usize,
    pub errors: Vec<FeedFailure>,
}

impl Ingestor {
    /// Fetches the least recently fetched sources, one at a time.
    ///
    /// A failing source is recorded in [`FetchAllResult::errors`] and never
    /// aborts the batch. The blocklist is loaded once and shared by every
    /// source. Open Graph page scraping is always skipped in batch runs.
    ///
    /// # Errors
    ///
    /// Only a failure to select sources is returned.
    pub async fn fetch_all_feeds(&self, options: &FetchAllOptions) -> Result<FetchAllResult, FetchError> {
        let now_secs = options.pacer.now_millis() / 1000;
        let cutoff = options
            .stale_after
            .map(|age| now_secs.saturating_sub(i64::try_from(age.as_secs()).unwrap_or(i64::MAX)));

        let sources = self
            .db()
            .get_stale_sources(cutoff, options.max_feeds_per_batch)
            .await
            .map_err(|e| FetchError::Database(e.to_string()))?;

        let mut result = FetchAllResult {
            total: sources.len(),
            ..Default::default()
        };
        if sources.is_empty() {
            tracing::info!("No sources due for fetching");
            return Ok(result);
        }

        let blocked = self.db().get_blocked_domains().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load blocklist, continuing without it");
            Vec::new()
        });

        tracing::info!(total = result.total, "Starting feed batch");

        for (index, source) in sources.iter().enumerate() {
            let succeeded = match self
                .fetch_source(source.id, &source.url, Some(blocked.as_slice()), false)
                .await
            {
                Ok(_) => {
                    result.success_count += 1;
                    true
                }
                Err(e) => {
                    result.error_count += 1;
                    result.errors.push(FeedFailure {
                        source_id: source.id,
                        url: source.url.clone(),
                        error: e.to_string(),
                    });
                    false
                }
            };

            if index + 1 < sources.len() {
                options.pacer.pause(succeeded).await;
            }
        }

        tracing::info!(
            total = result.total,
            success = result.success_count,
            errors = result.error_count,
            "Feed batch complete"
        );

        let telemetry = self.telemetry();
        telemetry.gauge("feeds.batch.total", result.total as f64, &[]);
        telemetry.gauge("feeds.batch.success", result.success_count as f64, &[]);
        telemetry.gauge("feeds.batch.errors", result.error_count as f64, &[]);
        telemetry.counter("feeds.batch.runs", 1, &[]);

        Ok(result)
    }
}

/// Whether a periodic task is due: never run, or `interval` has elapsed.
///
/// Times are unix milliseconds.
pub fn should_run_task(last_run_at: Option<i64>, interval: Duration, now: i64) -> bool {
    match last_run_at {
        None => true,
        Some(last) => {
            let interval = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
            now.saturating_sub(last) >= interval
        }
    }
}

/// Whether a source is due for a fetch. Times are unix seconds, as stored.
pub fn is_source_stale(last_fetched: Option<i64>, threshold: Duration, now_secs: i64) -> bool {
    should_run_task(
        last_fetched.map(|t| t.saturating_mul(1000)),
        threshold,
        now_secs.saturating_mul(1000),
    )
}
