//! Configuration file parser for ~/.config/feedmill/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::{FetchAllOptions, IngestSettings, Pacer, DEFAULT_USER_AGENT};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. `None` means `~/.config/feedmill/feedmill.db`.
    pub database_path: Option<PathBuf>,

    pub user_agent: String,

    /// Timeout for feed fetches during ingestion.
    pub fetch_timeout_secs: u64,

    /// Timeout for candidate validation and page scrapes during discovery.
    pub discovery_timeout_secs: u64,

    pub max_feeds_per_batch: usize,

    /// Pause after a successful source in a batch.
    pub success_delay_ms: u64,

    /// Pause after a failed source in a batch.
    pub error_delay_ms: u64,

    /// Only fetch sources older than this. 0 = always eligible.
    pub stale_after_minutes: u64,

    /// Scrape article pages for an Open Graph image on single-feed fetches.
    pub fetch_og_images: bool,

    pub description_max_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            fetch_timeout_secs: 30,
            discovery_timeout_secs: 10,
            max_feeds_per_batch: 100,
            success_delay_ms: 500,
            error_delay_ms: 2000,
            stale_after_minutes: 0,
            fetch_og_images: false,
            description_max_chars: 500,
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 10] = [
        "database_path",
        "user_agent",
        "fetch_timeout_secs",
        "discovery_timeout_secs",
        "max_feeds_per_batch",
        "success_delay_ms",
        "error_delay_ms",
        "stale_after_minutes",
        "fetch_og_images",
        "description_max_chars",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Zero timeouts or batch size → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        // from a maliciously large or corrupted config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch_timeout_secs must be positive".into()));
        }
        if self.discovery_timeout_secs == 0 {
            return Err(ConfigError::Invalid("discovery_timeout_secs must be positive".into()));
        }
        if self.max_feeds_per_batch == 0 {
            return Err(ConfigError::Invalid("max_feeds_per_batch must be positive".into()));
        }
        Ok(())
    }

    /// Settings for discovery and ingestion.
    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            user_agent: self.user_agent.clone(),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            discovery_timeout: Duration::from_secs(self.discovery_timeout_secs),
            fetch_og_images: self.fetch_og_images,
            description_max_chars: self.description_max_chars,
            ..IngestSettings::default()
        }
    }

    /// Batch options with the configured pacing and staleness.
    pub fn fetch_all_options(&self) -> FetchAllOptions {
        FetchAllOptions {
            max_feeds_per_batch: self.max_feeds_per_batch,
            stale_after: (self.stale_after_minutes > 0)
                .then(|| Duration::from_secs(self.stale_after_minutes.saturating_mul(60))),
            pacer: Pacer::new(
                Duration::from_millis(self.success_delay_ms),
                Duration::from_millis(self.error_delay_ms),
            ),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
