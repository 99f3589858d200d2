use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The database is locked by another process. Please try again later.")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::Locked;
        }

        DatabaseError::Other(err)
    }

    /// True when the error is SQLite reporting a table that does not exist yet.
    pub(crate) fn is_missing_table(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db_err) => db_err.message().contains("no such table"),
            _ => false,
        }
    }
}

// ============================================================================
// Icon Type
// ============================================================================

/// Who owns a source's icon.
///
/// Only `Auto` icons are refreshed from the feed; a `Custom` icon set by a
/// user is never overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IconType {
    #[default]
    Auto,
    Custom,
    None,
}

impl IconType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IconType::Auto => "auto",
            IconType::Custom => "custom",
            IconType::None => "none",
        }
    }
}

impl fmt::Display for IconType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IconType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(IconType::Auto),
            "custom" => Ok(IconType::Custom),
            "none" => Ok(IconType::None),
            other => Err(format!("unknown icon type: {other}")),
        }
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Internal row type for Source queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SourceDbRow {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub icon_url: Option<String>,
    pub icon_type: String,
    pub last_fetched: Option<i64>,
    pub last_error: Option<String>,
    pub consecutive_failures: i64,
}

impl SourceDbRow {
    pub(crate) fn into_source(self) -> Source {
        let icon_type = self.icon_type.parse().unwrap_or_else(|e: String| {
            tracing::warn!(source_id = self.id, error = %e, "Falling back to auto icon type");
            IconType::Auto
        });
        Source {
            id: self.id,
            url: self.url,
            title: self.title,
            description: self.description,
            site_url: self.site_url,
            icon_url: self.icon_url,
            icon_type,
            last_fetched: self.last_fetched,
            last_error: self.last_error,
            consecutive_failures: self.consecutive_failures,
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A known feed. Created once per distinct feed URL, refreshed on every fetch.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub icon_url: Option<String>,
    pub icon_type: IconType,
    /// Unix seconds of the last fetch attempt; `None` until first fetched
    pub last_fetched: Option<i64>,
    pub last_error: Option<String>,
    pub consecutive_failures: i64,
}

/// Feed-level metadata written back to a source after a successful fetch.
#[derive(Debug, Clone, Default)]
pub struct SourceMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub site_url: Option<String>,
    /// Only applied when the stored icon type is `auto` and the value changed
    pub icon_url: Option<String>,
}

/// An article ready to be inserted. Produced by extraction for new GUIDs only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewArticle {
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    pub content: String,
    pub description: String,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub audio_url: Option<String>,
    pub comment_link: Option<String>,
    /// Unix seconds
    pub published_at: i64,
}

/// Stored article row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub source_id: i64,
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    pub content: String,
    pub description: String,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub audio_url: Option<String>,
    pub comment_link: Option<String>,
    pub published_at: i64,
    pub created_at: i64,
}

/// Blocklist entry. `domain` is a pattern: `example.com` or `*.example.com`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct BlockedDomain {
    pub domain: String,
    pub reason: Option<String>,
}

impl AsRef<str> for BlockedDomain {
    fn as_ref(&self) -> &str {
        &self.domain
    }
}
