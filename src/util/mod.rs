//! Utility functions shared by discovery and ingestion.
//!
//! - **URL handling**: normalization into dedup keys, domain extraction, relative resolution
//! - **Text processing**: HTML stripping and sanitizing, boilerplate cleanup, truncation
//! - **Blocklist**: domain pattern matching with plan-based bypass
//!
//! # Examples
//!
//! ```
//! use feedmill::util::{normalize_url, truncate_text, TRUNCATION_SUFFIX};
//!
//! let key = normalize_url("https://www.example.com/feed/").unwrap();
//! assert_eq!(key, "https://example.com/feed");
//!
//! let short = truncate_text("Hello World and more text here", 28, TRUNCATION_SUFFIX);
//! assert!(short.ends_with("..."));
//! ```

mod blocklist;
mod text;
mod url;

pub use blocklist::{is_domain_blocked, Plan};
pub use text::{
    cap_chars, clean_description, sanitize_html, strip_control_chars,
    strip_html, truncate_text, TRUNCATION_SUFFIX,
};
pub use url::{extract_domain, normalize_parsed, normalize_url, parse_http_url, resolve_url, UrlError};
