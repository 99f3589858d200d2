//! Feed discovery and ingestion engine.
//!
//! Finds RSS, Atom, RDF and JSON feeds behind arbitrary web pages and
//! platform URLs, then keeps a SQLite store of deduplicated articles fresh
//! with paced, bounded batch fetches.
//!
//! - [`feed`] - discovery, validation, fetching, parsing and extraction
//! - [`storage`] - SQLite persistence for sources, articles and the blocklist
//! - [`util`] - URL normalization, text cleanup and blocklist matching
//! - [`telemetry`] - optional span, error and metric sinks
//! - [`config`] - TOML configuration

pub mod config;
pub mod feed;
pub mod storage;
pub mod telemetry;
pub mod util;
