//! Multi-format feed parsing.
//!
//! `feed-rs` does the heavy lifting for RSS 0.9x/2.0, RSS 1.0 (RDF), Atom
//! and JSON Feed. A second lightweight pass collects the per-item fields it
//! does not model: whether an RSS item carried an explicit `<guid>`, the
//! `<comments>` link, `itunes:image` and the JSON Feed `image`.

use feed_rs::model::{Feed, FeedType};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes of the body kept on a parse error for diagnosis.
const SAMPLE_LEN: usize = 200;

/// Syndication format of a parsed feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    Rss,
    Atom,
    Rdf,
    Json,
}

impl FeedFormat {
    pub fn from_feed_type(feed_type: &FeedType) -> Self {
        match feed_type {
            FeedType::Atom => FeedFormat::Atom,
            FeedType::JSON => FeedFormat::Json,
            FeedType::RSS1 => FeedFormat::Rdf,
            FeedType::RSS0 | FeedType::RSS2 => FeedFormat::Rss,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedFormat::Rss => "rss",
            FeedFormat::Atom => "atom",
            FeedFormat::Rdf => "rdf",
            FeedFormat::Json => "json",
        }
    }
}

impl std::fmt::Display for FeedFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Feed body is empty")]
    Empty,
    /// The body is not a recognizable RSS, Atom, RDF or JSON feed
    #[error("Invalid feed: {message}")]
    Invalid { message: String, sample: String },
}

impl ParseError {
    /// Leading slice of the body, when one was captured.
    pub fn sample(&self) -> Option<&str> {
        match self {
            ParseError::Empty => None,
            ParseError::Invalid { sample, .. } => Some(sample),
        }
    }
}

/// Per-item fields `feed-rs` drops. Index-aligned with `Feed::entries`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemExtras {
    /// Explicit `<guid>` / `rdf:about` / JSON `id`, if the item carried one
    pub guid: Option<String>,
    /// RSS `<comments>` URL
    pub comments: Option<String>,
    /// `itunes:image href`
    pub podcast_image: Option<String>,
    /// Item-level `<image>` (RSS) or `image` (JSON Feed)
    pub image: Option<String>,
}

/// A parsed feed together with its detected format.
#[derive(Debug)]
pub struct ParsedFeed {
    pub feed: Feed,
    pub format: FeedFormat,
    extras: Vec<ItemExtras>,
    /// Channel-level `itunes:image`
    pub podcast_image: Option<String>,
}

impl ParsedFeed {
    /// Extras for the entry at `index`.
    ///
    /// Returns `None` when the side pass disagreed with `feed-rs` about the
    /// number of items, since the index alignment cannot be trusted then.
    pub fn extras(&self, index: usize) -> Option<&ItemExtras> {
        if self.extras.len() == self.feed.entries.len() {
            self.extras.get(index)
        } else {
            None
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.feed
            .title
            .as_ref()
            .map(|t| t.content.trim())
            .filter(|t| !t.is_empty())
    }

    /// `<description>` for RSS/RDF, `<subtitle>` for Atom, `description` for JSON Feed.
    pub fn description(&self) -> Option<&str> {
        self.feed
            .description
            .as_ref()
            .map(|t| t.content.trim())
            .filter(|t| !t.is_empty())
    }

    /// Link to the site the feed belongs to.
    pub fn site_url(&self) -> Option<&str> {
        let links = &self.feed.links;
        links
            .iter()
            .find(|l| l.rel.as_deref() == Some("alternate"))
            .or_else(|| links.iter().find(|l| l.rel.is_none()))
            .map(|l| l.href.as_str())
    }

    pub fn icon_url(&self) -> Option<&str> {
        self.feed
            .icon
            .as_ref()
            .or(self.feed.logo.as_ref())
            .map(|i| i.uri.as_str())
            .or(self.podcast_image.as_deref())
    }
}

/// Parses feed bytes, auto-detecting the format.
///
/// `base_url` resolves relative links inside the document.
pub fn parse_feed(bytes: &[u8], base_url: Option<&str>) -> Result<ParsedFeed, ParseError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ParseError::Empty);
    }

    let feed = feed_rs::parser::Builder::new()
        .base_uri(base_url)
        .build()
        .parse(bytes)
        .map_err(|e| ParseError::Invalid {
            message: e.to_string(),
            sample: body_sample(bytes),
        })?;

    let format = FeedFormat::from_feed_type(&feed.feed_type);
    let (extras, podcast_image) = match format {
        FeedFormat::Rss | FeedFormat::Rdf => scan_xml_items(bytes),
        FeedFormat::Json => (scan_json_items(bytes), None),
        FeedFormat::Atom => (Vec::new(), None),
    };

    Ok(ParsedFeed {
        feed,
        format,
        extras,
        podcast_image,
    })
}

fn body_sample(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.trim_start().chars().take(SAMPLE_LEN).collect()
}

// ============================================================================
// RSS / RDF side pass
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum ItemField {
    Guid,
    Comments,
    Image,
    ImageUrl,
}

fn attr_value(e: &BytesStart<'_>, reader: &Reader<&[u8]>, local: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        if attr.key.local_name().as_ref() == local {
            attr.decode_and_unescape_value(reader.decoder())
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        } else {
            None
        }
    })
}

/// Walks `<item>` elements and collects [`ItemExtras`] for each, plus the
/// channel-level `itunes:image`. Malformed XML yields an empty list.
fn scan_xml_items(bytes: &[u8]) -> (Vec<ItemExtras>, Option<String>) {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut channel_image = None;
    let mut current: Option<ItemExtras> = None;
    let mut field: Option<ItemField> = None;
    let mut in_item_image = false;
    let mut buf = Vec::new();

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, "Item side pass failed, continuing without extras");
                return (Vec::new(), channel_image);
            }
        };

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let name = e.name();
                let local = name.local_name();
                let prefixed_itunes = name.prefix().is_some_and(|p| p.as_ref() == b"itunes");

                let in_item = current.is_some();

                match local.as_ref() {
                    b"item" => {
                        // RSS 1.0 items identify themselves through rdf:about
                        let extras = ItemExtras {
                            guid: attr_value(e, &reader, b"about"),
                            ..Default::default()
                        };
                        if is_empty {
                            items.push(extras);
                        } else {
                            current = Some(extras);
                        }
                    }
                    b"image" if prefixed_itunes => {
                        let href = attr_value(e, &reader, b"href");
                        match current.as_mut() {
                            Some(item) => {
                                if item.podcast_image.is_none() {
                                    item.podcast_image = href;
                                }
                            }
                            None => {
                                if channel_image.is_none() {
                                    channel_image = href;
                                }
                            }
                        }
                    }
                    b"guid" if in_item && !is_empty => field = Some(ItemField::Guid),
                    b"comments" if in_item && !is_empty && name.prefix().is_none() => {
                        field = Some(ItemField::Comments)
                    }
                    b"image" if in_item && name.prefix().is_none() => {
                        let url = attr_value(e, &reader, b"url").or_else(|| attr_value(e, &reader, b"href"));
                        match (url, current.as_mut()) {
                            (Some(url), Some(item)) => {
                                item.image.get_or_insert(url);
                            }
                            _ if !is_empty => {
                                in_item_image = true;
                                field = Some(ItemField::Image);
                            }
                            _ => {}
                        }
                    }
                    b"url" if in_item_image && !is_empty => field = Some(ItemField::ImageUrl),
                    _ => {}
                }
            }
            Event::Text(ref t) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    if let Ok(text) = t.unescape() {
                        assign_field(item, f, text.trim());
                    }
                }
            }
            Event::CData(ref c) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    let text = String::from_utf8_lossy(c);
                    assign_field(item, f, text.trim());
                }
            }
            Event::End(ref e) => {
                let name = e.name();
                match name.local_name().as_ref() {
                    b"item" => {
                        if let Some(item) = current.take() {
                            items.push(item);
                        }
                        field = None;
                        in_item_image = false;
                    }
                    b"image" if in_item_image => {
                        in_item_image = false;
                        field = None;
                    }
                    b"url" if in_item_image => field = Some(ItemField::Image),
                    _ => {
                        if !in_item_image {
                            field = None;
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    (items, channel_image)
}

fn assign_field(item: &mut ItemExtras, field: ItemField, text: &str) {
    if text.is_empty() {
        return;
    }
    match field {
        // An explicit <guid> wins over rdf:about
        ItemField::Guid => item.guid = Some(text.to_string()),
        ItemField::Comments => {
            item.comments.get_or_insert_with(|| text.to_string());
        }
        ItemField::Image | ItemField::ImageUrl => {
            if text.starts_with("http://") || text.starts_with("https://") || text.starts_with("//") {
                item.image.get_or_insert_with(|| text.to_string());
            }
        }
    }
}

// ============================================================================
// JSON Feed side pass
// ============================================================================

#[derive(Deserialize)]
struct JsonFeedDoc {
    #[serde(default)]
    items: Vec<JsonFeedItem>,
}

#[derive(Deserialize)]
struct JsonFeedItem {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    banner_image: Option<String>,
}

fn scan_json_items(bytes: &[u8]) -> Vec<ItemExtras> {
    let doc: JsonFeedDoc = match serde_json::from_slice(bytes) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::debug!(error = %e, "JSON Feed side pass failed, continuing without extras");
            return Vec::new();
        }
    };

    doc.items
        .into_iter()
        .map(|item| ItemExtras {
            // JSON Feed ids may be numbers in the wild
            guid: item.id.and_then(|id| match id {
                serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            }),
            comments: None,
            podcast_image: None,
            image: item.image.or(item.banner_image).filter(|s| !s.is_empty()),
        })
        .collect()
}
