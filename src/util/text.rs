use regex::Regex;
use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Default suffix appended by [`truncate_text`].
pub const TRUNCATION_SUFFIX: &str = "...";

/// Fraction of the truncation window inside which a word break is preferred.
const WORD_BREAK_WINDOW: f64 = 0.8;

/// Tags allowed through [`sanitize_html`].
const SAFE_TAGS: &[&str] = &[
    "a",
    "b",
    "blockquote",
    "br",
    "code",
    "em",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "hr",
    "i",
    "img",
    "li",
    "ol",
    "p",
    "pre",
    "s",
    "strong",
    "sub",
    "sup",
    "u",
    "ul",
];

static SCRIPT_STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)\s*>").unwrap());
static BLOCK_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*(br|/p|/div|/li|/h[1-6]|/blockquote|/tr)\b[^>]*>").unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static INLINE_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").unwrap());
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\n\s*(\n\s*)+").unwrap());

static SUBMITTED_BY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)submitted\s+by\s*<a\b[^>]*>[^<]*</a>").unwrap());
static LINK_MARKER_ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<a\b[^>]*>\s*\[(link|comments)\]\s*</a>").unwrap());
static LINK_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\[(link|comments)\]").unwrap());
static COMMENTS_ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<a\b[^>]*>\s*comments\s*</a>").unwrap());
static EMPTY_ANCHOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<a\b[^>]*>\s*</a>").unwrap());
static EMPTY_PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<p>\s*</p>").unwrap());
static REPEATED_BREAKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(<br\s*/?>\s*){2,}").unwrap());
static REPEATED_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Removes all markup from an HTML fragment and returns readable plain text.
///
/// Script, style and noscript blocks are dropped with their contents, block
/// level closers become line breaks, entities are decoded and whitespace is
/// collapsed.
pub fn strip_html(html: &str) -> String {
    if !html.contains('<') && !html.contains('&') {
        return collapse_whitespace(html);
    }

    let without_scripts = SCRIPT_STYLE.replace_all(html, " ");
    let with_breaks = BLOCK_BREAK.replace_all(&without_scripts, "\n");
    let without_tags = TAG.replace_all(&with_breaks, " ");
    let decoded = html_escape::decode_html_entities(&without_tags);

    collapse_whitespace(&decoded)
}

fn collapse_whitespace(text: &str) -> String {
    let inline = INLINE_SPACE.replace_all(text, " ");
    let lines = BLANK_LINES.replace_all(&inline, "\n\n");
    lines
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned()
}

/// Sanitizes an HTML fragment against a small allowlist of presentational tags.
///
/// Links keep `href` with http, https and mailto schemes only and get
/// `rel="noopener noreferrer"`; scripts, styles, iframes, event handlers and
/// every other tag are removed.
pub fn sanitize_html(html: &str) -> String {
    let tags: HashSet<&str> = SAFE_TAGS.iter().copied().collect();
    let schemes: HashSet<&str> = ["http", "https", "mailto"].into_iter().collect();

    let mut builder = ammonia::Builder::default();
    builder.tags(tags).url_schemes(schemes);
    builder.clean(html).to_string()
}

/// Removes aggregator boilerplate from a sanitized description.
///
/// Handles the patterns link aggregators append to every item: "submitted by"
/// attribution links, `[link]` / `[comments]` markers, bare "Comments" anchors,
/// anchors left empty after cleanup, and runs of line breaks.
pub fn clean_description(html: &str) -> String {
    let text = SUBMITTED_BY.replace_all(html, "");
    let text = LINK_MARKER_ANCHOR.replace_all(&text, "");
    let text = LINK_MARKER.replace_all(&text, "");
    let text = COMMENTS_ANCHOR.replace_all(&text, "");
    let text = EMPTY_ANCHOR.replace_all(&text, "");
    let text = EMPTY_PARAGRAPH.replace_all(&text, "");
    let text = REPEATED_BREAKS.replace_all(&text, "<br>");
    let text = REPEATED_NEWLINES.replace_all(&text, "\n\n");

    text.trim().to_owned()
}

/// Truncates text to at most `max_chars` characters including `suffix`.
///
/// The suffix budget is reserved first. Within the remaining window the cut
/// goes to the last space when that space lies in the final 20% of the
/// window; otherwise the text is cut hard at the window edge.
///
/// # Examples
///
/// ```
/// use feedmill::util::truncate_text;
///
/// let out = truncate_text("Hello World and more text here", 28, "...");
/// assert_eq!(out, "Hello World and more...");
/// assert_eq!(truncate_text("short", 28, "..."), "short");
/// ```
pub fn truncate_text<'a>(text: &'a str, max_chars: usize, suffix: &str) -> Cow<'a, str> {
    if text.chars().count() <= max_chars {
        return Cow::Borrowed(text);
    }

    let suffix_len = suffix.chars().count();
    if max_chars <= suffix_len {
        return Cow::Owned(text.chars().take(max_chars).collect());
    }

    let budget = max_chars - suffix_len;
    let cut_byte = text
        .char_indices()
        .nth(budget)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    let window = &text[..cut_byte];

    let min_break = (budget as f64 * WORD_BREAK_WINDOW).floor() as usize;
    let head = match window.rfind(' ') {
        Some(space) if window[..space].chars().count() >= min_break => &window[..space],
        _ => window,
    };

    Cow::Owned(format!("{}{}", head.trim_end(), suffix))
}

/// Caps text at `max_chars` characters with a hard cut (no suffix).
pub fn cap_chars(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let mut text = text;
            text.truncate(idx);
            text
        }
        None => text,
    }
}

/// SEC-001: Strip control characters and ANSI escape sequences from text.
///
/// Feed titles and author names end up in databases, logs and terminals;
/// attacker-controlled feed XML can embed escape sequences in any of them.
///
/// Strips:
/// - ASCII control chars: 0x00-0x08, 0x0B-0x0C, 0x0E-0x1F, 0x7F
/// - ANSI CSI sequences: `\x1b[` ... (terminal byte 0x40-0x7E)
/// - ANSI OSC sequences: `\x1b]` ... (until BEL 0x07 or ST `\x1b\\`)
/// - Bare ESC (0x1b) not followed by `[` or `]`
///
/// Preserves: tab (0x09), newline (0x0A), carriage return (0x0D).
///
/// Returns `Cow::Borrowed` when the input contains no control characters (common case).
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    let len = bytes.len();

    let is_control = |b: u8| b == 0x1b || b == 0x7f || (b < 0x20 && b != 0x09 && b != 0x0a && b != 0x0d);

    if !bytes.iter().any(|&b| is_control(b)) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(len);
    let mut i = 0;

    while i < len {
        let b = bytes[i];

        if b == 0x1b {
            if i + 1 < len && bytes[i + 1] == b'[' {
                // CSI: skip parameter/intermediate bytes through the final byte
                i += 2;
                while i < len {
                    let c = bytes[i];
                    i += 1;
                    if (0x40..=0x7e).contains(&c) {
                        break;
                    }
                }
            } else if i + 1 < len && bytes[i + 1] == b']' {
                // OSC: skip until BEL or ST
                i += 2;
                while i < len {
                    if bytes[i] == 0x07 {
                        i += 1;
                        break;
                    }
                    if bytes[i] == 0x1b && i + 1 < len && bytes[i + 1] == b'\\' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            } else {
                i += 1;
            }
        } else if is_control(b) {
            i += 1;
        } else {
            let start = i;
            i += 1;
            while i < len && !is_control(bytes[i]) {
                i += 1;
            }
            // SAFETY: we only break on ASCII control bytes, which cannot appear
            // mid-codepoint in valid UTF-8, so s[start..i] is valid UTF-8.
            out.push_str(&s[start..i]);
        }
    }

    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_truncate_prefers_word_boundary() {
        let out = truncate_text("Hello World and more text here", 28, TRUNCATION_SUFFIX);
        assert!(out.ends_with("..."));
        assert!(out.chars().count() <= 28);
        assert_eq!(out, "Hello World and more...");
    }

    #[test]
    fn test_truncate_hard_cuts_when_space_is_early() {
        // Only space sits at index 2 of a 17-char window: far outside the last 20%
        let out = truncate_text("ab cdefghijklmnopqrstuvwxyz", 20, "...");
        assert_eq!(out, "ab cdefghijklmnop...");
    }

    #[test]
    fn test_truncate_short_text_is_borrowed() {
        let out = truncate_text("fits", 10, "...");
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn test_truncate_custom_suffix() {
        let out = truncate_text("one two three four five six", 16, " [more]");
        assert!(out.ends_with(" [more]"));
        assert!(out.chars().count() <= 16);
    }

    #[test]
    fn test_truncate_tiny_budget() {
        assert_eq!(truncate_text("abcdef", 2, "..."), "ab");
    }

    #[test]
    fn test_truncate_multibyte() {
        let out = truncate_text("日本語のテキストはとても長いです", 10, "...");
        assert_eq!(out.chars().count(), 10);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_cap_chars() {
        assert_eq!(cap_chars("abcdef".to_owned(), 3), "abc");
        assert_eq!(cap_chars("abc".to_owned(), 10), "abc");
        assert_eq!(cap_chars("日本語".to_owned(), 2), "日本");
    }

    #[test]
    fn test_strip_html_removes_tags_and_scripts() {
        let html = "<p>Hello <b>world</b></p><script>alert('x')</script><p>Second&nbsp;para &amp; more</p>";
        assert_eq!(strip_html(html), "Hello world\nSecond para & more");
    }

    #[test]
    fn test_strip_html_plain_text_passthrough() {
        assert_eq!(strip_html("  just   text  "), "just text");
    }

    #[test]
    fn test_strip_html_decodes_numeric_entities() {
        assert_eq!(strip_html("it&#8217;s&#x2014;done"), "it\u{2019}s\u{2014}done");
    }

    #[test]
    fn test_strip_html_decodes_named_entities() {
        assert_eq!(
            strip_html("<p>Caf&eacute; &trade; &euro;5 &hearts;</p>"),
            "Caf\u{e9} \u{2122} \u{20ac}5 \u{2665}"
        );
    }

    #[test]
    fn test_sanitize_removes_scripts_and_handlers() {
        let html = r#"<p onclick="evil()">Hi</p><script>alert(1)</script><iframe src="x"></iframe><a href="javascript:alert(1)">x</a>"#;
        let clean = sanitize_html(html);
        assert!(!clean.contains("onclick"));
        assert!(!clean.contains("script"));
        assert!(!clean.contains("iframe"));
        assert!(!clean.contains("javascript:"));
        assert!(clean.contains("<p>Hi</p>"));
    }

    #[test]
    fn test_sanitize_keeps_safe_links() {
        let clean = sanitize_html(r#"<a href="https://example.com/post">post</a>"#);
        assert!(clean.contains(r#"href="https://example.com/post""#));
        assert!(clean.contains("noopener"));
    }

    #[test]
    fn test_clean_description_reddit_boilerplate() {
        let html = r#"Interesting thing<br><br><br> submitted by <a href="https://www.reddit.com/user/bob">/u/bob</a> <a href="https://example.com">[link]</a> <a href="https://reddit.com/c">[comments]</a>"#;
        let cleaned = clean_description(html);
        assert!(!cleaned.contains("submitted by"));
        assert!(!cleaned.contains("[link]"));
        assert!(!cleaned.contains("[comments]"));
        assert!(cleaned.starts_with("Interesting thing<br>"));
        assert!(!cleaned.contains("<br><br>"));
    }

    #[test]
    fn test_clean_description_hacker_news_comments() {
        let html = r#"<a href="https://news.ycombinator.com/item?id=1">Comments</a>"#;
        assert_eq!(clean_description(html), "");
    }

    #[test]
    fn test_clean_description_empty_anchor() {
        assert_eq!(clean_description(r#"Text <a href="x"> </a>"#), "Text");
    }

    #[test]
    fn test_strip_control_chars_removes_ansi() {
        assert_eq!(strip_control_chars("\x1b[31mRed\x1b[0m"), "Red");
        assert_eq!(strip_control_chars("\x1b]0;title\x07safe"), "safe");
        assert_eq!(strip_control_chars("he\x00ll\x07o"), "hello");
    }

    #[test]
    fn test_strip_control_chars_clean_is_borrowed() {
        let input = "line1\nline2\ttabbed";
        assert!(matches!(strip_control_chars(input), Cow::Borrowed(_)));
    }

    proptest! {
        #[test]
        fn prop_truncate_never_exceeds_limit(text in "\\PC{0,200}", max in 4usize..120) {
            let out = truncate_text(&text, max, TRUNCATION_SUFFIX);
            prop_assert!(out.chars().count() <= max);
        }

        #[test]
        fn prop_truncate_is_prefix_plus_suffix(text in "[a-z ]{0,200}", max in 4usize..120) {
            let out = truncate_text(&text, max, TRUNCATION_SUFFIX);
            if text.chars().count() > max {
                let head = out.strip_suffix(TRUNCATION_SUFFIX).unwrap();
                prop_assert!(text.starts_with(head));
            } else {
                prop_assert_eq!(out.as_ref(), text.as_str());
            }
        }

        #[test]
        fn prop_strip_html_leaves_no_tags(text in "[a-z<>/ ]{0,100}") {
            let out = strip_html(&format!("<div>{text}</div>"));
            prop_assert!(!out.contains("<div>"));
        }
    }
}
