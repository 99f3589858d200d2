use thiserror::Error;
use url::Url;

/// Errors that can occur while normalizing a URL.
#[derive(Error, Debug)]
pub enum UrlError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Query parameters that only carry tracking state and never change the resource.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "utm_id",
    "fbclid",
    "gclid",
    "mc_cid",
    "mc_eid",
    "ref",
    "ref_src",
];

/// Parses a user-supplied URL, defaulting to `https://` when no scheme is given.
///
/// Only `http` and `https` are accepted.
pub fn parse_http_url(input: &str) -> Result<Url, UrlError> {
    let trimmed = input.trim();
    let url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{trimmed}"))?,
        Err(e) => return Err(e.into()),
    };

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingHost);
    }

    Ok(url)
}

/// Normalizes a URL string into the key used for discovery deduplication.
///
/// Two URLs that point at the same feed through cosmetic differences
/// (`www.` prefix, trailing slash, fragment, tracking parameters, parameter
/// order, default port) produce the same key.
///
/// # Examples
///
/// ```
/// use feedmill::util::normalize_url;
///
/// let a = normalize_url("https://www.Example.com/feed/?utm_source=x#top").unwrap();
/// let b = normalize_url("https://example.com/feed").unwrap();
/// assert_eq!(a, b);
/// ```
pub fn normalize_url(input: &str) -> Result<String, UrlError> {
    let url = parse_http_url(input)?;
    Ok(normalize_parsed(&url))
}

/// Normalizes an already-parsed URL. See [`normalize_url`].
pub fn normalize_parsed(url: &Url) -> String {
    let mut normalized = url.clone();

    normalized.set_fragment(None);

    // Url already lowercases the scheme and host and drops default ports
    if let Some(host) = normalized.host_str().map(str::to_owned) {
        if let Some(stripped) = host.strip_prefix("www.") {
            if let Err(e) = normalized.set_host(Some(stripped)) {
                tracing::warn!(host = %host, error = %e, "Failed to strip www. prefix");
            }
        }
    }

    let path = normalized.path().to_owned();
    if path.len() > 1 && path.ends_with('/') {
        normalized.set_path(path.trim_end_matches('/'));
    }

    if let Some(query) = normalized.query() {
        let mut params: Vec<&str> = query
            .split('&')
            .filter(|p| !p.is_empty())
            .filter(|p| {
                let key = p.split('=').next().unwrap_or("").to_lowercase();
                !TRACKING_PARAMS.contains(&key.as_str()) && !key.starts_with("utm_")
            })
            .collect();

        if params.is_empty() {
            normalized.set_query(None);
        } else {
            params.sort_unstable();
            let joined = params.join("&");
            normalized.set_query(Some(&joined));
        }
    }

    normalized.to_string()
}

/// Extracts the lowercase host of a URL, without a leading `www.`.
///
/// Returns `None` for unparsable input or URLs without a host.
pub fn extract_domain(input: &str) -> Option<String> {
    let url = parse_http_url(input).ok()?;
    let host = url.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").map(str::to_owned).unwrap_or(host))
}

/// Resolves a potentially relative URL against a base URL.
pub fn resolve_url(href: &str, base_url: &str) -> String {
    let href = href.trim();

    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_owned();
    }

    // SEC-014: Protocol-relative - use URL parser to normalize and prevent credential injection
    if href.starts_with("//") {
        let with_scheme = format!("https:{href}");
        if let Ok(parsed) = Url::parse(&with_scheme) {
            return parsed.to_string();
        }
    }

    if let Ok(base) = Url::parse(base_url) {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }

    href.to_owned()
}
