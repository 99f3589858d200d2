//! HTTP plumbing shared by the validator, discovery services and the fetcher.

use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use std::time::Duration;

use super::fetcher::FetchError;
use super::settings::IngestSettings;

/// `Accept` header for feed requests.
pub const FEED_ACCEPT: &str = "application/rss+xml, application/atom+xml, application/rdf+xml, \
                               application/feed+json, application/json;q=0.9, \
                               application/xml;q=0.9, text/xml;q=0.9, */*;q=0.8";

/// `Accept` header for page scrapes.
pub const HTML_ACCEPT: &str = "text/html, application/xhtml+xml;q=0.9, */*;q=0.5";

const MAX_REDIRECTS: usize = 10;

/// Response body plus the metadata callers need after redirects.
#[derive(Debug)]
pub struct FetchedBody {
    /// URL after following redirects
    pub final_url: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Builds the shared HTTP client.
pub fn build_client(settings: &IngestSettings) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(settings.user_agent.clone())
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .connect_timeout(settings.discovery_timeout)
        .build()
}

/// GET `url` and read the body, bounded by `timeout` for the whole exchange.
///
/// Non-2xx responses fail with [`FetchError::HttpStatus`].
pub async fn fetch_body(
    client: &reqwest::Client,
    url: &str,
    accept: &str,
    settings: &IngestSettings,
    timeout: Duration,
) -> Result<FetchedBody, FetchError> {
    let request = async {
        let response = client
            .get(url)
            .header(USER_AGENT, settings.user_agent.as_str())
            .header(ACCEPT, accept)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = read_limited_bytes(response, settings.max_body_bytes).await?;

        Ok(FetchedBody {
            final_url,
            content_type,
            bytes,
        })
    };

    tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| FetchError::Timeout)?
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e)
    }
}

/// Whether a `Content-Type` looks like something a feed could be served as.
///
/// Plenty of feeds are served as `text/html` or `application/octet-stream`,
/// so callers only warn on a mismatch.
pub fn is_feed_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    essence.contains("xml")
        || essence.contains("rss")
        || essence.contains("atom")
        || essence.contains("json")
        || essence == "text/plain"
}

/// Reads a response body, enforcing `limit` both on the declared
/// Content-Length and on the streamed bytes.
pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(map_reqwest_error)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // EDGE-005: A dropped connection can end the stream early
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
