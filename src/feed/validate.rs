use url::Url;

use crate::error::{FeedError, Result};

/// Validate a raw feed URL string.
///
/// Trims whitespace and requires an absolute https URL. A well-formed
/// http URL is rejected as insecure, which is a different user-facing
/// failure than a malformed one.
pub fn validate_feed_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).map_err(|_| FeedError::InvalidUrl)?;
    match url.scheme() {
        "https" => Ok(url),
        "http" => Err(FeedError::InsecureUrl),
        _ => Err(FeedError::InvalidUrl),
    }
}

/// Validate an OPML source URL. Https only; there is no http fallback,
/// and every failure maps to the same OPML-specific error.
pub fn validate_opml_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).map_err(|_| FeedError::InvalidOpmlUrl)?;
    if url.scheme() != "https" {
        return Err(FeedError::InvalidOpmlUrl);
    }
    Ok(url)
}
