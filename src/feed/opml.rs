use std::collections::HashSet;

use opml::{Outline, OPML};
use url::Url;

use crate::error::{FeedError, Result};

/// How many skipped non-https URLs an import result retains verbatim.
pub const SKIPPED_PREVIEW_LIMIT: usize = 5;

/// Extract candidate feed URLs from an OPML document.
///
/// Outline elements are scanned recursively in document order; those
/// without an `xmlUrl` attribute (folders, separators) are traversed
/// but contribute nothing themselves.
pub fn parse_opml(bytes: &[u8]) -> Result<Vec<String>> {
    let text = String::from_utf8_lossy(bytes);
    let document = OPML::from_str(&text).map_err(|e| {
        tracing::debug!("OPML parse failed: {}", e);
        FeedError::OpmlParseFailed
    })?;

    let mut urls = Vec::new();
    for outline in &document.body.outlines {
        collect_outline_urls(outline, &mut urls);
    }
    Ok(urls)
}

fn collect_outline_urls(outline: &Outline, urls: &mut Vec<String>) {
    if let Some(xml_url) = &outline.xml_url {
        urls.push(xml_url.clone());
    }
    for child in &outline.outlines {
        collect_outline_urls(child, urls);
    }
}

/// Outcome of sanitizing a raw OPML URL list.
#[derive(Debug, Clone, Default)]
pub struct SanitizedOpml {
    /// Canonical https URLs, first occurrence order, duplicates removed.
    pub https_urls: Vec<String>,
    pub skipped_non_https: usize,
    pub skipped_preview: Vec<String>,
}

/// Trim and partition candidate URLs: https URLs are kept (deduplicated
/// by canonical form), well-formed non-https URLs are counted as
/// skipped, and empty or unparseable strings are dropped outright.
pub fn sanitize_feed_urls(raw_urls: Vec<String>) -> SanitizedOpml {
    let mut result = SanitizedOpml::default();
    let mut seen_https = HashSet::new();
    let mut seen_skipped = HashSet::new();

    for raw in raw_urls {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(url) = Url::parse(trimmed) else {
            continue;
        };
        let canonical = url.to_string();

        if url.scheme() == "https" {
            if seen_https.insert(canonical.clone()) {
                result.https_urls.push(canonical);
            }
        } else if seen_skipped.insert(canonical.clone()) {
            result.skipped_non_https += 1;
            if result.skipped_preview.len() < SKIPPED_PREVIEW_LIMIT {
                result.skipped_preview.push(canonical);
            }
        }
    }

    result
}
