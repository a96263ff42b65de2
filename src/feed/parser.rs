use feed_rs::model::FeedType;

use crate::error::{FeedError, Result};
use crate::models::{FeedFormat, ParsedEntry, ParsedFeed};

/// Parse a raw payload as RSS 2.0, Atom or JSON Feed.
///
/// Format detection is delegated to feed-rs; the detected format is
/// kept as a tag because a few fields map differently per format (see
/// `map_feed`). Anything unrecognized fails with `ParseFailed` and no
/// partial results.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed> {
    // Suppress feed-rs's synthesized entry ids: the deduplicator must
    // only see guids the provider actually assigned.
    let parser = feed_rs::parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build();

    let feed = parser.parse(bytes).map_err(|e| {
        tracing::debug!("feed parse failed: {}", e);
        FeedError::ParseFailed
    })?;

    Ok(map_feed(feed))
}

fn map_feed(feed: feed_rs::model::Feed) -> ParsedFeed {
    let format = match feed.feed_type {
        FeedType::Atom => FeedFormat::Atom,
        FeedType::JSON => FeedFormat::Json,
        FeedType::RSS0 | FeedType::RSS1 | FeedType::RSS2 => FeedFormat::Rss,
    };

    // RSS carries its channel image in `logo`; Atom and JSON Feed use
    // `icon` as the primary small image.
    let favicon_url = match format {
        FeedFormat::Rss => feed.logo.map(|i| i.uri).or(feed.icon.map(|i| i.uri)),
        FeedFormat::Atom | FeedFormat::Json => {
            feed.icon.map(|i| i.uri).or(feed.logo.map(|i| i.uri))
        }
    };

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            // Atom's mandatory timestamp is `updated`; RSS and JSON
            // Feed publish `pubDate`/`date_published`.
            let pub_date = match format {
                FeedFormat::Atom => entry.updated.or(entry.published),
                FeedFormat::Rss | FeedFormat::Json => entry.published.or(entry.updated),
            };

            ParsedEntry {
                guid: Some(entry.id).filter(|id| !id.is_empty()),
                link: entry.links.first().map(|l| l.href.clone()),
                title: entry.title.map(|t| t.content),
                summary: entry.summary.map(|t| t.content),
                pub_date,
            }
        })
        .collect();

    ParsedFeed {
        format,
        title: feed.title.map(|t| t.content),
        favicon_url,
        entries,
    }
}
