use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A subscribed feed as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    /// Canonical URL, unique across the store.
    pub url: String,
    pub title: Option<String>,
    pub favicon_url: Option<String>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    /// Monotonically increasing at creation; drives display order and
    /// the refresh ordering (order_index ASC, url ASC).
    pub order_index: i64,
    pub created_at: DateTime<Utc>,
}

/// A stored item belonging to exactly one feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub feed_id: i64,
    pub guid: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    /// Plain text; HTML is stripped during the merge step.
    pub summary: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub is_starred: bool,
    /// Insert time, used as a stable sort tiebreak when pub_date is
    /// absent or equal.
    pub created_at: DateTime<Utc>,
}

/// An item staged for insertion during a refresh merge.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub guid: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
}

/// Source format of a parsed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Rss,
    Atom,
    Json,
}

/// Normalized parse output shared by all formats.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub format: FeedFormat,
    pub title: Option<String>,
    pub favicon_url: Option<String>,
    pub entries: Vec<ParsedEntry>,
}

#[derive(Debug, Clone)]
pub struct ParsedEntry {
    pub guid: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    /// Raw summary as delivered by the provider; not yet normalized.
    pub summary: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
}

/// Outcome of a single feed refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub fetched: usize,
    pub inserted: usize,
    /// fetched - inserted, floored at 0.
    pub deduped: usize,
}

/// Outcome of an OPML bulk import.
#[derive(Debug, Clone)]
pub struct ImportResult {
    /// Feeds newly created by this import.
    pub added: usize,
    /// Feeds that already existed in the store.
    pub existing: usize,
    /// All feeds involved, in document order.
    pub feeds: Vec<Feed>,
    pub skipped_non_https: usize,
    /// Capped preview of the skipped non-https URLs.
    pub skipped_preview: Vec<String>,
    /// Per-feed refresh failures as (url, reason); the import itself
    /// still succeeds.
    pub refresh_failures: Vec<(String, String)>,
}

impl ImportResult {
    pub fn imported(&self) -> usize {
        self.added + self.existing
    }
}
