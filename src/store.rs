use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;

use crate::db::{Repository, ROUND_ROBIN_CURSOR_KEY};
use crate::error::{FeedError, NetworkError, Result};
use crate::feed::{
    item_key, normalize_summary, parse_feed, parse_opml, sanitize_feed_urls, validate_feed_url,
    validate_opml_url, DocumentFetching,
};
use crate::models::{Feed, ImportResult, Item, NewItem, RefreshStats};

/// Upper bound on concurrent outbound fetches during a full sweep.
const MAX_CONCURRENT_REFRESHES: usize = 4;

/// Intervals used when the scheduler asks the store to run one cycle.
#[derive(Debug, Clone, Copy)]
pub struct RefreshTuning {
    /// Target time for every feed to be refreshed roughly once.
    pub target_cycle: Duration,
    /// How often the scheduler ticks.
    pub tick: Duration,
}

impl Default for RefreshTuning {
    fn default() -> Self {
        Self {
            target_cycle: Duration::from_secs(60 * 60),
            tick: Duration::from_secs(5 * 60),
        }
    }
}

/// Committed-write notifications, enough for a read side to recompute
/// unread counts and item lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    FeedsChanged,
    ItemsChanged(i64),
}

/// The synchronization store: owns merge semantics, the round-robin
/// cursor and the single-flight guard for full sweeps.
pub struct FeedStore {
    pub repo: Repository,
    fetcher: Arc<dyn DocumentFetching>,
    tuning: RefreshTuning,
    /// Guards whole-store sweeps only. A direct `refresh` call can
    /// still race a sweep on the same feed; see `refresh`.
    busy: AtomicBool,
    events: broadcast::Sender<StoreEvent>,
}

impl FeedStore {
    pub fn new(repo: Repository, fetcher: Arc<dyn DocumentFetching>, tuning: RefreshTuning) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            repo,
            fetcher,
            tuning,
            busy: AtomicBool::new(false),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn tuning(&self) -> RefreshTuning {
        self.tuning
    }

    /// True while a full sweep is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn notify(&self, event: StoreEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Validate and add a feed. Adding a URL that already exists
    /// returns the stored feed instead of creating a duplicate.
    pub async fn add_feed(&self, url_string: &str) -> Result<Feed> {
        let url = validate_feed_url(url_string)?;
        let (feed, created) = self.repo.insert_feed_if_absent(url.to_string()).await?;
        if created {
            tracing::info!(url = %feed.url, "feed added");
            self.notify(StoreEvent::FeedsChanged);
        }
        Ok(feed)
    }

    /// Delete a feed and, via cascade, all its items. No-op when the
    /// feed is already gone.
    pub async fn delete_feed(&self, feed_id: i64) -> Result<()> {
        self.repo.delete_feed(feed_id).await?;
        self.notify(StoreEvent::FeedsChanged);
        Ok(())
    }

    /// The deterministic refresh ordering: order index ascending, URL
    /// ascending as tiebreak.
    pub async fn fetch_feeds_for_refresh(&self) -> Result<Vec<Feed>> {
        self.repo.get_feeds_for_refresh().await
    }

    pub async fn items(&self, feed_id: i64) -> Result<Vec<Item>> {
        self.repo.get_items(feed_id).await
    }

    pub async fn unread_count(&self, feed_id: i64) -> Result<i64> {
        self.repo.unread_count(feed_id).await
    }

    /// Fetch, parse and merge one feed.
    ///
    /// Not covered by the sweep guard: a direct call may race a
    /// scheduled sweep touching the same feed. The merge keying makes
    /// that safe for duplicates within one call but not across two
    /// interleaved ones; treated as an accepted gap.
    pub async fn refresh(&self, feed: &Feed) -> Result<RefreshStats> {
        let url = validate_feed_url(&feed.url)?;

        let document = self.fetcher.fetch(&url).await.map_err(|e| match e {
            NetworkError::SecureTransportRequired => FeedError::InsecureUrl,
            other => FeedError::Network(other),
        })?;

        let parsed = parse_feed(&document.bytes)?;
        let fetched = parsed.entries.len();

        // Key every stored item once, then walk the incoming entries,
        // skipping anything already present or already staged in this
        // merge.
        let existing = self.repo.get_items(feed.id).await?;
        let mut keys: HashSet<String> = existing
            .iter()
            .map(|item| {
                item_key(
                    item.guid.as_deref(),
                    item.link.as_deref(),
                    item.title.as_deref(),
                    item.pub_date,
                )
            })
            .collect();

        let mut new_items = Vec::new();
        for entry in &parsed.entries {
            let key = item_key(
                entry.guid.as_deref(),
                entry.link.as_deref(),
                entry.title.as_deref(),
                entry.pub_date,
            );
            if !keys.insert(key) {
                continue;
            }
            new_items.push(NewItem {
                guid: entry.guid.clone(),
                link: entry.link.clone(),
                title: entry.title.clone(),
                summary: normalize_summary(entry.summary.as_deref()),
                pub_date: entry.pub_date,
            });
        }

        let now = Utc::now();
        let inserted = if new_items.is_empty() {
            0
        } else {
            self.repo.insert_items(feed.id, new_items, now).await?
        };

        // Never overwrite stored metadata with emptiness; the refresh
        // timestamp is always stamped.
        let title = parsed
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let favicon = parsed
            .favicon_url
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());
        self.repo
            .update_feed_metadata(feed.id, title, favicon, now)
            .await?;

        self.notify(StoreEvent::ItemsChanged(feed.id));

        let stats = RefreshStats {
            fetched,
            inserted,
            deduped: fetched.saturating_sub(inserted),
        };
        tracing::debug!(
            url = %feed.url,
            fetched = stats.fetched,
            inserted = stats.inserted,
            deduped = stats.deduped,
            attempts = document.attempts,
            "feed refreshed"
        );
        Ok(stats)
    }

    /// Best-effort sweep over every feed. A busy flag keeps two sweeps
    /// from overlapping; per-feed failures are logged and skipped so a
    /// single bad feed never blocks the rest.
    pub async fn refresh_all_feeds(&self) {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("refresh-all already in flight, skipping");
            return;
        }

        let outcome = self.refresh_all_inner().await;
        self.busy.store(false, Ordering::SeqCst);

        if let Err(e) = outcome {
            tracing::warn!(error = %e, "refresh-all aborted before fetching");
        }
    }

    async fn refresh_all_inner(&self) -> Result<()> {
        let feeds = self.repo.get_feeds_for_refresh().await?;
        stream::iter(feeds)
            .for_each_concurrent(MAX_CONCURRENT_REFRESHES, |feed| async move {
                if let Err(e) = self.refresh(&feed).await {
                    tracing::warn!(url = %feed.url, error = %e, "feed refresh failed");
                }
            })
            .await;
        Ok(())
    }

    /// Refresh the feed after the one the persisted cursor points at.
    ///
    /// The cursor stores a URL, not an index, so it survives list
    /// reordering. It is persisted before the refresh is attempted and
    /// never rolled back: rotation always advances.
    pub async fn refresh_next_in_round_robin(&self) -> Result<()> {
        let feeds = self.repo.get_feeds_for_refresh().await?;
        if feeds.is_empty() {
            self.repo.delete_setting(ROUND_ROBIN_CURSOR_KEY).await?;
            return Ok(());
        }

        let cursor = self.repo.get_setting(ROUND_ROBIN_CURSOR_KEY).await?;
        let index = match cursor.and_then(|url| feeds.iter().position(|f| f.url == url)) {
            Some(last) => (last + 1) % feeds.len(),
            None => 0,
        };
        let feed = &feeds[index];

        self.repo
            .set_setting(ROUND_ROBIN_CURSOR_KEY, &feed.url)
            .await?;

        if let Err(e) = self.refresh(feed).await {
            tracing::warn!(url = %feed.url, error = %e, "round-robin refresh failed");
        }
        Ok(())
    }

    /// Advance the round robin by as many feeds as needed this tick so
    /// that a full pass completes roughly once per target cycle.
    pub async fn refresh_round_robin_batch(
        &self,
        target_cycle: Duration,
        tick: Duration,
    ) -> Result<()> {
        let feed_count = self.repo.get_feeds_for_refresh().await?.len();
        let batch = round_robin_batch_size(feed_count, target_cycle, tick);
        for _ in 0..batch {
            self.refresh_next_in_round_robin().await?;
        }
        Ok(())
    }

    /// Flip every unread item under the feed to read in one batch.
    pub async fn mark_all_read(&self, feed_id: i64) -> Result<()> {
        let changed = self.repo.mark_all_read(feed_id).await?;
        if changed > 0 {
            self.notify(StoreEvent::ItemsChanged(feed_id));
        }
        Ok(())
    }

    /// Set the starred flag; setting the value it already has performs
    /// no write.
    pub async fn set_starred(&self, item: &Item, starred: bool) -> Result<()> {
        let changed = self.repo.set_starred(item.id, starred).await?;
        if changed > 0 {
            self.notify(StoreEvent::ItemsChanged(item.feed_id));
        }
        Ok(())
    }

    pub async fn toggle_starred(&self, item: &Item) -> Result<()> {
        let changed = self.repo.toggle_starred(item.id).await?;
        if changed > 0 {
            self.notify(StoreEvent::ItemsChanged(item.feed_id));
        }
        Ok(())
    }

    /// Bulk import: validate → fetch → parse → sanitize → add → refresh.
    ///
    /// The call fails outright only up to the sanitize stage; per-feed
    /// refresh failures are collected into the result instead.
    pub async fn import_opml(&self, url_string: &str) -> Result<ImportResult> {
        let url = validate_opml_url(url_string)?;

        let document = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(FeedError::OpmlFetchFailed)?;

        let candidate_urls = parse_opml(&document.bytes)?;
        let sanitized = sanitize_feed_urls(candidate_urls);
        if sanitized.https_urls.is_empty() {
            return Err(FeedError::OpmlContainsNoValidFeeds);
        }

        let mut added = 0;
        let mut existing = 0;
        let mut feeds = Vec::with_capacity(sanitized.https_urls.len());
        for feed_url in &sanitized.https_urls {
            let (feed, created) = self.repo.insert_feed_if_absent(feed_url.clone()).await?;
            if created {
                added += 1;
            } else {
                existing += 1;
            }
            feeds.push(feed);
        }
        if added > 0 {
            self.notify(StoreEvent::FeedsChanged);
        }

        let mut refresh_failures = Vec::new();
        for feed in &feeds {
            if let Err(e) = self.refresh(feed).await {
                refresh_failures.push((feed.url.clone(), e.to_string()));
            }
        }

        tracing::info!(
            added,
            existing,
            skipped_non_https = sanitized.skipped_non_https,
            refresh_failures = refresh_failures.len(),
            "OPML import finished"
        );

        Ok(ImportResult {
            added,
            existing,
            feeds,
            skipped_non_https: sanitized.skipped_non_https,
            skipped_preview: sanitized.skipped_preview,
            refresh_failures,
        })
    }
}

/// How many round-robin steps one tick should take. Zero when either
/// interval is non-positive (the batch call becomes a no-op).
pub fn round_robin_batch_size(feed_count: usize, target_cycle: Duration, tick: Duration) -> usize {
    if target_cycle.is_zero() || tick.is_zero() {
        return 0;
    }
    let ratio = (tick.as_secs_f64() / target_cycle.as_secs_f64()).min(1.0);
    let scaled = (feed_count as f64 * ratio).ceil() as usize;
    scaled.clamp(1, feed_count.max(1))
}
