//! Integration tests for the synchronization engine: add, refresh/merge,
//! round-robin scheduling and OPML import.
//!
//! Each test creates its own in-memory SQLite database and drives the
//! store through a stub fetcher, so nothing touches the network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::Url;

use feedsync::db::{Repository, ROUND_ROBIN_CURSOR_KEY};
use feedsync::error::{FeedError, NetworkError};
use feedsync::feed::{DocumentFetching, FetchedDocument};
use feedsync::store::{FeedStore, RefreshTuning, StoreEvent};
use std::time::Duration;

#[derive(Default)]
struct StubFetcher {
    responses: Mutex<HashMap<String, Vec<u8>>>,
    log: Mutex<Vec<String>>,
}

impl StubFetcher {
    fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), body.into());
    }

    fn fetched_urls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentFetching for StubFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedDocument, NetworkError> {
        let key = url.to_string();
        self.log.lock().unwrap().push(key.clone());
        match self.responses.lock().unwrap().get(&key) {
            Some(bytes) => Ok(FetchedDocument {
                bytes: bytes.clone(),
                attempts: 1,
            }),
            None => Err(NetworkError::Connect(format!("no stub for {key}"))),
        }
    }
}

async fn test_store() -> (FeedStore, Arc<StubFetcher>) {
    let repo = Repository::new(":memory:").await.unwrap();
    let fetcher = Arc::new(StubFetcher::default());
    let store = FeedStore::new(repo, fetcher.clone(), RefreshTuning::default());
    (store, fetcher)
}

fn rss_doc(feed_title: &str, items: &[(&str, &str)]) -> Vec<u8> {
    let mut body = String::new();
    for (guid, title) in items {
        body.push_str(&format!(
            "<item><guid>{guid}</guid><title>{title}</title>\
             <link>https://example.com/{guid}</link>\
             <description>&lt;p&gt;summary of {guid}&lt;/p&gt;</description></item>"
        ));
    }
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>{feed_title}</title><link>https://example.com</link><description>d</description>{body}</channel></rss>"#
    )
    .into_bytes()
}

// ============================================================================
// add_feed
// ============================================================================

#[tokio::test]
async fn add_feed_rejects_http_as_insecure() {
    let (store, _) = test_store().await;
    assert!(matches!(
        store.add_feed("http://example.com/feed.xml").await,
        Err(FeedError::InsecureUrl)
    ));
    assert!(matches!(
        store.add_feed("definitely not a url").await,
        Err(FeedError::InvalidUrl)
    ));
    assert!(store.add_feed("https://example.com/feed.xml").await.is_ok());
}

#[tokio::test]
async fn add_feed_twice_returns_existing_feed() {
    let (store, _) = test_store().await;
    let first = store.add_feed("https://example.com/feed.xml").await.unwrap();
    let second = store
        .add_feed("  https://example.com/feed.xml ")
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(store.fetch_feeds_for_refresh().await.unwrap().len(), 1);
}

#[tokio::test]
async fn add_feed_assigns_increasing_order_indices() {
    let (store, _) = test_store().await;
    let a = store.add_feed("https://example.com/a.xml").await.unwrap();
    let b = store.add_feed("https://example.com/b.xml").await.unwrap();
    assert_eq!(a.order_index, 0);
    assert_eq!(b.order_index, 1);
}

#[tokio::test]
async fn add_feed_emits_change_event() {
    let (store, _) = test_store().await;
    let mut events = store.subscribe();
    store.add_feed("https://example.com/feed.xml").await.unwrap();
    assert_eq!(events.recv().await.unwrap(), StoreEvent::FeedsChanged);
}

// ============================================================================
// refresh / merge
// ============================================================================

#[tokio::test]
async fn refresh_inserts_then_fully_dedups_unchanged_document() {
    let (store, fetcher) = test_store().await;
    let feed = store.add_feed("https://example.com/feed.xml").await.unwrap();
    fetcher.serve(
        "https://example.com/feed.xml",
        rss_doc("Example", &[("p1", "One"), ("p2", "Two")]),
    );

    let stats = store.refresh(&feed).await.unwrap();
    assert_eq!(stats.fetched, 2);
    assert_eq!(stats.inserted, 2);
    assert_eq!(stats.deduped, 0);

    let stats = store.refresh(&feed).await.unwrap();
    assert_eq!(stats.fetched, 2);
    assert_eq!(stats.inserted, 0);
    assert_eq!(stats.deduped, 2);

    assert_eq!(store.items(feed.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn refresh_inserts_only_novel_entries() {
    let (store, fetcher) = test_store().await;
    let feed = store.add_feed("https://example.com/feed.xml").await.unwrap();

    fetcher.serve(
        "https://example.com/feed.xml",
        rss_doc("Example", &[("p1", "One")]),
    );
    store.refresh(&feed).await.unwrap();

    fetcher.serve(
        "https://example.com/feed.xml",
        rss_doc("Example", &[("p1", "One"), ("p2", "Two")]),
    );
    let stats = store.refresh(&feed).await.unwrap();
    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.deduped, 1);
}

#[tokio::test]
async fn refresh_normalizes_summaries_and_defaults_flags() {
    let (store, fetcher) = test_store().await;
    let feed = store.add_feed("https://example.com/feed.xml").await.unwrap();
    fetcher.serve(
        "https://example.com/feed.xml",
        rss_doc("Example", &[("p1", "One")]),
    );
    store.refresh(&feed).await.unwrap();

    let items = store.items(feed.id).await.unwrap();
    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.summary.as_deref(), Some("summary of p1"));
    assert!(!item.is_read);
    assert!(!item.is_starred);
}

#[tokio::test]
async fn refresh_updates_metadata_and_stamps_timestamp() {
    let (store, fetcher) = test_store().await;
    let feed = store.add_feed("https://example.com/feed.xml").await.unwrap();
    assert!(feed.title.is_none());
    assert!(feed.last_refreshed_at.is_none());

    fetcher.serve(
        "https://example.com/feed.xml",
        rss_doc("Example Feed", &[("p1", "One")]),
    );
    store.refresh(&feed).await.unwrap();

    let feed = store.repo.get_feed(feed.id).await.unwrap().unwrap();
    assert_eq!(feed.title.as_deref(), Some("Example Feed"));
    assert!(feed.last_refreshed_at.is_some());
}

#[tokio::test]
async fn refresh_never_overwrites_title_with_emptiness() {
    let (store, fetcher) = test_store().await;
    let feed = store.add_feed("https://example.com/feed.xml").await.unwrap();

    fetcher.serve(
        "https://example.com/feed.xml",
        rss_doc("Keep Me", &[("p1", "One")]),
    );
    store.refresh(&feed).await.unwrap();

    // Same document with a blank channel title.
    fetcher.serve(
        "https://example.com/feed.xml",
        rss_doc("  ", &[("p1", "One")]),
    );
    store.refresh(&feed).await.unwrap();

    let feed = store.repo.get_feed(feed.id).await.unwrap().unwrap();
    assert_eq!(feed.title.as_deref(), Some("Keep Me"));
}

#[tokio::test]
async fn refresh_propagates_fetch_and_parse_errors() {
    let (store, fetcher) = test_store().await;
    let feed = store.add_feed("https://example.com/feed.xml").await.unwrap();

    // Nothing served: network error.
    assert!(matches!(
        store.refresh(&feed).await,
        Err(FeedError::Network(_))
    ));

    fetcher.serve("https://example.com/feed.xml", &b"not a feed"[..]);
    assert!(matches!(
        store.refresh(&feed).await,
        Err(FeedError::ParseFailed)
    ));
}

// ============================================================================
// round robin
// ============================================================================

async fn three_feeds(store: &FeedStore, fetcher: &StubFetcher) -> Vec<String> {
    let urls = vec![
        "https://example.com/a.xml".to_string(),
        "https://example.com/b.xml".to_string(),
        "https://example.com/c.xml".to_string(),
    ];
    for url in &urls {
        store.add_feed(url).await.unwrap();
        fetcher.serve(url, rss_doc("F", &[("p", "T")]));
    }
    urls
}

#[tokio::test]
async fn round_robin_walks_feeds_in_order_and_wraps() {
    let (store, fetcher) = test_store().await;
    let urls = three_feeds(&store, &fetcher).await;

    for _ in 0..4 {
        store.refresh_next_in_round_robin().await.unwrap();
    }

    assert_eq!(
        fetcher.fetched_urls(),
        vec![
            urls[0].clone(),
            urls[1].clone(),
            urls[2].clone(),
            urls[0].clone()
        ]
    );
    // Cursor persisted as the last refreshed URL.
    let cursor = store.repo.get_setting(ROUND_ROBIN_CURSOR_KEY).await.unwrap();
    assert_eq!(cursor.as_deref(), Some(urls[0].as_str()));
}

#[tokio::test]
async fn round_robin_advances_past_a_failing_feed() {
    let (store, fetcher) = test_store().await;
    let urls = three_feeds(&store, &fetcher).await;

    // First feed now fails; the cursor must still advance.
    fetcher.serve(&urls[0], &b"broken"[..]);
    store.refresh_next_in_round_robin().await.unwrap();
    store.refresh_next_in_round_robin().await.unwrap();

    assert_eq!(fetcher.fetched_urls(), vec![urls[0].clone(), urls[1].clone()]);
}

#[tokio::test]
async fn stale_cursor_resets_to_first_feed() {
    let (store, fetcher) = test_store().await;
    let urls = three_feeds(&store, &fetcher).await;

    store
        .repo
        .set_setting(ROUND_ROBIN_CURSOR_KEY, "https://gone.example/feed.xml")
        .await
        .unwrap();
    store.refresh_next_in_round_robin().await.unwrap();

    assert_eq!(fetcher.fetched_urls(), vec![urls[0].clone()]);
}

#[tokio::test]
async fn round_robin_on_empty_store_clears_cursor() {
    let (store, _) = test_store().await;
    store
        .repo
        .set_setting(ROUND_ROBIN_CURSOR_KEY, "https://gone.example/feed.xml")
        .await
        .unwrap();

    store.refresh_next_in_round_robin().await.unwrap();

    let cursor = store.repo.get_setting(ROUND_ROBIN_CURSOR_KEY).await.unwrap();
    assert_eq!(cursor, None);
}

#[tokio::test]
async fn batch_refreshes_one_feed_per_tick_on_long_cycle() {
    let (store, fetcher) = test_store().await;
    three_feeds(&store, &fetcher).await;

    store
        .refresh_round_robin_batch(Duration::from_secs(3600), Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(fetcher.fetched_urls().len(), 1);

    store
        .refresh_round_robin_batch(Duration::from_secs(3600), Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(fetcher.fetched_urls().len(), 2);
}

#[tokio::test]
async fn batch_scales_with_tick_to_cycle_ratio() {
    let (store, fetcher) = test_store().await;
    for i in 0..5 {
        let url = format!("https://example.com/{i}.xml");
        store.add_feed(&url).await.unwrap();
        fetcher.serve(&url, rss_doc("F", &[("p", "T")]));
    }

    // ceil(5 * 60/120) = 3 feeds on the first tick.
    store
        .refresh_round_robin_batch(Duration::from_secs(120), Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(fetcher.fetched_urls().len(), 3);
}

#[tokio::test]
async fn batch_with_nonpositive_intervals_is_a_noop() {
    let (store, fetcher) = test_store().await;
    three_feeds(&store, &fetcher).await;

    store
        .refresh_round_robin_batch(Duration::ZERO, Duration::from_secs(60))
        .await
        .unwrap();
    store
        .refresh_round_robin_batch(Duration::from_secs(60), Duration::ZERO)
        .await
        .unwrap();
    assert!(fetcher.fetched_urls().is_empty());
}

// ============================================================================
// read / starred
// ============================================================================

#[tokio::test]
async fn mark_all_read_flips_every_unread_item() {
    let (store, fetcher) = test_store().await;
    let feed = store.add_feed("https://example.com/feed.xml").await.unwrap();
    fetcher.serve(
        "https://example.com/feed.xml",
        rss_doc("F", &[("p1", "One"), ("p2", "Two"), ("p3", "Three")]),
    );
    store.refresh(&feed).await.unwrap();
    assert_eq!(store.unread_count(feed.id).await.unwrap(), 3);

    store.mark_all_read(feed.id).await.unwrap();
    assert_eq!(store.unread_count(feed.id).await.unwrap(), 0);
}

#[tokio::test]
async fn set_starred_skips_the_write_when_unchanged() {
    let (store, fetcher) = test_store().await;
    let feed = store.add_feed("https://example.com/feed.xml").await.unwrap();
    fetcher.serve("https://example.com/feed.xml", rss_doc("F", &[("p1", "One")]));
    store.refresh(&feed).await.unwrap();
    let item = store.items(feed.id).await.unwrap().remove(0);

    assert_eq!(store.repo.set_starred(item.id, true).await.unwrap(), 1);
    assert_eq!(store.repo.set_starred(item.id, true).await.unwrap(), 0);

    store.toggle_starred(&item).await.unwrap();
    let item = store.repo.get_item(item.id).await.unwrap().unwrap();
    assert!(!item.is_starred);
}

#[tokio::test]
async fn toggle_starred_on_a_deleted_item_emits_no_event() {
    let (store, fetcher) = test_store().await;
    let feed = store.add_feed("https://example.com/feed.xml").await.unwrap();
    fetcher.serve("https://example.com/feed.xml", rss_doc("F", &[("p1", "One")]));
    store.refresh(&feed).await.unwrap();
    let item = store.items(feed.id).await.unwrap().remove(0);

    assert_eq!(store.repo.toggle_starred(item.id).await.unwrap(), 1);

    // The cascade removes the item; toggling it again touches no row.
    store.delete_feed(feed.id).await.unwrap();
    let mut events = store.subscribe();
    assert_eq!(store.repo.toggle_starred(item.id).await.unwrap(), 0);
    store.toggle_starred(&item).await.unwrap();
    assert!(matches!(
        events.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn legacy_rows_without_a_read_flag_count_as_unread() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("feeds.db");
    let db_path = db_path.to_str().unwrap();

    let feed_id = {
        let repo = Repository::new(db_path).await.unwrap();
        let (feed, _) = repo
            .insert_feed_if_absent("https://example.com/feed.xml".to_string())
            .await
            .unwrap();
        feed.id
    };

    // Rows imported from older databases carry an unset read flag.
    {
        let conn = rusqlite::Connection::open(db_path).unwrap();
        conn.execute(
            "INSERT INTO items (feed_id, guid, title, is_read) VALUES (?1, 'legacy', 'Old', NULL)",
            rusqlite::params![feed_id],
        )
        .unwrap();
    }

    let repo = Repository::new(db_path).await.unwrap();
    assert_eq!(repo.unread_count(feed_id).await.unwrap(), 1);
    let items = repo.get_items(feed_id).await.unwrap();
    assert!(!items[0].is_read);

    assert_eq!(repo.mark_all_read(feed_id).await.unwrap(), 1);
    assert_eq!(repo.unread_count(feed_id).await.unwrap(), 0);
    assert!(repo.get_items(feed_id).await.unwrap()[0].is_read);
}

// ============================================================================
// delete
// ============================================================================

#[tokio::test]
async fn delete_feed_cascades_to_items_and_is_idempotent() {
    let (store, fetcher) = test_store().await;
    let feed = store.add_feed("https://example.com/feed.xml").await.unwrap();
    fetcher.serve("https://example.com/feed.xml", rss_doc("F", &[("p1", "One")]));
    store.refresh(&feed).await.unwrap();

    store.delete_feed(feed.id).await.unwrap();
    assert!(store.fetch_feeds_for_refresh().await.unwrap().is_empty());
    assert!(store.items(feed.id).await.unwrap().is_empty());

    // Already removed: no-op.
    store.delete_feed(feed.id).await.unwrap();
}

#[tokio::test]
async fn cursor_survives_a_database_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("feeds.db");
    let db_path = db_path.to_str().unwrap();

    {
        let repo = Repository::new(db_path).await.unwrap();
        repo.set_setting(ROUND_ROBIN_CURSOR_KEY, "https://example.com/a.xml")
            .await
            .unwrap();
    }

    let repo = Repository::new(db_path).await.unwrap();
    let cursor = repo.get_setting(ROUND_ROBIN_CURSOR_KEY).await.unwrap();
    assert_eq!(cursor.as_deref(), Some("https://example.com/a.xml"));
}

// ============================================================================
// OPML import
// ============================================================================

const OPML_MIXED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0"><head><title>subs</title></head><body>
  <outline text="ok" type="rss" xmlUrl="https://example.com/a.xml"/>
  <outline text="plain1" type="rss" xmlUrl="http://example.com/b.xml"/>
  <outline text="plain2" type="rss" xmlUrl="http://example.com/c.xml"/>
  <outline text="folder"/>
</body></opml>"#;

#[tokio::test]
async fn import_opml_partitions_and_refreshes() {
    let (store, fetcher) = test_store().await;
    fetcher.serve("https://example.com/subs.opml", OPML_MIXED.as_bytes().to_vec());
    fetcher.serve("https://example.com/a.xml", rss_doc("A", &[("p1", "One")]));

    let result = store
        .import_opml("https://example.com/subs.opml")
        .await
        .unwrap();

    assert_eq!(result.added, 1);
    assert_eq!(result.existing, 0);
    assert_eq!(result.imported(), 1);
    assert_eq!(result.skipped_non_https, 2);
    assert_eq!(
        result.skipped_preview,
        vec!["http://example.com/b.xml", "http://example.com/c.xml"]
    );
    assert!(result.refresh_failures.is_empty());
    assert_eq!(result.feeds.len(), 1);

    // The imported feed was refreshed as part of the pipeline.
    let feed = &result.feeds[0];
    assert_eq!(store.items(feed.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn import_opml_counts_existing_feeds_on_reimport() {
    let (store, fetcher) = test_store().await;
    fetcher.serve("https://example.com/subs.opml", OPML_MIXED.as_bytes().to_vec());
    fetcher.serve("https://example.com/a.xml", rss_doc("A", &[("p1", "One")]));

    store.import_opml("https://example.com/subs.opml").await.unwrap();
    let result = store
        .import_opml("https://example.com/subs.opml")
        .await
        .unwrap();

    assert_eq!(result.added, 0);
    assert_eq!(result.existing, 1);
    assert_eq!(result.imported(), 1);
}

#[tokio::test]
async fn import_opml_rejects_non_https_source() {
    let (store, _) = test_store().await;
    assert!(matches!(
        store.import_opml("http://example.com/subs.opml").await,
        Err(FeedError::InvalidOpmlUrl)
    ));
}

#[tokio::test]
async fn import_opml_fails_when_fetch_fails() {
    let (store, _) = test_store().await;
    assert!(matches!(
        store.import_opml("https://example.com/missing.opml").await,
        Err(FeedError::OpmlFetchFailed(_))
    ));
}

#[tokio::test]
async fn import_opml_fails_on_unparseable_document() {
    let (store, fetcher) = test_store().await;
    fetcher.serve("https://example.com/subs.opml", &b"<html></html>"[..]);
    assert!(matches!(
        store.import_opml("https://example.com/subs.opml").await,
        Err(FeedError::OpmlParseFailed)
    ));
}

#[tokio::test]
async fn import_opml_with_no_https_feeds_fails() {
    let (store, fetcher) = test_store().await;
    let doc = r#"<?xml version="1.0"?><opml version="2.0"><head/><body>
      <outline text="plain" type="rss" xmlUrl="http://example.com/b.xml"/>
    </body></opml>"#;
    fetcher.serve("https://example.com/subs.opml", doc.as_bytes().to_vec());
    assert!(matches!(
        store.import_opml("https://example.com/subs.opml").await,
        Err(FeedError::OpmlContainsNoValidFeeds)
    ));
}

#[tokio::test]
async fn import_opml_collects_per_feed_refresh_failures() {
    let (store, fetcher) = test_store().await;
    let doc = r#"<?xml version="1.0"?><opml version="2.0"><head/><body>
      <outline text="ok" type="rss" xmlUrl="https://example.com/a.xml"/>
      <outline text="dead" type="rss" xmlUrl="https://example.com/dead.xml"/>
    </body></opml>"#;
    fetcher.serve("https://example.com/subs.opml", doc.as_bytes().to_vec());
    fetcher.serve("https://example.com/a.xml", rss_doc("A", &[("p1", "One")]));

    let result = store
        .import_opml("https://example.com/subs.opml")
        .await
        .unwrap();

    assert_eq!(result.imported(), 2);
    assert_eq!(result.refresh_failures.len(), 1);
    assert_eq!(result.refresh_failures[0].0, "https://example.com/dead.xml");
}

// ============================================================================
// refresh all
// ============================================================================

#[tokio::test]
async fn refresh_all_swallows_per_feed_errors() {
    let (store, fetcher) = test_store().await;
    let urls = three_feeds(&store, &fetcher).await;
    // Middle feed serves garbage.
    fetcher.serve(&urls[1], &b"broken"[..]);

    store.refresh_all_feeds().await;

    let feeds = store.fetch_feeds_for_refresh().await.unwrap();
    assert_eq!(store.items(feeds[0].id).await.unwrap().len(), 1);
    assert!(store.items(feeds[1].id).await.unwrap().is_empty());
    assert_eq!(store.items(feeds[2].id).await.unwrap().len(), 1);
    assert!(!store.is_refreshing());
}
