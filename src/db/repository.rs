use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{Feed, Item, NewItem};

use super::schema::SCHEMA;

/// Persisted key of the round-robin cursor (the URL of the last feed
/// refreshed).
pub const ROUND_ROBIN_CURSOR_KEY: &str = "round_robin_cursor";

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Feed operations

    /// Insert a feed with the next order index, or return the existing
    /// row when the URL is already stored. The bool is true when a new
    /// feed was created.
    pub async fn insert_feed_if_absent(&self, url: String) -> Result<(Feed, bool)> {
        let result = self
            .conn
            .call(move |conn| {
                let existing = conn
                    .query_row(
                        "SELECT id, url, title, favicon_url, last_refreshed_at, order_index, created_at
                         FROM feeds WHERE url = ?1",
                        params![url],
                        |row| Ok(feed_from_row(row)),
                    )
                    .optional()?;
                if let Some(feed) = existing {
                    return Ok((feed, false));
                }

                let next_order: i64 = conn.query_row(
                    "SELECT COALESCE(MAX(order_index) + 1, 0) FROM feeds",
                    [],
                    |row| row.get(0),
                )?;
                conn.execute(
                    "INSERT INTO feeds (url, order_index) VALUES (?1, ?2)",
                    params![url, next_order],
                )?;
                let id = conn.last_insert_rowid();
                let feed = conn.query_row(
                    "SELECT id, url, title, favicon_url, last_refreshed_at, order_index, created_at
                     FROM feeds WHERE id = ?1",
                    params![id],
                    |row| Ok(feed_from_row(row)),
                )?;
                Ok((feed, true))
            })
            .await?;
        Ok(result)
    }

    pub async fn get_feed(&self, id: i64) -> Result<Option<Feed>> {
        let feed = self
            .conn
            .call(move |conn| {
                let feed = conn
                    .query_row(
                        "SELECT id, url, title, favicon_url, last_refreshed_at, order_index, created_at
                         FROM feeds WHERE id = ?1",
                        params![id],
                        |row| Ok(feed_from_row(row)),
                    )
                    .optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    /// Ordered list backing every refresh sweep: order_index ascending
    /// with URL as a deterministic tiebreak. The round-robin cursor
    /// relies on this ordering being stable.
    pub async fn get_feeds_for_refresh(&self) -> Result<Vec<Feed>> {
        let feeds = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, url, title, favicon_url, last_refreshed_at, order_index, created_at
                     FROM feeds ORDER BY order_index ASC, url ASC",
                )?;
                let feeds = stmt
                    .query_map([], |row| Ok(feed_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(feeds)
            })
            .await?;
        Ok(feeds)
    }

    /// Delete a feed; items follow via FK cascade. No-op when the feed
    /// is already gone.
    pub async fn delete_feed(&self, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM feeds WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Stamp last_refreshed_at and overwrite title/favicon only when a
    /// non-empty parsed value is supplied.
    pub async fn update_feed_metadata(
        &self,
        id: i64,
        title: Option<String>,
        favicon_url: Option<String>,
        refreshed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE feeds SET
                         title = COALESCE(?1, title),
                         favicon_url = COALESCE(?2, favicon_url),
                         last_refreshed_at = ?3
                     WHERE id = ?4",
                    params![title, favicon_url, refreshed_at.to_rfc3339(), id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Item operations

    pub async fn get_items(&self, feed_id: i64) -> Result<Vec<Item>> {
        let items = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, feed_id, guid, link, title, summary, pub_date, is_read, is_starred, created_at
                     FROM items WHERE feed_id = ?1
                     ORDER BY pub_date DESC NULLS LAST, created_at DESC",
                )?;
                let items = stmt
                    .query_map(params![feed_id], |row| Ok(item_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    pub async fn get_item(&self, id: i64) -> Result<Option<Item>> {
        let item = self
            .conn
            .call(move |conn| {
                let item = conn
                    .query_row(
                        "SELECT id, feed_id, guid, link, title, summary, pub_date, is_read, is_starred, created_at
                         FROM items WHERE id = ?1",
                        params![id],
                        |row| Ok(item_from_row(row)),
                    )
                    .optional()?;
                Ok(item)
            })
            .await?;
        Ok(item)
    }

    /// Insert merged items in one transaction so readers never observe
    /// a half-applied refresh.
    pub async fn insert_items(
        &self,
        feed_id: i64,
        items: Vec<NewItem>,
        created_at: DateTime<Utc>,
    ) -> Result<usize> {
        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let count = items.len();
                for item in items {
                    tx.execute(
                        "INSERT INTO items (feed_id, guid, link, title, summary, pub_date, is_read, is_starred, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, ?7)",
                        params![
                            feed_id,
                            item.guid,
                            item.link,
                            item.title,
                            item.summary,
                            item.pub_date.map(|dt| dt.to_rfc3339()),
                            created_at.to_rfc3339(),
                        ],
                    )?;
                }
                tx.commit()?;
                Ok(count)
            })
            .await?;
        Ok(inserted)
    }

    /// Flip every unread item under the feed in one batch. Legacy rows
    /// with an unset flag count as unread.
    pub async fn mark_all_read(&self, feed_id: i64) -> Result<usize> {
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE items SET is_read = 1
                     WHERE feed_id = ?1 AND (is_read IS NULL OR is_read = 0)",
                    params![feed_id],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed)
    }

    /// Set the starred flag. The WHERE clause skips the write entirely
    /// when the value would not change; returns rows touched.
    pub async fn set_starred(&self, item_id: i64, starred: bool) -> Result<usize> {
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE items SET is_starred = ?1 WHERE id = ?2 AND is_starred != ?1",
                    params![starred, item_id],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed)
    }

    pub async fn toggle_starred(&self, item_id: i64) -> Result<usize> {
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE items SET is_starred = NOT is_starred WHERE id = ?1",
                    params![item_id],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed)
    }

    pub async fn unread_count(&self, feed_id: i64) -> Result<i64> {
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM items
                     WHERE feed_id = ?1 AND (is_read IS NULL OR is_read = 0)",
                    params![feed_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    // Settings (key-value store)

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        let value = self
            .conn
            .call(move |conn| {
                let value = conn
                    .query_row(
                        "SELECT value FROM settings WHERE key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await?;
        Ok(value)
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                    params![key, value],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn delete_setting(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn feed_from_row(row: &Row) -> Feed {
    Feed {
        id: row.get(0).unwrap(),
        url: row.get(1).unwrap(),
        title: row.get(2).unwrap(),
        favicon_url: row.get(3).unwrap(),
        last_refreshed_at: row
            .get::<_, Option<String>>(4)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        order_index: row.get(5).unwrap(),
        created_at: row
            .get::<_, String>(6)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    }
}

fn item_from_row(row: &Row) -> Item {
    Item {
        id: row.get(0).unwrap(),
        feed_id: row.get(1).unwrap(),
        guid: row.get(2).unwrap(),
        link: row.get(3).unwrap(),
        title: row.get(4).unwrap(),
        summary: row.get(5).unwrap(),
        pub_date: row
            .get::<_, Option<String>>(6)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        // NULL means a legacy unset flag: treated as unread.
        is_read: row.get::<_, Option<i64>>(7).unwrap().unwrap_or(0) != 0,
        is_starred: row.get::<_, i64>(8).unwrap() != 0,
        created_at: row
            .get::<_, String>(9)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    }
}
