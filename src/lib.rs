//! A headless feed synchronization engine: validated feed URLs,
//! retrying HTTPS fetches, RSS/Atom/JSON Feed parsing, dedup-keyed
//! merges into SQLite, OPML bulk import and a round-robin refresh
//! scheduler.

pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod models;
pub mod scheduler;
pub mod store;

pub use config::Config;
pub use error::{FeedError, NetworkError, Result};
pub use models::{Feed, ImportResult, Item, RefreshStats};
pub use store::{FeedStore, RefreshTuning, StoreEvent};
