use std::sync::Arc;
use std::time::Duration;

use feedsync::config::Config;
use feedsync::db::Repository;
use feedsync::error::Result;
use feedsync::feed::DocumentFetcher;
use feedsync::scheduler::AutoRefreshController;
use feedsync::store::{FeedStore, RefreshTuning};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = Config::load()?;

    let repo = Repository::new(&config.db_path).await?;
    let tuning = RefreshTuning {
        target_cycle: Duration::from_secs(u64::from(config.target_cycle_minutes) * 60),
        tick: Duration::from_secs(u64::from(config.refresh_interval_minutes) * 60),
    };
    let store = Arc::new(FeedStore::new(
        repo,
        Arc::new(DocumentFetcher::new()),
        tuning,
    ));

    match args.get(1).map(String::as_str) {
        Some("--add") => {
            let url = args.get(2).map(String::as_str).unwrap_or_default();
            let feed = store.add_feed(url).await?;
            let stats = store.refresh(&feed).await?;
            println!(
                "Added {} ({} fetched, {} new, {} deduped)",
                feed.url, stats.fetched, stats.inserted, stats.deduped
            );
        }
        Some("--import") => {
            let url = args.get(2).map(String::as_str).unwrap_or_default();
            let result = store.import_opml(url).await?;
            println!(
                "Imported {} feeds ({} new, {} existing, {} non-https skipped)",
                result.imported(),
                result.added,
                result.existing,
                result.skipped_non_https
            );
            for (url, reason) in &result.refresh_failures {
                eprintln!("  refresh failed for {url}: {reason}");
            }
        }
        Some("--refresh") => {
            store.refresh_all_feeds().await;
            let feeds = store.fetch_feeds_for_refresh().await?;
            println!("Refreshed {} feeds", feeds.len());
        }
        Some("--watch") => {
            let mut controller = AutoRefreshController::new(store.clone());
            controller.start(config.refresh_interval_minutes);
            println!(
                "Watching feeds every {} minutes (ctrl-c to stop)",
                config.refresh_interval_minutes
            );
            tokio::signal::ctrl_c().await?;
            controller.stop();
        }
        _ => {
            let feeds = store.fetch_feeds_for_refresh().await?;
            if feeds.is_empty() {
                println!("No feeds. Add one with: feedsync --add <https-url>");
                return Ok(());
            }
            for feed in feeds {
                let unread = store.unread_count(feed.id).await?;
                let title = feed.title.as_deref().unwrap_or(feed.url.as_str());
                println!("{unread:>5}  {title}");
            }
        }
    }

    Ok(())
}
