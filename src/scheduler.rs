use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::normalized_refresh_interval;
use crate::store::FeedStore;

/// The single code path both refresh triggers converge on.
#[async_trait]
pub trait FeedRefreshing: Send + Sync {
    async fn refresh_cycle(&self);
}

#[async_trait]
impl FeedRefreshing for FeedStore {
    /// One scheduled cycle: a round-robin batch sized from the store's
    /// tuning, so refresh work spreads over the target cycle instead of
    /// hammering every feed on every tick.
    async fn refresh_cycle(&self) {
        let tuning = self.tuning();
        if let Err(e) = self
            .refresh_round_robin_batch(tuning.target_cycle, tuning.tick)
            .await
        {
            tracing::warn!(error = %e, "scheduled refresh cycle failed");
        }
    }
}

/// Periodic timer intended for while the application is frontmost.
/// Ticks at the exact interval.
pub struct ForegroundScheduler {
    handle: Option<JoinHandle<()>>,
}

impl ForegroundScheduler {
    pub fn new() -> Self {
        Self { handle: None }
    }

    pub fn schedule(&mut self, interval: Duration, target: Arc<dyn FeedRefreshing>) {
        self.invalidate();
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so scheduling
            // does not trigger an instant refresh.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                target.refresh_cycle().await;
            }
        }));
    }

    pub fn invalidate(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Default for ForegroundScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ForegroundScheduler {
    fn drop(&mut self) {
        self.invalidate();
    }
}

/// Background activity scheduler with a tolerance window: late ticks
/// are skipped rather than bunched, so a machine waking from sleep runs
/// one cycle instead of a burst.
pub struct BackgroundScheduler {
    handle: Option<JoinHandle<()>>,
}

impl BackgroundScheduler {
    pub fn new() -> Self {
        Self { handle: None }
    }

    pub fn schedule(&mut self, interval: Duration, target: Arc<dyn FeedRefreshing>) {
        self.invalidate();
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                target.refresh_cycle().await;
            }
        }));
    }

    pub fn invalidate(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Default for BackgroundScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        self.invalidate();
    }
}

/// Owns both schedulers and points them at one refresh target.
pub struct AutoRefreshController {
    target: Arc<dyn FeedRefreshing>,
    foreground: ForegroundScheduler,
    background: BackgroundScheduler,
    is_started: bool,
}

impl AutoRefreshController {
    pub fn new(target: Arc<dyn FeedRefreshing>) -> Self {
        Self {
            target,
            foreground: ForegroundScheduler::new(),
            background: BackgroundScheduler::new(),
            is_started: false,
        }
    }

    pub fn start(&mut self, refresh_interval_minutes: u32) {
        if self.is_started {
            return;
        }
        self.is_started = true;
        self.reschedule(refresh_interval_minutes);
    }

    pub fn stop(&mut self) {
        self.foreground.invalidate();
        self.background.invalidate();
        self.is_started = false;
    }

    pub fn update_refresh_interval(&mut self, minutes: u32) {
        if !self.is_started {
            return;
        }
        self.reschedule(minutes);
    }

    fn reschedule(&mut self, refresh_interval_minutes: u32) {
        let minutes = normalized_refresh_interval(refresh_interval_minutes);
        let interval = Duration::from_secs(u64::from(minutes) * 60);
        self.foreground.schedule(interval, Arc::clone(&self.target));
        self.background.schedule(interval, Arc::clone(&self.target));
    }
}
