use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{FeedError, Result};

pub const MIN_REFRESH_INTERVAL_MINUTES: u32 = 1;
pub const MAX_REFRESH_INTERVAL_MINUTES: u32 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Scheduler tick interval in minutes; clamped to [1, 60].
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_minutes: u32,

    /// Target time for one full round-robin pass over all feeds.
    #[serde(default = "default_target_cycle")]
    pub target_cycle_minutes: u32,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("feedsync");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("feeds.db").to_string_lossy().to_string()
}

fn default_refresh_interval() -> u32 {
    5
}

fn default_target_cycle() -> u32 {
    60
}

/// Clamp a configured interval into the supported range.
pub fn normalized_refresh_interval(minutes: u32) -> u32 {
    minutes.clamp(MIN_REFRESH_INTERVAL_MINUTES, MAX_REFRESH_INTERVAL_MINUTES)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            refresh_interval_minutes: default_refresh_interval(),
            target_cycle_minutes: default_target_cycle(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config =
                toml::from_str(&content).map_err(|e| FeedError::Config(e.to_string()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| FeedError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("feedsync")
            .join("config.toml")
    }
}
