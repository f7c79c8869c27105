use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::aggregators::WindowMode;
use crate::types::{EngineError, Result};

/// Top-level engine configuration.
///
/// Every section has defaults, so a config file only needs the fields it
/// changes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub log_level: LogLevel,
    pub fetch: FetchConfig,
    pub pool: PoolConfig,
    pub poll: PollConfig,
    pub window: WindowConfig,
    pub hub: HubConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// HTTP settings for the feed fetch operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_feed_size_mb: usize,
    pub follow_redirects: bool,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "reactive-engine/0.1".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 5,
            max_feed_size_mb: 10,
            follow_redirects: true,
            max_redirects: 5,
        }
    }
}

/// Elastic worker pool used for blocking fetches.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub name: String,
    /// Upper bound on worker threads. Threads are only started on demand.
    pub max_threads: usize,
    /// Jobs allowed to wait for a thread once all of them are busy.
    pub queue_capacity: usize,
    /// Idle threads are retired after this long.
    pub keep_alive_seconds: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "fetch".to_string(),
            max_threads: 60,
            queue_capacity: 600,
            keep_alive_seconds: 60,
        }
    }
}

impl PoolConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub period_seconds: u64,
    pub concurrency: usize,
    pub fetch_timeout_seconds: Option<u64>,
    pub sources_file: Option<PathBuf>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            period_seconds: 30,
            concurrency: 50,
            fetch_timeout_seconds: None,
            sources_file: None,
        }
    }
}

impl PollConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_seconds)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_seconds.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub duration_millis: u64,
    pub mode: WindowMode,
    pub top: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            duration_millis: 1_000,
            mode: WindowMode::Cumulative,
            top: 10,
        }
    }
}

impl WindowConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_millis)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Events replayed to a subscriber when it joins.
    pub replay: usize,
    /// How far a subscriber may fall behind before it starts losing events.
    pub backlog: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            replay: 5,
            backlog: 256,
        }
    }
}

impl EngineConfig {
    /// Reads a JSON config file, or returns the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let data = std::fs::read_to_string(path)?;
                let config: EngineConfig = serde_json::from_str(&data)?;
                info!("Loaded configuration from {}", path.display());
                config
            }
            None => EngineConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool.max_threads == 0 {
            return Err(EngineError::Config("pool.max_threads must be at least 1".into()));
        }
        if self.poll.concurrency == 0 {
            return Err(EngineError::Config("poll.concurrency must be at least 1".into()));
        }
        if self.poll.period_seconds == 0 {
            return Err(EngineError::Config("poll.period_seconds must be at least 1".into()));
        }
        if self.window.duration_millis == 0 {
            return Err(EngineError::Config("window.duration_millis must be at least 1".into()));
        }
        if self.pool.max_threads.checked_add(self.pool.queue_capacity).is_none() {
            return Err(EngineError::Config("pool.max_threads + pool.queue_capacity is too large".into()));
        }
        if self.hub.replay.checked_add(self.hub.backlog).is_none() {
            return Err(EngineError::Config("hub.replay + hub.backlog is too large".into()));
        }
        Ok(())
    }
}
