use std::fmt;
use std::time::Duration;

use url::Url;

pub use interfaces::defs::{Article, Record, SeenStore};

/// One unit of work: something to fetch, identified by its URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkItem {
    pub id: String,
    pub uri: Url,
}

impl WorkItem {
    pub fn new(uri: Url) -> Self {
        Self {
            id: uri.as_str().to_owned(),
            uri,
        }
    }

    pub fn parse(uri: &str) -> Result<Self> {
        Ok(Self::new(Url::parse(uri)?))
    }

    pub fn host(&self) -> Option<&str> {
        self.uri.host_str()
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// A fetched payload, or the reason there isn't one, still attached to the
/// item it was fetched for.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult<P> {
    pub item: WorkItem,
    pub outcome: std::result::Result<P, FetchError>,
}

impl<P> FetchResult<P> {
    pub fn new(item: WorkItem, outcome: std::result::Result<P, FetchError>) -> Self {
        Self { item, outcome }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn payload(&self) -> Option<&P> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&FetchError> {
        self.outcome.as_ref().err()
    }

    pub fn into_pair(self) -> (WorkItem, std::result::Result<P, FetchError>) {
        (self.item, self.outcome)
    }
}

/// Per-item failure. Travels inside [`FetchResult`] rather than aborting the
/// batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("malformed payload: {0}")]
    Format(String),

    #[error("too many concurrent fetches (limit {limit})")]
    ConcurrencyExceeded { limit: usize },

    #[error("worker pool: {0}")]
    Pool(String),

    #[error("fetch task failed: {0}")]
    Task(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("concurrency limit of {limit} exceeded while fetching {item}")]
    ConcurrencyExceeded { limit: usize, item: String },

    #[error("subscriber {0} unreachable")]
    SubscriberUnreachable(String),

    #[error("worker pool error: {0}")]
    Pool(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("store error: {0:#}")]
    Store(anyhow::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
