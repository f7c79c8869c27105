use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Anything the polling pipeline can hand to a store.
///
/// `id` is the canonical identity used for duplicate suppression across
/// polling cycles, e.g. an article's link.
pub trait Record {
    fn id(&self) -> &str;

    fn published_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// A single entry pulled out of a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub link: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl Article {
    pub fn new(link: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            title: title.into(),
            published_at: None,
        }
    }

    pub fn published(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }
}

impl Record for Article {
    fn id(&self) -> &str {
        &self.link
    }

    fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }
}

/// Membership store consulted by the re-poll scheduler.
///
/// The scheduler is the only writer. Persistence is entirely the
/// implementation's business.
#[async_trait]
pub trait SeenStore<R>: Send + Sync
where
    R: Record + Send + Sync,
{
    async fn exists(&self, id: &str) -> Result<bool>;

    async fn insert(&self, record: R) -> Result<()>;

    /// Most recently published records first, at most `limit` of them.
    async fn newest(&self, limit: usize) -> Result<Vec<R>>;
}
