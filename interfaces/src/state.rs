use std::cmp::Reverse;
use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::defs::{Article, Record, SeenStore};

/// In-process store, mostly useful for tests and one-off runs.
pub struct MemorySeenStore<R> {
    inner: RwLock<MemoryInner<R>>,
}

struct MemoryInner<R> {
    ids: HashSet<String>,
    records: Vec<R>,
}

impl<R> MemorySeenStore<R> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryInner {
                ids: HashSet::new(),
                records: Vec::new(),
            }),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<R> Default for MemorySeenStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R> SeenStore<R> for MemorySeenStore<R>
where
    R: Record + Clone + Send + Sync + 'static,
{
    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.inner.read().await.ids.contains(id))
    }

    async fn insert(&self, record: R) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.ids.insert(record.id().to_owned()) {
            inner.records.push(record);
        }
        Ok(())
    }

    async fn newest(&self, limit: usize) -> Result<Vec<R>> {
        let inner = self.inner.read().await;
        // Later insertions win ties, so walk newest-first before the stable sort.
        let mut records: Vec<R> = inner.records.iter().rev().cloned().collect();
        records.sort_by_key(|r| Reverse(r.published_at()));
        records.truncate(limit);
        Ok(records)
    }
}

/// Article store backed by SQLite.
pub struct SqliteSeenStore {
    db: SqlitePool,
}

impl SqliteSeenStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        // Every connection to an in-memory database gets its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let db = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .with_context(|| format!("connecting to {database_url}"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                link TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                published_at TEXT,
                stored_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&db)
        .await
        .context("creating articles table")?;

        info!("Article store ready at {}", database_url);
        Ok(Self { db })
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM articles")
            .fetch_one(&self.db)
            .await?;
        Ok(row.try_get("n")?)
    }
}

fn article_from_row(row: SqliteRow) -> std::result::Result<Article, sqlx::Error> {
    Ok(Article {
        link: row.try_get("link")?,
        title: row.try_get("title")?,
        published_at: row.try_get::<Option<DateTime<Utc>>, _>("published_at")?,
    })
}

#[async_trait]
impl SeenStore<Article> for SqliteSeenStore {
    async fn exists(&self, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM articles WHERE link = ?1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.is_some())
    }

    async fn insert(&self, record: Article) -> Result<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO articles (link, title, published_at, stored_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (link) DO NOTHING
            "#,
        )
        .bind(&record.link)
        .bind(&record.title)
        .bind(record.published_at)
        .bind(Utc::now())
        .execute(&self.db)
        .await?
        .rows_affected();

        debug!("Stored {} ({} row)", record.link, inserted);
        Ok(())
    }

    async fn newest(&self, limit: usize) -> Result<Vec<Article>> {
        let articles = sqlx::query(
            r#"
            SELECT link, title, published_at
            FROM articles
            ORDER BY published_at IS NULL, published_at DESC, stored_at DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch(&self.db)
        .and_then(|row| futures::future::ready(article_from_row(row)))
        .try_collect::<Vec<Article>>()
        .await?;

        Ok(articles)
    }
}
