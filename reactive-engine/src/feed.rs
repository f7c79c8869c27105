use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoff;
use feed_rs::parser;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::traits::FetchOperation;
use crate::types::{Article, EngineError, FetchError, Result, WorkItem};

/// Downloads a feed over HTTP and turns its entries into [`Article`]s.
pub struct FeedFetch {
    client: Client,
    config: FetchConfig,
}

impl FeedFetch {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let redirects = if config.follow_redirects {
            reqwest::redirect::Policy::limited(config.max_redirects)
        } else {
            reqwest::redirect::Policy::none()
        };

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(redirects)
            .build()
            .map_err(|e| EngineError::Config(format!("building HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    async fn download(&self, item: &WorkItem) -> std::result::Result<String, FetchError> {
        let response = self
            .client
            .get(item.uri.clone())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let limit = self.max_body_bytes();
        if let Some(length) = response.content_length() {
            if length as usize > limit {
                return Err(FetchError::Format(format!(
                    "feed is {} bytes, limit is {} MB",
                    length, self.config.max_feed_size_mb
                )));
            }
        }

        let body = response.text().await.map_err(|e| self.classify(e))?;
        if body.len() > limit {
            return Err(FetchError::Format(format!(
                "feed is {} bytes, limit is {} MB",
                body.len(),
                self.config.max_feed_size_mb
            )));
        }
        Ok(body)
    }

    /// Largest response body accepted, in bytes.
    pub fn max_body_bytes(&self) -> usize {
        self.config.max_feed_size_mb.saturating_mul(1024 * 1024)
    }

    fn classify(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(Duration::from_secs(self.config.timeout_seconds))
        } else {
            FetchError::Network(e.to_string())
        }
    }

    fn backoff(&self) -> ExponentialBackoff<backoff::SystemClock> {
        let delay = Duration::from_secs(self.config.retry_delay_seconds);
        ExponentialBackoff {
            current_interval: delay,
            initial_interval: delay,
            max_interval: delay * 32,
            multiplier: 2.0,
            max_elapsed_time: Some(delay * 60),
            ..Default::default()
        }
    }
}

fn is_retryable(e: &FetchError) -> bool {
    match e {
        FetchError::Network(_) | FetchError::Timeout(_) => true,
        FetchError::Status(code) => {
            StatusCode::from_u16(*code).is_ok_and(|s| s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS)
        }
        _ => false,
    }
}

#[async_trait]
impl FetchOperation for FeedFetch {
    type Payload = Vec<Article>;

    async fn fetch(&self, item: &WorkItem) -> std::result::Result<Vec<Article>, FetchError> {
        debug!("Fetching feed {}", item);
        let mut backoff = self.backoff();
        let mut attempt = 0;

        let body = loop {
            match self.download(item).await {
                Ok(body) => break body,
                Err(e) if attempt < self.config.max_retries && is_retryable(&e) => {
                    let Some(delay) = backoff.next_backoff() else {
                        return Err(e);
                    };
                    attempt += 1;
                    warn!("Attempt {} for {} failed ({}), retrying in {:?}", attempt, item, e, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        let articles = parse_feed(&body)?;
        info!("Fetched {} articles from {}", articles.len(), item);
        Ok(articles)
    }
}

/// Some publishers declare the Atom namespace with `https`, which strict
/// parsers reject.
fn apply_atom_namespace_fix(body: &str) -> String {
    body.replace("https://www.w3.org/2005/Atom", "http://www.w3.org/2005/Atom")
}

/// Parses an RSS or Atom document. Entries without a link are dropped.
pub fn parse_feed(body: &str) -> std::result::Result<Vec<Article>, FetchError> {
    let fixed = apply_atom_namespace_fix(body);
    let feed = parser::parse(fixed.as_bytes()).map_err(|e| FetchError::Format(e.to_string()))?;

    let articles = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let link = entry.links.first()?.href.clone();
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());
            let published_at = entry.published.or(entry.updated);
            Some(Article {
                link,
                title,
                published_at,
            })
        })
        .collect();

    Ok(articles)
}
