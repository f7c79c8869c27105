use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::{stream, StreamExt};
use interfaces::SqliteSeenStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, error, info, warn};

use reactive_engine::config::LogLevel;
use reactive_engine::{
    emoji, ranked, windowed, Article, BlockingFetch, BoundedFetcher, EngineConfig, FeedFetch, FetchError, Hub,
    ListFileSource, PollScheduler, SeenStore, SourceEnumerator, StaticSource, WorkItem, WorkerPool,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Concurrent fetching, polling and live ranking over streams", long_about = None)]
struct Cli {
    /// JSON configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl a batch of synthetic domains through the blocking worker pool.
    Crawl {
        #[arg(long, default_value_t = 500)]
        count: usize,
        /// Fetches in flight at once. Defaults to the pool's thread count.
        #[arg(long)]
        concurrency: Option<usize>,
        /// Simulated latency of each fetch.
        #[arg(long, default_value_t = 100)]
        delay_millis: u64,
    },
    /// Poll a list of feeds periodically and store new articles.
    Poll {
        /// File with one feed URL per line.
        #[arg(long)]
        sources: Option<PathBuf>,
        #[arg(long)]
        period_seconds: Option<u64>,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Rank keys from JSON count maps read line by line from stdin.
    Top {
        #[arg(long)]
        window_millis: Option<u64>,
        #[arg(long)]
        top: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;
    let level = cli.log_level.unwrap_or(config.log_level);
    tracing_subscriber::fmt().with_max_level(tracing::Level::from(level)).init();

    match cli.command {
        Command::Crawl {
            count,
            concurrency,
            delay_millis,
        } => crawl(&config, count, concurrency, Duration::from_millis(delay_millis)).await,
        Command::Poll {
            sources,
            period_seconds,
            concurrency,
        } => {
            let mut config = config;
            if let Some(path) = sources {
                config.poll.sources_file = Some(path);
            }
            if let Some(period) = period_seconds {
                config.poll.period_seconds = period;
            }
            if let Some(concurrency) = concurrency {
                config.poll.concurrency = concurrency;
            }
            config.validate()?;
            poll(&config).await
        }
        Command::Top { window_millis, top } => {
            let mut config = config;
            if let Some(millis) = window_millis {
                config.window.duration_millis = millis;
            }
            if let Some(top) = top {
                config.window.top = top;
            }
            config.validate()?;
            rank_stdin(&config).await
        }
    }
}

async fn crawl(config: &EngineConfig, count: usize, concurrency: Option<usize>, delay: Duration) -> Result<()> {
    let pool = Arc::new(WorkerPool::new(&config.pool)?);
    let fetcher = BoundedFetcher::new(concurrency.unwrap_or(config.pool.max_threads))?;
    let operation = Arc::new(BlockingFetch::new(
        pool.clone(),
        move |item: &WorkItem| -> std::result::Result<String, FetchError> {
            std::thread::sleep(delay);
            Ok(format!("<html><title>{}</title></html>", item.uri))
        },
    ));

    let source = StaticSource::synthetic(count);
    let items = source.produce().await?;
    info!("Crawling {} domains, {} at a time", items.len(), fetcher.concurrency());

    let started = Instant::now();
    let results = fetcher.collect(items, operation).await;

    let mut matched = 0;
    for result in &results {
        match (result.item.host(), result.payload()) {
            (Some(host), Some(page)) if page.contains(host) => matched += 1,
            (_, Some(_)) => warn!("Payload for {} belongs to another item", result.item),
            (_, None) => {}
        }
    }

    println!(
        "Crawled {} domains in {:?}: {} matched their payload, peak {} in flight",
        results.len(),
        started.elapsed(),
        matched,
        fetcher.peak_in_flight()
    );
    Ok(())
}

async fn poll(config: &EngineConfig) -> Result<()> {
    let path = config
        .poll
        .sources_file
        .clone()
        .context("no sources file given, pass --sources or set poll.sources_file")?;

    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string());
    let store: Arc<dyn SeenStore<Article>> = Arc::new(SqliteSeenStore::connect(&database_url).await?);

    let mut fetcher = BoundedFetcher::new(config.poll.concurrency)?;
    if let Some(timeout) = config.poll.fetch_timeout() {
        fetcher = fetcher.with_timeout(timeout);
    }

    let hub = Hub::<Article>::from_config(&config.hub);
    let mut arrivals = hub.subscribe();
    tokio::spawn(async move {
        while let Some(article) = arrivals.recv().await {
            info!("New article: {} ({})", article.title, article.link);
        }
        debug!("Article log finished");
    });

    let scheduler = PollScheduler::new(
        Arc::new(ListFileSource::new(path)),
        fetcher,
        Arc::new(FeedFetch::new(config.fetch.clone())?),
        store.clone(),
        config.poll.period(),
    )
    .with_hub(hub.clone());
    let handle = scheduler.spawn();

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutting down after {} cycles", handle.ticks());
    handle.stop().await;

    for article in store.newest(10).await? {
        let published = article
            .published_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!("{}  {}  {}", published, article.title, article.link);
    }
    Ok(())
}

/// One stdin line as increments. Lines look like `{"1F600": 2, "2764": 1}`.
fn parse_counts(line: std::io::Result<String>) -> Option<Vec<(String, u64)>> {
    let line = match line {
        Ok(line) => line,
        Err(e) => {
            error!("Reading stdin: {}", e);
            return None;
        }
    };
    if line.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<HashMap<String, u64>>(&line) {
        Ok(counts) => Some(counts.into_iter().collect()),
        Err(e) => {
            warn!("Skipping malformed line: {}", e);
            None
        }
    }
}

async fn rank_stdin(config: &EngineConfig) -> Result<()> {
    let lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    let increments = lines
        .filter_map(|line| futures::future::ready(parse_counts(line)))
        .flat_map(stream::iter);

    let windows = windowed(increments, config.window.duration(), config.window.mode).inspect(|window| {
        debug!(
            "Window {}: {} events, {} counted",
            window.index,
            window.events,
            window.total()
        )
    });
    let rankings = ranked(windows, config.window.top);

    let hub = Hub::from_config(&config.hub);
    let mut subscription = hub.subscribe();
    let printer = tokio::spawn(async move {
        let mut renderings = emoji::ChangedRenderings::new();
        while let Some(snapshot) = subscription.recv().await {
            let Some(rendered) = renderings.next(&snapshot) else {
                continue;
            };
            match serde_json::to_string(&snapshot.entries) {
                Ok(json) => println!("{}  {}", rendered, json),
                Err(e) => error!("Encoding ranking: {}", e),
            }
        }
    });

    futures::pin_mut!(rankings);
    while let Some(snapshot) = rankings.next().await {
        hub.publish(snapshot);
    }
    drop(hub);

    printer.await.context("ranking printer failed")?;
    Ok(())
}
