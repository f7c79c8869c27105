use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use interfaces::MemorySeenStore;
use reactive_engine::{
    Article, BoundedFetcher, EngineError, FetchError, FetchOperation, Hub, PollScheduler, SeenStore,
    SourceEnumerator, StaticSource, WorkItem,
};
use tracing::info;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .try_init()
            .ok();
    });
}

/// Every feed carries the same two stories on every fetch.
struct TwoStories;

#[async_trait]
impl FetchOperation for TwoStories {
    type Payload = Vec<Article>;

    async fn fetch(&self, item: &WorkItem) -> Result<Vec<Article>, FetchError> {
        Ok(vec![
            Article::new(format!("{}story/1", item.uri), "first"),
            Article::new(format!("{}story/2", item.uri), "second"),
        ])
    }
}

/// Fails its second call and gains a feed from the third call on.
struct FlakySource {
    calls: AtomicUsize,
    base: Vec<WorkItem>,
    extra: WorkItem,
}

#[async_trait]
impl SourceEnumerator for FlakySource {
    fn name(&self) -> String {
        "flaky".to_string()
    }

    async fn produce(&self) -> reactive_engine::Result<Vec<WorkItem>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match call {
            1 => Ok(self.base.clone()),
            2 => Err(EngineError::SourceUnavailable("subscription list offline".into())),
            _ => {
                let mut items = self.base.clone();
                items.push(self.extra.clone());
                Ok(items)
            }
        }
    }
}

/// Knows nothing and can't remember anything.
struct BrokenStore;

#[async_trait]
impl SeenStore<Article> for BrokenStore {
    async fn exists(&self, _id: &str) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn insert(&self, _record: Article) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }

    async fn newest(&self, _limit: usize) -> anyhow::Result<Vec<Article>> {
        Ok(Vec::new())
    }
}

fn feeds(count: usize) -> Vec<WorkItem> {
    StaticSource::synthetic(count).items().to_vec()
}

#[tokio::test]
async fn test_repoll_stores_each_record_once() {
    init_tracing();

    let store = Arc::new(MemorySeenStore::<Article>::new());
    let hub = Hub::new(0, 64);
    let mut arrivals = hub.subscribe();
    let scheduler = PollScheduler::new(
        Arc::new(StaticSource::new("fixed", feeds(5))),
        BoundedFetcher::new(3).unwrap(),
        Arc::new(TwoStories),
        store.clone(),
        Duration::from_secs(30),
    )
    .with_hub(hub.clone());

    let first = scheduler.run_cycle().await.unwrap();
    assert_eq!(first.sources, 5);
    assert_eq!(first.fetched, 5);
    assert_eq!(first.stored, 10);
    assert_eq!(first.duplicates, 0);

    let second = scheduler.run_cycle().await.unwrap();
    info!("Second cycle: {:?}", second);
    assert_eq!(second.stored, 0);
    assert_eq!(second.duplicates, 10);
    assert_eq!(store.len().await, 10);

    let mut published = 0;
    while arrivals.try_recv().is_some() {
        published += 1;
    }
    assert_eq!(published, 10);
    assert_eq!(hub.published(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_survives_failing_cycle() {
    init_tracing();

    let base = feeds(3);
    let extra = WorkItem::parse("http://late.example.org/feed").unwrap();
    let store = Arc::new(MemorySeenStore::<Article>::new());
    let scheduler = PollScheduler::new(
        Arc::new(FlakySource {
            calls: AtomicUsize::new(0),
            base,
            extra: extra.clone(),
        }),
        BoundedFetcher::new(2).unwrap(),
        Arc::new(TwoStories),
        store.clone(),
        Duration::from_secs(30),
    );

    let handle = scheduler.spawn();
    // Ticks at 0s, 30s, 60s and 90s.
    tokio::time::sleep(Duration::from_secs(95)).await;

    assert_eq!(handle.ticks(), 4);
    assert_eq!(handle.failed_cycles(), 1);
    assert_eq!(handle.stored(), 8);
    assert!(handle.is_running());
    assert!(store.exists(&format!("{}story/1", extra.uri)).await.unwrap());

    handle.stop().await;
    assert_eq!(store.len().await, 8);
}

#[tokio::test(start_paused = true)]
async fn test_stopped_scheduler_runs_no_more_cycles() {
    init_tracing();

    let store = Arc::new(MemorySeenStore::<Article>::new());
    let handle = PollScheduler::new(
        Arc::new(StaticSource::new("fixed", feeds(2))),
        BoundedFetcher::new(2).unwrap(),
        Arc::new(TwoStories),
        store.clone(),
        Duration::from_secs(10),
    )
    .spawn();

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(handle.ticks(), 2);
    handle.stop().await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(store.len().await, 4);
}

#[tokio::test]
async fn test_store_failure_fails_the_cycle() {
    init_tracing();

    let scheduler = PollScheduler::new(
        Arc::new(StaticSource::new("fixed", feeds(1))),
        BoundedFetcher::new(1).unwrap(),
        Arc::new(TwoStories),
        Arc::new(BrokenStore),
        Duration::from_secs(30),
    );

    match scheduler.run_cycle().await {
        Err(EngineError::Store(e)) => assert!(e.to_string().contains("disk full")),
        other => panic!("expected a store error, got {:?}", other),
    }
}
