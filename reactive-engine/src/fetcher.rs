use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::correlate::correlate;
use crate::limiter::InFlight;
use crate::pool::WorkerPool;
use crate::traits::FetchOperation;
use crate::types::{EngineError, FetchError, FetchResult, Result, WorkItem};

/// Runs a fetch operation over many items with at most `concurrency` in
/// flight.
///
/// Admission is a sliding window: the next item starts as soon as any
/// running fetch finishes. A fetch holds its slot until the work underneath
/// it is done, even when its caller has already given up on it through a
/// timeout or by dropping the result stream. Cloning shares the slots and the
/// in-flight gauge.
#[derive(Clone)]
pub struct BoundedFetcher {
    concurrency: usize,
    timeout: Option<Duration>,
    slots: Arc<Semaphore>,
    gauge: Arc<InFlight>,
}

impl BoundedFetcher {
    pub fn new(concurrency: usize) -> Result<Self> {
        if concurrency == 0 {
            return Err(EngineError::Config("fetch concurrency must be at least 1".into()));
        }
        if concurrency > Semaphore::MAX_PERMITS {
            return Err(EngineError::Config(format!(
                "fetch concurrency must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        Ok(Self {
            concurrency,
            timeout: None,
            slots: Arc::new(Semaphore::new(concurrency)),
            gauge: Arc::new(InFlight::new()),
        })
    }

    /// Fails any single fetch that takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn in_flight(&self) -> usize {
        self.gauge.current()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.gauge.peak()
    }

    /// Results in completion order.
    pub fn fetch_all<S, Op>(&self, items: S, op: Arc<Op>) -> BoxStream<'static, FetchResult<Op::Payload>>
    where
        S: Stream<Item = WorkItem> + Send + 'static,
        Op: FetchOperation + ?Sized + 'static,
    {
        let slots = self.slots.clone();
        let gauge = self.gauge.clone();
        let timeout = self.timeout;
        items
            .map(move |item| dispatch(item, op.clone(), slots.clone(), gauge.clone(), timeout))
            .buffer_unordered(self.concurrency)
            .boxed()
    }

    /// Same concurrency as [`fetch_all`](Self::fetch_all), but results come
    /// out in input order. A fast fetch queued behind a slow one is held back
    /// until the slow one finishes.
    pub fn fetch_ordered<S, Op>(&self, items: S, op: Arc<Op>) -> BoxStream<'static, FetchResult<Op::Payload>>
    where
        S: Stream<Item = WorkItem> + Send + 'static,
        Op: FetchOperation + ?Sized + 'static,
    {
        let slots = self.slots.clone();
        let gauge = self.gauge.clone();
        let timeout = self.timeout;
        items
            .map(move |item| dispatch(item, op.clone(), slots.clone(), gauge.clone(), timeout))
            .buffered(self.concurrency)
            .boxed()
    }

    pub async fn collect<I, Op>(&self, items: I, op: Arc<Op>) -> Vec<FetchResult<Op::Payload>>
    where
        I: IntoIterator<Item = WorkItem>,
        I::IntoIter: Send + 'static,
        Op: FetchOperation + ?Sized + 'static,
    {
        let results: Vec<_> = self.fetch_all(stream::iter(items), op).collect().await;
        let failed = results.iter().filter(|r| !r.is_ok()).count();
        info!(
            "Fetched {} items ({} failed, peak {} in flight)",
            results.len(),
            failed,
            self.peak_in_flight()
        );
        results
    }

    /// Like [`collect`](Self::collect), but a fetch rejected by a concurrency
    /// limiter fails the whole call. Other per-item failures stay in their
    /// results.
    pub async fn collect_strict<I, Op>(&self, items: I, op: Arc<Op>) -> Result<Vec<FetchResult<Op::Payload>>>
    where
        I: IntoIterator<Item = WorkItem>,
        I::IntoIter: Send + 'static,
        Op: FetchOperation + ?Sized + 'static,
    {
        let mut results = self.fetch_all(stream::iter(items), op);
        let mut collected = Vec::new();
        while let Some(result) = results.next().await {
            if let Err(FetchError::ConcurrencyExceeded { limit }) = &result.outcome {
                return Err(EngineError::ConcurrencyExceeded {
                    limit: *limit,
                    item: result.item.id.clone(),
                });
            }
            collected.push(result);
        }
        Ok(collected)
    }
}

async fn dispatch<Op>(
    item: WorkItem,
    op: Arc<Op>,
    slots: Arc<Semaphore>,
    gauge: Arc<InFlight>,
    timeout: Option<Duration>,
) -> FetchResult<Op::Payload>
where
    Op: FetchOperation + ?Sized + 'static,
{
    let target = item.clone();
    let result = correlate(item, async move {
        let slot = slots
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Task("fetch slots closed".into()))?;

        // The slot travels with the job, so abandoning the job below never
        // frees it early.
        let job = tokio::spawn(async move {
            let _slot = slot;
            let _in_flight = gauge.enter();
            op.fetch(&target).await
        });

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, job).await {
                Ok(joined) => joined,
                Err(_) => return Err(FetchError::Timeout(limit)),
            },
            None => job.await,
        };
        joined.map_err(|e| FetchError::Task(e.to_string()))?
    })
    .await;

    if let Some(e) = result.error() {
        match e {
            FetchError::ConcurrencyExceeded { .. } => warn!("Fetch of {} rejected: {}", result.item, e),
            _ => debug!("Fetch of {} failed: {}", result.item, e),
        }
    }
    result
}

/// Adapts a synchronous, possibly blocking function into a
/// [`FetchOperation`] that runs on a [`WorkerPool`].
pub struct BlockingFetch<F, P> {
    pool: Arc<WorkerPool>,
    func: Arc<F>,
    _payload: PhantomData<fn() -> P>,
}

impl<F, P> BlockingFetch<F, P>
where
    F: Fn(&WorkItem) -> std::result::Result<P, FetchError> + Send + Sync + 'static,
    P: Send + 'static,
{
    pub fn new(pool: Arc<WorkerPool>, func: F) -> Self {
        Self {
            pool,
            func: Arc::new(func),
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<F, P> FetchOperation for BlockingFetch<F, P>
where
    F: Fn(&WorkItem) -> std::result::Result<P, FetchError> + Send + Sync + 'static,
    P: Send + 'static,
{
    type Payload = P;

    async fn fetch(&self, item: &WorkItem) -> std::result::Result<P, FetchError> {
        let func = Arc::clone(&self.func);
        let item = item.clone();
        self.pool.run(move || func(&item)).await?
    }
}
