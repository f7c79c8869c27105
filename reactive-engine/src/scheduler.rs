use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::fetcher::BoundedFetcher;
use crate::hub::Hub;
use crate::traits::{FetchOperation, SourceEnumerator};
use crate::types::{EngineError, Record, Result, SeenStore};

/// Outcome of one polling cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub sources: usize,
    pub fetched: usize,
    pub failed: usize,
    pub stored: usize,
    pub duplicates: usize,
}

/// Re-runs enumerate → fetch → store on a fixed period.
///
/// Records whose id the store already knows are dropped, new ones are
/// stored and, when a hub is attached, published to it.
pub struct PollScheduler<Op, R>
where
    R: Record + Send + Sync,
{
    source: Arc<dyn SourceEnumerator>,
    fetcher: BoundedFetcher,
    operation: Arc<Op>,
    store: Arc<dyn SeenStore<R>>,
    hub: Option<Hub<R>>,
    period: Duration,
}

impl<Op, R> PollScheduler<Op, R>
where
    Op: FetchOperation + 'static,
    Op::Payload: IntoIterator<Item = R>,
    <Op::Payload as IntoIterator>::IntoIter: Send,
    R: Record + Clone + Send + Sync + 'static,
{
    pub fn new(
        source: Arc<dyn SourceEnumerator>,
        fetcher: BoundedFetcher,
        operation: Arc<Op>,
        store: Arc<dyn SeenStore<R>>,
        period: Duration,
    ) -> Self {
        Self {
            source,
            fetcher,
            operation,
            store,
            hub: None,
            period,
        }
    }

    pub fn with_hub(mut self, hub: Hub<R>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let items = self.source.produce().await?;
        let mut report = CycleReport {
            sources: items.len(),
            ..CycleReport::default()
        };

        let mut results = self.fetcher.fetch_all(stream::iter(items), self.operation.clone());
        while let Some(result) = results.next().await {
            let (item, outcome) = result.into_pair();
            let payload = match outcome {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Skipping {} this cycle: {}", item, e);
                    report.failed += 1;
                    continue;
                }
            };
            report.fetched += 1;

            for record in payload {
                if self.store.exists(record.id()).await.map_err(EngineError::Store)? {
                    report.duplicates += 1;
                    continue;
                }
                self.store.insert(record.clone()).await.map_err(EngineError::Store)?;
                report.stored += 1;
                if let Some(hub) = &self.hub {
                    hub.publish(record);
                }
            }
        }

        Ok(report)
    }

    /// Starts polling in the background. The first cycle runs immediately.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let stats = Arc::new(SchedulerStats::default());
        let task_stats = stats.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Polling {} every {:?}", self.source.name(), self.period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }

                task_stats.ticks.fetch_add(1, Ordering::Relaxed);
                let outcome = tokio::select! {
                    outcome = self.run_cycle() => outcome,
                    _ = shutdown_rx.changed() => break,
                };

                match outcome {
                    Ok(report) => {
                        task_stats.stored.fetch_add(report.stored as u64, Ordering::Relaxed);
                        info!(
                            "Cycle done: {} sources, {} fetched, {} failed, {} new, {} already seen",
                            report.sources, report.fetched, report.failed, report.stored, report.duplicates
                        );
                    }
                    Err(e) => {
                        task_stats.failed_cycles.fetch_add(1, Ordering::Relaxed);
                        error!("Polling cycle for {} failed, retrying next tick: {}", self.source.name(), e);
                    }
                }
            }

            info!("Stopped polling {}", self.source.name());
        });

        SchedulerHandle { shutdown, task, stats }
    }
}

#[derive(Debug, Default)]
struct SchedulerStats {
    ticks: AtomicU64,
    failed_cycles: AtomicU64,
    stored: AtomicU64,
}

/// Control handle for a running scheduler. Dropping it stops the scheduler.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    stats: Arc<SchedulerStats>,
}

impl SchedulerHandle {
    pub fn ticks(&self) -> u64 {
        self.stats.ticks.load(Ordering::Relaxed)
    }

    pub fn failed_cycles(&self) -> u64 {
        self.stats.failed_cycles.load(Ordering::Relaxed)
    }

    pub fn stored(&self) -> u64 {
        self.stats.stored.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Asks the scheduler to stop and waits until it has.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Scheduler task ended abnormally: {}", e);
        }
    }
}
