use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

/// Count per key. Ordered so snapshots compare and print deterministically.
pub type AggregateState<K> = BTreeMap<K, u64>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    /// Each window reports only what arrived during it.
    #[default]
    PerWindow,
    /// Each window reports running totals since the aggregator started.
    Cumulative,
}

/// A sealed window. Owned and immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowSnapshot<K> {
    /// Position of the window in the stream, starting at 0.
    pub index: u64,
    pub sealed_at: DateTime<Utc>,
    pub mode: WindowMode,
    /// Increments that arrived during this window, in either mode.
    pub events: u64,
    pub counts: AggregateState<K>,
}

impl<K> WindowSnapshot<K> {
    /// Sum of all counts in the snapshot.
    pub fn total(&self) -> u64 {
        self.counts.values().fold(0u64, |acc, n| acc.saturating_add(*n))
    }
}

/// Tumbling-window counter.
///
/// Increments go into the open window; [`seal`](Self::seal) closes it, hands
/// out a snapshot and opens the next one. Running totals are kept in both
/// modes, only the snapshot contents differ.
#[derive(Debug)]
pub struct WindowAggregator<K> {
    mode: WindowMode,
    index: u64,
    open: AggregateState<K>,
    events: u64,
    totals: AggregateState<K>,
}

impl<K: Ord + Clone> WindowAggregator<K> {
    pub fn new(mode: WindowMode) -> Self {
        Self {
            mode,
            index: 0,
            open: BTreeMap::new(),
            events: 0,
            totals: BTreeMap::new(),
        }
    }

    pub fn mode(&self) -> WindowMode {
        self.mode
    }

    pub fn record(&mut self, key: K, count: u64) {
        let slot = self.open.entry(key).or_insert(0);
        *slot = slot.saturating_add(count);
        self.events += 1;
    }

    pub fn record_all<I>(&mut self, increments: I)
    where
        I: IntoIterator<Item = (K, u64)>,
    {
        for (key, count) in increments {
            self.record(key, count);
        }
    }

    /// Whether the open window has seen anything yet.
    pub fn is_empty(&self) -> bool {
        self.events == 0
    }

    /// Running totals over every sealed window.
    pub fn totals(&self) -> &AggregateState<K> {
        &self.totals
    }

    pub fn seal(&mut self) -> WindowSnapshot<K> {
        let window = std::mem::take(&mut self.open);
        let events = std::mem::take(&mut self.events);

        for (key, count) in &window {
            let slot = self.totals.entry(key.clone()).or_insert(0);
            *slot = slot.saturating_add(*count);
        }

        let counts = match self.mode {
            WindowMode::PerWindow => window,
            WindowMode::Cumulative => self.totals.clone(),
        };

        let snapshot = WindowSnapshot {
            index: self.index,
            sealed_at: Utc::now(),
            mode: self.mode,
            events,
            counts,
        };
        self.index += 1;
        debug!(
            "Sealed window {} with {} events over {} keys",
            snapshot.index,
            events,
            snapshot.counts.len()
        );
        snapshot
    }
}

pub type WindowStream<K> = ReceiverStream<WindowSnapshot<K>>;

/// Cuts `events` into windows of `period` on the runtime clock.
///
/// A window is sealed on every tick, empty or not, so the output doubles as a
/// rate signal. When `events` ends the partial window is sealed if it holds
/// anything and the stream finishes. Dropping the returned stream stops the
/// aggregation and drops `events`.
pub fn windowed<K, S>(events: S, period: Duration, mode: WindowMode) -> WindowStream<K>
where
    K: Ord + Clone + Send + 'static,
    S: Stream<Item = (K, u64)> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);

    tokio::spawn(async move {
        let mut aggregator = WindowAggregator::new(mode);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(events);

        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some((key, count)) => aggregator.record(key, count),
                    None => {
                        if !aggregator.is_empty() {
                            let _ = tx.send(aggregator.seal()).await;
                        }
                        info!("Event source finished, windowing stopped");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if tx.send(aggregator.seal()).await.is_err() {
                        break;
                    }
                }
                _ = tx.closed() => {
                    debug!("Window consumer went away");
                    break;
                }
            }
        }
    });

    ReceiverStream::new(rx)
}
