//! Single-writer, many-reader broadcast with replay.
//!
//! Events live in one ring buffer. Every subscriber keeps its own cursor into
//! it, so history is never copied per subscriber and a publish never waits on
//! anybody. A subscriber that falls further behind than the ring holds loses
//! the oldest events it hadn't read yet and carries on from the oldest one
//! still buffered; nobody else notices.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::Stream;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::HubConfig;

pub struct Hub<T> {
    shared: Arc<Shared<T>>,
    notify: Arc<watch::Sender<u64>>,
}

impl<T> Clone for Hub<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            notify: self.notify.clone(),
        }
    }
}

struct Shared<T> {
    ring: Mutex<Ring<T>>,
    replay: usize,
    next_id: AtomicU64,
}

struct Ring<T> {
    events: VecDeque<T>,
    capacity: usize,
    /// Sequence number the next published event will get.
    head: u64,
    subscribers: BTreeSet<u64>,
}

impl<T> Ring<T> {
    fn oldest(&self) -> u64 {
        self.head - self.events.len() as u64
    }
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        // A panic while holding the lock can't leave the ring half-updated.
        self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone + Send> Hub<T> {
    /// `replay` events are handed to each new subscriber; on top of that a
    /// subscriber may lag up to `backlog` events before it starts losing
    /// them.
    pub fn new(replay: usize, backlog: usize) -> Self {
        let capacity = replay.saturating_add(backlog).max(1);
        let (notify, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                ring: Mutex::new(Ring {
                    events: VecDeque::new(),
                    capacity,
                    head: 0,
                    subscribers: BTreeSet::new(),
                }),
                replay,
                next_id: AtomicU64::new(1),
            }),
            notify: Arc::new(notify),
        }
    }

    pub fn from_config(config: &HubConfig) -> Self {
        Self::new(config.replay, config.backlog)
    }

    /// Appends `event` and wakes every subscriber. Returns its sequence
    /// number.
    pub fn publish(&self, event: T) -> u64 {
        let seq = {
            let mut ring = self.shared.lock();
            if ring.events.len() == ring.capacity {
                ring.events.pop_front();
            }
            ring.events.push_back(event);
            let seq = ring.head;
            ring.head += 1;
            seq
        };
        self.notify.send_replace(seq + 1);
        seq
    }

    /// Joins the stream. The subscription starts with up to `replay` of the
    /// most recent events, oldest first, then continues with everything
    /// published afterwards.
    pub fn subscribe(&self) -> Subscription<T> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (cursor, count) = {
            let mut ring = self.shared.lock();
            let backfill = ring.events.len().min(self.shared.replay) as u64;
            ring.subscribers.insert(id);
            (ring.head - backfill, ring.subscribers.len())
        };
        info!("Subscriber {} joined, {} connected", id, count);

        let changes = self.notify.subscribe();
        Subscription {
            id,
            cursor,
            dropped: 0,
            shared: self.shared.clone(),
            changes,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().subscribers.len()
    }

    /// Events that a subscriber joining now would be replayed.
    pub fn replay_snapshot(&self) -> Vec<T> {
        let ring = self.shared.lock();
        let skip = ring.events.len().saturating_sub(self.shared.replay);
        ring.events.iter().skip(skip).cloned().collect()
    }

    pub fn published(&self) -> u64 {
        self.shared.lock().head
    }
}

/// One subscriber's view of a [`Hub`].
///
/// Dropping it unregisters the subscriber. Once every `Hub` handle is gone
/// the subscription drains what is left in the buffer and then ends.
pub struct Subscription<T> {
    id: u64,
    cursor: u64,
    dropped: u64,
    shared: Arc<Shared<T>>,
    changes: watch::Receiver<u64>,
}

impl<T: Clone + Send> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Events this subscriber lost by falling too far behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Next event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        let ring = self.shared.lock();
        let oldest = ring.oldest();
        if self.cursor < oldest {
            let lost = oldest - self.cursor;
            self.dropped += lost;
            debug!("Subscriber {} fell behind, skipped {} events", self.id, lost);
            self.cursor = oldest;
        }
        if self.cursor >= ring.head {
            return None;
        }
        let event = ring.events[(self.cursor - oldest) as usize].clone();
        self.cursor += 1;
        Some(event)
    }

    /// Next event, waiting for one to be published if necessary. `None` once
    /// the hub is gone and everything buffered has been read.
    ///
    /// Cancel safe: an event is only consumed when it is returned.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            self.changes.borrow_and_update();
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if self.changes.changed().await.is_err() {
                return self.try_recv();
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = T> + Send
    where
        T: 'static,
    {
        futures::stream::unfold(self, |mut subscription| async move {
            let event = subscription.recv().await?;
            Some((event, subscription))
        })
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        let remaining = {
            let mut ring = self.shared.lock();
            ring.subscribers.remove(&self.id);
            ring.subscribers.len()
        };
        info!("Subscriber {} left, {} connected", self.id, remaining);
    }
}
