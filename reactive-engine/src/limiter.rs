use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::warn;

use crate::traits::FetchOperation;
use crate::types::{FetchError, WorkItem};

/// Counts fetches in flight and remembers the high-water mark.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard { gauge: self }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct InFlightGuard<'a> {
    gauge: &'a InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Hard ceiling on concurrent use of a resource.
///
/// Unlike a semaphore it never waits: going over the limit is an error.
#[derive(Debug)]
pub struct Throttle {
    limit: usize,
    current: AtomicUsize,
}

impl Throttle {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            current: AtomicUsize::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn try_enter(&self) -> Result<ThrottlePermit<'_>, FetchError> {
        let previous = self.current.fetch_add(1, Ordering::SeqCst);
        if previous >= self.limit {
            self.current.fetch_sub(1, Ordering::SeqCst);
            return Err(FetchError::ConcurrencyExceeded { limit: self.limit });
        }
        Ok(ThrottlePermit { throttle: self })
    }
}

pub struct ThrottlePermit<'a> {
    throttle: &'a Throttle,
}

impl Drop for ThrottlePermit<'_> {
    fn drop(&mut self) {
        self.throttle.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Wraps a fetch operation that refuses to run more than `limit` at a time.
pub struct Throttled<Op> {
    inner: Op,
    throttle: Throttle,
}

impl<Op> Throttled<Op> {
    pub fn new(inner: Op, limit: usize) -> Self {
        Self {
            inner,
            throttle: Throttle::new(limit),
        }
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }
}

#[async_trait]
impl<Op: FetchOperation> FetchOperation for Throttled<Op> {
    type Payload = Op::Payload;

    async fn fetch(&self, item: &WorkItem) -> Result<Self::Payload, FetchError> {
        let _permit = self.throttle.try_enter().inspect_err(|_| {
            warn!("Too many concurrent fetches, rejecting {}", item);
        })?;
        self.inner.fetch(item).await
    }
}
