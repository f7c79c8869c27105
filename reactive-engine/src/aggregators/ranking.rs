use std::cmp::Ordering;

use futures::{future, Stream, StreamExt};
use serde::Serialize;
use tracing::debug;

use super::window::{AggregateState, WindowSnapshot};

/// The highest counts, largest first. Equal counts are ordered by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedSnapshot<K> {
    pub entries: Vec<(K, u64)>,
}

impl<K> RankedSnapshot<K> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(key, _)| key)
    }
}

fn by_rank<K: Ord>(a: &(K, u64), b: &(K, u64)) -> Ordering {
    b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

pub fn top_n<K: Ord + Clone>(state: &AggregateState<K>, n: usize) -> RankedSnapshot<K> {
    let mut entries: Vec<(K, u64)> = state.iter().map(|(key, count)| (key.clone(), *count)).collect();
    if entries.len() > n {
        entries.select_nth_unstable_by(n, by_rank);
        entries.truncate(n);
    }
    entries.sort_by(by_rank);
    RankedSnapshot { entries }
}

/// Ranks successive states and only reports a ranking when it differs from
/// the last one reported.
#[derive(Debug)]
pub struct TopRanker<K> {
    limit: usize,
    last: Option<RankedSnapshot<K>>,
}

impl<K: Ord + Clone> TopRanker<K> {
    pub fn new(limit: usize) -> Self {
        Self { limit, last: None }
    }

    pub fn offer(&mut self, state: &AggregateState<K>) -> Option<RankedSnapshot<K>> {
        let ranking = top_n(state, self.limit);
        if self.last.as_ref() == Some(&ranking) {
            debug!("Top {} unchanged", self.limit);
            return None;
        }
        self.last = Some(ranking.clone());
        Some(ranking)
    }

    pub fn last(&self) -> Option<&RankedSnapshot<K>> {
        self.last.as_ref()
    }
}

/// Top `n` of every window, skipping repeats. Feed it cumulative windows to
/// rank running totals.
pub fn ranked<K, S>(windows: S, n: usize) -> impl Stream<Item = RankedSnapshot<K>>
where
    K: Ord + Clone,
    S: Stream<Item = WindowSnapshot<K>>,
{
    let mut ranker = TopRanker::new(n);
    windows.filter_map(move |window| future::ready(ranker.offer(&window.counts)))
}
