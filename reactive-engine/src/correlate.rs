use std::collections::HashMap;
use std::future::Future;

use futures::{Stream, StreamExt};

use crate::types::{FetchError, FetchResult, WorkItem};

/// Pairs `item` with the outcome of `fetch`.
///
/// The item is bound to its own fetch before that fetch starts, so however
/// the surrounding stream reorders completions the pair stays intact. Never
/// rebuild pairs afterwards by zipping the input list with an unordered
/// result stream.
pub async fn correlate<P, Fut>(item: WorkItem, fetch: Fut) -> FetchResult<P>
where
    Fut: Future<Output = Result<P, FetchError>>,
{
    let outcome = fetch.await;
    FetchResult::new(item, outcome)
}

/// Correlated results keyed by the item they came from.
#[derive(Debug)]
pub struct CorrelatedMap<P> {
    pub payloads: HashMap<WorkItem, P>,
    pub failures: HashMap<WorkItem, FetchError>,
}

impl<P> CorrelatedMap<P> {
    pub fn len(&self) -> usize {
        self.payloads.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, item: &WorkItem) -> Option<&P> {
        self.payloads.get(item)
    }
}

/// Drains a result stream into a [`CorrelatedMap`].
pub async fn collect_map<P, S>(results: S) -> CorrelatedMap<P>
where
    S: Stream<Item = FetchResult<P>>,
{
    let mut map = CorrelatedMap {
        payloads: HashMap::new(),
        failures: HashMap::new(),
    };

    futures::pin_mut!(results);
    while let Some(result) = results.next().await {
        match result.into_pair() {
            (item, Ok(payload)) => {
                map.payloads.insert(item, payload);
            }
            (item, Err(e)) => {
                map.failures.insert(item, e);
            }
        }
    }
    map
}
