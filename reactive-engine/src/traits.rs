use crate::types::{FetchError, Result, WorkItem};
use async_trait::async_trait;

/// Produces the work items for one pass of a pipeline.
///
/// Called once per cycle by the scheduler, so implementations that read an
/// external list should re-read it every time rather than caching it.
#[async_trait]
pub trait SourceEnumerator: Send + Sync {
    /// Human-readable name used in logs
    fn name(&self) -> String;

    /// Fails with `EngineError::SourceUnavailable` when the list can't be read.
    async fn produce(&self) -> Result<Vec<WorkItem>>;
}

/// Fetches the payload for a single work item.
///
/// Failures are reported per item and never abort sibling fetches.
#[async_trait]
pub trait FetchOperation: Send + Sync {
    type Payload: Send + 'static;

    async fn fetch(&self, item: &WorkItem) -> std::result::Result<Self::Payload, FetchError>;
}
