pub mod aggregators;
pub mod config;
pub mod correlate;
pub mod emoji;
pub mod feed;
pub mod fetcher;
pub mod hub;
pub mod limiter;
pub mod pool;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod traits;
pub mod types;

pub use aggregators::{ranked, windowed, RankedSnapshot, TopRanker, WindowAggregator, WindowMode, WindowSnapshot};
pub use config::EngineConfig;
pub use correlate::{collect_map, correlate, CorrelatedMap};
pub use feed::FeedFetch;
pub use fetcher::{BlockingFetch, BoundedFetcher};
pub use hub::{Hub, Subscription};
pub use limiter::{InFlight, Throttle, Throttled};
pub use pool::WorkerPool;
pub use scheduler::{CycleReport, PollScheduler, SchedulerHandle};
pub use source::{ListFileSource, StaticSource};
pub use traits::{FetchOperation, SourceEnumerator};
pub use types::*;
