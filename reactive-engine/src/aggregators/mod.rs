pub mod ranking;
pub mod window;

pub use ranking::{ranked, top_n, RankedSnapshot, TopRanker};
pub use window::{windowed, AggregateState, WindowAggregator, WindowMode, WindowSnapshot, WindowStream};
